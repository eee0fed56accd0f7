use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::future::Future;
use tracing::{error, info};

use super::{commands::BotCommand, MusicBot};
use crate::{
    audio::{EnqueueOutcome, PlaybackState, QueueSnapshot, SessionHandle},
    error::PlaybackError,
    sources::{Track, TrackResolver},
    ui::embeds,
};

/// Quién pidió qué, y dónde
pub struct Invocation {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub user_name: String,
}

/// Respuesta lista para enviarse por cualquiera de las dos superficies
pub enum Reply {
    Text(String),
    Embed(CreateEmbed),
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .unwrap_or_default();

    let Some(parsed) = BotCommand::parse(&command.data.name, query) else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Comando no reconocido")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    // Defer la respuesta ya que conectar y resolver puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let invocation = Invocation {
        guild_id,
        channel_id: command.channel_id,
        user_id: command.user.id,
        user_name: command.user.name.clone(),
    };

    let edit = match execute(ctx, bot, &invocation, parsed).await {
        Reply::Text(text) => EditInteractionResponse::new().content(text),
        Reply::Embed(embed) => EditInteractionResponse::new().embed(embed),
    };
    command.edit_response(&ctx.http, edit).await?;

    Ok(())
}

/// Maneja comandos con prefijo (`!play ...`)
pub async fn handle_message(ctx: &Context, message: Message, bot: &MusicBot) -> Result<()> {
    if message.author.bot {
        return Ok(());
    }
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };
    let Some(parsed) = BotCommand::from_message(&message.content, &bot.config.command_prefix) else {
        return Ok(());
    };

    info!(
        "📝 Comando {}{} usado por {} en guild {}",
        bot.config.command_prefix,
        parsed.name(),
        message.author.name,
        guild_id
    );

    let invocation = Invocation {
        guild_id,
        channel_id: message.channel_id,
        user_id: message.author.id,
        user_name: message.author.name.clone(),
    };

    let builder = match execute(ctx, bot, &invocation, parsed).await {
        Reply::Text(text) => CreateMessage::new().content(text),
        Reply::Embed(embed) => CreateMessage::new().embed(embed),
    };
    message
        .channel_id
        .send_message(&ctx.http, builder.reference_message(&message))
        .await?;

    Ok(())
}

/// Ejecuta el comando y convierte cualquier error en un mensaje concreto.
pub async fn execute(ctx: &Context, bot: &MusicBot, invocation: &Invocation, command: BotCommand) -> Reply {
    let name = command.name();
    let result = match command {
        BotCommand::Join => handle_join(ctx, bot, invocation).await,
        BotCommand::Leave => handle_leave(ctx, bot, invocation).await,
        BotCommand::Play(query) => handle_play(ctx, bot, invocation, &query).await,
        BotCommand::Skip => handle_skip(bot, invocation).await,
        BotCommand::Stop => handle_stop(bot, invocation).await,
        BotCommand::Queue => handle_queue(bot, invocation).await,
        BotCommand::Help => Ok(Reply::Embed(embeds::create_help_embed(&bot.config.command_prefix))),
    };

    result.unwrap_or_else(|e| {
        error!("Error manejando comando {} en guild {}: {:?}", name, invocation.guild_id, e);
        error_reply(&e)
    })
}

fn error_reply(e: &anyhow::Error) -> Reply {
    match e.downcast_ref::<PlaybackError>() {
        Some(err) => Reply::Text(err.user_message()),
        None => Reply::Embed(embeds::create_error_embed(
            "Error",
            "Ocurrió un error inesperado, inténtalo de nuevo",
        )),
    }
}

// Handlers específicos para cada comando

async fn handle_play(ctx: &Context, bot: &MusicBot, invocation: &Invocation, query: &str) -> Result<Reply> {
    if query.trim().is_empty() {
        return Ok(Reply::Text(format!(
            "ℹ️ Uso: `{}play <URL de YouTube o búsqueda>`",
            bot.config.command_prefix
        )));
    }

    // Sin sesión, el usuario tiene que estar en voz antes de buscar nada
    if bot.registry.get(invocation.guild_id).is_none() {
        bot.user_voice_channel(ctx, invocation.guild_id, invocation.user_id)?;
    }

    let (track, session) = resolve_then_session(&bot.resolver, query, &invocation.user_name, || {
        bot.ensure_session(ctx, invocation.guild_id, invocation.user_id)
    })
    .await?;
    bot.notifier.remember(invocation.guild_id, invocation.channel_id);

    let position = match session.enqueue(track.clone()).await? {
        EnqueueOutcome::Started => None,
        EnqueueOutcome::Queued { position } => Some(position),
    };

    Ok(Reply::Embed(embeds::create_track_added_embed(&track, position)))
}

/// Una consulta que no se resuelve no conecta al bot ni crea sesión.
async fn resolve_then_session<F, Fut>(
    resolver: &TrackResolver,
    query: &str,
    requester: &str,
    session: F,
) -> Result<(Track, SessionHandle)>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<SessionHandle>>,
{
    let track = resolver.resolve(query, requester).await?;
    let session = session().await?;
    Ok((track, session))
}

async fn handle_skip(bot: &MusicBot, invocation: &Invocation) -> Result<Reply> {
    let session = bot
        .registry
        .get(invocation.guild_id)
        .ok_or(PlaybackError::NotConnected)?;

    let skipped = session.skip().await?;
    Ok(Reply::Text(format!("⏭️ Saltada: **{}**", skipped.title())))
}

async fn handle_stop(bot: &MusicBot, invocation: &Invocation) -> Result<Reply> {
    let session = bot
        .registry
        .get(invocation.guild_id)
        .ok_or(PlaybackError::NotConnected)?;

    let cleared = session.stop().await?;
    Ok(Reply::Text(format!(
        "⏹️ Reproducción detenida y cola limpiada ({} canciones)",
        cleared
    )))
}

async fn handle_queue(bot: &MusicBot, invocation: &Invocation) -> Result<Reply> {
    let snapshot = match bot.registry.get(invocation.guild_id) {
        Some(session) => session.snapshot().await?,
        None => QueueSnapshot {
            state: PlaybackState::Idle,
            playing: None,
            queue: Vec::new(),
            consecutive_failures: 0,
        },
    };

    Ok(Reply::Embed(embeds::create_queue_embed(&snapshot)))
}

async fn handle_join(ctx: &Context, bot: &MusicBot, invocation: &Invocation) -> Result<Reply> {
    let channel_id = bot.user_voice_channel(ctx, invocation.guild_id, invocation.user_id)?;
    bot.join_voice_channel(ctx, invocation.guild_id, channel_id).await?;

    Ok(Reply::Text(format!("🔊 Conectado a <#{}>", channel_id)))
}

async fn handle_leave(ctx: &Context, bot: &MusicBot, invocation: &Invocation) -> Result<Reply> {
    bot.leave_voice_channel(ctx, invocation.guild_id).await?;

    Ok(Reply::Text("👋 Desconectado del canal de voz".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MockMusicSource, TrackMetadata};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    fn search_source(results: Vec<TrackMetadata>) -> TrackResolver {
        let mut source = MockMusicSource::new();
        source.expect_is_valid_url().return_const(false);
        source.expect_source_name().return_const("YouTube");
        source.expect_search().returning(move |_, _| Ok(results.clone()));
        TrackResolver::new(Arc::new(source))
    }

    #[tokio::test]
    async fn unresolved_query_never_touches_the_session() {
        let resolver = search_source(Vec::new());
        let joined = AtomicBool::new(false);

        let err = resolve_then_session(&resolver, "zzzz no existe", "dana", || async {
            joined.store(true, Ordering::SeqCst);
            Err(anyhow::anyhow!("no debía conectarse"))
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PlaybackError>(),
            Some(PlaybackError::ResolutionFailed { .. })
        ));
        assert!(!joined.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn resolved_query_then_asks_for_session() {
        let resolver = search_source(vec![TrackMetadata {
            title: "lofi beats".into(),
            url: Some("https://youtu.be/lofi".into()),
            duration: None,
        }]);
        let joined = AtomicBool::new(false);

        let err = resolve_then_session(&resolver, "lofi", "dana", || async {
            joined.store(true, Ordering::SeqCst);
            Err(PlaybackError::NotInVoiceChannel.into())
        })
        .await
        .unwrap_err();

        assert!(joined.load(Ordering::SeqCst));
        assert!(matches!(
            err.downcast_ref::<PlaybackError>(),
            Some(PlaybackError::NotInVoiceChannel)
        ));
    }

    #[test]
    fn playback_errors_reply_with_their_message() {
        let err = anyhow::Error::from(PlaybackError::NotInVoiceChannel);
        match error_reply(&err) {
            Reply::Text(text) => assert_eq!(text, PlaybackError::NotInVoiceChannel.user_message()),
            Reply::Embed(_) => panic!("se esperaba texto"),
        }
    }

    #[test]
    fn unknown_errors_get_generic_embed() {
        let err = anyhow::anyhow!("boom");
        assert!(matches!(error_reply(&err), Reply::Embed(_)));
    }
}
