use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// A user command, whichever surface it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Join,
    Leave,
    Play(String),
    Skip,
    Stop,
    Queue,
    Help,
}

impl BotCommand {
    /// Construye el comando a partir del nombre y su argumento libre.
    pub fn parse(name: &str, args: &str) -> Option<Self> {
        let command = match name.to_lowercase().as_str() {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "play" => Self::Play(args.trim().to_string()),
            "skip" => Self::Skip,
            "stop" => Self::Stop,
            "queue" => Self::Queue,
            "help" => Self::Help,
            _ => return None,
        };
        Some(command)
    }

    /// `!play lofi beats` → `Play("lofi beats")`. `None` si el mensaje no
    /// empieza con el prefijo o el comando no existe.
    pub fn from_message(content: &str, prefix: &str) -> Option<Self> {
        let rest = content.strip_prefix(prefix)?.trim();
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args),
            None => (rest, ""),
        };
        Self::parse(name, args)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Play(_) => "play",
            Self::Skip => "skip",
            Self::Stop => "stop",
            Self::Queue => "queue",
            Self::Help => "help",
        }
    }
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        join_command(),
        leave_command(),
        help_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o la agrega a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL de YouTube o término de búsqueda",
            )
            .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Muestra los comandos disponibles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefixed_messages_parse() {
        assert_eq!(
            BotCommand::from_message("!play lofi  beats ", "!"),
            Some(BotCommand::Play("lofi  beats".into()))
        );
        assert_eq!(BotCommand::from_message("!SKIP", "!"), Some(BotCommand::Skip));
        assert_eq!(BotCommand::from_message("! queue", "!"), Some(BotCommand::Queue));
        assert_eq!(BotCommand::from_message("!play", "!"), Some(BotCommand::Play(String::new())));
    }

    #[test]
    fn other_messages_are_ignored() {
        assert_eq!(BotCommand::from_message("play lofi", "!"), None);
        assert_eq!(BotCommand::from_message("!dance", "!"), None);
        assert_eq!(BotCommand::from_message("", "!"), None);
    }

    #[test]
    fn custom_prefix() {
        assert_eq!(BotCommand::from_message("m?join", "m?"), Some(BotCommand::Join));
    }

    #[test]
    fn every_command_is_registered() {
        assert_eq!(all_commands().len(), 7);
        for name in ["join", "leave", "play", "skip", "stop", "queue", "help"] {
            let command = BotCommand::parse(name, "x").unwrap();
            assert_eq!(command.name(), name);
        }
    }
}
