use anyhow::{Context, Result};
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::{process::Stdio, sync::Arc};
use tokio::process::Command;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod health;
mod sources;
mod ui;

use crate::audio::{ProcessPipeline, SessionRegistry};
use crate::bot::{ChannelNotifier, MusicBot};
use crate::config::Config;
use crate::sources::{TrackResolver, YouTubeClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_player=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Player v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let resolver = TrackResolver::new(Arc::new(YouTubeClient::new(config.fetch_tool.clone())));
    let pipeline = Arc::new(ProcessPipeline::new(config.pipeline_settings()));
    let notifier = Arc::new(ChannelNotifier::new(Arc::new(Http::new(&config.discord_token))));
    let registry = Arc::new(SessionRegistry::new(
        pipeline,
        notifier.clone(),
        config.controller_options(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(config.clone(), registry.clone(), resolver, notifier);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .context("no se pudo crear el cliente de Discord")?;

    if config.health_port != 0 {
        let registry = registry.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = health::run(port, registry).await {
                error!("❌ Health check detenido: {:?}", e);
            }
        });
    }

    // Manejar shutdown graceful: ningún proceso ni archivo temporal queda vivo
    let shard_manager = client.shard_manager.clone();
    let shutdown_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_registry.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    registry.shutdown_all().await;
    Ok(())
}

async fn tool_available(tool: &str, version_flag: &str) -> bool {
    match Command::new(tool)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            warn!("⚠️ No se pudo ejecutar {}: {}", tool, e);
            false
        }
    }
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let fetch = tool_available(&config.fetch_tool, "--version").await;
    let transcode = tool_available(&config.transcode_tool, "-version").await;

    if fetch && transcode {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!(
            "Dependencias faltantes: {}={} {}={}",
            config.fetch_tool,
            fetch,
            config.transcode_tool,
            transcode
        );
    }
}
