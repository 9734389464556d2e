use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

use open_music_stream::{
    audio::SessionRegistry,
    bot::MusicBot,
    config::Config,
    sources::{
        build_http_client, CobaltResolver, DirectUrlResolver, InvidiousResolver, OdesliClient,
        ResolutionChain, SoundCloudResolver, YtDlpResolver,
    },
    voice::SongbirdConnector,
};

fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_stream=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Stream v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("⚙️ {}", config.summary());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("open-music-worker")
        .enable_all()
        .build()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return runtime.block_on(health_check(&config));
    }

    runtime.block_on(run(config))
}

fn build_chain(config: &Config) -> Result<ResolutionChain> {
    let http = build_http_client(config.http_timeout())?;
    let timeout = config.http_timeout();

    let mut chain = ResolutionChain::new(config.max_playlist_size)
        .with_translator(Arc::new(OdesliClient::new(http.clone(), timeout)))
        .register(
            Arc::new(
                DirectUrlResolver::new(http.clone())
                    .allow_local_files(config.direct_allow_files),
            ),
            config.registration_for("direct"),
        )
        .register(
            Arc::new(SoundCloudResolver::new(http.clone(), timeout)),
            config.registration_for("soundcloud"),
        )
        .register(
            Arc::new(InvidiousResolver::new(
                http.clone(),
                config.invidious_instances.clone(),
                timeout,
            )),
            config.registration_for("youtube"),
        )
        .register(
            Arc::new(
                YtDlpResolver::new(config.ytdlp_path.clone(), config.ytdlp_cookies.clone())
                    .with_timeout(config.ytdlp_timeout()),
            ),
            config.registration_for("ytdlp"),
        );

    if let Some(cobalt_url) = &config.cobalt_url {
        chain = chain.register(
            Arc::new(CobaltResolver::new(
                http,
                cobalt_url.clone(),
                config.cobalt_api_key.clone(),
                timeout,
                config.prefetch_limit_bytes,
            )),
            config.registration_for("cobalt"),
        );
    }

    info!("🔗 Orden de resolución: {}", chain.resolver_names().join(" → "));
    Ok(chain)
}

async fn run(config: Config) -> Result<()> {
    let ytdlp = YtDlpResolver::new(config.ytdlp_path.clone(), config.ytdlp_cookies.clone())
        .with_timeout(config.ytdlp_timeout());
    match ytdlp.verify().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => warn!("⚠️ yt-dlp no disponible, ese backend fallará: {:#}", e),
    }

    let chain = Arc::new(build_chain(&config)?);
    let settings = config.controller_settings();

    let songbird = Songbird::serenity();
    let voice = Arc::new(SongbirdConnector::new(songbird.clone()));
    let (registry, events) = SessionRegistry::new(chain, voice, settings.clone());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(registry.clone(), config.command_prefix.clone());
    let forwarder = handler.event_forwarder(settings.inactivity_timeout);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    forwarder.spawn(client.http.clone(), events);

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let shutdown_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_registry.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let version = YtDlpResolver::new(config.ytdlp_path.clone(), None)
        .verify()
        .await?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}
