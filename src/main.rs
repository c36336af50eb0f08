use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_voice::audio::{codec_by_name, FRAME_DURATION};
use loqa_voice::transport::{LoopbackConfig, LoopbackTransport, VoiceTransport};
use loqa_voice::{create_router, AppState, Config, PlaybackController, SessionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-voice")]
#[command(about = "Per-session voice playback and per-speaker recording")]
struct Args {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/loqa-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API over the loopback transport
    Serve,

    /// Play a file through the loopback transport
    Play {
        /// Audio file to play
        file: PathBuf,

        /// Session key
        #[arg(short, long, default_value = "local")]
        session_key: String,

        /// User whose channel receives the audio
        #[arg(short, long, default_value = "listener")]
        user_id: String,

        /// Send frames as fast as the pipeline allows instead of in real time
        #[arg(long)]
        unpaced: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Loqa Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match args.command {
        Command::Serve => serve(cfg).await,
        Command::Play {
            file,
            session_key,
            user_id,
            unpaced,
        } => play(cfg, file, session_key, user_id, unpaced).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let codec = codec_by_name(&cfg.voice.codec)?;
    let transport: Arc<dyn VoiceTransport> = Arc::new(LoopbackTransport::new(LoopbackConfig {
        pacing: Some(FRAME_DURATION),
        ..LoopbackConfig::default()
    }));

    let controller = Arc::new(PlaybackController::new(
        SessionRegistry::new(),
        transport,
        Arc::clone(&codec),
        cfg.voice.session_config(),
    ));
    let state = AppState::new(controller, codec, cfg.recording);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn play(
    cfg: Config,
    file: PathBuf,
    session_key: String,
    user_id: String,
    unpaced: bool,
) -> Result<()> {
    let codec = codec_by_name(&cfg.voice.codec)?;
    let loopback = Arc::new(LoopbackTransport::new(LoopbackConfig {
        pacing: (!unpaced).then_some(FRAME_DURATION),
        ..LoopbackConfig::default()
    }));
    loopback.set_voice_state(&session_key, &user_id, "loopback");

    let transport: Arc<dyn VoiceTransport> = Arc::clone(&loopback) as Arc<dyn VoiceTransport>;
    let controller = PlaybackController::new(
        SessionRegistry::new(),
        transport,
        codec,
        cfg.voice.session_config(),
    );

    info!("Playing {} ({} codec)", file.display(), cfg.voice.codec);
    controller.play(&session_key, &user_id, &file).await?;

    let frames = loopback
        .loopback_connection(&session_key)
        .map(|conn| conn.frames_sent())
        .unwrap_or(0);
    info!(
        "Sent {} frames ({:.1} seconds)",
        frames,
        frames as f64 * FRAME_DURATION.as_secs_f64()
    );

    Ok(())
}
