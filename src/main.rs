use agent_stream::{
    Config, CpalSpeaker, MicrophoneFactory, SessionController, SessionEvent, WebSocketConnector,
};
use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stream text and voice to a conversational agent
#[derive(Debug, Parser)]
#[command(name = "agent-stream", version)]
struct Args {
    /// Config file (without extension)
    #[arg(long, default_value = "config/agent-stream")]
    config: String,

    /// Agent server `host[:port]`, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Start in voice mode
    #[arg(long)]
    audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(host) = args.host {
        cfg.server.host = host;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Agent server: {}", cfg.server.host);

    let (controller, handle, mut events) = SessionController::new(
        cfg.session_config(),
        Arc::new(WebSocketConnector::new(cfg.server.queue_depth)),
        Arc::new(MicrophoneFactory),
        Arc::new(CpalSpeaker::new(
            cfg.audio.playback_sample_rate,
            cfg.audio.playback_queue,
        )),
    );

    let controller_task = tokio::spawn(controller.run());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    handle.start(args.audio).await?;
    println!("Type a message and press Enter. Commands: /voice, /start [voice], /stop, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/voice" => handle.toggle_audio().await?,
            "/stop" => handle.stop().await?,
            "/start" => handle.start(false).await?,
            "/start voice" => handle.start(true).await?,
            text => handle.send_text(text).await?,
        }
    }

    handle.shutdown().await?;
    let stats = controller_task.await?;
    info!("Final session stats: {}", serde_json::to_string(&stats)?);

    printer.abort();
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::TextChunk { content, is_final } => {
            if *is_final {
                println!("\ragent: {}", content);
            } else {
                print!("\ragent: {}", content);
                std::io::stdout().flush().ok();
            }
        }
        SessionEvent::StatusChanged { text } => println!("[{}]", text),
        SessionEvent::Connected {
            session_id,
            audio_enabled,
        } => println!(
            "[session {} open, {} mode]",
            session_id,
            if *audio_enabled { "voice" } else { "text" }
        ),
        SessionEvent::Disconnected { reason } => println!("[disconnected: {}]", reason),
        SessionEvent::AgentSpeakingChanged { .. } => {}
        SessionEvent::ImageReceived {
            kind,
            data,
            filename,
        } => println!(
            "[image {} ({} bytes) {}]",
            kind.mime_type(),
            data.len(),
            filename.as_deref().unwrap_or("")
        ),
        SessionEvent::AudioPermissionError { reason } => {
            println!("[audio unavailable: {}. Check microphone permissions.]", reason)
        }
        SessionEvent::SessionFailed { attempts } => {
            println!("[gave up after {} attempts, use /start to retry]", attempts)
        }
    }
}
