//! Line-oriented live scene client.
//!
//! Run with: cargo run -p livescene-console [CONFIG.json]
//!
//! Each line is a prompt for a new scene, or one of:
//! - `/modify <prompt>` - change the current scene
//! - `/copy` - copy the current scene code
//! - `/resize <width> <height>` - resize the render container
//! - `/scene` - print the current scene graph
//! - `/quit`
//!
//! Scenes render into an in-memory backend, so this runs without a display.

mod clipboard;
mod config;

use std::{path::PathBuf, sync::Arc};

use futures::StreamExt;
use livescene_core::{
    GenerationTransport, Notice, RenderHost, SurfaceSize, headless::HeadlessBackend,
    headless::HeadlessSurface,
};
use livescene_sandbox::ScriptSandbox;
use livescene_session::{IntervalScheduler, SessionManager};
use livescene_transport::DualChannel;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{clipboard::SystemClipboard, config::ConsoleConfig};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Generate(String),
    Modify(String),
    Copy,
    Resize(SurfaceSize),
    Scene,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Generate(line.to_string()));
    };
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    match name {
        "modify" => Ok(Command::Modify(args.to_string())),
        "copy" => Ok(Command::Copy),
        "scene" => Ok(Command::Scene),
        "quit" | "exit" => Ok(Command::Quit),
        "resize" => {
            let mut dims = args.split_whitespace().map(str::parse::<u32>);
            match (dims.next(), dims.next(), dims.next()) {
                (Some(Ok(width)), Some(Ok(height)), None) => {
                    Ok(Command::Resize(SurfaceSize::new(width, height)))
                }
                _ => Err("usage: /resize <width> <height>".to_string()),
            }
        }
        other => Err(format!("unknown command: /{other}")),
    }
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Validation(text) | Notice::Info(text) => println!("{text}"),
        Notice::Failure(text) => println!("! {text}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ConsoleConfig::load(config_path.as_deref())?;
    tracing::debug!(?config, "Loaded config");

    let backend = Arc::new(HeadlessBackend::new());
    let surface = Arc::new(HeadlessSurface::new(config.surface));
    let scheduler = Arc::new(IntervalScheduler::new(config.frame_interval()));
    let host = RenderHost::new(backend.clone(), surface.clone(), scheduler);

    let manager = SessionManager::new(
        DualChannel::connect(config.channel.clone()),
        ScriptSandbox::with_limits(config.sandbox.clone()),
        host,
        Arc::new(SystemClipboard),
    );

    let mut notices = manager.notices().history_plus_stream();
    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.next().await {
            print_notice(&notice);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };

        let result = match command {
            Command::Generate(prompt) => {
                tracing::debug!(channel = ?manager.transport().state(), "Generating");
                manager.on_generate_intent(&prompt).await
            }
            Command::Modify(prompt) => manager.on_modify_intent(&prompt).await,
            Command::Copy => manager.on_copy_intent().await,
            Command::Resize(size) => {
                surface.set_size(size);
                manager.on_resize_intent()
            }
            Command::Scene => {
                match manager.current_session() {
                    Some(session) => println!(
                        "{}",
                        serde_json::to_string_pretty(&backend.describe(session.scene))?
                    ),
                    None => println!("No scene yet."),
                }
                Ok(())
            }
            Command::Quit => break,
        };

        match result {
            Ok(()) => {
                if let Some(session) = manager.current_session() {
                    tracing::info!(session = %session.id, "Scene ready");
                }
            }
            // Already reported as a notice.
            Err(e) => tracing::debug!("Intent not completed: {e}"),
        }
    }

    printer.abort();
    Ok(())
}
