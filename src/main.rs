//! vt-client: VT terminal client
//!
//! Connects to a remote host through a terminal stream endpoint, relays
//! typed lines, and reports connection and configuration errors on stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::BufReader;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use vt_client::app::App;
use vt_client::config::{AppConfig, StoreKind};
use vt_client::config_store::{FileConfigStore, HttpConfigStore, SessionConfigStore};
use vt_client::controller::{ConnectionLifecycleController, ControllerOptions};
use vt_client::host_shell::{ConsoleShell, ShellEvent};
use vt_client::logging;
use vt_client::paths::VtPaths;
use vt_client::protocol::{LaunchMetadata, SecurityType};
use vt_client::session::WsTerminalSession;

/// VT terminal client
#[derive(Parser, Debug)]
#[command(name = "vt-client", version, about = "VT terminal client")]
struct Args {
    /// Config file (default: ~/.config/vt-client/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connect to this host instead of the stored settings
    #[arg(long)]
    host: Option<String>,

    /// Port to connect to (with --host)
    #[arg(short, long, default_value = "23")]
    port: String,

    /// telnet or ssh (with --host)
    #[arg(short, long, default_value = "telnet")]
    security: SecurityType,

    /// Terminal stream endpoint (ws://…)
    #[arg(long)]
    stream_url: Option<String>,

    /// Config service root (http://…)
    #[arg(long)]
    config_url: Option<String>,

    /// Where session settings are stored
    #[arg(long, value_parser = parse_store)]
    store: Option<StoreKind>,

    /// Launch metadata as JSON, e.g. '{"data":{"type":"connect",...}}'
    #[arg(long)]
    launch_metadata: Option<String>,
}

fn parse_store(s: &str) -> Result<StoreKind, String> {
    match s {
        "http" => Ok(StoreKind::Http),
        "file" => Ok(StoreKind::File),
        other => Err(format!("unknown store {other} (http|file)")),
    }
}

fn launch_metadata(args: &Args) -> Result<LaunchMetadata> {
    if let Some(raw) = &args.launch_metadata {
        return serde_json::from_str(raw).context("parse --launch-metadata");
    }
    let Some(host) = &args.host else {
        return Ok(LaunchMetadata::default());
    };
    serde_json::from_value(json!({
        "data": {
            "type": "connect",
            "connectionSettings": {
                "host": host,
                "port": args.port,
                "security": {"type": args.security.wire_code()},
            }
        }
    }))
    .context("build launch metadata")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let paths = VtPaths::resolve();
    if let Some(paths) = &paths {
        if let Err(e) = paths.ensure() {
            eprintln!("Note: could not create app directories: {e}");
        }
    }
    let _log_guard = logging::init(paths.as_ref());

    let config_path = args
        .config
        .clone()
        .or_else(|| paths.as_ref().map(VtPaths::config_file));
    let mut config = match &config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(url) = &args.stream_url {
        config.service.stream_url = url.clone();
    }
    if let Some(url) = &args.config_url {
        config.service.base_url = url.clone();
    }
    if let Some(store) = args.store {
        config.service.store = store;
    }
    let launch = launch_metadata(&args)?;

    println!("vt-client v{}", env!("CARGO_PKG_VERSION"));
    info!(stream_url = %config.service.stream_url, "Starting");

    // Single-threaded: every controller callback runs on this thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let config_dir = paths
        .map(|p| p.config)
        .unwrap_or_else(|| std::env::temp_dir().join("vt-client"));

    runtime.block_on(async move {
        match config.service.store {
            StoreKind::Http => {
                let store = HttpConfigStore::new(
                    &config.service.base_url,
                    &config.service.plugin_id,
                    &config.service.scope,
                );
                run(config, launch, store).await
            }
            StoreKind::File => {
                let store = FileConfigStore::new(&config_dir);
                run(config, launch, store).await
            }
        }
    })
}

async fn run<C>(config: AppConfig, launch: LaunchMetadata, store: C) -> Result<()>
where
    C: SessionConfigStore + Send + Sync + 'static,
{
    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let (shell_tx, shell_rx) = mpsc::unbounded_channel();

    let controller = ConnectionLifecycleController::new(
        WsTerminalSession::new(session_tx),
        ConsoleShell::new(config.terminal.viewport()),
        ControllerOptions {
            stream_url: config.service.stream_url.clone(),
            renderer: config.terminal.renderer(),
            plugin_id: config.service.plugin_id.clone(),
        },
    );

    // Ctrl-C is the shell asking to discard the component.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if shell_tx.send(ShellEvent::Close(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
    });

    let mut app = App::new(controller, store, config.dispatcher);
    app.start(&launch);
    app.run(BufReader::new(tokio::io::stdin()), session_rx, shell_rx)
        .await
}
