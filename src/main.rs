// bridge/src/main.rs

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use editor_bridge::config::{Config, ConfigManager};
use editor_bridge::diff::DiffEngine;
use editor_bridge::editor::EditorSurface;
use editor_bridge::selection::SelectionTracker;
use editor_bridge::shim::ShimEditor;
use editor_bridge::tools::{default_registry, ToolDeps};
use editor_bridge::{server, ToolRegistry};

#[derive(Parser)]
#[command(name = "editor-bridge", version, about = "Headless editor bridge for AI coding assistants")]
struct Args {
    /// Workspace root used for config layering and workspace folders
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Skip config files and run from built-in defaults
    #[arg(long)]
    no_config: bool,
    /// Override the scanned port range, e.g. 11000-11099
    #[arg(long)]
    ports: Option<String>,
}

fn parse_ports(spec: &str) -> anyhow::Result<(u16, u16)> {
    let (lo, hi) = spec
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("expected MIN-MAX, got '{spec}'"))?;
    Ok((lo.trim().parse()?, hi.trim().parse()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = if args.no_config {
        Arc::new(ConfigManager::ephemeral(Config::default()))
    } else {
        Arc::new(ConfigManager::load(&args.workspace)?)
    };

    let level = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| cfg.get().log.level.clone())
        .unwrap_or_else(|| "info".into());
    tracing_subscriber::fmt().with_env_filter(level).init();

    {
        let mut patch = Config::default();
        if let Some(spec) = &args.ports {
            let (lo, hi) = parse_ports(spec)?;
            patch.server.port_min = lo;
            patch.server.port_max = hi;
        }
        if cfg.get().workspace.folders.is_empty() {
            patch.workspace.folders = vec![args.workspace.canonicalize()?];
        }
        cfg.apply_runtime_overlay(patch)?;
    }

    let editor: Arc<dyn EditorSurface> = Arc::new(ShimEditor::new());
    let engine = DiffEngine::new(editor.clone(), cfg.clone());
    let selection = SelectionTracker::new(cfg.get().selection.debounce_ms);
    let registry: Arc<ToolRegistry> = Arc::new(default_registry(&ToolDeps {
        engine: engine.clone(),
        editor,
        selection,
        cfg: cfg.clone(),
    }));

    let running = server::start(cfg, registry).await?;
    info!(port = running.port(), "editor-bridge ready; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    // pending reviews resolve as rejected so no assistant is left hanging
    engine.shutdown().await;
    running.stop().await;
    Ok(())
}
