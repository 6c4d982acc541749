use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf};

use editor_bridge::config::PartialConfig;

#[derive(Parser)]
#[command(name = "xtask", about = "Bridge workspace tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Validate a bridge.toml config file against the layered config shape
    ValidateConfig { file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::ValidateConfig { file } => validate_config(&file),
    }
}

fn validate_config(path: &PathBuf) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match toml::from_str::<PartialConfig>(&text) {
        Ok(cfg) => {
            let c = cfg.0;
            if c.server.port_min > c.server.port_max {
                eprintln!(
                    "Invalid: {} (server.port_min {} > server.port_max {})",
                    path.display(),
                    c.server.port_min,
                    c.server.port_max
                );
                std::process::exit(1);
            }
            println!("OK: {}", path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("Invalid: {}", path.display());
            eprintln!("- {e}");
            std::process::exit(1);
        }
    }
}
