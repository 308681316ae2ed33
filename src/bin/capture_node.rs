//! capture_node - still-image camera node
//!
//! Boots the camera and storage, serves the HTTP interface and the serial
//! console from one service loop, and exits cleanly on Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use capture_node::{config::NodeConfig, console::Console, runtime::Runtime};

#[derive(Parser, Debug)]
#[command(author, version, about = "Still-image camera node with console and HTTP control")]
struct Args {
    /// Config file (.toml or JSON).
    #[arg(long, env = "CAPTURE_NODE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory that stands in for the removable card.
    #[arg(long, value_name = "DIR")]
    storage_root: Option<PathBuf>,

    /// HTTP listen address, or "off".
    #[arg(long, value_name = "ADDR")]
    http_addr: Option<String>,

    /// Do not read commands from stdin.
    #[arg(long)]
    no_console: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = NodeConfig::load_from(args.config.as_deref())?;
    if let Some(root) = args.storage_root {
        config.storage.root = root;
    }
    if let Some(addr) = args.http_addr {
        config.http_addr = if addr.eq_ignore_ascii_case("off") {
            None
        } else {
            Some(addr)
        };
    }

    let console = if args.no_console {
        None
    } else {
        Some(Console::with_stdin(std::io::stdout(), config.burst_defaults()?)?)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {e}"))?;

    let mut runtime = Runtime::boot(&config, console)?;
    runtime.run(&shutdown)
}
