use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use scorealign::{start_server, Args};
use std::sync::mpsc;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.server_config();

    info!(
        "Starting scorealign with the {:?} matcher on {}:{}",
        args.matcher, config.host, config.port
    );
    let (handle, addr) = start_server(config, args.matcher())
        .with_context(|| format!("failed to start server on {}:{}", args.host, args.port))?;
    info!("Serving POST /align on http://{addr}");

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, shutting down");
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    // Blocks until Ctrl-C; a closed channel means the handler is gone too.
    let _ = stop_rx.recv();
    handle.stop();
    Ok(())
}
