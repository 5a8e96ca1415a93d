use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use onvif_core::config::{create_default_config_template, Config};
use onvif_core::platform::SimulatedPlatform;
use onvif_core::OnvifServer;

fn usage() -> ! {
    eprintln!("usage: onvifd [--config <path>] [--write-config <path>]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => config_path = Some(args.next().unwrap_or_else(|| usage()).into()),
            "--write-config" => {
                let path = args.next().unwrap_or_else(|| usage());
                create_default_config_template(&path)?;
                println!("wrote {}", path);
                return Ok(());
            }
            _ => usage(),
        }
    }

    let config = Config::load(config_path.as_deref())?;
    env_logger::Builder::from_default_env()
        .filter_level(config.log_level())
        .init();

    info!(
        "starting onvifd {} ({} {})",
        env!("CARGO_PKG_VERSION"),
        config.device.manufacturer,
        config.device.model
    );

    let server = OnvifServer::new(config, Arc::new(SimulatedPlatform::new()))?;
    if let Err(e) = server.start().await {
        error!("failed to start: {}", e);
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop().await;
    Ok(())
}
