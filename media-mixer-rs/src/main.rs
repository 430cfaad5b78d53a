#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use clap::Parser;
use media_mixer_rs::config::Cli;
use media_mixer_rs::logging;
use media_mixer_rs::schema::PLUGIN_NAME;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log = match logging::init(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting {} v{}", PLUGIN_NAME, env!("CARGO_PKG_VERSION"));
    match run(&cli) {
        Ok(()) => {
            tracing::info!("{} stopped", PLUGIN_NAME);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(windows)]
fn run(cli: &Cli) -> anyhow::Result<()> {
    use anyhow::Context;
    use media_mixer_rs::audio::{AudioBackend, ComGuard, WasapiBackend};
    use media_mixer_rs::mixer::Remote;
    use media_mixer_rs::schema::PLUGIN_ID;
    use media_mixer_rs::MixerApp;
    use std::sync::Arc;
    use tp_client::Client;

    let _com = ComGuard::new().context("COM init failed")?;

    let address = cli.address();
    let (client, inbound) = Client::connect(&address, PLUGIN_ID)
        .with_context(|| format!("Failed to connect to Touch Portal at {}", address))?;

    let backend: Arc<dyn AudioBackend> = Arc::new(WasapiBackend::new());
    let remote: Arc<dyn Remote> = client.clone();
    let app = MixerApp::new(backend, remote)?;

    for message in inbound {
        if !app.handle(message) {
            break;
        }
    }
    if !client.is_connected() {
        tracing::warn!("Connection to Touch Portal lost");
    }

    app.shutdown();
    client.disconnect();
    Ok(())
}

#[cfg(not(windows))]
fn run(_cli: &Cli) -> anyhow::Result<()> {
    anyhow::bail!("{} only runs on Windows", PLUGIN_NAME)
}
