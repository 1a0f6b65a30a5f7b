mod cli;
mod error;
mod local_update;
mod logging;
mod render;
mod server;
mod settings;
mod update_task;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use qrapp_platform::AppPaths;

use crate::cli::Cli;
use crate::settings::AppSettings;

/// Set at build time through `QRAPP_VERSION`; unset for local builds.
pub const VERSION: &str = match option_env!("QRAPP_VERSION") {
    Some(version) => version,
    None => qrapp_core::DEV_VERSION,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = AppPaths::new();
    let (settings, settings_error) = match &paths {
        Ok(paths) => match AppSettings::load_from(&paths.settings_file()) {
            Ok(settings) => (settings, None),
            Err(error) => (AppSettings::default(), Some(error.to_string())),
        },
        Err(error) => (AppSettings::default(), Some(error.to_string())),
    };

    let log_path = paths.as_ref().ok().and_then(|paths| {
        paths.ensure_dirs().ok()?;
        Some(paths.log_file())
    });
    let log_file = logging::init_logging(
        log_path,
        cli.debug || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    info!("qrapp running, version {VERSION}");
    match log_file {
        Some(path) => info!("Logging to {}", path.display()),
        None => warn!("File logging unavailable, logging to terminal only"),
    }
    if let Some(error) = settings_error {
        warn!("Using default settings: {error}");
    }

    if cli.serve {
        tokio::spawn(async {
            if let Err(error) = local_update::build_and_serve().await {
                error!("Local update feed unavailable: {error}");
            }
        });
    }

    if !cli.no_update_check && settings.check_for_updates {
        let config = settings.update_config(cli.local_update, cli.force_update_check);
        tokio::spawn(async move {
            if update_task::check_for_update(config, VERSION).await {
                std::process::exit(0);
            }
        });
    }

    let port = cli.ui_port.unwrap_or(settings.ui_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match server::bind_with_retry(addr, &settings.bind_retry_delays_secs).await {
        Ok(listener) => listener,
        Err(error) => {
            error!("{error}");
            return ExitCode::FAILURE;
        }
    };

    if settings.open_browser && !cli.no_browser {
        let url = format!("http://localhost:{port}/static");
        if let Err(error) = open::that_detached(&url) {
            warn!("Failed to open browser at {url}: {error}");
        }
    }

    match server::serve(listener, Arc::new(server::UiState::new(VERSION))).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}
