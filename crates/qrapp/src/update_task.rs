use log::{error, info, warn};
use qrapp_core::{UpdateConfig, UpdateError, UpdateOutcome, Updater};

/// Run one update check and log how it ended. Returns `true` when a new
/// version was installed and already relaunched, so this process should exit.
pub async fn check_for_update(config: UpdateConfig, current_version: &str) -> bool {
    info!("Checking for updates at {}", config.feed_url);
    let updater = match Updater::new(config, current_version) {
        Ok(updater) => updater,
        Err(error) => {
            error!("Update check unavailable: {error}");
            return false;
        }
    };

    report(updater.run().await)
}

fn report(result: Result<UpdateOutcome, UpdateError>) -> bool {
    match result {
        Ok(outcome @ UpdateOutcome::Applied { .. }) => {
            info!("{outcome}, exiting");
            true
        }
        Ok(outcome) => {
            info!("{outcome}");
            false
        }
        Err(error) if error.is_network() => {
            warn!("Update check failed ({} stage): {error}", error.stage());
            false
        }
        Err(error) => {
            error!("Update check failed ({} stage): {error}", error.stage());
            false
        }
    }
}
