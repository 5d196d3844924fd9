use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use notify::{Event, RecursiveMode, Watcher, recommended_watcher};
use sso_ticket::ReloadableTicketFactory;
use tracing::{error, info, warn};

use crate::config::{AppConfig, loader};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Applies a freshly loaded configuration.
///
/// Ticket settings and the logging level take effect immediately. Backend,
/// replication and admin settings are read once at startup; changes to them
/// are reported and otherwise ignored until restart.
pub fn apply_config(
    new_cfg: AppConfig,
    shared: &ArcSwap<AppConfig>,
    factory: &ReloadableTicketFactory,
) -> Result<(), String> {
    factory
        .reload(&new_cfg.tickets)
        .map_err(|e| format!("ticket configuration rejected: {e}"))?;
    new_cfg.logging.apply();

    let current = shared.load();
    if current.registry.backend != new_cfg.registry.backend
        || current.postgres.url != new_cfg.postgres.url
        || current.replication.enabled != new_cfg.replication.enabled
        || current.admin.bind != new_cfg.admin.bind
    {
        warn!("registry, replication and admin changes take effect after restart");
    }

    shared.store(Arc::new(new_cfg));
    Ok(())
}

/// Start watching a configuration file for changes with a simple debounce (500ms).
/// On change, the file is reloaded and validated, then applied with
/// [`apply_config`]. An invalid file leaves the running configuration as is.
///
/// Returns an optional thread join guard to keep the watcher alive.
pub fn start_config_watcher(
    path: PathBuf,
    shared: Arc<ArcSwap<AppConfig>>,
    factory: ReloadableTicketFactory,
) -> Option<std::thread::JoinHandle<()>> {
    if !path.exists() {
        warn!("config file {:?} does not exist; watcher disabled", path);
        return None;
    }

    let handle = std::thread::spawn(move || {
        let last_reload = Mutex::new(Instant::now() - Duration::from_secs(1));
        let lp = path.clone();

        let mut watcher = match recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(_event) => {
                    let Ok(mut last) = last_reload.lock() else {
                        return;
                    };
                    let now = Instant::now();
                    if now.duration_since(*last) < DEBOUNCE {
                        return;
                    }
                    *last = now;

                    let result = loader::load_config(lp.to_str())
                        .and_then(|new_cfg| apply_config(new_cfg, &shared, &factory));
                    match result {
                        Ok(()) => info!("configuration reloaded successfully"),
                        Err(e) => error!("configuration reload failed: {}", e),
                    }
                }
                Err(e) => error!("watch error: {}", e),
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                error!("failed to start config watcher: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            error!("failed to watch config file: {}", e);
            return;
        }

        // Keep thread alive forever
        loop {
            std::thread::park();
        }
    });

    Some(handle)
}
