//! Handler for the `run` command.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::command::RunArgs;
use crate::domain::ConnectionEvent;
use crate::error::{Error, Result};
use crate::infrastructure::bootstrap::Services;
use crate::infrastructure::config::{Config, LogFormat};
use crate::infrastructure::feed::EventTopic;
use crate::infrastructure::scheduler::ScheduledTask;

/// Execute the run command.
pub async fn execute(args: &RunArgs) -> Result<()> {
    let mut config = Config::load(&args.config)?;
    apply_overrides(&mut config, args);
    config.init_logging();
    info!(config = %args.config.display(), "tidewatch starting");

    let services = Services::build(config).await;
    services.feed.on_any(log_event);
    let (gave_up_tx, mut gave_up) = mpsc::unbounded_channel();
    services.feed.on(EventTopic::MaxAttemptsReached, move |event| {
        if let ConnectionEvent::MaxAttemptsReached { attempts } = event {
            let _ = gave_up_tx.send(*attempts);
        }
    });

    for key in &args.subscriptions {
        let label = key.to_string();
        services
            .feed
            .subscribe(key.feed(), key.symbol(), move |update| {
                info!(key = %label, data = %update.data, "Update");
            })
            .await;
    }
    if args.subscriptions.is_empty() {
        warn!("No subscriptions given, only connection events will be logged");
    }

    let _status = status_reporter(&services, args.status_interval);

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            signal.map_err(Error::from)
        }
        Some(attempts) = gave_up.recv() => {
            error!(attempts, "Feed unreachable, shutting down");
            Err(Error::MaxReconnectAttempts { attempts })
        }
    };
    services.shutdown().await;
    info!("tidewatch stopped");
    outcome
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Health(snapshot) => {
            debug!(quality = %snapshot.quality, last_update_ms = ?snapshot.last_update_ms, "Feed health");
        }
        other => info!(event = other.name(), detail = ?other, "Feed event"),
    }
}

fn status_reporter(services: &Services, interval_secs: u64) -> Option<ScheduledTask> {
    if interval_secs == 0 {
        return None;
    }
    let feed = services.feed.clone();
    let cache = services.cache.clone();
    Some(ScheduledTask::every(
        "status-log",
        Duration::from_secs(interval_secs),
        move || {
            let status = feed.connection_status();
            let subscriptions = feed.subscriptions().len();
            let stats = cache.get_stats();
            async move {
                info!(
                    phase = %status.phase,
                    quality = %status.quality,
                    reconnect_attempts = status.reconnect_attempts,
                    subscriptions,
                    cache_hit_rate = stats.hit_rate(),
                    "Status"
                );
            }
        },
    ))
}
