//! Handler for the `check` command.

use serde_json::json;
use tracing::warn;

use super::command::CheckArgs;
use crate::error::Result;
use crate::infrastructure::bootstrap::Services;
use crate::infrastructure::config::Config;
use crate::infrastructure::health::{health_check, HealthReport, HealthStatus};

/// Print the health report. Returns false when a critical check failed.
pub async fn execute(args: &CheckArgs, json: bool) -> Result<bool> {
    let report = build_report(Config::read(&args.config)?).await;

    if json {
        println!("{}", render_json(&report));
    } else {
        println!("Health check ({})", args.config.display());
        print!("{report}");
        println!(
            "{}",
            if report.is_healthy() { "healthy" } else { "UNHEALTHY" }
        );
    }
    Ok(report.is_healthy())
}

/// Out-of-range settings are reported as failed checks. The store is only
/// probed when the configuration is usable.
async fn build_report(config: Config) -> HealthReport {
    if let Err(err) = config.validate() {
        warn!(error = %err, "Configuration is invalid, skipping store probe");
        return health_check(&config, None).await;
    }
    let services = Services::build(config).await;
    let report = services.health_report().await;
    services.shutdown().await;
    report
}

fn render_json(report: &HealthReport) -> serde_json::Value {
    let checks = report
        .checks()
        .iter()
        .map(|check| {
            let (status, details) = match check.status() {
                HealthStatus::Healthy => ("healthy", None),
                HealthStatus::Unhealthy(reason) => ("unhealthy", Some(reason.as_str())),
            };
            json!({
                "name": check.name(),
                "critical": check.critical(),
                "status": status,
                "details": details,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "command": "check",
        "status": if report.is_healthy() { "healthy" } else { "unhealthy" },
        "checks": checks,
    })
}
