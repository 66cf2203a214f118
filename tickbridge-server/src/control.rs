//! Control subcommands that talk to a running bridge over its HTTP surface.

use std::path::Path;
use std::time::Duration;

use tracing::error;

use tickbridge_config::loader;
use tickbridge_model::{HealthReport, RolloverAlert};

use crate::bootstrap::{EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// The bridge base URL: the explicit flag wins, otherwise the config file's
/// listen address.
fn base_url(config_path: Option<&Path>, listen: Option<&str>) -> Result<String, u8> {
    if let Some(listen) = listen {
        return Ok(format!("http://{listen}"));
    }
    match loader::load(config_path) {
        Ok(loaded) => Ok(format!("http://{}", loaded.config.server.listen)),
        Err(err) => {
            error!("cannot resolve bridge address: {err}");
            Err(EXIT_CONFIG)
        }
    }
}

/// `reload`: ask the bridge to re-read its config file.
pub async fn reload(config_path: Option<&Path>, listen: Option<&str>) -> u8 {
    let base = match base_url(config_path, listen) {
        Ok(base) => base,
        Err(code) => return code,
    };

    let response = match client()
        .post(format!("{base}/api/v1/config/reload"))
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            error!("bridge unreachable at {base}: {err}");
            return EXIT_FAILURE;
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("{body}");
        EXIT_OK
    } else {
        error!("reload rejected ({status}): {body}");
        EXIT_CONFIG
    }
}

/// `status`: print a human-oriented view of the bridge's health report.
pub async fn status(config_path: Option<&Path>, listen: Option<&str>) -> u8 {
    let base = match base_url(config_path, listen) {
        Ok(base) => base,
        Err(code) => return code,
    };

    let report = match fetch_health(&base).await {
        Ok(report) => report,
        Err(err) => {
            error!("bridge unreachable at {base}: {err}");
            return EXIT_FAILURE;
        }
    };

    println!("bridge:        {base}");
    println!("status:        {:?}", report.status);
    println!("watcher:       {}", if report.watcher_ok { "ok" } else { "DOWN" });
    println!("archive:       {}", if report.archive_ok { "ok" } else { "DOWN" });
    println!("subscriptions: {}", report.subscriptions);
    println!("parse errors:  {}", report.parse_errors);
    println!(
        "uptime:        {}",
        humantime::format_duration(Duration::from_secs(report.uptime_secs))
    );
    if !report.last_seq_by_symbol.is_empty() {
        println!("sequences:");
        for (symbol, seq) in &report.last_seq_by_symbol {
            println!("  {symbol}: {seq}");
        }
    }

    if let Ok(alerts) = fetch_rollovers(&base).await
        && !alerts.is_empty()
    {
        println!("upcoming rollovers:");
        for alert in alerts {
            println!(
                "  {}: {} -> {} in {} day(s)",
                alert.role, alert.from, alert.to, alert.days_until
            );
        }
    }

    EXIT_OK
}

/// `health-check`: exit 0 when healthy, non-zero otherwise. Suitable for
/// process supervisors.
pub async fn health_check(config_path: Option<&Path>, listen: Option<&str>) -> u8 {
    let base = match base_url(config_path, listen) {
        Ok(base) => base,
        Err(code) => return code,
    };
    match fetch_health(&base).await {
        Ok(report) if report.is_healthy() => EXIT_OK,
        Ok(report) => {
            error!(
                "bridge degraded: watcher_ok={} archive_ok={}",
                report.watcher_ok, report.archive_ok
            );
            EXIT_FAILURE
        }
        Err(err) => {
            error!("bridge unreachable at {base}: {err}");
            EXIT_FAILURE
        }
    }
}

async fn fetch_health(base: &str) -> Result<HealthReport, reqwest::Error> {
    client()
        .get(format!("{base}/api/v1/health"))
        .send()
        .await?
        .error_for_status()?
        .json::<HealthReport>()
        .await
}

async fn fetch_rollovers(base: &str) -> Result<Vec<RolloverAlert>, reqwest::Error> {
    client()
        .get(format!("{base}/api/v1/rollovers"))
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<RolloverAlert>>()
        .await
}
