// src/engine/health.rs

//! Health-check probes.
//!
//! Each configured probe is an independent watcher: it sleeps its interval,
//! runs its script with the same interval as deadline, and reports the
//! configured message to the termination channel on the first failure. The
//! engine treats any message on that channel as a shutdown request.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::HealthCheckConfig;
use crate::exec::run_quiet;

/// Spawn one watcher per configured health check.
pub fn spawn_health_checks(checks: &[HealthCheckConfig], term_tx: mpsc::Sender<String>) {
    for check in checks {
        let check = check.clone();
        let tx = term_tx.clone();

        tokio::spawn(async move {
            let interval = Duration::from_secs(check.interval);
            loop {
                tokio::time::sleep(interval).await;

                let failure = match tokio::time::timeout(interval, run_quiet(&check.run, &[]))
                    .await
                {
                    Ok(Ok(_)) => None,
                    Ok(Err(err)) => Some(format!("{err:#}")),
                    Err(_) => Some(format!("probe exceeded its {interval:?} deadline")),
                };

                match failure {
                    None => debug!(run = %check.run, "health check passed"),
                    Some(detail) => {
                        let message = if check.message.is_empty() {
                            format!("health check probe failed: {detail}")
                        } else {
                            check.message.clone()
                        };
                        warn!(run = %check.run, detail = %detail, "health check failed");
                        let _ = tx.send(message).await;
                        return;
                    }
                }
            }
        });
    }
}
