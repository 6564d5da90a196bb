//! Checks a playbook can declare before it runs.

use std::time::Duration;

use serde::Deserialize;

use crate::elevation::ProtectionService;
use crate::ui::Console;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// A working internet connection.
    Internet,
    /// Antivirus protection turned off before any task runs.
    DefenderDisabled,
}

/// GETs `url` and reports whether it answered with a success status.
pub async fn internet_available(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!("internet probe failed: {e}");
            false
        }
    }
}

/// Polls the toggle predicate with a linearly growing delay.
///
/// Returns false once `limit` has been spent waiting. The user is told what
/// to do after the first negative answer only.
pub async fn wait_for_toggles(
    protection: &dyn ProtectionService,
    console: &Console,
    poll: Duration,
    limit: Duration,
) -> bool {
    let mut delay = poll;
    let mut waited = Duration::ZERO;
    let mut announced = false;
    loop {
        if protection.toggles_ready().await {
            return true;
        }
        if !announced {
            console.line("All Windows Security protection toggles must be turned off.");
            console.line("Navigate to Windows Security > Virus & threat protection > Manage settings.");
            announced = true;
        }
        if waited >= limit {
            return false;
        }
        tokio::time::sleep(delay).await;
        waited += delay;
        delay += poll;
    }
}
