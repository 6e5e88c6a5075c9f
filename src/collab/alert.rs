//! Attack notifications.

use async_trait::async_trait;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::records::AttackLogEntry;

/// Delivers a notification when an attack is confirmed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send_alert(&self, site: &str, entry: &AttackLogEntry) -> Result<()>;
}

/// Render the subject line and body of an attack notification.
pub fn render_alert(site: &str, entry: &AttackLogEntry) -> (String, String) {
    let subject = format!("DDoS Attack Detected - {}", site);
    let body = format!(
        "A {} attack has been detected on {}.\n\
         \n\
         Start Time: {}\n\
         Severity: {}\n\
         Blocked Requests: {}\n\
         Unique IPs: {}\n\
         \n\
         Offending addresses are being blocked automatically.",
        entry.attack_type,
        site,
        entry.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
        entry.severity,
        entry.blocked_requests,
        entry.unique_ips,
    );
    (subject, body)
}

/// Alerter that emits the notification as a `warn!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlerter;

#[async_trait]
impl Alerter for TracingAlerter {
    async fn send_alert(&self, site: &str, entry: &AttackLogEntry) -> Result<()> {
        let (subject, body) = render_alert(site, entry);
        warn!(site = %site, subject = %subject, "{}", body);
        Ok(())
    }
}
