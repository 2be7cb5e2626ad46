//! Sponsor notifications: tell a referrer that one of their leads is active.

use chrono::Local;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorNotice {
    pub lead_name: String,
    pub focus: String,
    pub referrer_id: String,
    pub timestamp: String,
}

impl SponsorNotice {
    pub fn new(lead_name: &str, focus: &str, referrer_id: &str) -> Self {
        Self {
            lead_name: lead_name.to_string(),
            focus: focus.to_string(),
            referrer_id: referrer_id.to_string(),
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        }
    }
}

/// Fire-and-forget delivery. Implementations never fail the caller.
pub trait SponsorNotifier: Send + Sync {
    fn notify(&self, notice: SponsorNotice);
}

/// Writes the notice to the diagnostic log.
pub struct TracingNotifier;

impl SponsorNotifier for TracingNotifier {
    fn notify(&self, notice: SponsorNotice) {
        info!(
            "Sponsor {}: new lead '{}' interested in '{}'",
            notice.referrer_id, notice.lead_name, notice.focus
        );
    }
}

/// POSTs the notice as JSON to a webhook in the background.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl SponsorNotifier for WebhookNotifier {
    fn notify(&self, notice: SponsorNotice) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, dropping sponsor notice for {}", notice.referrer_id);
            return;
        };

        let request = self.client.post(&self.url).json(&notice);
        runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Sponsor notice delivered for {}", notice.referrer_id);
                }
                Ok(resp) => warn!("Sponsor webhook returned status {}", resp.status()),
                Err(e) => warn!("Sponsor webhook failed: {e}"),
            }
        });
    }
}
