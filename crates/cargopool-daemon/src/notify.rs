//! Outbound email notifications.
//!
//! Adapts the engine's [`PledgeNotifier`] seam to an HTTP email provider
//! (Resend-compatible JSON API). Sends are spawned onto the runtime and the
//! seam returns immediately, so a submitter never waits on delivery or
//! learns whether it worked; failures surface only in the log.
//!
//! Without an API key the adapter runs in stub mode: payloads are logged at
//! INFO and nothing leaves the process. Useful locally and in CI.
//!
//! User-supplied text (names, pool titles, emails) is HTML-escaped before it
//! is interpolated into a message body.

use async_trait::async_trait;
use cargopool_core::intake::{AdminNotice, ConfirmationNotice, NotifyError, PledgeNotifier};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::EmailConfig;

/// Escapes text for interpolation into an HTML email body.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Email notification adapter.
pub struct EmailNotifier {
    client: reqwest::Client,
    config: EmailConfig,
}

impl EmailNotifier {
    /// Creates an adapter from the `[email]` config section.
    #[must_use]
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn confirmation_payload(&self, notice: &ConfirmationNotice) -> Value {
        let name = escape_html(&notice.name);
        let title = escape_html(&notice.pool_title);
        let q = notice.quote;
        json!({
            "from": self.config.from,
            "to": [notice.to],
            "subject": format!("Pledge received - {title}"),
            "html": format!(
                "<p>Hi {name},</p>\
                 <p>We received your shipping interest for <strong>{title}</strong>.</p>\
                 <p>Estimated shipping: ${:.2} | Pickup fee: ${:.2} | Total: ${:.2}</p>\
                 <p>Volume: {:.2} ft&#179;</p>\
                 <p>This is interest-only; no payment is due now. We'll contact you \
                 when the container is confirmed.</p>",
                q.shipping_cost, q.pickup_fee, q.total, q.volume_ft3
            ),
        })
    }

    fn summary_payload(&self, notice: &AdminNotice) -> Value {
        let name = escape_html(&notice.name);
        let email = escape_html(&notice.email);
        let title = escape_html(&notice.pool_title);
        let q = notice.quote;
        json!({
            "from": self.config.from,
            "to": self.config.admin_recipients,
            "subject": format!("New pledge: {title} - {name}"),
            "html": format!(
                "<p>New pledge received.</p>\
                 <p>Pool: {title}</p>\
                 <p>From: {name} &lt;{email}&gt;</p>\
                 <p>Volume: {:.2} ft&#179; | Est. revenue: ${:.2}</p>",
                q.volume_ft3, q.shipping_cost
            ),
        })
    }

    /// Hands the payload to the provider on a spawned task; the caller does
    /// not wait on the result.
    fn send_in_background(&self, payload: Value, context: &'static str) {
        let Some(api_key) = self.config.api_key.clone() else {
            info!(%payload, context, "email stub: no api key configured, not sending");
            return;
        };
        let client = self.client.clone();
        let api_url = self.config.api_url.clone();
        let _detached = tokio::spawn(async move {
            let result = client
                .post(&api_url)
                .bearer_auth(api_key)
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {},
                Ok(response) => {
                    warn!(status = %response.status(), context, "email provider refused message");
                },
                Err(err) => {
                    warn!(error = %err, context, "email send failed");
                },
            }
        });
    }
}

#[async_trait]
impl PledgeNotifier for EmailNotifier {
    async fn pledge_confirmation(&self, notice: ConfirmationNotice) -> Result<(), NotifyError> {
        let payload = self.confirmation_payload(&notice);
        self.send_in_background(payload, "pledge_confirmation");
        Ok(())
    }

    async fn admin_summary(&self, notice: AdminNotice) -> Result<(), NotifyError> {
        if self.config.admin_recipients.is_empty() {
            return Ok(());
        }
        let payload = self.summary_payload(&notice);
        self.send_in_background(payload, "admin_summary");
        Ok(())
    }
}
