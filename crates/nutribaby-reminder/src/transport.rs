//! Push transport seam.
//!
//! A transport performs one delivery attempt and classifies the outcome.
//! It never retries; the authorization token is already spent when it runs.

use async_trait::async_trait;
use nutribaby_core::TransportError;

use crate::render::Payload;

/// One message bound for one caregiver.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub caregiver_id: String,
    pub template_id: String,
    pub payload: Payload,
    /// Mini-program page opened when the notification is tapped.
    pub landing_page: String,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Transport name, for logs.
    fn name(&self) -> &str;

    async fn send(&self, message: &PushMessage) -> Result<(), TransportError>;
}

/// Logs messages instead of delivering them. Used when no upstream
/// credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunTransport;

#[async_trait]
impl PushTransport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, message: &PushMessage) -> Result<(), TransportError> {
        let fields: Vec<String> = message
            .payload
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        tracing::info!(
            "📭 [dry-run] {} ← {} ({}) [{}]",
            message.caregiver_id,
            message.template_id,
            message.landing_page,
            fields.join(", ")
        );
        Ok(())
    }
}
