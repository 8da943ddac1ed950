//! Domain event emission.
//!
//! Every state transition publishes an event to the configured webhook URLs.
//! Publication is fire-and-forget: delivery failures are logged and never
//! propagate into the operation that produced the event.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::request::ApprovalRequest;
use crate::store::ExpiredRequest;

// ── Event Payloads ───────────────────────────────────────────

/// A structured domain event sent to webhook consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalEvent {
    /// Event type identifier, e.g. "approval.requested", "approval.granted".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub tenant_id: String,
    pub request_id: Uuid,
    pub workflow_id: Uuid,
    pub requester_id: Uuid,
    pub action_type: String,
    /// Request status after the transition this event describes.
    pub status: String,
    /// Event-specific details (approver, role, escalation level, etc.).
    pub details: serde_json::Value,
}

impl ApprovalEvent {
    fn from_request(event_type: &str, request: &ApprovalRequest, details: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            tenant_id: request.tenant_id.clone(),
            request_id: request.id,
            workflow_id: request.workflow_id,
            requester_id: request.requester_id,
            action_type: request.action_type.clone(),
            status: request.status.as_str().to_string(),
            details,
        }
    }

    pub fn requested(request: &ApprovalRequest) -> Self {
        Self::from_request(
            "approval.requested",
            request,
            serde_json::json!({
                "approver_role": request.current_approver_role,
                "expires_at": request.expires_at.to_rfc3339(),
            }),
        )
    }

    pub fn granted(request: &ApprovalRequest, approver_id: Uuid, approver_role: &str) -> Self {
        Self::from_request(
            "approval.granted",
            request,
            serde_json::json!({
                "approver_id": approver_id,
                "approver_role": approver_role,
                "execution_id": request.execution_id,
            }),
        )
    }

    pub fn rejected(request: &ApprovalRequest, approver_id: Uuid, comment: Option<&str>) -> Self {
        Self::from_request(
            "approval.rejected",
            request,
            serde_json::json!({
                "approver_id": approver_id,
                "comment": comment,
            }),
        )
    }

    pub fn changes_requested(request: &ApprovalRequest, approver_id: Uuid, comment: Option<&str>) -> Self {
        Self::from_request(
            "approval.changes_requested",
            request,
            serde_json::json!({
                "approver_id": approver_id,
                "comment": comment,
            }),
        )
    }

    pub fn cancelled(request: &ApprovalRequest) -> Self {
        Self::from_request("approval.cancelled", request, serde_json::json!({}))
    }

    pub fn escalated(request: &ApprovalRequest, from_level: i32, to_role: &str) -> Self {
        Self::from_request(
            "approval.escalated",
            request,
            serde_json::json!({
                "from_level": from_level,
                "to_level": request.escalation_level,
                "escalated_to_role": to_role,
            }),
        )
    }

    pub fn expired(request: &ExpiredRequest) -> Self {
        Self {
            event_type: "approval.expired".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            tenant_id: request.tenant_id.clone(),
            request_id: request.id,
            workflow_id: request.workflow_id,
            requester_id: request.requester_id,
            action_type: request.action_type.clone(),
            status: "expired".to_string(),
            details: serde_json::json!({}),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns "sha256=<lowercase hex digest>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Publisher ────────────────────────────────────────────────

/// Dispatches approval events to the configured webhook URLs, optionally
/// signing each body with HMAC-SHA256 (X-Gatekeeper-Signature header).
#[derive(Clone)]
pub struct EventPublisher {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
}

impl EventPublisher {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Gatekeeper-Events/1.0")
                .build()
                .expect("failed to build event HTTP client"),
            urls,
            signing_secret,
        }
    }

    /// A publisher with no targets. Events are dropped.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Publish an event to every configured URL, fire-and-forget.
    ///
    /// Each URL is attempted independently; failure on one does not block the
    /// others, and no failure reaches the caller.
    pub fn publish(&self, event: ApprovalEvent) {
        if self.urls.is_empty() {
            return;
        }

        let publisher = self.clone();
        tokio::spawn(async move {
            for url in &publisher.urls {
                if let Err(e) = publisher.send(url, &event).await {
                    warn!(url, event_type = %event.event_type, error = %e, "event delivery failed");
                }
            }
        });
    }

    async fn send(&self, url: &str, event: &ApprovalEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        let delivery_id = Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("x-gatekeeper-delivery-id", &delivery_id)
            .header("x-gatekeeper-event", &event.event_type);

        if let Some(secret) = &self.signing_secret {
            req = req.header("x-gatekeeper-signature", hmac_sha256_hex(secret, &payload));
        }

        let resp = req.body(payload).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("event endpoint returned {}", resp.status());
        }

        info!(
            url,
            event_type = %event.event_type,
            delivery_id = %delivery_id,
            "event delivered"
        );
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────
