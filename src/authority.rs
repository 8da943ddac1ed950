//! Delegator authority re-verification.
//!
//! A delegation is a pointer to someone else's authority, not authority
//! itself. Before a delegated decision commits, the delegator's CURRENT
//! standing is checked against an external authority source. When no source
//! is configured the check is skipped and the delegation is trusted as-is;
//! when the source errs or denies, that delegation is skipped.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

/// Answer from the authority source about one delegator.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityCheck {
    /// Delegator currently holds `role` with sufficient standing.
    Valid { role: String },
    /// Delegator's standing no longer covers the required role.
    Denied,
    /// The source could not answer; the caller must not trust the delegation.
    Unavailable,
}

#[async_trait]
pub trait AuthorityVerifier: Send + Sync {
    /// Check whether `delegator_id` currently holds authority at least equal
    /// to `required_role` within `tenant_id`.
    async fn verify(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        required_role: &str,
    ) -> AuthorityCheck;
}

/// Verifier used when no authority source is configured: every delegation is
/// taken at face value, deciding under the required role.
pub struct TrustingVerifier;

#[async_trait]
impl AuthorityVerifier for TrustingVerifier {
    async fn verify(
        &self,
        _tenant_id: &str,
        _delegator_id: Uuid,
        required_role: &str,
    ) -> AuthorityCheck {
        AuthorityCheck::Valid {
            role: required_role.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthorityResponse {
    authorized: bool,
    #[serde(default)]
    role: Option<String>,
}

/// Verifier backed by an HTTP authority endpoint.
///
/// GET {base_url}/tenants/{tenant}/users/{id}/authority?role={required_role}
/// with a bounded timeout. Network failures and non-2xx answers map to
/// `Unavailable`, never to `Valid`.
pub struct HttpAuthorityVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthorityVerifier {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build authority HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AuthorityVerifier for HttpAuthorityVerifier {
    async fn verify(
        &self,
        tenant_id: &str,
        delegator_id: Uuid,
        required_role: &str,
    ) -> AuthorityCheck {
        let url = format!(
            "{}/tenants/{}/users/{}/authority",
            self.base_url, tenant_id, delegator_id
        );

        let resp = match self
            .client
            .get(&url)
            .query(&[("role", required_role)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(%delegator_id, error = %e, "authority source unreachable");
                return AuthorityCheck::Unavailable;
            }
        };

        if !resp.status().is_success() {
            warn!(%delegator_id, status = %resp.status(), "authority source returned an error");
            return AuthorityCheck::Unavailable;
        }

        match resp.json::<AuthorityResponse>().await {
            Ok(body) if body.authorized => AuthorityCheck::Valid {
                role: body.role.unwrap_or_else(|| required_role.to_string()),
            },
            Ok(_) => AuthorityCheck::Denied,
            Err(e) => {
                warn!(%delegator_id, error = %e, "authority response malformed");
                AuthorityCheck::Unavailable
            }
        }
    }
}
