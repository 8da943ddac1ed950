//! Gatekeeper — multi-tenant approval workflow coordination service.
//!
//! Decides whether an attempted action needs human sign-off, tracks approval
//! requests through their decision lifecycle, resolves who may decide
//! (including time-bounded delegation with re-verified authority), and
//! escalates or expires stale requests safely across concurrent instances.

pub mod api;
pub mod authority;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod models;
pub mod roles;
pub mod seed;
pub mod service;
pub mod store;
pub mod trigger;

use service::{ApprovalService, DelegationService};
use store::postgres::PgStore;

/// Shared application state passed to API handlers.
pub struct AppState {
    pub db: PgStore,
    pub approvals: ApprovalService,
    pub delegations: DelegationService,
    pub config: config::Config,
}
