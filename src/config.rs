use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Base URL of the external authority source used to re-verify a
    /// delegator's current standing at decision time. Unset = delegations
    /// are trusted without verification (see service::approval docs).
    pub authority_url: Option<String>,
    /// Comma-separated webhook URLs that receive domain events.
    pub event_webhook_urls: Vec<String>,
    /// Optional HMAC-SHA256 secret for signing event payloads.
    pub event_signing_secret: Option<String>,
    /// Escalation sweep interval in seconds. Default: 900 (15 minutes).
    pub escalation_interval_secs: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        port: std::env::var("GATEKEEPER_PORT")
            .unwrap_or_else(|_| "8099".into())
            .parse()
            .unwrap_or(8099),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/gatekeeper".into()),
        authority_url: std::env::var("GATEKEEPER_AUTHORITY_URL").ok(),
        event_webhook_urls: std::env::var("GATEKEEPER_EVENT_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        event_signing_secret: std::env::var("GATEKEEPER_EVENT_SIGNING_SECRET").ok(),
        escalation_interval_secs: std::env::var("GATEKEEPER_ESCALATION_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(900),
    })
}
