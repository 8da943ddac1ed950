use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::authority::{AuthorityVerifier, HttpAuthorityVerifier, TrustingVerifier};
use gatekeeper::cli::{ApprovalCommands, Cli, Commands, DelegationCommands, WorkflowCommands};
use gatekeeper::events::EventPublisher;
use gatekeeper::models::decision::DecisionKind;
use gatekeeper::models::request::RequestStatus;
use gatekeeper::roles::RoleTable;
use gatekeeper::service::{ApprovalService, DelegationService};
use gatekeeper::store::postgres::PgStore;
use gatekeeper::store::{ApprovalStore, RequestFilter};
use gatekeeper::{api, config, jobs, seed, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gatekeeper=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Approval { command }) => {
            let db = connect(&cfg).await?;
            handle_approval_command(&cfg, db, command).await
        }
        Some(Commands::Delegation { command }) => {
            let db = connect(&cfg).await?;
            handle_delegation_command(db, command).await
        }
        Some(Commands::Workflow { command }) => {
            let db = connect(&cfg).await?;
            handle_workflow_command(db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect(cfg: &config::Config) -> anyhow::Result<PgStore> {
    PgStore::connect(&cfg.database_url).await
}

fn build_services(cfg: &config::Config, db: PgStore) -> (ApprovalService, DelegationService) {
    let store: Arc<dyn ApprovalStore> = Arc::new(db);
    let events = EventPublisher::new(
        cfg.event_webhook_urls.clone(),
        cfg.event_signing_secret.clone(),
    );
    let verifier: Arc<dyn AuthorityVerifier> = match &cfg.authority_url {
        Some(url) => Arc::new(HttpAuthorityVerifier::new(url.clone())),
        None => Arc::new(TrustingVerifier),
    };
    let approvals = ApprovalService::new(store.clone(), events, RoleTable::default(), verifier);
    let delegations = DelegationService::new(store);
    (approvals, delegations)
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let (approvals, delegations) = build_services(&cfg, db.clone());

    jobs::escalation::spawn(
        approvals.store().clone(),
        approvals.events().clone(),
        cfg.escalation_interval_secs,
    );

    let state = Arc::new(AppState {
        db,
        approvals,
        delegations,
        config: cfg,
    });

    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .nest("/api/v1", api::api_router())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn readiness_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Result<&'static str, axum::http::StatusCode> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .map_err(|e| {
            tracing::error!("readiness check failed: {}", e);
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ready")
}

async fn handle_approval_command(
    cfg: &config::Config,
    db: PgStore,
    command: ApprovalCommands,
) -> anyhow::Result<()> {
    let (approvals, _) = build_services(cfg, db);
    match command {
        ApprovalCommands::List {
            tenant,
            status,
            limit,
        } => {
            let status = status
                .map(|s| {
                    serde_json::from_value::<RequestStatus>(serde_json::Value::String(s.clone()))
                        .map_err(|_| anyhow::anyhow!("unknown status '{s}'"))
                })
                .transpose()?;
            let filter = RequestFilter {
                status,
                approver_role: None,
                limit,
                offset: 0,
            };
            let requests = approvals.list_requests(&tenant, &filter).await?;
            for r in requests {
                println!(
                    "{}  {:<16} {:<12} role={} level={} expires={}",
                    r.id,
                    r.action_type,
                    r.status.as_str(),
                    r.current_approver_role.as_deref().unwrap_or("-"),
                    r.escalation_level,
                    r.expires_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        ApprovalCommands::Approve {
            request_id,
            staff_id,
            role,
            comment,
        } => {
            let updated = approvals
                .decide(request_id, staff_id, &role, DecisionKind::Approve, comment)
                .await?;
            println!("approved {} (version {})", updated.id, updated.version);
        }
        ApprovalCommands::Reject {
            request_id,
            staff_id,
            role,
            comment,
        } => {
            let updated = approvals
                .decide(request_id, staff_id, &role, DecisionKind::Reject, comment)
                .await?;
            println!("rejected {} (version {})", updated.id, updated.version);
        }
    }
    Ok(())
}

async fn handle_delegation_command(
    db: PgStore,
    command: DelegationCommands,
) -> anyhow::Result<()> {
    match command {
        DelegationCommands::List {
            tenant,
            delegator,
            include_expired,
        } => {
            let delegations = DelegationService::new(Arc::new(db))
                .list_outgoing(&tenant, delegator, include_expired)
                .await?;
            for d in delegations {
                println!(
                    "{}  delegate={} workflow={} {} -> {} {}",
                    d.id,
                    d.delegate_id,
                    d.workflow_id.map(|w| w.to_string()).unwrap_or_else(|| "all".into()),
                    d.start_date.format("%Y-%m-%d"),
                    d.end_date.format("%Y-%m-%d"),
                    if d.is_active { "active" } else { "revoked" },
                );
            }
        }
    }
    Ok(())
}

async fn handle_workflow_command(db: PgStore, command: WorkflowCommands) -> anyhow::Result<()> {
    match command {
        WorkflowCommands::List { tenant } => {
            let workflows = db.list_workflows(&tenant).await?;
            for w in workflows {
                println!(
                    "{}  {:<28} tenant={:<10} trigger={:<10} timeout={}h{}",
                    w.id,
                    w.name,
                    w.tenant_id,
                    w.trigger_type,
                    w.timeout_hours,
                    if w.is_system { " (system)" } else { "" },
                );
            }
        }
        WorkflowCommands::Seed => {
            db.migrate().await?;
            let created = seed::seed_system_workflows(&db).await?;
            println!("seeded {} system workflow(s)", created);
        }
    }
    Ok(())
}
