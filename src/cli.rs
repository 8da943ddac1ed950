use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Gatekeeper — approval workflow coordination service
#[derive(Parser)]
#[command(name = "gatekeeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the approval service
    Serve {
        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect and decide approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Inspect delegations
    Delegation {
        #[command(subcommand)]
        command: DelegationCommands,
    },

    /// Manage approval workflows
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approval requests for a tenant
    List {
        #[arg(long)]
        tenant: String,
        /// Filter by status (pending, approved, ...)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Approve a pending request
    Approve {
        #[arg(long)]
        request_id: Uuid,
        /// Acting staff member
        #[arg(long)]
        staff_id: Uuid,
        #[arg(long)]
        role: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a pending request
    Reject {
        #[arg(long)]
        request_id: Uuid,
        #[arg(long)]
        staff_id: Uuid,
        #[arg(long)]
        role: String,
        #[arg(long)]
        comment: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DelegationCommands {
    /// List a delegator's delegations
    List {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        delegator: Uuid,
        #[arg(long)]
        include_expired: bool,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// List workflows visible to a tenant
    List {
        #[arg(long)]
        tenant: String,
    },
    /// Insert the shared system-scope default workflows
    Seed,
}
