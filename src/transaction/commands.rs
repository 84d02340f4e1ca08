// Copyright 2025 Cowboy AI, LLC.

//! Command handling for transactions
//!
//! A command is routed by its [`CommandKind`] to one aggregate operation.
//! The handler reconstructs the aggregate, runs the operation, and commits
//! through a fresh [`CommitCoordinator`]; a concurrency conflict discards the
//! instance and starts over from a new reconstruction. Handlers return only
//! acknowledgments, not state.

use crate::aggregate::Aggregate;
use crate::errors::DomainError;
use crate::infrastructure::{AggregateRebuilder, EventLog, ReplayError, SnapshotStore};
use crate::persistence::{CommitCoordinator, CommitError};
use crate::transaction::aggregate::{
    AuthorizationOutcome, SettlementOutcome, TransactionAggregate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operation a command maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Open a new transaction
    Initiate,
    /// Record authorization
    Authorize,
    /// Record settlement
    Settle,
    /// Reverse a completed transaction
    Reverse,
    /// Flag a transaction as disputed
    Dispute,
}

impl CommandKind {
    /// Whether the command starts a stream rather than extending one
    pub fn creates_stream(&self) -> bool {
        matches!(self, CommandKind::Initiate)
    }
}

/// Requests to change a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionCommand {
    /// Open a transfer
    Initiate {
        /// New transaction id
        transaction_id: String,
        /// Amount in minor units
        amount: u64,
        /// ISO 4217 code
        currency: String,
        /// Debited account
        source_account: String,
        /// Credited account
        destination_account: String,
    },
    /// Record authorization checks
    Authorize {
        /// Target transaction
        transaction_id: String,
        /// Result of the checks
        outcome: AuthorizationOutcome,
    },
    /// Record settlement
    Settle {
        /// Target transaction
        transaction_id: String,
        /// Result of settlement
        outcome: SettlementOutcome,
    },
    /// Reverse a completed transfer
    Reverse {
        /// Target transaction
        transaction_id: String,
        /// Why
        reason: String,
    },
    /// Dispute a transfer
    Dispute {
        /// Target transaction
        transaction_id: String,
        /// Why
        reason: String,
    },
}

impl TransactionCommand {
    /// Operation this command maps to
    pub fn kind(&self) -> CommandKind {
        match self {
            TransactionCommand::Initiate { .. } => CommandKind::Initiate,
            TransactionCommand::Authorize { .. } => CommandKind::Authorize,
            TransactionCommand::Settle { .. } => CommandKind::Settle,
            TransactionCommand::Reverse { .. } => CommandKind::Reverse,
            TransactionCommand::Dispute { .. } => CommandKind::Dispute,
        }
    }

    /// Target transaction id
    pub fn transaction_id(&self) -> &str {
        match self {
            TransactionCommand::Initiate { transaction_id, .. }
            | TransactionCommand::Authorize { transaction_id, .. }
            | TransactionCommand::Settle { transaction_id, .. }
            | TransactionCommand::Reverse { transaction_id, .. }
            | TransactionCommand::Dispute { transaction_id, .. } => transaction_id,
        }
    }

    fn execute(&self, aggregate: &mut TransactionAggregate) -> Result<(), DomainError> {
        match self {
            TransactionCommand::Initiate {
                amount,
                currency,
                source_account,
                destination_account,
                ..
            } => aggregate.initiate(
                *amount,
                currency.as_str(),
                source_account.as_str(),
                destination_account.as_str(),
            ),
            TransactionCommand::Authorize { outcome, .. } => aggregate.authorize(outcome.clone()),
            TransactionCommand::Settle { outcome, .. } => aggregate.settle(outcome.clone()),
            TransactionCommand::Reverse { reason, .. } => aggregate.reverse(reason.as_str()),
            TransactionCommand::Dispute { reason, .. } => aggregate.dispute(reason.as_str()),
        }
    }
}

/// Acknowledgment of an accepted command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAcknowledgment {
    /// Id assigned to this command execution
    pub command_id: Uuid,
    /// Kind of command handled
    pub kind: CommandKind,
    /// Transaction the command targeted
    pub transaction_id: String,
    /// Stream version after the commit
    pub version: u64,
    /// Attempts needed, including conflicting ones
    pub attempts: u32,
}

/// Errors raised while handling a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The operation was rejected by the aggregate
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The aggregate could not be reconstructed
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// The commit failed for a reason other than a conflict
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Every attempt lost a concurrency race
    #[error("Gave up on transaction {transaction_id} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted {
        /// Target transaction
        transaction_id: String,
        /// Attempts made
        attempts: u32,
    },
}

/// Runs transaction commands against the ledger
#[derive(Clone)]
pub struct TransactionCommandHandler {
    log: EventLog,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    rebuilder: AggregateRebuilder<TransactionAggregate>,
    max_attempts: u32,
}

impl std::fmt::Debug for TransactionCommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCommandHandler")
            .field("max_attempts", &self.max_attempts)
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}

impl TransactionCommandHandler {
    /// Create a handler; the retry bound comes from the log's configuration
    pub fn new(log: EventLog, snapshots: Option<Arc<dyn SnapshotStore>>) -> Self {
        let max_attempts = log.config().max_command_attempts.max(1);
        Self {
            rebuilder: AggregateRebuilder::new(log.clone(), snapshots.clone()),
            log,
            snapshots,
            max_attempts,
        }
    }

    /// Override the retry bound
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Handle a command, retrying on concurrency conflicts
    pub async fn handle(
        &self,
        command: TransactionCommand,
    ) -> Result<CommandAcknowledgment, CommandError> {
        let command_id = Uuid::new_v4();
        let transaction_id = command.transaction_id().to_string();
        let kind = command.kind();

        for attempt in 1..=self.max_attempts {
            let mut aggregate = self.load(&transaction_id, kind).await?;
            command.execute(&mut aggregate)?;

            let aggregate = Arc::new(Mutex::new(aggregate));
            let mut coordinator = CommitCoordinator::new(self.log.clone(), self.snapshots.clone());
            coordinator.track(&aggregate);

            match coordinator.commit_async().await {
                Ok(events) => {
                    let version = aggregate.lock().await.version();
                    info!(
                        %command_id,
                        transaction_id = %transaction_id,
                        ?kind,
                        version,
                        events,
                        attempt,
                        "Command handled"
                    );
                    return Ok(CommandAcknowledgment {
                        command_id,
                        kind,
                        transaction_id,
                        version,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_concurrency_conflict() => {
                    warn!(
                        %command_id,
                        transaction_id = %transaction_id,
                        attempt,
                        error = %e,
                        "Concurrency conflict, reloading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CommandError::ConflictRetriesExhausted {
            transaction_id,
            attempts: self.max_attempts,
        })
    }

    async fn load(
        &self,
        transaction_id: &str,
        kind: CommandKind,
    ) -> Result<TransactionAggregate, CommandError> {
        match self.rebuilder.rebuild(transaction_id).await {
            Ok(aggregate) => Ok(aggregate),
            Err(e) if e.is_not_found() && kind.creates_stream() => {
                debug!(transaction_id, "Starting new stream");
                Ok(TransactionAggregate::blank(transaction_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}
