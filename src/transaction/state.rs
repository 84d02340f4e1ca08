// Copyright 2025 Cowboy AI, LLC.

//! Transaction lifecycle as a transition table
//!
//! Every legal move is an entry in [`next_status`]. Domain operations consult
//! it before producing an event and replay consults it before applying one,
//! so the two can never disagree.

use serde::{Deserialize, Serialize};

/// Lifecycle states of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Recorded, awaiting authorization
    Initiated,
    /// Limits and balance checks passed
    Authorized,
    /// Settlement succeeded
    Completed,
    /// Authorization or settlement failed (terminal)
    Failed,
    /// A completed transfer was reversed (terminal)
    Reversed,
}

impl TransactionStatus {
    /// Display name of the state
    pub fn name(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "Initiated",
            TransactionStatus::Authorized => "Authorized",
            TransactionStatus::Completed => "Completed",
            TransactionStatus::Failed => "Failed",
            TransactionStatus::Reversed => "Reversed",
        }
    }

    /// Whether no monetary transition may follow
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Reversed)
    }

    /// Name of an optional state; a stream without events is "New"
    pub fn label(status: Option<Self>) -> &'static str {
        status.map_or("New", |s| s.name())
    }
}

/// Moves a transaction can make, one per event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Open the transaction
    Initiate,
    /// Authorization checks passed
    Authorize,
    /// Authorization checks failed
    FailAuthorization,
    /// Settlement succeeded
    Complete,
    /// Settlement failed
    FailSettlement,
    /// Undo a completed transfer
    Reverse,
    /// Flag the transfer as disputed
    Dispute,
}

/// State reached by applying `transition` to `current`, or `None` if the
/// move is not allowed.
///
/// Disputes keep the underlying state; a second dispute is rejected.
pub fn next_status(
    current: Option<TransactionStatus>,
    disputed: bool,
    transition: Transition,
) -> Option<TransactionStatus> {
    use TransactionStatus as S;
    use Transition as T;

    match current {
        None => match transition {
            T::Initiate => Some(S::Initiated),
            _ => None,
        },
        Some(S::Initiated) => match transition {
            T::Authorize => Some(S::Authorized),
            T::FailAuthorization => Some(S::Failed),
            _ => None,
        },
        Some(S::Authorized) => match transition {
            T::Complete => Some(S::Completed),
            T::FailSettlement => Some(S::Failed),
            T::Dispute if !disputed => Some(S::Authorized),
            _ => None,
        },
        Some(S::Completed) => match transition {
            T::Reverse => Some(S::Reversed),
            T::Dispute if !disputed => Some(S::Completed),
            _ => None,
        },
        Some(S::Failed) | Some(S::Reversed) => None,
    }
}
