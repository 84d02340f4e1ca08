// Copyright 2025 Cowboy AI, LLC.

//! Facts recorded on a transaction stream

use crate::aggregate::DomainEvent;
use crate::transaction::state::Transition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    /// Limit or balance checks rejected the transfer
    Authorization,
    /// The settlement rail rejected the transfer
    Settlement,
}

/// A transfer was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInitiated {
    /// Transaction (and stream) id
    pub transaction_id: String,
    /// Amount in minor units
    pub amount: u64,
    /// ISO 4217 code
    pub currency: String,
    /// Debited account
    pub source_account: String,
    /// Credited account
    pub destination_account: String,
    /// When the request was accepted
    pub initiated_at: DateTime<Utc>,
}

/// Authorization checks passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAuthorized {
    /// Reference issued by the authorizer
    pub authorization_code: String,
    /// When authorization was granted
    pub authorized_at: DateTime<Utc>,
}

/// Authorization or settlement failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFailed {
    /// Which step failed
    pub stage: FailureStage,
    /// Machine-readable failure code
    pub code: String,
    /// Human-readable reason
    pub reason: String,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

/// Settlement succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCompleted {
    /// Reference issued by the settlement rail
    pub settlement_reference: String,
    /// When funds moved
    pub completed_at: DateTime<Utc>,
}

/// A completed transfer was reversed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReversed {
    /// Why it was reversed
    pub reason: String,
    /// When the reversal was recorded
    pub reversed_at: DateTime<Utc>,
}

/// A transfer was disputed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDisputed {
    /// Why it was disputed
    pub reason: String,
    /// When the dispute was raised
    pub disputed_at: DateTime<Utc>,
}

/// Every event a transaction stream can hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    /// See [`TransactionInitiated`]
    TransactionInitiated(TransactionInitiated),
    /// See [`TransactionAuthorized`]
    TransactionAuthorized(TransactionAuthorized),
    /// See [`TransactionFailed`]
    TransactionFailed(TransactionFailed),
    /// See [`TransactionCompleted`]
    TransactionCompleted(TransactionCompleted),
    /// See [`TransactionReversed`]
    TransactionReversed(TransactionReversed),
    /// See [`TransactionDisputed`]
    TransactionDisputed(TransactionDisputed),
}

impl TransactionEvent {
    /// The lifecycle move this event records
    pub fn transition(&self) -> Transition {
        match self {
            TransactionEvent::TransactionInitiated(_) => Transition::Initiate,
            TransactionEvent::TransactionAuthorized(_) => Transition::Authorize,
            TransactionEvent::TransactionFailed(e) => match e.stage {
                FailureStage::Authorization => Transition::FailAuthorization,
                FailureStage::Settlement => Transition::FailSettlement,
            },
            TransactionEvent::TransactionCompleted(_) => Transition::Complete,
            TransactionEvent::TransactionReversed(_) => Transition::Reverse,
            TransactionEvent::TransactionDisputed(_) => Transition::Dispute,
        }
    }
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionInitiated(_) => "TransactionInitiated",
            TransactionEvent::TransactionAuthorized(_) => "TransactionAuthorized",
            TransactionEvent::TransactionFailed(_) => "TransactionFailed",
            TransactionEvent::TransactionCompleted(_) => "TransactionCompleted",
            TransactionEvent::TransactionReversed(_) => "TransactionReversed",
            TransactionEvent::TransactionDisputed(_) => "TransactionDisputed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tag_matches_event_type() {
        let event = TransactionEvent::TransactionReversed(TransactionReversed {
            reason: "chargeback".to_string(),
            reversed_at: Utc::now(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
        assert_eq!(value["data"]["reason"], "chargeback");

        let pending = event.to_pending().unwrap();
        assert_eq!(pending.event_type, "TransactionReversed");
        let back: TransactionEvent = serde_json::from_str(&pending.payload).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_failure_stage_selects_transition() {
        let failed = |stage| {
            TransactionEvent::TransactionFailed(TransactionFailed {
                stage,
                code: "E".to_string(),
                reason: "r".to_string(),
                failed_at: Utc::now(),
            })
        };
        assert_eq!(
            failed(FailureStage::Authorization).transition(),
            Transition::FailAuthorization
        );
        assert_eq!(
            failed(FailureStage::Settlement).transition(),
            Transition::FailSettlement
        );
    }
}
