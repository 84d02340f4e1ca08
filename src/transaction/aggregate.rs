// Copyright 2025 Cowboy AI, LLC.

//! The transaction aggregate
//!
//! Holds the lifecycle of one transfer. Operations check the transition
//! table, build exactly one event, apply it and buffer it; nothing touches
//! storage until a commit coordinator picks the buffer up.

use crate::aggregate::{Aggregate, DomainEvent, TransitionError};
use crate::errors::{DomainError, DomainResult};
use crate::transaction::events::{
    FailureStage, TransactionAuthorized, TransactionCompleted, TransactionDisputed,
    TransactionEvent, TransactionFailed, TransactionInitiated, TransactionReversed,
};
use crate::transaction::state::{next_status, TransactionStatus, Transition};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Result of limit and balance checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationOutcome {
    /// Checks passed
    Approved {
        /// Reference issued by the authorizer
        authorization_code: String,
    },
    /// Checks failed
    Declined {
        /// Machine-readable code
        code: String,
        /// Human-readable reason
        reason: String,
    },
}

/// Result of settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// Funds moved
    Settled {
        /// Reference issued by the settlement rail
        settlement_reference: String,
    },
    /// Settlement was rejected
    Rejected {
        /// Machine-readable code
        code: String,
        /// Human-readable reason
        reason: String,
    },
}

/// Why a transaction failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    /// Step that failed
    pub stage: FailureStage,
    /// Machine-readable code
    pub code: String,
    /// Human-readable reason
    pub reason: String,
}

/// State of one transfer, derived from its stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionAggregate {
    id: String,
    status: Option<TransactionStatus>,
    amount: u64,
    currency: String,
    source_account: String,
    destination_account: String,
    authorization_code: Option<String>,
    settlement_reference: Option<String>,
    failure: Option<FailureDetails>,
    reversal_reason: Option<String>,
    dispute_reason: Option<String>,
    #[serde(skip)]
    version: u64,
    #[serde(skip)]
    durable_version: u64,
    #[serde(skip)]
    pending: Vec<TransactionEvent>,
}

impl TransactionAggregate {
    /// Transaction id, also the stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state, `None` before initiation
    pub fn status(&self) -> Option<TransactionStatus> {
        self.status
    }

    /// Amount in minor units
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// ISO 4217 currency code
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Debited account
    pub fn source_account(&self) -> &str {
        &self.source_account
    }

    /// Credited account
    pub fn destination_account(&self) -> &str {
        &self.destination_account
    }

    /// Authorization reference, once authorized
    pub fn authorization_code(&self) -> Option<&str> {
        self.authorization_code.as_deref()
    }

    /// Settlement reference, once completed
    pub fn settlement_reference(&self) -> Option<&str> {
        self.settlement_reference.as_deref()
    }

    /// Failure details, if failed
    pub fn failure(&self) -> Option<&FailureDetails> {
        self.failure.as_ref()
    }

    /// Reversal reason, if reversed
    pub fn reversal_reason(&self) -> Option<&str> {
        self.reversal_reason.as_deref()
    }

    /// Dispute reason, if disputed
    pub fn dispute_reason(&self) -> Option<&str> {
        self.dispute_reason.as_deref()
    }

    /// Whether a dispute has been raised
    pub fn is_disputed(&self) -> bool {
        self.dispute_reason.is_some()
    }

    /// Open the transaction
    pub fn initiate(
        &mut self,
        amount: u64,
        currency: impl Into<String>,
        source_account: impl Into<String>,
        destination_account: impl Into<String>,
    ) -> DomainResult<()> {
        self.ensure(Transition::Initiate, "initiate")?;

        let currency = currency.into();
        let source_account = source_account.into();
        let destination_account = destination_account.into();
        if amount == 0 {
            return Err(DomainError::ValidationError(
                "amount must be positive".to_string(),
            ));
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::ValidationError(format!(
                "currency must be a three-letter ISO code, got {currency:?}"
            )));
        }
        if source_account.is_empty() || destination_account.is_empty() {
            return Err(DomainError::ValidationError(
                "both counterparts are required".to_string(),
            ));
        }
        if source_account == destination_account {
            return Err(DomainError::ValidationError(
                "source and destination accounts must differ".to_string(),
            ));
        }

        self.record(TransactionEvent::TransactionInitiated(TransactionInitiated {
            transaction_id: self.id.clone(),
            amount,
            currency,
            source_account,
            destination_account,
            initiated_at: Utc::now(),
        }))
    }

    /// Record the outcome of limit and balance checks
    pub fn authorize(&mut self, outcome: AuthorizationOutcome) -> DomainResult<()> {
        match outcome {
            AuthorizationOutcome::Approved { authorization_code } => {
                self.ensure(Transition::Authorize, "authorize")?;
                self.record(TransactionEvent::TransactionAuthorized(TransactionAuthorized {
                    authorization_code,
                    authorized_at: Utc::now(),
                }))
            }
            AuthorizationOutcome::Declined { code, reason } => {
                self.ensure(Transition::FailAuthorization, "authorize")?;
                self.fail(FailureStage::Authorization, code, reason)
            }
        }
    }

    /// Record the outcome of settlement
    pub fn settle(&mut self, outcome: SettlementOutcome) -> DomainResult<()> {
        match outcome {
            SettlementOutcome::Settled {
                settlement_reference,
            } => {
                self.ensure(Transition::Complete, "settle")?;
                self.record(TransactionEvent::TransactionCompleted(TransactionCompleted {
                    settlement_reference,
                    completed_at: Utc::now(),
                }))
            }
            SettlementOutcome::Rejected { code, reason } => {
                self.ensure(Transition::FailSettlement, "settle")?;
                self.fail(FailureStage::Settlement, code, reason)
            }
        }
    }

    /// Reverse a completed transfer
    pub fn reverse(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        self.ensure(Transition::Reverse, "reverse")?;
        let reason = non_empty(reason.into(), "reversal reason")?;
        self.record(TransactionEvent::TransactionReversed(TransactionReversed {
            reason,
            reversed_at: Utc::now(),
        }))
    }

    /// Flag an authorized or completed transfer as disputed
    pub fn dispute(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        self.ensure(Transition::Dispute, "dispute")?;
        let reason = non_empty(reason.into(), "dispute reason")?;
        self.record(TransactionEvent::TransactionDisputed(TransactionDisputed {
            reason,
            disputed_at: Utc::now(),
        }))
    }

    fn fail(&mut self, stage: FailureStage, code: String, reason: String) -> DomainResult<()> {
        self.record(TransactionEvent::TransactionFailed(TransactionFailed {
            stage,
            code,
            reason,
            failed_at: Utc::now(),
        }))
    }

    fn state_name(&self) -> String {
        let name = TransactionStatus::label(self.status);
        if self.is_disputed() {
            format!("{name} (disputed)")
        } else {
            name.to_string()
        }
    }

    fn ensure(&self, transition: Transition, operation: &str) -> DomainResult<()> {
        match next_status(self.status, self.is_disputed(), transition) {
            Some(_) => Ok(()),
            None => Err(DomainError::invalid_transition(self.state_name(), operation)),
        }
    }

    fn record(&mut self, event: TransactionEvent) -> DomainResult<()> {
        self.apply(&event)
            .map_err(|e| DomainError::invalid_transition(e.state, e.event_type))?;
        self.pending.push(event);
        self.version += 1;
        Ok(())
    }
}

fn non_empty(value: String, what: &str) -> DomainResult<String> {
    if value.trim().is_empty() {
        Err(DomainError::ValidationError(format!("{what} is required")))
    } else {
        Ok(value)
    }
}

impl Aggregate for TransactionAggregate {
    type Event = TransactionEvent;

    const AGGREGATE_TYPE: &'static str = "Transaction";

    fn blank(stream_id: &str) -> Self {
        Self {
            id: stream_id.to_string(),
            status: None,
            amount: 0,
            currency: String::new(),
            source_account: String::new(),
            destination_account: String::new(),
            authorization_code: None,
            settlement_reference: None,
            failure: None,
            reversal_reason: None,
            dispute_reason: None,
            version: 0,
            durable_version: 0,
            pending: Vec::new(),
        }
    }

    fn stream_id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, event: &TransactionEvent) -> Result<(), TransitionError> {
        let next = next_status(self.status, self.is_disputed(), event.transition())
            .ok_or_else(|| TransitionError::new(self.state_name(), event.event_type()))?;

        match event {
            TransactionEvent::TransactionInitiated(e) => {
                self.amount = e.amount;
                self.currency = e.currency.clone();
                self.source_account = e.source_account.clone();
                self.destination_account = e.destination_account.clone();
            }
            TransactionEvent::TransactionAuthorized(e) => {
                self.authorization_code = Some(e.authorization_code.clone());
            }
            TransactionEvent::TransactionFailed(e) => {
                self.failure = Some(FailureDetails {
                    stage: e.stage,
                    code: e.code.clone(),
                    reason: e.reason.clone(),
                });
            }
            TransactionEvent::TransactionCompleted(e) => {
                self.settlement_reference = Some(e.settlement_reference.clone());
            }
            TransactionEvent::TransactionReversed(e) => {
                self.reversal_reason = Some(e.reason.clone());
            }
            TransactionEvent::TransactionDisputed(e) => {
                self.dispute_reason = Some(e.reason.clone());
            }
        }
        self.status = Some(next);
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn durable_version(&self) -> u64 {
        self.durable_version
    }

    fn pending_events(&self) -> &[TransactionEvent] {
        &self.pending
    }

    fn mark_replayed(&mut self, version: u64) {
        self.version = version;
        self.durable_version = version;
    }

    fn mark_committed(&mut self, version: u64) {
        let committed = version.saturating_sub(self.durable_version) as usize;
        self.pending.drain(..committed.min(self.pending.len()));
        self.durable_version = version;
        self.version = self.version.max(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn initiated() -> TransactionAggregate {
        let mut tx = TransactionAggregate::blank("T1");
        tx.initiate(100, "USD", "acc-a", "acc-b").unwrap();
        tx
    }

    fn approved() -> AuthorizationOutcome {
        AuthorizationOutcome::Approved {
            authorization_code: "AUTH-1".to_string(),
        }
    }

    fn settled() -> SettlementOutcome {
        SettlementOutcome::Settled {
            settlement_reference: "SET-1".to_string(),
        }
    }

    #[test]
    fn test_happy_path_buffers_one_event_per_operation() {
        let mut tx = initiated();
        tx.authorize(approved()).unwrap();
        tx.settle(settled()).unwrap();

        assert_eq!(tx.status(), Some(TransactionStatus::Completed));
        assert_eq!(tx.version(), 3);
        assert_eq!(tx.durable_version(), 0);
        let types: Vec<_> = tx.pending_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "TransactionInitiated",
                "TransactionAuthorized",
                "TransactionCompleted"
            ]
        );
    }

    #[test]
    fn test_declined_authorization_fails_transaction() {
        let mut tx = initiated();
        tx.authorize(AuthorizationOutcome::Declined {
            code: "LIMIT".to_string(),
            reason: "daily limit exceeded".to_string(),
        })
        .unwrap();
        assert_eq!(tx.status(), Some(TransactionStatus::Failed));
        assert_eq!(tx.failure().unwrap().stage, FailureStage::Authorization);
    }

    #[test]
    fn test_rejected_operation_produces_no_event() {
        let mut tx = initiated();
        tx.authorize(AuthorizationOutcome::Declined {
            code: "NSF".to_string(),
            reason: "insufficient funds".to_string(),
        })
        .unwrap();
        let before = tx.clone();

        let err = tx.settle(settled()).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidStateTransition {
                from: "Failed".to_string(),
                operation: "settle".to_string()
            }
        );
        assert_eq!(tx, before);
    }

    #[test]
    fn test_dispute_coexists_with_state() {
        let mut tx = initiated();
        tx.authorize(approved()).unwrap();
        tx.dispute("customer claims fraud").unwrap();
        assert_eq!(tx.status(), Some(TransactionStatus::Authorized));
        assert!(tx.is_disputed());

        assert!(tx.dispute("again").unwrap_err().is_invalid_transition());
        tx.settle(settled()).unwrap();
        assert_eq!(tx.status(), Some(TransactionStatus::Completed));
        assert!(tx.is_disputed());
    }

    #[test]
    fn test_reversed_rejects_further_monetary_transitions() {
        let mut tx = initiated();
        tx.authorize(approved()).unwrap();
        tx.settle(settled()).unwrap();
        tx.reverse("duplicate payment").unwrap();

        assert!(tx.reverse("again").unwrap_err().is_invalid_transition());
        assert!(tx.settle(settled()).unwrap_err().is_invalid_transition());
        assert!(tx.dispute("late").unwrap_err().is_invalid_transition());
        assert_eq!(tx.reversal_reason(), Some("duplicate payment"));
    }

    #[test]
    fn test_initiate_validation() {
        let mut tx = TransactionAggregate::blank("T1");
        assert!(tx.initiate(0, "USD", "a", "b").unwrap_err().is_validation_error());
        assert!(tx.initiate(5, "usd", "a", "b").unwrap_err().is_validation_error());
        assert!(tx.initiate(5, "USD", "a", "a").unwrap_err().is_validation_error());
        assert!(tx.pending_events().is_empty());
        assert_eq!(tx.status(), None);

        let mut tx = initiated();
        assert!(tx
            .initiate(5, "USD", "a", "b")
            .unwrap_err()
            .is_invalid_transition());
    }

    #[test]
    fn test_replay_rejects_unsupported_event() {
        let mut tx = TransactionAggregate::blank("T1");
        let event = TransactionEvent::TransactionCompleted(TransactionCompleted {
            settlement_reference: "SET".to_string(),
            completed_at: Utc::now(),
        });
        let err = tx.apply(&event).unwrap_err();
        assert_eq!(err.state, "New");
        assert_eq!(err.event_type, "TransactionCompleted");
    }

    #[test]
    fn test_mark_committed_drains_only_committed_events() {
        let mut tx = initiated();
        tx.authorize(approved()).unwrap();
        tx.mark_committed(1);
        assert_eq!(tx.pending_events().len(), 1);
        assert_eq!(tx.durable_version(), 1);
        assert_eq!(tx.version(), 2);

        tx.mark_committed(2);
        assert!(!tx.has_pending());
    }

    #[test]
    fn test_serialized_state_excludes_bookkeeping() {
        let tx = initiated();
        let value = serde_json::to_value(&tx).unwrap();
        assert!(value.get("pending").is_none());
        assert!(value.get("version").is_none());

        let mut restored: TransactionAggregate = serde_json::from_value(value).unwrap();
        restored.mark_replayed(1);
        assert_eq!(restored.amount(), 100);
        assert_eq!(restored.currency(), "USD");
        assert_eq!(restored.version(), 1);
        assert!(!restored.has_pending());
    }
}
