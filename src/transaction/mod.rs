// Copyright 2025 Cowboy AI, LLC.

//! Transaction domain: a financial transfer and its lifecycle
//!
//! ```mermaid
//! stateDiagram-v2
//!     [*] --> Initiated
//!     Initiated --> Authorized
//!     Initiated --> Failed
//!     Authorized --> Completed
//!     Authorized --> Failed
//!     Completed --> Reversed
//! ```
//!
//! Authorized and Completed transfers may additionally be flagged as
//! disputed; the flag does not replace the underlying state.

pub mod aggregate;
pub mod commands;
pub mod events;
pub mod state;

pub use aggregate::{
    AuthorizationOutcome, FailureDetails, SettlementOutcome, TransactionAggregate,
};
pub use commands::{
    CommandAcknowledgment, CommandError, CommandKind, TransactionCommand,
    TransactionCommandHandler,
};
pub use events::{
    FailureStage, TransactionAuthorized, TransactionCompleted, TransactionDisputed,
    TransactionEvent, TransactionFailed, TransactionInitiated, TransactionReversed,
};
pub use state::{next_status, TransactionStatus, Transition};
