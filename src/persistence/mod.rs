// Copyright 2025 Cowboy AI, LLC.

//! # Persistence Layer
//!
//! Unit-of-work support on top of the event log: aggregates are tracked,
//! their buffered events committed as one atomic batch, and snapshots taken
//! when the policy says so.

pub mod commit_coordinator;

pub use commit_coordinator::{CommitCoordinator, CommitError};
