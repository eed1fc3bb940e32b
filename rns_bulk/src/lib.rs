//! Batched RNS registration, renewal and record management on Rootstock
//!
//! The registration workflow runs commit-reveal against the FIFS registrar,
//! prices batches through the bulk manager, and reports results per domain.

pub mod availability;
pub mod chain;
pub mod client;
pub mod commit_reveal;
pub mod commitment;
pub mod config;
pub mod cost;
pub mod domains;
pub mod error;
pub mod orchestrator;
pub mod rns;
pub mod session;
pub mod signing;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use availability::AvailabilityResolver;
pub use chain::RnsClient;
pub use client::EthersRnsClient;
pub use config::{NetworkConfig, WorkflowConfig};
pub use cost::{CostAggregator, CostQuote, CostWatcher};
pub use domains::{DomainIndex, OwnedDomain};
pub use error::{BulkError, ErrorKind};
pub use orchestrator::TransactionOrchestrator;
pub use session::{BatchStatus, RegistrationSession, SessionPhase};
pub use signing::{AutoApprove, SigningGate, SigningRequest, SigningStep};
pub use types::{AvailabilityState, BatchOutcome, DomainRequest, DomainRow};
