//! # Transaction Workflows
//!
//! The orchestration core. [`Orchestrator`] takes a single
//! [`OperationRequest`](crate::operation::OperationRequest) from request to
//! `applied`; [`BatchCoordinator`] runs several of them with locally
//! assigned nonces and pipelined settlement.

pub mod batch;
pub mod error;
pub mod orchestrator;
pub mod receipt;
pub mod state;

pub use batch::{BatchCoordinator, BatchEntry, BatchReport, BatchSummary, NonceCursor};
pub use error::{BatchError, Stage, WorkflowError};
pub use orchestrator::{Orchestrator, Submitted};
pub use receipt::{WorkflowReceipt, WorkflowResult};
pub use state::{StateChange, WorkflowState, WorkflowTracker};
