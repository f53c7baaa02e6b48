//! # Workflow State Machine
//!
//! ```text
//! Requested -> Built -> Signed -> Submitted -> ProofPending -> ProofReady
//!           -> IncludedPending -> Confirmed
//!
//! any non-terminal state -> Failed
//! ```
//!
//! Transitions only move forward one step at a time. `Confirmed` and
//! `Failed` are terminal and immutable: once there, every further
//! transition is refused. Retrying means starting a new workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::operation::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Requested,
    Built,
    Signed,
    Submitted,
    ProofPending,
    ProofReady,
    IncludedPending,
    Confirmed,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// The only state reachable from `self` on success.
    pub fn successor(&self) -> Option<WorkflowState> {
        match self {
            Self::Requested => Some(Self::Built),
            Self::Built => Some(Self::Signed),
            Self::Signed => Some(Self::Submitted),
            Self::Submitted => Some(Self::ProofPending),
            Self::ProofPending => Some(Self::ProofReady),
            Self::ProofReady => Some(Self::IncludedPending),
            Self::IncludedPending => Some(Self::Confirmed),
            Self::Confirmed | Self::Failed => None,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: WorkflowState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Tracks one operation through the workflow and keeps its history.
#[derive(Debug, Clone)]
pub struct WorkflowTracker {
    kind: OperationKind,
    state: WorkflowState,
    history: Vec<StateChange>,
}

impl WorkflowTracker {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            state: WorkflowState::Requested,
            history: vec![StateChange {
                state: WorkflowState::Requested,
                at: Utc::now(),
                note: None,
            }],
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.history
            .first()
            .map(|c| c.at)
            .unwrap_or_else(Utc::now)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `to` if it is the successor of the current state.
    /// Returns whether the transition happened.
    pub fn advance(&mut self, to: WorkflowState) -> bool {
        if self.state.successor() != Some(to) {
            return false;
        }
        self.record(to, None);
        true
    }

    /// Move to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.record(WorkflowState::Failed, Some(reason.into()));
        true
    }

    fn record(&mut self, state: WorkflowState, note: Option<String>) {
        self.state = state;
        self.history.push(StateChange {
            state,
            at: Utc::now(),
            note,
        });
    }

    pub(crate) fn into_history(self) -> Vec<StateChange> {
        self.history
    }
}
