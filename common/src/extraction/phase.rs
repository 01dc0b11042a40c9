// Job lifecycle phases

use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connected,
    Selecting,
    Filtering,
    Transferring,
    Finalizing,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connected => "connected",
            Phase::Selecting => "selecting",
            Phase::Filtering => "filtering",
            Phase::Transferring => "transferring",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// Forward transitions only; Failed is reachable from every live phase
    pub fn can_advance_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Connected)
            | (Connected, Selecting)
            | (Selecting, Filtering)
            | (Filtering, Transferring)
            | (Transferring, Finalizing)
            | (Finalizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the phase of one job run
#[derive(Debug)]
pub struct PhaseTracker {
    job_name: String,
    current: Phase,
}

impl PhaseTracker {
    pub fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            current: Phase::Idle,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn advance(&mut self, next: Phase) {
        if !self.current.can_advance_to(next) {
            warn!(job_name = %self.job_name, from = %self.current, to = %next, "Unexpected phase transition");
        }
        debug!(job_name = %self.job_name, from = %self.current, to = %next, "Phase change");
        self.current = next;
    }

    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.advance(Phase::Failed);
        }
    }
}
