//! State shared by everything working on one run.

use foreman_state::RunId;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditTrail;
use crate::domain::Goal;
use crate::safety::SafetyInterlock;

/// Passed explicitly to executors and the gateway; there is no ambient
/// per-run state.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: RunId,
    pub goal: Goal,
    pub interlock: SafetyInterlock,
    pub audit: AuditTrail,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(run_id: RunId, goal: Goal, interlock: SafetyInterlock) -> Self {
        Self {
            run_id,
            goal,
            interlock,
            audit: AuditTrail::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
