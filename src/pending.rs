//! Deferred calls waiting on shared variables
//!
//! A [`PendingCall`] defers work until a set of required variables become
//! available, with an absolute expiry. Creation triggers a poll for each
//! missing variable; the engine re-evaluates the pending list whenever a
//! variable transitions into the set state, and the target's housekeeping
//! tick drops expired calls.

use crate::engine::Engine;
use crate::registry::VarId;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Max delay before a pending call expires by default
pub const MAX_CALL_DELAY: Duration = Duration::from_secs(2);

/// What to do once all required variables are set
pub enum PendingAction {
    /// Wake a caller blocked in `wait_for`
    Notify(oneshot::Sender<()>),
    /// Run a closure inside the engine (e.g. a block batch resend)
    Run(Box<dyn FnOnce(&mut Engine) + Send>),
}

pub struct PendingCall {
    pub required: Vec<VarId>,
    pub created: Instant,
    pub deadline: Option<Instant>,
    /// Taken on invocation; a pending call invokes at most once
    pub action: Option<PendingAction>,
    /// Runs if the call expires instead of invoking
    pub cleanup: Option<Box<dyn FnOnce(&mut Engine) + Send>>,
    /// Short label for log lines
    pub label: &'static str,
}

impl PendingCall {
    pub fn new(
        label: &'static str,
        required: Vec<VarId>,
        action: PendingAction,
        timeout: Option<Duration>,
    ) -> Self {
        let created = Instant::now();
        Self {
            required,
            created,
            deadline: timeout.map(|t| created + t),
            action: Some(action),
            cleanup: None,
            label,
        }
    }

    pub fn on_expire(mut self, f: impl FnOnce(&mut Engine) + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(f));
        self
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d < now)
    }
}
