use crate::foundation::error::{GlmuxError, GlmuxResult};
use crate::proxy::policy::{CommandPolicy, RejectionMode};
use crate::schedule::reset::{ResetStep, default_reset_sequence};
use std::time::Duration;

/// Options controlling the multiplexer.
///
/// Deserializes from camelCase JSON; missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MuxOpts {
    /// Maximum participants replayed per cycle.
    pub capacity: usize,
    /// Deadline for every sampled participant to finish its frame.
    pub frame_timeout_ms: u64,
    /// Pause between cycles.
    pub frame_interval_ms: u64,
    /// Delay before the first cycle.
    pub start_delay_ms: u64,
    /// Operations clients may never invoke.
    pub blacklist: Vec<String>,
    /// Operations whose last call is re-asserted at the start of every frame replay.
    pub state_operations: Vec<String>,
    /// How rejected client commands surface.
    pub rejection: RejectionMode,
    /// Per-frame reset sequence, run with scheduler authority.
    pub reset: Vec<ResetStep>,
    /// Sampler seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for MuxOpts {
    fn default() -> Self {
        Self {
            capacity: 10,
            frame_timeout_ms: 250,
            frame_interval_ms: 16,
            start_delay_ms: 500,
            blacklist: vec!["clear".to_owned()],
            state_operations: vec!["useProgram".to_owned()],
            rejection: RejectionMode::Silent,
            reset: default_reset_sequence(),
            seed: None,
        }
    }
}

impl MuxOpts {
    /// Reject option combinations the scheduler cannot run with.
    pub fn validate(&self) -> GlmuxResult<()> {
        if self.capacity == 0 {
            return Err(GlmuxError::validation("capacity must be >= 1"));
        }
        if self.frame_timeout_ms == 0 {
            return Err(GlmuxError::validation("frameTimeoutMs must be >= 1"));
        }
        if self.frame_interval_ms == 0 {
            return Err(GlmuxError::validation("frameIntervalMs must be >= 1"));
        }
        if let Some(step) = self.reset.iter().find(|s| s.op.is_empty()) {
            return Err(GlmuxError::validation(format!(
                "reset step with empty op name: {step:?}"
            )));
        }
        Ok(())
    }

    /// Client command policy described by these options.
    pub fn policy(&self) -> CommandPolicy {
        CommandPolicy::new(
            self.blacklist.iter().cloned(),
            self.state_operations.iter().cloned(),
            self.rejection,
        )
    }

    /// [`MuxOpts::frame_timeout_ms`] as a duration.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// [`MuxOpts::frame_interval_ms`] as a duration.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// [`MuxOpts::start_delay_ms`] as a duration.
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}
