use std::collections::HashSet;

/// How rejected client commands surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionMode {
    /// Rejections look like calls that returned nothing.
    #[default]
    Silent,
    /// Non-buffered rejections are answered with a typed fault.
    Report,
}

/// Client-authority rules applied by every proxy before touching the shared context.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    blacklist: HashSet<String>,
    state_operations: HashSet<String>,
    rejection: RejectionMode,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(["clear"], ["useProgram"], RejectionMode::Silent)
    }
}

impl CommandPolicy {
    /// Build a policy from a blacklist, a state-operation set and a rejection mode.
    pub fn new<B, S>(blacklist: B, state_operations: S, rejection: RejectionMode) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            blacklist: blacklist.into_iter().map(Into::into).collect(),
            state_operations: state_operations.into_iter().map(Into::into).collect(),
            rejection,
        }
    }

    /// `true` when clients may never invoke `name`.
    pub fn is_forbidden(&self, name: &str) -> bool {
        self.blacklist.contains(name)
    }

    /// `true` when `name` sets state that must be re-asserted at the next frame boundary.
    pub fn is_state_command(&self, name: &str) -> bool {
        self.state_operations.contains(name)
    }

    /// Configured rejection mode.
    pub fn rejection(&self) -> RejectionMode {
        self.rejection
    }

    /// Blacklisted names, sorted.
    pub fn blacklist(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.blacklist.iter().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}
