//! Parent-process supervision
//!
//! The daemon is normally launched by a controlling process and must not
//! outlive it. Liveness is checked once per relay wake via procfs, so no
//! signal plumbing with the parent is needed.

use std::path::Path;

/// Watches the launching process.
pub struct ParentWatcher {
    parent_pid: Option<u32>,
}

impl ParentWatcher {
    /// `None` runs unsupervised: the parent is always considered alive.
    pub fn new(parent_pid: Option<u32>) -> Self {
        Self { parent_pid }
    }

    /// True while the supervising process still exists.
    pub fn parent_alive(&self) -> bool {
        match self.parent_pid {
            None => true,
            Some(pid) => Path::new(&format!("/proc/{pid}")).exists(),
        }
    }
}
