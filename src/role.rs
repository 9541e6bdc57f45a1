//! Logical dispatcher roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical category of execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// CPU-bound work.
    Cpu,
    /// Disk and network IO.
    Io,
    /// Work confined to the main loop thread, always dispatched.
    Main,
    /// Work confined to the main loop thread, run inline when already on it.
    MainImmediate,
    /// Work not confined to any thread.
    Unconfined,
}

impl Role {
    /// Number of roles.
    pub const COUNT: usize = 5;

    /// Every role, in slot order.
    pub const ALL: [Role; Role::COUNT] = [
        Role::Cpu,
        Role::Io,
        Role::Main,
        Role::MainImmediate,
        Role::Unconfined,
    ];

    /// Whether a test provider backs this role with an eager context unless overridden.
    pub const fn is_unconfined_by_default(self) -> bool {
        matches!(self, Role::Main | Role::MainImmediate | Role::Unconfined)
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Cpu => "cpu",
            Role::Io => "io",
            Role::Main => "main",
            Role::MainImmediate => "main_immediate",
            Role::Unconfined => "unconfined",
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
