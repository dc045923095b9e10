//! Virtual-memory configuration.
//!
//! A [`VmConfig`] is fixed for the lifetime of a
//! [`VmContext`](crate::VmContext). Build one with [`VmConfigBuilder`]:
//!
//! ```
//! use vm::{PolicyKind, VmConfigBuilder};
//!
//! let config = VmConfigBuilder::new()
//!     .policy(PolicyKind::Clock)
//!     .max_stack_size(1 << 20)
//!     .build();
//! assert_eq!(config.policy, PolicyKind::Clock);
//! assert_eq!(config.stack_growth_margin, 32);
//! assert!(config.reject_guard_page);
//! ```

/// How far below the stack pointer an access may land and still count as a
/// stack access, in bytes.
///
/// x86 `PUSHA` writes 32 bytes below the stack pointer before the stack
/// pointer itself is updated.
pub const DEFAULT_STACK_GROWTH_MARGIN: usize = 32;

/// Default upper bound of a process's stack, in bytes.
pub const DEFAULT_MAX_STACK_SIZE: usize = 8 << 20;

/// Which eviction policy picks the victim frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    /// Evict the page that became resident the longest time ago.
    Fifo,
    /// Second-chance over the FIFO order, using the accessed bit.
    Clock,
}

/// Tunables of the virtual-memory subsystem.
#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Bytes below the stack pointer that still trigger stack growth.
    pub stack_growth_margin: usize,
    /// Whether a fault at exactly one page below the stack pointer is fatal.
    pub reject_guard_page: bool,
    /// Maximum size of a process's stack, in bytes.
    pub max_stack_size: usize,
    /// The eviction policy.
    pub policy: PolicyKind,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_growth_margin: DEFAULT_STACK_GROWTH_MARGIN,
            reject_guard_page: true,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            policy: PolicyKind::Fifo,
        }
    }
}

/// A builder for [`VmConfig`].
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl Default for VmConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VmConfigBuilder {
    /// Starts from the default configuration.
    pub fn new() -> Self {
        Self {
            config: VmConfig::default(),
        }
    }

    /// Sets how many bytes below the stack pointer still count as a stack
    /// access.
    pub fn stack_growth_margin(mut self, margin: usize) -> Self {
        self.config.stack_growth_margin = margin;
        self
    }

    /// Sets whether a fault at exactly `stack_pointer - PAGE_SIZE` is
    /// rejected.
    pub fn reject_guard_page(mut self, reject: bool) -> Self {
        self.config.reject_guard_page = reject;
        self
    }

    /// Sets the maximum stack size in bytes.
    pub fn max_stack_size(mut self, size: usize) -> Self {
        self.config.max_stack_size = size;
        self
    }

    /// Sets the eviction policy.
    pub fn policy(mut self, policy: PolicyKind) -> Self {
        self.config.policy = policy;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> VmConfig {
        self.config
    }
}
