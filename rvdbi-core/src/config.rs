//! Engine configuration (spec §6 "a single process-wide flag enables
//! trace linking; a compile-time flag enables stub regions").

/// What the engine does with a guest syscall number that has no
/// registered handler (spec §7 "Syscall unsupported").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedSyscallPolicy {
    EmulateNoop,
    Abort,
}

impl From<UnsupportedSyscallPolicy> for rvdbi_syscall::UnsupportedPolicy {
    fn from(value: UnsupportedSyscallPolicy) -> Self {
        match value {
            UnsupportedSyscallPolicy::EmulateNoop => rvdbi_syscall::UnsupportedPolicy::EmulateNoop,
            UnsupportedSyscallPolicy::Abort => rvdbi_syscall::UnsupportedPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Code cache capacity in bytes. Default 4 MiB per spec §4.1.
    pub cache_capacity: usize,
    /// Maximum instructions per translated basic block before a forced
    /// cut (spec §4.2 terminator list).
    pub max_block_len: usize,
    /// Process-wide trace-linking flag (spec §4.4).
    pub trace_linking: bool,
    /// Whether stub regions are compiled in. Mirrors the `stub-regions`
    /// Cargo feature; exposed as a field (rather than only `cfg!`) so the
    /// allocator's placement logic is unit-testable under either setting
    /// without a separate build.
    pub stub_regions: bool,
    /// Target instruction spacing between planted stub regions (spec
    /// §4.5, documented as "1024 instructions with tolerance").
    pub stub_interval_instructions: usize,
    pub unsupported_syscall: UnsupportedSyscallPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_capacity: 4 * 1024 * 1024,
            max_block_len: 256,
            trace_linking: false,
            stub_regions: cfg!(feature = "stub-regions"),
            stub_interval_instructions: 1024,
            unsupported_syscall: UnsupportedSyscallPolicy::EmulateNoop,
        }
    }
}
