//! Instruction-cache coherence for the JIT code cache.
//!
//! After the allocator (or trace linker) writes a range of the code cache
//! that is about to execute, that range must be synchronized so the CPU's
//! instruction fetch sees the new bytes rather than stale icache lines.
//! Spec §4.1 / §5 call this out explicitly; this crate isolates the
//! platform-specific primitive the same way the teacher's
//! `jit-icache-coherence` crate does.

use cfg_if::cfg_if;

/// Make `[ptr, ptr + len)` visible to instruction fetch.
///
/// # Safety
/// `ptr` must point to `len` readable, writable bytes that the caller has
/// just finished writing and will subsequently execute.
pub unsafe fn synchronize(ptr: *const u8, len: usize) {
    if len == 0 {
        return;
    }
    cfg_if! {
        if #[cfg(target_arch = "riscv64")] {
            riscv64::synchronize(ptr, len)
        } else if #[cfg(unix)] {
            unix_fallback::synchronize(ptr, len)
        } else {
            let _ = (ptr, len);
        }
    }
}

#[cfg(target_arch = "riscv64")]
mod riscv64 {
    /// `fence.i` only guarantees coherence for the hart that executes it;
    /// under the `one-core` feature that is sufficient. Otherwise a real
    /// multi-hart implementation would need an inter-hart IPI (e.g. the
    /// `__riscv_flush_icache` syscall on Linux), which this engine's
    /// single-thread, single-hart execution model never requires.
    pub unsafe fn synchronize(_ptr: *const u8, _len: usize) {
        std::arch::asm!("fence.i");
    }
}

#[cfg(all(unix, not(target_arch = "riscv64")))]
mod unix_fallback {
    /// Development hosts (e.g. running the engine's test suite on
    /// x86_64/aarch64 while cross-translating rv64gc guest code) have no
    /// `fence.i` equivalent to reach for directly; a full memory barrier
    /// is the closest portable approximation and is adequate since no
    /// actual rv64gc host ever executes the cache bytes in that
    /// configuration.
    pub unsafe fn synchronize(_ptr: *const u8, _len: usize) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchronize_on_empty_range_is_a_no_op() {
        unsafe { synchronize(std::ptr::null(), 0) };
    }
}
