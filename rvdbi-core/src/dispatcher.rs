//! The dispatcher (spec §4.4, §5): the context-switch protocol between
//! host (Rust) and the code cache, plus the decision logic for what
//! happens each time cache code exits back to the host — materialize a
//! missing target, forward a syscall, or (when possible) link the exit
//! directly to its target instead of round-tripping through here again.
//!
//! The decision logic below is ordinary, portable Rust and is exercised
//! by the test suite on any host. Only [`run`] itself needs real rv64gc
//! hardware, since it is the one place the engine executes translated
//! guest code natively; everywhere else in this crate treats the cache
//! as an opaque byte buffer.

use rvdbi_elf::GuestImage;
use rvdbi_isa::Mnemonic;
use rvdbi_syscall::{SyscallArgs, SyscallTable};

use crate::allocator::{Allocator, ExitTargets};
use crate::bbt::{BasicBlockTable, CachedBlock, Terminator};
use crate::cache::CodeCache;
use crate::callbacks::{CallbackContext, CallbackRegistry, Scope};
use crate::config::EngineConfig;
use crate::elt::{build_link_patch, ExitLinkTable, PendingLink};
use crate::error::{EngineError, Result};
use crate::rsa::RsaHandle;
use crate::stubs::StubPlanner;
use crate::weaver::Phase;

/// What the host should do next after cache code has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Resume cache execution at this guest address (materializing it
    /// first if necessary), after writing `a0_value` into the guest's
    /// `a0` (x10) — the syscall's return value.
    Resume { guest_pc: u64, a0_value: u64 },
    /// The guest called `exit`/`exit_group`; the run is over.
    Terminate { exit_code: i32 },
}

pub struct Dispatcher {
    allocator: Allocator,
    syscalls: SyscallTable,
}

impl Dispatcher {
    pub fn new(targets: ExitTargets, syscalls: SyscallTable) -> Self {
        Dispatcher {
            allocator: Allocator::new(targets),
            syscalls,
        }
    }

    /// Decide what to do given the guest pc the RSA held when cache code
    /// last exited, materializing the target block if needed. This is
    /// the dispatcher's core decision logic (spec §4.4) and is fully
    /// host-architecture independent.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_exit(
        &self,
        guest_pc: u64,
        image: &GuestImage,
        cache: &mut CodeCache,
        bbt: &mut BasicBlockTable,
        elt: &mut ExitLinkTable,
        callbacks: &CallbackRegistry,
        config: &EngineConfig,
        stubs: &mut StubPlanner,
    ) -> Result<u64> {
        if let Some(cache_address) = elt.resolved(guest_pc) {
            return Ok(cache_address);
        }
        self.allocator
            .materialize(guest_pc, image, cache, bbt, elt, callbacks, config, stubs)
    }

    /// Run a guest ECALL through the syscall shim. `resume_pc` is the
    /// address the block's exit sequence already staged into the RSA
    /// (the instruction right after the ECALL); the dispatcher only
    /// needs it to report a faulting syscall against the right pc and to
    /// hand back a `Resume` action when the guest doesn't exit.
    pub fn handle_syscall(&self, args: SyscallArgs, resume_pc: u64) -> Result<ExitAction> {
        let outcome = self
            .syscalls
            .dispatch(&args)
            .map_err(|source| EngineError::Syscall { pc: resume_pc, source })?;
        if let Some(code) = outcome.exit_code {
            return Ok(ExitAction::Terminate { exit_code: code });
        }
        Ok(ExitAction::Resume {
            guest_pc: resume_pc,
            a0_value: outcome.return_value,
        })
    }

    /// Fire RUNTIME-mode callbacks attached to a block's exit — the BB
    /// scope always, plus the Instruction/mnemonic/group scopes when this
    /// block is a segment whose own last instruction forced the cut
    /// (spec §4.3: a segmented block's trailing instrumented instruction
    /// still gets its RUNTIME instruction-level callback exactly once per
    /// dynamic execution) — then attempt trace linking (spec §4.4): for
    /// every link site in `block` whose target is already materialized
    /// and not yet linked, patch the exit in place into a direct branch;
    /// for every site whose target is still unresolved, register it as
    /// pending so a later `Allocator::materialize` drains and patches it
    /// the moment that target appears.
    pub fn link_if_possible(
        &self,
        block: &CachedBlock,
        cache: &mut CodeCache,
        elt: &mut ExitLinkTable,
        callbacks: &CallbackRegistry,
        config: &EngineConfig,
    ) -> Result<bool> {
        let ctx = CallbackContext {
            guest_address: block.guest_start,
            basic_block_address: block.basic_block_address,
        };
        callbacks.fire_runtime(Scope::Bb, Mnemonic::Unknown, 0, Phase::Post, &ctx);
        if let Terminator::Segmented {
            cause: Some((mnemonic, group)),
            ..
        } = &block.terminator
        {
            callbacks.fire_runtime(Scope::Instruction, *mnemonic, *group, Phase::Post, &ctx);
        }

        if !config.trace_linking || !block.terminator.is_linkable() {
            return Ok(false);
        }

        let mut all_linked = true;
        for site in &block.link_sites {
            if elt.is_linked(site.site_address) {
                continue;
            }
            match elt.resolved(site.target) {
                Some(target_address) => {
                    if let Some(patch) = build_link_patch(site.site_address, site.len_words, target_address) {
                        if let Some(offset) = cache.offset_of(site.site_address) {
                            cache.patch(offset, &patch)?;
                            elt.mark_linked(site.site_address);
                            log::trace!(
                                "trace-linked exit at cache {:#x} directly to guest {:#x} (cache {target_address:#x})",
                                site.site_address,
                                site.target,
                            );
                            continue;
                        }
                    }
                    all_linked = false;
                }
                None => {
                    elt.record_pending(PendingLink {
                        target: site.target,
                        site_address: site.site_address,
                        len_words: site.len_words,
                    });
                    all_linked = false;
                }
            }
        }
        Ok(all_linked)
    }

    pub fn rsa_snapshot_pc(&self, rsa: &RsaHandle) -> u64 {
        rsa.get().pc
    }
}

#[cfg(target_arch = "riscv64")]
pub mod native {
    //! The one part of the engine that must run on real rv64gc hardware:
    //! the assembly trampolines that hand control to the code cache and
    //! back. Single-hart only (spec's `one-core` assumption, shared with
    //! `rvdbi-icache`): a second concurrent `run` against the same RSA
    //! would race on its saved host `ra`/`sp` slots.

    use crate::rsa::RegisterSaveArea;

    core::arch::global_asm!(
        ".pushsection .text.rvdbi_enter_cache,\"ax\"",
        ".global rvdbi_enter_cache",
        "rvdbi_enter_cache:",
        // a0 = RSA pointer, a1 = cache entry address. Durably stash the
        // host's own ra/sp before t6/a0 stops pointing at a live Rust
        // frame and becomes the permanent RSA base pointer instead —
        // every emitted exit sequence assumes x31 never holds anything
        // else, so this is the one chance to save them.
        "sd ra, {host_ra}(a0)",
        "sd sp, {host_sp}(a0)",
        "mv t6, a0",
        "jr a1",
        ".popsection",
        host_ra = const RegisterSaveArea::host_ra_offset(),
        host_sp = const RegisterSaveArea::host_sp_offset(),
    );

    core::arch::global_asm!(
        ".pushsection .text.rvdbi_exit_trampoline,\"ax\"",
        ".global rvdbi_exit_trampoline",
        "rvdbi_exit_trampoline:",
        // x31 still holds the RSA base (never clobbered by emitted exit
        // sequences); persist every GPR so the dispatcher can inspect
        // syscall argument registers and any other guest state.
        "sd x1, 8(x31)",
        "sd x2, 16(x31)",
        "sd x5, 40(x31)",
        "sd x6, 48(x31)",
        "sd x7, 56(x31)",
        "sd x10, 80(x31)",
        "sd x11, 88(x31)",
        "sd x12, 96(x31)",
        "sd x13, 104(x31)",
        "sd x14, 112(x31)",
        "sd x15, 120(x31)",
        "sd x17, 136(x31)",
        // Restore the host's own ra/sp — saved by rvdbi_enter_cache —
        // before returning, so `ret` lands back at enter_cache's call
        // site instead of wherever the guest last left x1 pointing, and
        // the host resumes on its own stack frame rather than the
        // guest's.
        "ld ra, {host_ra}(x31)",
        "ld sp, {host_sp}(x31)",
        "ret",
        ".popsection",
        host_ra = const RegisterSaveArea::host_ra_offset(),
        host_sp = const RegisterSaveArea::host_sp_offset(),
    );

    extern "C" {
        fn rvdbi_enter_cache(rsa: *mut RegisterSaveArea, entry: u64);
        fn rvdbi_exit_trampoline();
    }

    /// Host address of the exit trampoline, for the allocator to bake
    /// into every exit sequence's final `jalr` target.
    pub fn exit_trampoline_address() -> u64 {
        rvdbi_exit_trampoline as usize as u64
    }

    /// Hand control to translated guest code at `entry`, returning once
    /// the exit trampoline has saved guest state back into `rsa`.
    ///
    /// # Safety
    /// `entry` must be a cache address produced by this engine's
    /// allocator, and `rsa` must be the same RSA instance that address's
    /// exit sequence was emitted against.
    pub unsafe fn enter_cache(rsa: *mut RegisterSaveArea, entry: u64) -> crate::error::Result<()> {
        rvdbi_enter_cache(rsa, entry);
        Ok(())
    }
}

#[cfg(not(target_arch = "riscv64"))]
pub mod native {
    //! Non-rv64gc development hosts cannot execute translated guest code
    //! at all (same-ISA execution requires a matching host ISA); `run`
    //! reports [`EngineError::UnsupportedHostArch`] instead.

    use crate::error::{EngineError, Result};
    use crate::rsa::RegisterSaveArea;

    /// No real trampoline exists on this host; the sentinel value is
    /// never jumped to since [`enter_cache`] always errors first.
    pub fn exit_trampoline_address() -> u64 {
        0xdead_0000
    }

    /// # Safety
    /// Never actually unsafe to call (it always errors), but keeps the
    /// same signature as the riscv64 variant so callers don't need a
    /// `cfg` of their own.
    pub unsafe fn enter_cache(_rsa: *mut RegisterSaveArea, _entry: u64) -> Result<()> {
        Err(EngineError::UnsupportedHostArch {
            arch: std::env::consts::ARCH,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvdbi_elf::{DataSegment, GuestImage};
    use rvdbi_isa::encode::jal;
    use rvdbi_syscall::UnsupportedPolicy;
    use std::collections::HashMap;

    fn image_from(words: &[u32], base: u64) -> GuestImage {
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        GuestImage {
            text_base: base,
            text: bytes,
            data_segments: Vec::<DataSegment>::new(),
            entry: base,
            symbols_by_name: HashMap::new(),
            symbols_by_addr: HashMap::new(),
        }
    }

    fn dispatcher() -> Dispatcher {
        let targets = ExitTargets {
            rsa_address: 0x9000_0000,
            dispatch_trampoline: 0xa000_0000,
        };
        Dispatcher::new(
            targets,
            rvdbi_syscall::SyscallTable::newlib_rv64(UnsupportedPolicy::EmulateNoop),
        )
    }

    #[test]
    fn handle_exit_materializes_on_first_visit_then_reuses_cache() {
        let words = [jal(0, 0)];
        let image = image_from(&words, 0x5000);
        let mut cache = CodeCache::new(1 << 16).unwrap();
        let mut bbt = BasicBlockTable::new();
        let mut elt = ExitLinkTable::new();
        let callbacks = CallbackRegistry::new();
        let config = EngineConfig::default();
        let dispatcher = dispatcher();

        let mut stubs = StubPlanner::new(1024);
        let a = dispatcher
            .handle_exit(0x5000, &image, &mut cache, &mut bbt, &mut elt, &callbacks, &config, &mut stubs)
            .unwrap();
        let b = dispatcher
            .handle_exit(0x5000, &image, &mut cache, &mut bbt, &mut elt, &callbacks, &config, &mut stubs)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(bbt.len(), 1);
    }

    fn sample_block(cache: &mut CodeCache, terminator: Terminator, link_sites: Vec<crate::bbt::LinkSite>) -> CachedBlock {
        let cache_address = cache.emit(&[0x0000_0013]).unwrap();
        CachedBlock {
            id: 0,
            guest_start: 0x100,
            guest_end: 0x104,
            cache_address,
            cache_length: 4,
            instruction_count: 1,
            terminator,
            basic_block_address: 0x100,
            link_sites,
        }
    }

    #[test]
    fn link_if_possible_is_false_when_trace_linking_disabled() {
        let dispatcher = dispatcher();
        let mut cache = CodeCache::new(4096).unwrap();
        let mut elt = ExitLinkTable::new();
        let callbacks = CallbackRegistry::new();
        let config = EngineConfig::default();
        let block = sample_block(&mut cache, Terminator::DirectJump { target: 0x1000, rd: 0, link: 0 }, vec![]);

        let linked = dispatcher
            .link_if_possible(&block, &mut cache, &mut elt, &callbacks, &config)
            .unwrap();
        assert!(!linked);
    }

    #[test]
    fn link_if_possible_requires_every_static_target_materialized() {
        let dispatcher = dispatcher();
        let mut cache = CodeCache::new(4096).unwrap();
        let mut elt = ExitLinkTable::new();
        let callbacks = CallbackRegistry::new();
        let mut config = EngineConfig::default();
        config.trace_linking = true;

        let terminator = Terminator::CondBranch {
            taken: 0x200,
            not_taken: 0x300,
            mnemonic: rvdbi_isa::Mnemonic::Beq,
            rs1: 1,
            rs2: 2,
        };
        let not_taken_addr = cache.emit(&[0x0000_0013, 0x0000_0013]).unwrap();
        let taken_addr = cache.emit(&[0x0000_0013, 0x0000_0013]).unwrap();
        let link_sites = vec![
            crate::bbt::LinkSite {
                target: 0x300,
                site_address: not_taken_addr,
                len_words: 2,
            },
            crate::bbt::LinkSite {
                target: 0x200,
                site_address: taken_addr,
                len_words: 2,
            },
        ];
        let block = sample_block(&mut cache, terminator, link_sites);

        assert!(!dispatcher
            .link_if_possible(&block, &mut cache, &mut elt, &callbacks, &config)
            .unwrap());

        let nearby = cache.address_of(0);
        elt.materialize(0x200, nearby);
        elt.materialize(0x300, nearby);
        assert!(dispatcher
            .link_if_possible(&block, &mut cache, &mut elt, &callbacks, &config)
            .unwrap());
    }
}
