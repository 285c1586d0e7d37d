//! The engine (spec §6): the public front door. Owns every other
//! component and exposes the embedder-facing API — construct from a
//! loaded guest image, register callbacks, run to completion.

use rvdbi_elf::GuestImage;
use rvdbi_syscall::SyscallArgs;

use crate::allocator::ExitTargets;
use crate::bbt::{BasicBlockTable, CachedBlock, Terminator};
use crate::cache::CodeCache;
use crate::callbacks::{AllocatorCallback, CallbackContext, CallbackRegistry, RuntimeCallback, Scope};
use crate::config::EngineConfig;
use crate::dispatcher::{native, Dispatcher, ExitAction};
use crate::elt::ExitLinkTable;
use crate::error::{EngineError, Result};
use crate::guest_args::{self, StackImage};
use crate::rsa::RsaHandle;
use crate::stubs::StubPlanner;
use crate::weaver::Phase;

pub struct Engine {
    image: GuestImage,
    cache: CodeCache,
    bbt: BasicBlockTable,
    elt: ExitLinkTable,
    callbacks: CallbackRegistry,
    config: EngineConfig,
    rsa: RsaHandle,
    dispatcher: Dispatcher,
    stubs: StubPlanner,
    stack: StackImage,
}

impl Engine {
    pub fn new(image: GuestImage, config: EngineConfig) -> Result<Self> {
        let cache = CodeCache::new(config.cache_capacity)?;
        let rsa = RsaHandle::new();
        let targets = ExitTargets {
            rsa_address: rsa.address(),
            dispatch_trampoline: native::exit_trampoline_address(),
        };
        let syscalls = rvdbi_syscall::SyscallTable::newlib_rv64(config.unsupported_syscall.into());
        syscalls.set_initial_brk(initial_brk(&image));
        let dispatcher = Dispatcher::new(targets, syscalls);
        let stubs = StubPlanner::new(config.stub_interval_instructions);
        let stack = guest_args::build_stack_image(&[], &[]);

        Ok(Engine {
            image,
            cache,
            bbt: BasicBlockTable::new(),
            elt: ExitLinkTable::new(),
            callbacks: CallbackRegistry::new(),
            config,
            rsa,
            dispatcher,
            stubs,
            stack,
        })
    }

    /// Register the guest's `argv`/`envp` (spec §6 lifecycle: "initialize
    /// with target path; register guest argv/envp; run"). Must be called
    /// before [`Engine::run`]; replaces whatever stack image `new`
    /// seeded by default (an empty argv/envp). `argv[0]` is conventionally
    /// the program's own path, matching Newlib's `_start` expectations.
    pub fn set_guest_args(&mut self, argv: &[String], envp: &[String]) {
        self.stack = guest_args::build_stack_image(argv, envp);
    }

    pub fn register_scoped_allocator(&mut self, scope: Scope, phase: Phase, cb: AllocatorCallback) -> Result<()> {
        self.callbacks.register_scoped_allocator(scope, phase, cb)
    }

    pub fn register_scoped_runtime(&mut self, scope: Scope, phase: Phase, cb: RuntimeCallback) -> Result<()> {
        self.callbacks.register_scoped_runtime(scope, phase, cb)
    }

    pub fn register_mnemonic_allocator(
        &mut self,
        mnemonic: rvdbi_isa::Mnemonic,
        phase: Phase,
        cb: AllocatorCallback,
    ) -> Result<()> {
        self.callbacks.register_mnemonic_allocator(mnemonic, phase, cb)
    }

    pub fn register_mnemonic_runtime(
        &mut self,
        mnemonic: rvdbi_isa::Mnemonic,
        phase: Phase,
        cb: RuntimeCallback,
    ) -> Result<()> {
        self.callbacks.register_mnemonic_runtime(mnemonic, phase, cb)
    }

    pub fn register_group_allocator(&mut self, group: u32, phase: Phase, cb: AllocatorCallback) -> Result<()> {
        self.callbacks.register_group_allocator(group, phase, cb)
    }

    pub fn register_group_runtime(&mut self, group: u32, phase: Phase, cb: RuntimeCallback) -> Result<()> {
        self.callbacks.register_group_runtime(group, phase, cb)
    }

    pub fn block_count(&self) -> usize {
        self.bbt.len()
    }

    /// The descriptor materialized for `guest_pc`, if any — lets tests
    /// and tooling inspect a block's terminator kind and attribution
    /// without a real rv64gc host to execute it on.
    pub fn block(&self, guest_pc: u64) -> Option<&CachedBlock> {
        self.bbt.lookup(guest_pc)
    }

    /// Materialize (without executing) the block at `guest_pc`, mainly
    /// so tests and tooling can inspect translation output without a
    /// real rv64gc host.
    pub fn materialize(&mut self, guest_pc: u64) -> Result<u64> {
        self.dispatcher.handle_exit(
            guest_pc,
            &self.image,
            &mut self.cache,
            &mut self.bbt,
            &mut self.elt,
            &self.callbacks,
            &self.config,
            &mut self.stubs,
        )
    }

    /// Flush the code cache and every index keyed against it (spec
    /// §4.1's only eviction primitive), resetting the stub planner too —
    /// every planted stub's cache address is invalidated by the flush,
    /// so tracking them across it would let `nearest_reachable` hand back
    /// addresses that no longer hold a stub.
    pub fn flush(&mut self) {
        log::debug!("engine flush: {} block(s) and every exit link discarded", self.bbt.len());
        self.cache.flush();
        self.bbt.clear();
        self.elt.clear();
        self.stubs = StubPlanner::new(self.config.stub_interval_instructions);
    }

    /// Run the guest program to completion, returning its reported exit
    /// code. Requires a host compiled for `riscv64`, since this engine
    /// executes translated guest code natively rather than emulating it.
    pub fn run(&mut self) -> Result<i32> {
        #[cfg(target_arch = "riscv64")]
        {
            self.run_native()
        }
        #[cfg(not(target_arch = "riscv64"))]
        {
            Err(EngineError::UnsupportedHostArch {
                arch: std::env::consts::ARCH,
            })
        }
    }

    #[cfg(target_arch = "riscv64")]
    fn run_native(&mut self) -> Result<i32> {
        let mut guest_pc = self.image.entry;
        self.rsa.get_mut().gpr[2] = self.stack.initial_sp;
        loop {
            let cache_address = self.dispatcher.handle_exit(
                guest_pc,
                &self.image,
                &mut self.cache,
                &mut self.bbt,
                &mut self.elt,
                &self.callbacks,
                &self.config,
                &mut self.stubs,
            )?;

            let block = self
                .bbt
                .lookup(guest_pc)
                .expect("a materialized block must back every cache entry we just ran")
                .clone();

            // RUNTIME PRE callbacks fire once per dynamic entry into this
            // block, before the cached code itself ever runs (spec §5).
            let entry_ctx = CallbackContext {
                guest_address: block.guest_start,
                basic_block_address: block.basic_block_address,
            };
            self.callbacks
                .fire_runtime(Scope::Bb, rvdbi_isa::Mnemonic::Unknown, 0, Phase::Pre, &entry_ctx);
            if let Terminator::Segmented {
                cause: Some((mnemonic, group)),
                ..
            } = &block.terminator
            {
                self.callbacks
                    .fire_runtime(Scope::Instruction, *mnemonic, *group, Phase::Pre, &entry_ctx);
            }

            self.rsa.get_mut().pc = guest_pc;
            unsafe { native::enter_cache(self.rsa.get_mut() as *mut _, cache_address)? };
            let exited_pc = self.rsa.get().pc;

            self.dispatcher
                .link_if_possible(&block, &mut self.cache, &mut self.elt, &self.callbacks, &self.config)?;

            match &block.terminator {
                Terminator::Syscall { .. } => {
                    let regs = self.rsa.get();
                    let args = SyscallArgs {
                        number: regs.gpr[17],
                        a0: regs.gpr[10],
                        a1: regs.gpr[11],
                        a2: regs.gpr[12],
                        a3: regs.gpr[13],
                        a4: regs.gpr[14],
                        a5: regs.gpr[15],
                    };
                    match self.dispatcher.handle_syscall(args, exited_pc)? {
                        ExitAction::Terminate { exit_code } => {
                            // The engine-lifecycle exit routine (spec §6's
                            // single "exit routine" registration, distinct
                            // from BB/instruction scopes) fires exactly
                            // once here, after the guest's last executed
                            // instruction and before the engine returns.
                            let ctx = CallbackContext {
                                guest_address: exited_pc,
                                basic_block_address: exited_pc,
                            };
                            self.callbacks
                                .fire_runtime(Scope::Exit, rvdbi_isa::Mnemonic::Unknown, 0, Phase::Post, &ctx);
                            return Ok(exit_code);
                        }
                        ExitAction::Resume { guest_pc: next, a0_value } => {
                            self.rsa.get_mut().gpr[10] = a0_value;
                            guest_pc = next;
                        }
                    }
                }
                _ => guest_pc = exited_pc,
            }
        }
    }
}

/// Seed the syscall shim's `brk` cursor just past every statically
/// mapped byte, matching Newlib's convention of starting the heap at
/// the end of `.bss` (spec §3's syscall table description).
fn initial_brk(image: &GuestImage) -> u64 {
    let mut high = image.text_base + image.text.len() as u64;
    for segment in &image.data_segments {
        high = high.max(segment.address + segment.bytes.len() as u64);
    }
    (high + 0xfff) & !0xfff
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvdbi_elf::DataSegment;
    use rvdbi_isa::encode::jal;
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

    #[test]
    fn materialize_populates_block_table() {
        let image = image_from(&[jal(0, 0)], 0x1000);
        let mut engine = Engine::new(image, EngineConfig::default()).unwrap();
        engine.materialize(0x1000).unwrap();
        assert_eq!(engine.block_count(), 1);
    }

    #[test]
    fn flush_drops_materialized_blocks() {
        let image = image_from(&[jal(0, 0)], 0x1000);
        let mut engine = Engine::new(image, EngineConfig::default()).unwrap();
        engine.materialize(0x1000).unwrap();
        engine.flush();
        assert_eq!(engine.block_count(), 0);
    }

    #[test]
    fn run_on_a_non_riscv64_host_reports_unsupported_arch() {
        let image = image_from(&[jal(0, 0)], 0x1000);
        let mut engine = Engine::new(image, EngineConfig::default()).unwrap();
        let result = engine.run();
        if cfg!(target_arch = "riscv64") {
            // real hardware path; not exercised by this development host.
        } else {
            assert!(matches!(result, Err(EngineError::UnsupportedHostArch { .. })));
        }
    }

    #[test]
    fn initial_brk_is_page_aligned_past_every_segment() {
        let mut image = image_from(&[jal(0, 0)], 0x1000);
        image.data_segments.push(DataSegment {
            address: 0x2000,
            bytes: vec![0u8; 10],
        });
        let brk = initial_brk(&image);
        assert_eq!(brk % 0x1000, 0);
        assert!(brk >= 0x200a);
    }
}
