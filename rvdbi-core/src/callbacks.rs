//! The callback registry (spec §4.3, §4.6): lets an embedder attach
//! instrumentation at block or instruction boundaries, in either of two
//! modes. ALLOCATOR-mode callbacks run once, at translation time, and
//! contribute raw instruction words to the inline weaver. RUNTIME-mode
//! callbacks run once per *dynamic* execution, driven by the dispatcher
//! forcing a context switch back to the host at the attachment point.
//!
//! At most one callback may be registered per (scope, phase, mode)
//! triple, and likewise per (instruction type, phase, mode) and per
//! (instruction group, phase, mode).

use std::collections::HashMap;

use rvdbi_isa::Mnemonic;

use crate::error::{EngineError, Result};
use crate::weaver::{InlineWeaver, Phase};

/// The granularity a callback attaches at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Exit,
    Bb,
    Instruction,
}

/// Information handed to a callback about the site it fired at.
#[derive(Debug, Clone, Copy)]
pub struct CallbackContext {
    pub guest_address: u64,
    /// The enclosing logical block's leader, even if this site is
    /// inside a block that was segmented (spec §4.3).
    pub basic_block_address: u64,
}

pub type AllocatorCallback = Box<dyn Fn(&CallbackContext, &mut InlineWeaver) + Send + Sync>;
pub type RuntimeCallback = Box<dyn Fn(&CallbackContext) + Send + Sync>;

#[derive(Default)]
pub struct CallbackRegistry {
    allocator_scoped: HashMap<(Scope, Phase), AllocatorCallback>,
    runtime_scoped: HashMap<(Scope, Phase), RuntimeCallback>,
    allocator_by_mnemonic: HashMap<(Mnemonic, Phase), AllocatorCallback>,
    runtime_by_mnemonic: HashMap<(Mnemonic, Phase), RuntimeCallback>,
    allocator_by_group: HashMap<(u32, Phase), AllocatorCallback>,
    runtime_by_group: HashMap<(u32, Phase), RuntimeCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry::default()
    }

    pub fn register_scoped_allocator(
        &mut self,
        scope: Scope,
        phase: Phase,
        callback: AllocatorCallback,
    ) -> Result<()> {
        let key = (scope, phase);
        if self.allocator_scoped.contains_key(&key) {
            return Err(EngineError::CallbackAlreadyRegistered(format!(
                "allocator callback for {scope:?}/{phase:?}"
            )));
        }
        self.allocator_scoped.insert(key, callback);
        Ok(())
    }

    pub fn register_scoped_runtime(
        &mut self,
        scope: Scope,
        phase: Phase,
        callback: RuntimeCallback,
    ) -> Result<()> {
        let key = (scope, phase);
        if self.runtime_scoped.contains_key(&key) {
            return Err(EngineError::CallbackAlreadyRegistered(format!(
                "runtime callback for {scope:?}/{phase:?}"
            )));
        }
        self.runtime_scoped.insert(key, callback);
        Ok(())
    }

    pub fn register_mnemonic_allocator(
        &mut self,
        mnemonic: Mnemonic,
        phase: Phase,
        callback: AllocatorCallback,
    ) -> Result<()> {
        let key = (mnemonic, phase);
        if self.allocator_by_mnemonic.contains_key(&key) {
            return Err(EngineError::CallbackAlreadyRegistered(format!(
                "allocator callback for mnemonic {mnemonic:?}/{phase:?}"
            )));
        }
        self.allocator_by_mnemonic.insert(key, callback);
        Ok(())
    }

    pub fn register_mnemonic_runtime(
        &mut self,
        mnemonic: Mnemonic,
        phase: Phase,
        callback: RuntimeCallback,
    ) -> Result<()> {
        let key = (mnemonic, phase);
        if self.runtime_by_mnemonic.contains_key(&key) {
            return Err(EngineError::CallbackAlreadyRegistered(format!(
                "runtime callback for mnemonic {mnemonic:?}/{phase:?}"
            )));
        }
        self.runtime_by_mnemonic.insert(key, callback);
        Ok(())
    }

    pub fn register_group_allocator(
        &mut self,
        group: u32,
        phase: Phase,
        callback: AllocatorCallback,
    ) -> Result<()> {
        let key = (group, phase);
        if self.allocator_by_group.contains_key(&key) {
            return Err(EngineError::CallbackAlreadyRegistered(format!(
                "allocator callback for group {group}/{phase:?}"
            )));
        }
        self.allocator_by_group.insert(key, callback);
        Ok(())
    }

    pub fn register_group_runtime(
        &mut self,
        group: u32,
        phase: Phase,
        callback: RuntimeCallback,
    ) -> Result<()> {
        let key = (group, phase);
        if self.runtime_by_group.contains_key(&key) {
            return Err(EngineError::CallbackAlreadyRegistered(format!(
                "runtime callback for group {group}/{phase:?}"
            )));
        }
        self.runtime_by_group.insert(key, callback);
        Ok(())
    }

    /// Whether `mnemonic` (in `group`) has any callback at all attached,
    /// in either mode or phase — such an instruction forces the block
    /// under translation to end there (spec §4.3 segmentation).
    pub fn forces_segmentation(&self, mnemonic: Mnemonic, group: u32) -> bool {
        [Phase::Pre, Phase::Post].into_iter().any(|phase| {
            self.allocator_by_mnemonic.contains_key(&(mnemonic, phase))
                || self.runtime_by_mnemonic.contains_key(&(mnemonic, phase))
                || self.allocator_by_group.contains_key(&(group, phase))
                || self.runtime_by_group.contains_key(&(group, phase))
                || self.allocator_scoped.contains_key(&(Scope::Instruction, phase))
                || self.runtime_scoped.contains_key(&(Scope::Instruction, phase))
        })
    }

    pub fn allocator_scoped(&self, scope: Scope, phase: Phase) -> Option<&AllocatorCallback> {
        self.allocator_scoped.get(&(scope, phase))
    }

    pub fn runtime_scoped(&self, scope: Scope, phase: Phase) -> Option<&RuntimeCallback> {
        self.runtime_scoped.get(&(scope, phase))
    }

    pub fn allocator_for_instruction(
        &self,
        mnemonic: Mnemonic,
        group: u32,
        phase: Phase,
    ) -> Option<&AllocatorCallback> {
        self.allocator_by_mnemonic
            .get(&(mnemonic, phase))
            .or_else(|| self.allocator_by_group.get(&(group, phase)))
    }

    pub fn runtime_for_instruction(
        &self,
        mnemonic: Mnemonic,
        group: u32,
        phase: Phase,
    ) -> Option<&RuntimeCallback> {
        self.runtime_by_mnemonic
            .get(&(mnemonic, phase))
            .or_else(|| self.runtime_by_group.get(&(group, phase)))
    }

    /// Invoke every RUNTIME-mode callback that applies to this site, in
    /// scope-then-specific order. Called by the dispatcher on every
    /// dynamic pass through a segmented or scoped attachment point.
    pub fn fire_runtime(
        &self,
        scope: Scope,
        mnemonic: Mnemonic,
        group: u32,
        phase: Phase,
        ctx: &CallbackContext,
    ) {
        if let Some(cb) = self.runtime_scoped(scope, phase) {
            cb(ctx);
        }
        if let Some(cb) = self.runtime_for_instruction(mnemonic, group, phase) {
            cb(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn duplicate_scoped_registration_is_rejected() {
        let mut registry = CallbackRegistry::new();
        registry
            .register_scoped_runtime(Scope::Bb, Phase::Pre, Box::new(|_| {}))
            .unwrap();
        let err = registry.register_scoped_runtime(Scope::Bb, Phase::Pre, Box::new(|_| {}));
        assert!(matches!(err, Err(EngineError::CallbackAlreadyRegistered(_))));
    }

    #[test]
    fn same_scope_different_phase_is_allowed() {
        let mut registry = CallbackRegistry::new();
        registry
            .register_scoped_runtime(Scope::Bb, Phase::Pre, Box::new(|_| {}))
            .unwrap();
        assert!(registry
            .register_scoped_runtime(Scope::Bb, Phase::Post, Box::new(|_| {}))
            .is_ok());
    }

    #[test]
    fn allocator_and_runtime_coexist_on_the_same_scope_and_phase() {
        let mut registry = CallbackRegistry::new();
        registry
            .register_scoped_allocator(Scope::Instruction, Phase::Pre, Box::new(|_, _| {}))
            .unwrap();
        assert!(registry
            .register_scoped_runtime(Scope::Instruction, Phase::Pre, Box::new(|_| {}))
            .is_ok());
    }

    #[test]
    fn mnemonic_callback_forces_segmentation() {
        let mut registry = CallbackRegistry::new();
        assert!(!registry.forces_segmentation(Mnemonic::Add, 6));
        registry
            .register_mnemonic_runtime(Mnemonic::Add, Phase::Pre, Box::new(|_| {}))
            .unwrap();
        assert!(registry.forces_segmentation(Mnemonic::Add, 6));
        assert!(!registry.forces_segmentation(Mnemonic::Sub, 6));
    }

    #[test]
    fn runtime_callback_fires_on_demand() {
        let mut registry = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        registry
            .register_scoped_runtime(
                Scope::Instruction,
                Phase::Pre,
                Box::new(move |_| {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        let ctx = CallbackContext {
            guest_address: 0x400,
            basic_block_address: 0x400,
        };
        registry.fire_runtime(Scope::Instruction, Mnemonic::Add, 6, Phase::Pre, &ctx);
        registry.fire_runtime(Scope::Instruction, Mnemonic::Add, 6, Phase::Pre, &ctx);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
