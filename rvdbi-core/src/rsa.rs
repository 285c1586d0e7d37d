//! Register-save area (spec §2.1, §3): a process-wide, fixed-layout
//! buffer holding the guest's 32 GPRs, 32 FPRs, a PC shadow, and a
//! scratch slot. Context-switch exit sequences and stub regions address
//! its fields by absolute offset from its (process-lifetime-stable)
//! heap address, so `#[repr(C)]` layout and the offsets below must never
//! drift apart.

pub const NUM_GPR: usize = 32;
pub const NUM_FPR: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegisterSaveArea {
    pub gpr: [u64; NUM_GPR],
    pub fpr: [u64; NUM_FPR],
    pub pc: u64,
    pub scratch: u64,
    /// Host `ra` (x1) at the moment `rvdbi_enter_cache` handed control to
    /// the cache, restored by `rvdbi_exit_trampoline` before its `ret` —
    /// distinct from `gpr[1]`, which holds the *guest*'s x1.
    pub host_ra: u64,
    /// Host `sp` (x2) at the same moment, restored the same way —
    /// distinct from `gpr[2]`, which holds the *guest*'s x2. Guest and
    /// host share one native stack, so without this the host's frame is
    /// unrecoverable the instant guest code adjusts `sp` itself.
    pub host_sp: u64,
}

impl Default for RegisterSaveArea {
    fn default() -> Self {
        RegisterSaveArea {
            gpr: [0; NUM_GPR],
            fpr: [0; NUM_FPR],
            pc: 0,
            scratch: 0,
            host_ra: 0,
            host_sp: 0,
        }
    }
}

impl RegisterSaveArea {
    pub fn gpr_offset(reg: u8) -> i32 {
        debug_assert!((reg as usize) < NUM_GPR);
        (reg as usize * 8) as i32
    }

    pub fn fpr_offset(reg: u8) -> i32 {
        debug_assert!((reg as usize) < NUM_FPR);
        (NUM_GPR * 8 + reg as usize * 8) as i32
    }

    pub const fn pc_offset() -> i32 {
        ((NUM_GPR + NUM_FPR) * 8) as i32
    }

    pub const fn scratch_offset() -> i32 {
        ((NUM_GPR + NUM_FPR) * 8 + 8) as i32
    }

    /// Offset of the saved host `ra`, used only by the enter/exit
    /// trampolines to bridge a cache excursion (spec §3 invariant (e)).
    pub const fn host_ra_offset() -> i32 {
        Self::scratch_offset() + 8
    }

    /// Offset of the saved host `sp`, immediately after `host_ra`.
    pub const fn host_sp_offset() -> i32 {
        Self::host_ra_offset() + 8
    }
}

/// A process-wide singleton RSA with a stable heap address, since cache
/// bytes embed that address as an immediate during materialization (spec
/// §9: "one process-wide instance owned by the front-end").
pub struct RsaHandle {
    storage: Box<RegisterSaveArea>,
}

impl RsaHandle {
    pub fn new() -> Self {
        RsaHandle {
            storage: Box::new(RegisterSaveArea::default()),
        }
    }

    pub fn address(&self) -> u64 {
        self.storage.as_ref() as *const RegisterSaveArea as u64
    }

    pub fn get(&self) -> &RegisterSaveArea {
        &self.storage
    }

    pub fn get_mut(&mut self) -> &mut RegisterSaveArea {
        &mut self.storage
    }
}

impl Default for RsaHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_monotone_and_in_bounds() {
        assert_eq!(RegisterSaveArea::gpr_offset(0), 0);
        assert_eq!(RegisterSaveArea::gpr_offset(31), 31 * 8);
        assert_eq!(RegisterSaveArea::fpr_offset(0), NUM_GPR as i32 * 8);
        assert_eq!(
            RegisterSaveArea::pc_offset(),
            ((NUM_GPR + NUM_FPR) * 8) as i32
        );
        assert_eq!(
            RegisterSaveArea::scratch_offset(),
            RegisterSaveArea::pc_offset() + 8
        );
        assert_eq!(
            RegisterSaveArea::host_ra_offset(),
            RegisterSaveArea::scratch_offset() + 8
        );
        assert_eq!(
            RegisterSaveArea::host_sp_offset(),
            RegisterSaveArea::host_ra_offset() + 8
        );
        assert_eq!(
            std::mem::size_of::<RegisterSaveArea>(),
            (RegisterSaveArea::host_sp_offset() + 8) as usize
        );
    }

    #[test]
    fn address_is_stable_across_moves_of_the_handle() {
        let handle = RsaHandle::new();
        let addr1 = handle.address();
        let moved = handle;
        let addr2 = moved.address();
        assert_eq!(addr1, addr2);
    }
}
