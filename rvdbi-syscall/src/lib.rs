//! Tabulated guest-syscall-number → host-semantics mapping (spec §4.8,
//! §6 "syscall emulation table (consumed)").
//!
//! Because the engine and guest share a single address space (spec §1
//! Non-goals), guest pointers already are valid host pointers; "forward"
//! handlers below pass them straight to the host libc call they mirror.
//! This crate only tabulates *which* host call a given Newlib/RV64 syscall
//! number maps to and how to shovel its arguments/return value across the
//! ABI boundary — no guest semantics live here.

use std::collections::HashMap;

/// Raw argument registers (`a0..a5`) and syscall number (`a7`), as read
/// out of the register-save area by the dispatcher before invoking the
/// shim.
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub number: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
}

/// What the dispatcher should do after a syscall returns.
#[derive(Debug, Clone, Copy)]
pub struct SyscallOutcome {
    /// Value to write back into `a0`.
    pub return_value: u64,
    /// Set when the syscall wants to terminate the guest (e.g. `exit`).
    /// The dispatcher resumes at `ecall_next` only when this is `None`.
    pub exit_code: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("unsupported syscall number {0}")]
    Unsupported(u64),
    #[error("host syscall failed: errno {0}")]
    HostErrno(i32),
}

/// Policy for syscall numbers with no registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedPolicy {
    /// Return a generic negative-errno value to the guest and continue.
    EmulateNoop,
    /// Treat as fatal (spec §7 "Syscall unsupported").
    Abort,
}

type Handler = fn(&SyscallArgs) -> Result<SyscallOutcome, SyscallError>;

pub struct SyscallTable {
    handlers: HashMap<u64, Handler>,
    unsupported: UnsupportedPolicy,
    brk_cursor: std::cell::Cell<u64>,
}

// Newlib/RV64 syscall numbers (shared with the Linux RISC-V ABI that
// Newlib's semihosting-free syscall layer targets).
pub const SYS_CLOSE: u64 = 57;
pub const SYS_LSEEK: u64 = 62;
pub const SYS_READ: u64 = 63;
pub const SYS_WRITE: u64 = 64;
pub const SYS_FSTAT: u64 = 80;
pub const SYS_EXIT: u64 = 93;
pub const SYS_EXIT_GROUP: u64 = 94;
pub const SYS_GETTIMEOFDAY: u64 = 169;
pub const SYS_BRK: u64 = 214;

impl SyscallTable {
    /// The default table: `exit`/`exit_group`, `read`/`write`/`close`/
    /// `lseek`/`fstat` forwarded to the host, `brk` emulated with a bump
    /// pointer, `gettimeofday` forwarded.
    pub fn newlib_rv64(unsupported: UnsupportedPolicy) -> Self {
        let mut handlers: HashMap<u64, Handler> = HashMap::new();
        handlers.insert(SYS_EXIT, exit);
        handlers.insert(SYS_EXIT_GROUP, exit);
        handlers.insert(SYS_READ, read);
        handlers.insert(SYS_WRITE, write);
        handlers.insert(SYS_CLOSE, close);
        handlers.insert(SYS_LSEEK, lseek);
        handlers.insert(SYS_FSTAT, fstat);
        handlers.insert(SYS_GETTIMEOFDAY, gettimeofday);
        handlers.insert(SYS_BRK, brk);
        SyscallTable {
            handlers,
            unsupported,
            brk_cursor: std::cell::Cell::new(0),
        }
    }

    /// Sets the initial program break, typically the guest's end-of-data
    /// address, before the first `brk` call.
    pub fn set_initial_brk(&self, addr: u64) {
        self.brk_cursor.set(addr);
    }

    pub fn dispatch(&self, args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
        log::trace!("syscall {} (a0={:#x}, a1={:#x}, a2={:#x})", args.number, args.a0, args.a1, args.a2);
        match self.handlers.get(&args.number) {
            Some(handler) => {
                if args.number == SYS_BRK {
                    brk_with_cursor(args, &self.brk_cursor)
                } else {
                    handler(args)
                }
            }
            None => match self.unsupported {
                UnsupportedPolicy::EmulateNoop => {
                    log::warn!("unsupported syscall {} emulated as ENOSYS", args.number);
                    Ok(SyscallOutcome {
                        return_value: (-38i64) as u64, // -ENOSYS
                        exit_code: None,
                    })
                }
                UnsupportedPolicy::Abort => Err(SyscallError::Unsupported(args.number)),
            },
        }
    }
}

fn exit(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    Ok(SyscallOutcome {
        return_value: 0,
        exit_code: Some(args.a0 as i32),
    })
}

fn read(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    let fd = args.a0 as i32;
    let buf = args.a1 as *mut libc::c_void;
    let count = args.a2 as usize;
    let n = unsafe { libc::read(fd, buf, count) };
    checked(n as i64)
}

fn write(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    let fd = args.a0 as i32;
    let buf = args.a1 as *const libc::c_void;
    let count = args.a2 as usize;
    let n = unsafe { libc::write(fd, buf, count) };
    checked(n as i64)
}

fn close(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    let fd = args.a0 as i32;
    let n = unsafe { libc::close(fd) };
    checked(n as i64)
}

fn lseek(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    let fd = args.a0 as i32;
    let offset = args.a1 as i64;
    let whence = args.a2 as i32;
    let n = unsafe { libc::lseek(fd, offset, whence) };
    checked(n)
}

fn fstat(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    let fd = args.a0 as i32;
    // The guest's Newlib `struct stat` layout does not match the host's;
    // only the fields a typical Newlib test corpus inspects (st_mode) are
    // filled in, zeroing the rest.
    let statbuf = args.a1 as *mut u8;
    let mut host_stat: libc::stat = unsafe { std::mem::zeroed() };
    let n = unsafe { libc::fstat(fd, &mut host_stat as *mut _) };
    if n < 0 {
        return checked(n as i64);
    }
    unsafe {
        std::ptr::write_bytes(statbuf, 0, 128);
        std::ptr::write_unaligned((statbuf as *mut u32).add(0), host_stat.st_mode);
    }
    Ok(SyscallOutcome {
        return_value: 0,
        exit_code: None,
    })
}

fn gettimeofday(args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    let tv = args.a0 as *mut libc::timeval;
    let n = if tv.is_null() {
        0
    } else {
        unsafe { libc::gettimeofday(tv, std::ptr::null_mut()) }
    };
    checked(n as i64)
}

fn brk_with_cursor(
    args: &SyscallArgs,
    cursor: &std::cell::Cell<u64>,
) -> Result<SyscallOutcome, SyscallError> {
    let requested = args.a0;
    if requested != 0 {
        cursor.set(requested);
    }
    Ok(SyscallOutcome {
        return_value: cursor.get(),
        exit_code: None,
    })
}

fn brk(_args: &SyscallArgs) -> Result<SyscallOutcome, SyscallError> {
    unreachable!("brk is special-cased in SyscallTable::dispatch")
}

fn checked(n: i64) -> Result<SyscallOutcome, SyscallError> {
    if n < 0 {
        let errno = unsafe { *libc::__errno_location() };
        Err(SyscallError::HostErrno(errno))
    } else {
        Ok(SyscallOutcome {
            return_value: n as u64,
            exit_code: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_forwards_to_host_stdout() {
        let table = SyscallTable::newlib_rv64(UnsupportedPolicy::Abort);
        let msg = b"hello\n";
        let args = SyscallArgs {
            number: SYS_WRITE,
            a0: 1,
            a1: msg.as_ptr() as u64,
            a2: msg.len() as u64,
            a3: 0,
            a4: 0,
            a5: 0,
        };
        let outcome = table.dispatch(&args).expect("write should succeed");
        assert_eq!(outcome.return_value, msg.len() as u64);
        assert!(outcome.exit_code.is_none());
    }

    #[test]
    fn exit_reports_code_without_touching_process() {
        let table = SyscallTable::newlib_rv64(UnsupportedPolicy::Abort);
        let args = SyscallArgs {
            number: SYS_EXIT,
            a0: 7,
            a1: 0,
            a2: 0,
            a3: 0,
            a4: 0,
            a5: 0,
        };
        let outcome = table.dispatch(&args).unwrap();
        assert_eq!(outcome.exit_code, Some(7));
    }

    #[test]
    fn brk_returns_increasing_cursor() {
        let table = SyscallTable::newlib_rv64(UnsupportedPolicy::Abort);
        table.set_initial_brk(0x1000);
        let bump = |addr: u64| SyscallArgs {
            number: SYS_BRK,
            a0: addr,
            a1: 0,
            a2: 0,
            a3: 0,
            a4: 0,
            a5: 0,
        };
        let first = table.dispatch(&bump(0)).unwrap();
        assert_eq!(first.return_value, 0x1000);
        let second = table.dispatch(&bump(0x2000)).unwrap();
        assert_eq!(second.return_value, 0x2000);
    }

    #[test]
    fn unsupported_number_respects_policy() {
        let table = SyscallTable::newlib_rv64(UnsupportedPolicy::EmulateNoop);
        let args = SyscallArgs {
            number: 0xffff,
            a0: 0,
            a1: 0,
            a2: 0,
            a3: 0,
            a4: 0,
            a5: 0,
        };
        let outcome = table.dispatch(&args).unwrap();
        assert_eq!(outcome.return_value, (-38i64) as u64);

        let table = SyscallTable::newlib_rv64(UnsupportedPolicy::Abort);
        assert!(table.dispatch(&args).is_err());
    }
}
