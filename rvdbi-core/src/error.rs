//! Error taxonomy per spec §7.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid target {path}: {reason}")]
    InvalidTarget { path: String, reason: String },

    #[error("unknown opcode at guest pc {pc:#x}: {detail}")]
    UnknownOpcode { pc: u64, detail: String },

    #[error("code cache exhausted after a fresh flush (requested {requested} bytes, capacity {capacity})")]
    CacheExhausted { requested: usize, capacity: usize },

    #[error("failed to allocate the RWX code cache region: {0}")]
    CacheAlloc(String),

    #[error("guest fault at pc {pc:#x} in block {block_id:?}: {detail}")]
    GuestFault {
        pc: u64,
        block_id: Option<usize>,
        detail: String,
    },

    #[error("syscall error at pc {pc:#x}: {source}")]
    Syscall {
        pc: u64,
        #[source]
        source: rvdbi_syscall::SyscallError,
    },

    #[error("a callback is already registered for {0}")]
    CallbackAlreadyRegistered(String),

    #[error("host architecture does not support direct cache execution (need rv64gc, compiled for {arch})")]
    UnsupportedHostArch { arch: &'static str },

    #[error("engine configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
