//! CLI front end (SPEC_FULL §6/§8): loads a static rv64gc Newlib ELF
//! binary, configures the engine from command-line flags, and runs it
//! to completion, reflecting the guest's own exit code back to the
//! shell.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rvdbi_core::{Engine, EngineConfig, UnsupportedSyscallPolicy};
use rvdbi_elf::GuestImage;

/// Dynamic binary instrumentation engine for static rv64gc/Newlib ELF
/// binaries.
#[derive(Parser, Debug)]
#[command(name = "rvdbi", version, about)]
struct Cli {
    /// Path to the guest ELF binary to run.
    target: String,

    /// Enable trace linking: once every static successor of an exit is
    /// materialized, link the exit directly instead of round-tripping
    /// through the dispatcher on every execution.
    #[arg(long)]
    trace_linking: bool,

    /// Maximum guest instructions translated into a single basic block
    /// before a forced cut.
    #[arg(long, default_value_t = 256)]
    max_block_len: usize,

    /// Code cache capacity in bytes.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    cache_size: usize,

    /// Target instruction spacing between planted stub regions; only
    /// meaningful when built with the `stub-regions` feature.
    #[arg(long, default_value_t = 1024)]
    stub_interval: usize,

    /// What to do with a guest syscall number this engine has no
    /// handler for.
    #[arg(long, value_enum, default_value_t = UnsupportedSyscallArg::EmulateNoop)]
    syscall_unsupported: UnsupportedSyscallArg,

    /// Extra argv entries passed to the guest, after its own path
    /// (`argv[0]`). May be repeated.
    #[arg(long = "guest-arg")]
    guest_args: Vec<String>,

    /// Environment variables passed to the guest as `KEY=VALUE`. May be
    /// repeated.
    #[arg(long = "guest-env")]
    guest_env: Vec<String>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum UnsupportedSyscallArg {
    EmulateNoop,
    Abort,
}

impl From<UnsupportedSyscallArg> for UnsupportedSyscallPolicy {
    fn from(value: UnsupportedSyscallArg) -> Self {
        match value {
            UnsupportedSyscallArg::EmulateNoop => UnsupportedSyscallPolicy::EmulateNoop,
            UnsupportedSyscallArg::Abort => UnsupportedSyscallPolicy::Abort,
        }
    }
}

/// Process exit codes distinct from the guest's own reported exit code,
/// mirroring how the teacher's CLI separates host-side failures from
/// the wasm module's trap status.
mod exit_code {
    pub const LOAD_FAILURE: u8 = 70;
    pub const ENGINE_FAILURE: u8 = 71;
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let image = match GuestImage::load(&cli.target).with_context(|| format!("loading {}", cli.target)) {
        Ok(image) => image,
        Err(err) => {
            log::error!("{err:#}");
            return ExitCode::from(exit_code::LOAD_FAILURE);
        }
    };

    let config = EngineConfig {
        cache_capacity: cli.cache_size,
        max_block_len: cli.max_block_len,
        trace_linking: cli.trace_linking,
        stub_interval_instructions: cli.stub_interval,
        unsupported_syscall: cli.syscall_unsupported.into(),
        ..EngineConfig::default()
    };

    let mut engine = match Engine::new(image, config) {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("failed to initialize engine: {err}");
            return ExitCode::from(exit_code::ENGINE_FAILURE);
        }
    };

    let mut guest_argv = vec![cli.target.clone()];
    guest_argv.extend(cli.guest_args.iter().cloned());
    engine.set_guest_args(&guest_argv, &cli.guest_env);

    match engine.run() {
        Ok(guest_exit_code) => {
            log::debug!("guest exited with code {guest_exit_code}");
            ExitCode::from(guest_exit_code as u8)
        }
        Err(err) => {
            log::error!("engine run failed: {err}");
            ExitCode::from(exit_code::ENGINE_FAILURE)
        }
    }
}
