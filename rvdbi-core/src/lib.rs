//! The JIT translation engine: code cache, basic-block table, exit-link
//! table, allocator, dispatcher, inline weaver, callback registry, and
//! stub-region planner. Everything the front-end needs to load a guest
//! image and run it to completion lives behind [`engine::Engine`].

mod allocator;
mod bbt;
mod cache;
mod callbacks;
mod config;
mod dispatcher;
mod elt;
mod engine;
mod error;
mod guest_args;
mod rsa;
mod stubs;
mod weaver;

pub use bbt::{BasicBlockTable, CachedBlock, Terminator};
pub use cache::CodeCache;
pub use callbacks::{AllocatorCallback, CallbackContext, CallbackRegistry, RuntimeCallback, Scope};
pub use config::{EngineConfig, UnsupportedSyscallPolicy};
pub use dispatcher::ExitAction;
pub use elt::ExitLinkTable;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use guest_args::{build_stack_image, StackImage};
pub use rsa::{RegisterSaveArea, RsaHandle};
pub use stubs::StubPlanner;
pub use weaver::{InlineWeaver, Phase};
