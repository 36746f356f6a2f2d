//! Symbol resolution, call dispatch and the embedded-runtime session.
//!
//! Library loading sits behind [`SymbolResolver`] so the call-through code is
//! the same whether the runtime is a shared library, linked into the host, or
//! a table of stand-in functions.

mod config;
mod dispatch;
mod instance;
mod library;

pub use config::{EmbedRuntimeConfig, SymbolNames};
pub use dispatch::{
    CallDispatcher, JlCall0Fn, JlCall1Fn, JlCall2Fn, JlCall3Fn, JlCallFn, JlExceptionOccurredFn,
    JlInitFn,
};
pub use instance::EmbeddedRuntime;
pub use library::{NativeLibrary, SymbolResolver, SymbolTable};
