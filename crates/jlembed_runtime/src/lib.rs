//! Binding to the Julia runtime's embedding ABI.
//!
//! Two surfaces are mirrored exactly: the `jl_call*` entry points, which
//! invoke a runtime callable with opaque value handles, and the `jl_options`
//! startup record, whose field order and widths are the runtime's own.
//!
//! Nothing here interprets values. Handles go in and come out untouched and
//! any error the runtime raises stays in the runtime's error slot.

pub mod abi;
pub mod engine;
pub mod error;

pub use error::{EmbedError, EmbedResult};
