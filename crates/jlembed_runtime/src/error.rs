use std::path::PathBuf;

use thiserror::Error;

use crate::abi::FieldKind;

pub type EmbedResult<T> = Result<T, EmbedError>;

/// Host-side failures. Failures inside the runtime never show up here; they
/// come back from call-throughs as whatever the runtime returns.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load native library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Too many arguments for a call-through: {0}")]
    TooManyArguments(usize),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Option {name} is a {expected:?} field, got a {found:?} value")]
    OptionKindMismatch {
        name: String,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("Runtime is already initialized")]
    AlreadyInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
