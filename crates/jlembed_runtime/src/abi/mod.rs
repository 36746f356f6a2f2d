//! Types that cross the embedding ABI as-is.

mod handle;
pub mod options;

pub use handle::{ArgumentVector, JlHandle};
pub use options::{
    FieldDescriptor, FieldKind, FieldValue, JL_OPTIONS_FIELDS, JL_OPTIONS_SIZE, JlOptions,
    JlOptionsView, c_str_array_lossy, c_str_lossy, field_by_name,
};
