//! The runtime's global startup-options record (`jl_options`).
//!
//! The record is positional: the runtime reads each field at a fixed offset,
//! so the declaration order below is the ABI. It must be re-derived from the
//! runtime's `jl_options_t` whenever the embedded build changes. Order is
//! written exactly once, in the `jl_options_record!` invocation, which emits
//! the `#[repr(C)]` struct, the descriptor table and the view accessors
//! together so the three cannot drift apart.

use std::ffi::{CStr, c_char, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::mem::offset_of;
use std::ptr::{self, NonNull};

use jlembed_config::OptionValue;
use serde::Serialize;

use crate::error::{EmbedError, EmbedResult};

/// Values understood by the tri-state flag fields.
pub mod flags {
    pub const JL_OPTIONS_COLOR_AUTO: i8 = 0;
    pub const JL_OPTIONS_COLOR_ON: i8 = 1;
    pub const JL_OPTIONS_COLOR_OFF: i8 = 2;

    pub const JL_OPTIONS_HISTORYFILE_ON: i8 = 1;
    pub const JL_OPTIONS_HISTORYFILE_OFF: i8 = 0;

    pub const JL_OPTIONS_STARTUPFILE_ON: i8 = 1;
    pub const JL_OPTIONS_STARTUPFILE_OFF: i8 = 2;

    pub const JL_LOG_NONE: i8 = 0;
    pub const JL_LOG_USER: i8 = 1;
    pub const JL_LOG_ALL: i8 = 2;

    pub const JL_OPTIONS_CHECK_BOUNDS_DEFAULT: i8 = 0;
    pub const JL_OPTIONS_CHECK_BOUNDS_ON: i8 = 1;
    pub const JL_OPTIONS_CHECK_BOUNDS_OFF: i8 = 2;

    pub const JL_OPTIONS_COMPILE_OFF: i8 = 0;
    pub const JL_OPTIONS_COMPILE_ON: i8 = 1;
    pub const JL_OPTIONS_COMPILE_ALL: i8 = 2;
    pub const JL_OPTIONS_COMPILE_MIN: i8 = 3;

    pub const JL_OPTIONS_DEPWARN_OFF: i8 = 0;
    pub const JL_OPTIONS_DEPWARN_ON: i8 = 1;
    pub const JL_OPTIONS_DEPWARN_ERROR: i8 = 2;

    pub const JL_OPTIONS_FAST_MATH_DEFAULT: i8 = 0;
    pub const JL_OPTIONS_FAST_MATH_ON: i8 = 1;
    pub const JL_OPTIONS_FAST_MATH_OFF: i8 = 2;

    pub const JL_OPTIONS_HANDLE_SIGNALS_ON: i8 = 1;
    pub const JL_OPTIONS_HANDLE_SIGNALS_OFF: i8 = 0;
}

/// Semantic class of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// `int8_t` boolean or tri-state flag.
    Flag,
    /// `int8_t` small level (optimization, debug info).
    Level,
    /// `int32_t` count.
    Count,
    /// `const char *` owned by the runtime, nullable.
    CString,
    /// `const char **`: NULL-terminated array of runtime-owned strings, nullable.
    CStringArray,
    /// Address-sized opaque token.
    Opaque,
}

/// One row of the layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    name: &'static str,
    kind: FieldKind,
    offset: usize,
    size: usize,
}

impl FieldDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Byte offset from the start of the record.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Dynamically typed field contents, as read through the layout table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Flag(i8),
    Level(i8),
    Count(i32),
    /// Address of a runtime-owned string, 0 when null.
    CString(usize),
    /// Address of the first element of a string array, 0 when null.
    CStringArray(usize),
    /// Opaque address, 0 when null.
    Opaque(usize),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Flag(_) => FieldKind::Flag,
            FieldValue::Level(_) => FieldKind::Level,
            FieldValue::Count(_) => FieldKind::Count,
            FieldValue::CString(_) => FieldKind::CString,
            FieldValue::CStringArray(_) => FieldKind::CStringArray,
            FieldValue::Opaque(_) => FieldKind::Opaque,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Flag(v) | FieldValue::Level(v) => write!(f, "{v}"),
            FieldValue::Count(v) => write!(f, "{v}"),
            FieldValue::CString(0) | FieldValue::CStringArray(0) | FieldValue::Opaque(0) => {
                write!(f, "null")
            }
            FieldValue::CString(addr) | FieldValue::CStringArray(addr) | FieldValue::Opaque(addr) => {
                write!(f, "{addr:#x}")
            }
        }
    }
}

macro_rules! field_type {
    (Flag) => { i8 };
    (Level) => { i8 };
    (Count) => { i32 };
    (CString) => { *const c_char };
    (CStringArray) => { *const *const c_char };
    (Opaque) => { *const c_void };
}

macro_rules! jl_options_record {
    ($( $(#[$doc:meta])* $field:ident / $setter:ident : $kind:ident ),* $(,)?) => {
        /// Mirror of the runtime's `jl_options_t`.
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct JlOptions {
            $(
                $(#[$doc])*
                pub $field: field_type!($kind),
            )*
        }

        /// Layout of [`JlOptions`], in declaration order.
        pub const JL_OPTIONS_FIELDS: &[FieldDescriptor] = &[
            $(
                FieldDescriptor {
                    name: stringify!($field),
                    kind: FieldKind::$kind,
                    offset: offset_of!(JlOptions, $field),
                    size: size_of::<field_type!($kind)>(),
                },
            )*
        ];

        impl JlOptionsView<'_> {
            $(
                pub fn $field(&self) -> field_type!($kind) {
                    // SAFETY: `ptr` is non-null and points at a live record for 'a.
                    unsafe { ptr::read_volatile(&raw const (*self.ptr).$field) }
                }

                pub fn $setter(&mut self, value: field_type!($kind)) {
                    // SAFETY: as above, and the view is the only writer on this side.
                    unsafe { ptr::write_volatile(&raw mut (*self.ptr).$field, value) }
                }
            )*
        }
    };
}

jl_options_record! {
    /// Suppress the startup banner and informational output.
    quiet / set_quiet: Flag,
    banner / set_banner: Flag,
    /// Directory containing the runtime executable.
    julia_bindir / set_julia_bindir: CString,
    julia_bin / set_julia_bin: CString,
    /// Commands queued by `-e`, `-E` and `-L`.
    cmds / set_cmds: CStringArray,
    /// System image path.
    image_file / set_image_file: CString,
    cpu_target / set_cpu_target: CString,
    nthreads / set_nthreads: Count,
    nprocs / set_nprocs: Count,
    machine_file / set_machine_file: CString,
    project / set_project: CString,
    isinteractive / set_isinteractive: Flag,
    /// One of the `JL_OPTIONS_COLOR_*` values.
    color / set_color: Flag,
    historyfile / set_historyfile: Flag,
    startupfile / set_startupfile: Flag,
    /// One of the `JL_OPTIONS_COMPILE_*` values.
    compile_enabled / set_compile_enabled: Flag,
    code_coverage / set_code_coverage: Flag,
    malloc_log / set_malloc_log: Flag,
    opt_level / set_opt_level: Level,
    debug_level / set_debug_level: Level,
    check_bounds / set_check_bounds: Flag,
    depwarn / set_depwarn: Flag,
    warn_overwrite / set_warn_overwrite: Flag,
    can_inline / set_can_inline: Flag,
    polly / set_polly: Flag,
    trace_compile / set_trace_compile: CString,
    fast_math / set_fast_math: Flag,
    worker / set_worker: Flag,
    /// Cluster cookie. Treated as an opaque address.
    cookie / set_cookie: Opaque,
    handle_signals / set_handle_signals: Flag,
    use_sysimage_native_code / set_use_sysimage_native_code: Flag,
    use_compiled_modules / set_use_compiled_modules: Flag,
    bindto / set_bindto: CString,
    outputbc / set_outputbc: CString,
    outputunoptbc / set_outputunoptbc: CString,
    outputo / set_outputo: CString,
    outputasm / set_outputasm: CString,
    outputji / set_outputji: CString,
    output_code_coverage / set_output_code_coverage: CString,
    incremental / set_incremental: Flag,
    image_file_specified / set_image_file_specified: Flag,
    warn_scope / set_warn_scope: Flag,
}

impl JlOptions {
    /// An all-zero record: every flag 0, every count 0, every pointer null.
    pub fn zeroed() -> Self {
        // SAFETY: every field is an integer or a raw pointer, for which the
        // all-zero bit pattern is valid.
        unsafe { std::mem::zeroed() }
    }

    pub fn view(&mut self) -> JlOptionsView<'_> {
        JlOptionsView::from_mut(self)
    }
}

impl Default for JlOptions {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Total size of the record in bytes.
pub const JL_OPTIONS_SIZE: usize = size_of::<JlOptions>();

pub fn field_by_name(name: &str) -> Option<&'static FieldDescriptor> {
    JL_OPTIONS_FIELDS.iter().find(|field| field.name == name)
}

/// Read/write view over a [`JlOptions`] living at some address.
///
/// Every access goes to memory; nothing is cached, so a view over the
/// runtime's own record observes changes the runtime makes to it.
pub struct JlOptionsView<'a> {
    ptr: *mut JlOptions,
    _marker: PhantomData<&'a mut JlOptions>,
}

impl<'a> JlOptionsView<'a> {
    pub fn from_mut(options: &'a mut JlOptions) -> Self {
        Self {
            ptr: options,
            _marker: PhantomData,
        }
    }

    /// Wrap a record owned by someone else, typically the runtime's exported
    /// `jl_options` symbol. Returns `None` for a null address.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a record laid out as [`JlOptions`], valid for reads
    /// and writes for `'a`, and must not be written concurrently.
    pub unsafe fn from_ptr(ptr: *mut JlOptions) -> Option<Self> {
        // SAFETY: upheld by the caller.
        NonNull::new(ptr).map(|ptr| unsafe { Self::from_non_null(ptr) })
    }

    /// # Safety
    ///
    /// Same contract as [`JlOptionsView::from_ptr`].
    pub unsafe fn from_non_null(ptr: NonNull<JlOptions>) -> Self {
        Self {
            ptr: ptr.as_ptr(),
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut JlOptions {
        self.ptr
    }

    /// Copy of the record as it is right now.
    pub fn snapshot(&self) -> JlOptions {
        // SAFETY: see `from_ptr`.
        unsafe { ptr::read_volatile(self.ptr) }
    }

    /// Read a field through its descriptor.
    pub fn read_field(&self, field: &FieldDescriptor) -> FieldValue {
        // SAFETY: descriptors only come from `JL_OPTIONS_FIELDS`, so the
        // offset is in bounds and aligned for the field's width.
        unsafe {
            let at = self.ptr.cast::<u8>().add(field.offset);
            match field.kind {
                FieldKind::Flag => FieldValue::Flag(ptr::read_volatile(at.cast::<i8>())),
                FieldKind::Level => FieldValue::Level(ptr::read_volatile(at.cast::<i8>())),
                FieldKind::Count => FieldValue::Count(ptr::read_volatile(at.cast::<i32>())),
                FieldKind::CString => {
                    FieldValue::CString(ptr::read_volatile(at.cast::<usize>()))
                }
                FieldKind::CStringArray => {
                    FieldValue::CStringArray(ptr::read_volatile(at.cast::<usize>()))
                }
                FieldKind::Opaque => FieldValue::Opaque(ptr::read_volatile(at.cast::<usize>())),
            }
        }
    }

    /// Write a field through its descriptor. The value's kind must match.
    pub fn write_field(&mut self, field: &FieldDescriptor, value: FieldValue) -> EmbedResult<()> {
        if value.kind() != field.kind {
            return Err(EmbedError::OptionKindMismatch {
                name: field.name.to_string(),
                expected: field.kind,
                found: value.kind(),
            });
        }
        // SAFETY: as in `read_field`.
        unsafe {
            let at = self.ptr.cast::<u8>().add(field.offset);
            match value {
                FieldValue::Flag(v) | FieldValue::Level(v) => ptr::write_volatile(at.cast::<i8>(), v),
                FieldValue::Count(v) => ptr::write_volatile(at.cast::<i32>(), v),
                FieldValue::CString(addr)
                | FieldValue::CStringArray(addr)
                | FieldValue::Opaque(addr) => ptr::write_volatile(at.cast::<usize>(), addr),
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> EmbedResult<FieldValue> {
        let field = field_by_name(name).ok_or_else(|| EmbedError::UnknownOption(name.to_string()))?;
        Ok(self.read_field(field))
    }

    /// Set a scalar option by field name.
    pub fn set(&mut self, name: &str, value: OptionValue) -> EmbedResult<()> {
        let field = field_by_name(name).ok_or_else(|| EmbedError::UnknownOption(name.to_string()))?;
        let value = match (field.kind, value) {
            (FieldKind::Flag, OptionValue::Int8(v)) => FieldValue::Flag(v),
            (FieldKind::Level, OptionValue::Int8(v)) => FieldValue::Level(v),
            (FieldKind::Count, OptionValue::Int32(v)) => FieldValue::Count(v),
            (expected, OptionValue::Int8(_)) => {
                return Err(EmbedError::OptionKindMismatch {
                    name: name.to_string(),
                    expected,
                    found: FieldKind::Flag,
                });
            }
            (expected, OptionValue::Int32(_)) => {
                return Err(EmbedError::OptionKindMismatch {
                    name: name.to_string(),
                    expected,
                    found: FieldKind::Count,
                });
            }
        };
        self.write_field(field, value)
    }
}

/// Decode a runtime-owned string field for display. Returns `None` for null.
///
/// # Safety
///
/// A non-null `ptr` must point at a NUL-terminated byte sequence that stays
/// alive for the duration of the call.
pub unsafe fn c_str_lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: upheld by the caller.
    let s = unsafe { CStr::from_ptr(ptr) };
    Some(s.to_string_lossy().into_owned())
}

/// Decode a NULL-terminated array of runtime-owned strings, such as `cmds`.
/// Returns `None` for a null array.
///
/// # Safety
///
/// A non-null `ptr` must point at a sequence of string pointers ending in a
/// null entry, each valid for [`c_str_lossy`], all alive for the duration of
/// the call.
pub unsafe fn c_str_array_lossy(ptr: *const *const c_char) -> Option<Vec<String>> {
    if ptr.is_null() {
        return None;
    }
    let mut out = Vec::new();
    let mut at = ptr;
    // SAFETY: upheld by the caller; the walk stops at the terminating null.
    unsafe {
        while let Some(text) = c_str_lossy(*at) {
            out.push(text);
            at = at.add(1);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_in_offset_order() {
        for pair in JL_OPTIONS_FIELDS.windows(2) {
            assert!(
                pair[0].offset + pair[0].size <= pair[1].offset,
                "{} overlaps {}",
                pair[0].name,
                pair[1].name
            );
        }
        let last = JL_OPTIONS_FIELDS.last().unwrap();
        assert!(last.offset + last.size <= JL_OPTIONS_SIZE);
    }

    #[test]
    fn table_covers_every_field() {
        assert_eq!(JL_OPTIONS_FIELDS.len(), 42);
        assert_eq!(JL_OPTIONS_FIELDS[0].name, "quiet");
        assert_eq!(JL_OPTIONS_FIELDS[41].name, "warn_scope");
    }

    #[test]
    fn zeroed_record_reads_as_zero() {
        let mut options = JlOptions::zeroed();
        let view = options.view();
        for field in JL_OPTIONS_FIELDS {
            let value = view.read_field(field);
            assert_eq!(value.kind(), field.kind);
            let expected = match field.kind {
                FieldKind::CString | FieldKind::CStringArray | FieldKind::Opaque => "null",
                _ => "0",
            };
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn set_by_name_checks_width() {
        let mut options = JlOptions::zeroed();
        let mut view = options.view();
        view.set("nthreads", OptionValue::Int32(8)).unwrap();
        assert_eq!(view.nthreads(), 8);

        let err = view.set("nthreads", OptionValue::Int8(8)).unwrap_err();
        assert!(matches!(err, EmbedError::OptionKindMismatch { .. }));

        let err = view.set("nthread", OptionValue::Int32(8)).unwrap_err();
        assert!(matches!(err, EmbedError::UnknownOption(name) if name == "nthread"));
    }

    #[test]
    fn string_fields_are_not_settable_by_value() {
        let mut options = JlOptions::zeroed();
        let mut view = options.view();
        let err = view.set("project", OptionValue::Int8(1)).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::OptionKindMismatch { expected: FieldKind::CString, .. }
        ));
    }

    #[test]
    fn c_str_lossy_handles_null() {
        let text = c"@.";
        assert_eq!(unsafe { c_str_lossy(ptr::null()) }, None);
        assert_eq!(unsafe { c_str_lossy(text.as_ptr()) }, Some("@.".to_string()));
    }

    #[test]
    fn cmds_is_a_string_array() {
        let field = field_by_name("cmds").unwrap();
        assert_eq!(field.kind(), FieldKind::CStringArray);
        assert_eq!(field.size(), size_of::<*const *const c_char>());

        let err = JlOptions::zeroed()
            .view()
            .write_field(field, FieldValue::CString(0x10))
            .unwrap_err();
        assert!(matches!(
            err,
            EmbedError::OptionKindMismatch {
                expected: FieldKind::CStringArray,
                found: FieldKind::CString,
                ..
            }
        ));
    }

    #[test]
    fn c_str_array_lossy_stops_at_null() {
        let cmds = [c"println(1)".as_ptr(), c"exit()".as_ptr(), ptr::null()];
        assert_eq!(unsafe { c_str_array_lossy(ptr::null()) }, None);
        assert_eq!(
            unsafe { c_str_array_lossy(cmds.as_ptr()) },
            Some(vec!["println(1)".to_string(), "exit()".to_string()])
        );
        assert_eq!(unsafe { c_str_array_lossy(cmds[2..].as_ptr()) }, Some(vec![]));
    }
}
