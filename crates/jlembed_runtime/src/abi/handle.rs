use std::ffi::c_void;
use std::ptr;

/// Address-sized reference to a value owned by the native runtime.
///
/// The binding never dereferences, copies through, or frees what a handle
/// points at. Whether a handle is still live is decided by the runtime's
/// garbage collector, not by this type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JlHandle(*mut c_void);

impl JlHandle {
    pub const fn null() -> Self {
        Self(ptr::null_mut())
    }

    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl Default for JlHandle {
    fn default() -> Self {
        Self::null()
    }
}

/// Contiguous, insertion-ordered handles for the N-argument call entry point.
///
/// The length handed to the runtime is always the vector's own length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentVector {
    handles: Vec<JlHandle>,
}

impl ArgumentVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, handle: JlHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn as_slice(&self) -> &[JlHandle] {
        &self.handles
    }

    /// Base address of the handle array, as `jl_value_t **`.
    pub fn as_mut_ptr(&mut self) -> *mut JlHandle {
        self.handles.as_mut_ptr()
    }
}

impl From<Vec<JlHandle>> for ArgumentVector {
    fn from(handles: Vec<JlHandle>) -> Self {
        Self { handles }
    }
}

impl From<&[JlHandle]> for ArgumentVector {
    fn from(handles: &[JlHandle]) -> Self {
        Self {
            handles: handles.to_vec(),
        }
    }
}

impl FromIterator<JlHandle> for ArgumentVector {
    fn from_iter<I: IntoIterator<Item = JlHandle>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}
