use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::abi::{ArgumentVector, JlHandle};
use crate::error::{EmbedError, EmbedResult};

use super::config::SymbolNames;
use super::library::SymbolResolver;

/// `jl_value_t *jl_call(jl_function_t *f, jl_value_t **args, int32_t nargs)`
pub type JlCallFn = unsafe extern "C" fn(f: JlHandle, args: *mut JlHandle, nargs: i32) -> JlHandle;
/// `jl_value_t *jl_call0(jl_function_t *f)`
pub type JlCall0Fn = unsafe extern "C" fn(f: JlHandle) -> JlHandle;
pub type JlCall1Fn = unsafe extern "C" fn(f: JlHandle, a0: JlHandle) -> JlHandle;
pub type JlCall2Fn = unsafe extern "C" fn(f: JlHandle, a0: JlHandle, a1: JlHandle) -> JlHandle;
pub type JlCall3Fn =
    unsafe extern "C" fn(f: JlHandle, a0: JlHandle, a1: JlHandle, a2: JlHandle) -> JlHandle;
/// `void jl_init(void)`
pub type JlInitFn = unsafe extern "C" fn();
/// `jl_value_t *jl_exception_occurred(void)`
pub type JlExceptionOccurredFn = unsafe extern "C" fn() -> JlHandle;

/// Reinterpret a resolved address as a function pointer of type `F`.
///
/// # Safety
///
/// The address must be the entry point of a function with exactly `F`'s
/// signature and calling convention.
pub(crate) unsafe fn fn_from_addr<F: Copy>(addr: NonNull<c_void>) -> F {
    debug_assert_eq!(size_of::<F>(), size_of::<*mut c_void>());
    // SAFETY: upheld by the caller; `F` is a thin function pointer.
    unsafe { std::mem::transmute_copy::<*mut c_void, F>(&addr.as_ptr()) }
}

/// Argument count as the runtime's `int32_t`.
fn argument_count(len: usize) -> EmbedResult<i32> {
    i32::try_from(len).map_err(|_| EmbedError::TooManyArguments(len))
}

/// Typed call-throughs into the runtime's call entry points.
///
/// Each arity is bound to its own exported symbol; fixed-arity calls never go
/// through `jl_call`. Nothing is validated: the result handle is whatever the
/// runtime returned, null included, and exceptions are left in the runtime's
/// own error slot.
#[derive(Clone)]
pub struct CallDispatcher {
    call: JlCallFn,
    call0: JlCall0Fn,
    call1: JlCall1Fn,
    call2: JlCall2Fn,
    call3: JlCall3Fn,
    // Keeps the library that owns the entry points loaded.
    _resolver: Arc<dyn SymbolResolver>,
}

impl CallDispatcher {
    pub fn resolve(resolver: Arc<dyn SymbolResolver>, names: &SymbolNames) -> EmbedResult<Self> {
        // SAFETY: the symbols are the runtime's call entry points, whose
        // signatures are the aliases above.
        let dispatcher = unsafe {
            Self {
                call: fn_from_addr(resolver.resolve(&names.call)?),
                call0: fn_from_addr(resolver.resolve(&names.call0)?),
                call1: fn_from_addr(resolver.resolve(&names.call1)?),
                call2: fn_from_addr(resolver.resolve(&names.call2)?),
                call3: fn_from_addr(resolver.resolve(&names.call3)?),
                _resolver: resolver,
            }
        };
        Ok(dispatcher)
    }

    /// Invoke `f` with `count` handles read from `args`.
    ///
    /// # Safety
    ///
    /// `args` must point at `count` contiguous handles, `f` must be a live
    /// callable value, and the calling thread must be one the runtime accepts
    /// calls from.
    pub unsafe fn call_n(&self, f: JlHandle, args: *mut JlHandle, count: i32) -> JlHandle {
        tracing::trace!("jl_call with {} arguments", count);
        // SAFETY: upheld by the caller.
        unsafe { (self.call)(f, args, count) }
    }

    /// Invoke `f` with every handle in `args`, in order.
    ///
    /// The only check made is that the length fits the runtime's 32-bit count.
    ///
    /// # Safety
    ///
    /// As for [`CallDispatcher::call_n`], minus the length contract.
    pub unsafe fn call(&self, f: JlHandle, args: &mut ArgumentVector) -> EmbedResult<JlHandle> {
        let count = argument_count(args.len())?;
        // SAFETY: the pointer and count describe the vector's own storage.
        Ok(unsafe { self.call_n(f, args.as_mut_ptr(), count) })
    }

    /// # Safety
    ///
    /// `f` must be a live callable value.
    pub unsafe fn call0(&self, f: JlHandle) -> JlHandle {
        tracing::trace!("jl_call0");
        // SAFETY: upheld by the caller.
        unsafe { (self.call0)(f) }
    }

    /// # Safety
    ///
    /// `f` must be a live callable value and `a0` a live value.
    pub unsafe fn call1(&self, f: JlHandle, a0: JlHandle) -> JlHandle {
        tracing::trace!("jl_call1");
        // SAFETY: upheld by the caller.
        unsafe { (self.call1)(f, a0) }
    }

    /// # Safety
    ///
    /// `f` must be a live callable value and every argument a live value.
    pub unsafe fn call2(&self, f: JlHandle, a0: JlHandle, a1: JlHandle) -> JlHandle {
        tracing::trace!("jl_call2");
        // SAFETY: upheld by the caller.
        unsafe { (self.call2)(f, a0, a1) }
    }

    /// # Safety
    ///
    /// `f` must be a live callable value and every argument a live value.
    pub unsafe fn call3(&self, f: JlHandle, a0: JlHandle, a1: JlHandle, a2: JlHandle) -> JlHandle {
        tracing::trace!("jl_call3");
        // SAFETY: upheld by the caller.
        unsafe { (self.call3)(f, a0, a1, a2) }
    }
}

impl std::fmt::Debug for CallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("call", &(self.call as *const c_void))
            .field("call0", &(self.call0 as *const c_void))
            .field("call1", &(self.call1 as *const c_void))
            .field("call2", &(self.call2 as *const c_void))
            .field("call3", &(self.call3 as *const c_void))
            .finish()
    }
}
