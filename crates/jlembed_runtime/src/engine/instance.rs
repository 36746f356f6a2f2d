use std::ptr::NonNull;
use std::sync::Arc;

use jlembed_config::{EmbedConfig, LibraryLocation, StartupOptions};

use crate::abi::{JlHandle, JlOptions, JlOptionsView};
use crate::error::{EmbedError, EmbedResult};

use super::config::EmbedRuntimeConfig;
use super::dispatch::{CallDispatcher, JlExceptionOccurredFn, JlInitFn, fn_from_addr};
use super::library::{NativeLibrary, SymbolResolver};

/// One embedded runtime: its symbols, its options record and its call
/// entry points.
///
/// The options record is the runtime's own `jl_options`, viewed in place.
/// Options can be changed until [`EmbeddedRuntime::init`] runs; afterwards the
/// session only hands out copies of the record.
pub struct EmbeddedRuntime {
    resolver: Arc<dyn SymbolResolver>,
    dispatcher: CallDispatcher,
    options: NonNull<JlOptions>,
    init_fn: JlInitFn,
    exception_occurred_fn: Option<JlExceptionOccurredFn>,
    initialized: bool,
}

impl EmbeddedRuntime {
    /// Resolve the runtime's symbols and write the startup options into its
    /// options record.
    ///
    /// # Safety
    ///
    /// Under the names in `config.symbols`, `resolver` must yield the
    /// runtime's options record (a live object laid out as [`JlOptions`], not
    /// read or written by anyone else until [`EmbeddedRuntime::init`]), its
    /// initialiser, and its call and exception-query entry points, each with
    /// the signature of the matching `Jl*Fn` alias. They must stay valid for
    /// as long as `resolver` is alive.
    ///
    /// ```compile_fail,E0133
    /// # use std::sync::Arc;
    /// # use jlembed_runtime::engine::{EmbedRuntimeConfig, EmbeddedRuntime, SymbolTable};
    /// let table = SymbolTable::new("anything");
    /// let _ = EmbeddedRuntime::new(Arc::new(table), &EmbedRuntimeConfig::default());
    /// ```
    pub unsafe fn new(
        resolver: Arc<dyn SymbolResolver>,
        config: &EmbedRuntimeConfig,
    ) -> EmbedResult<Self> {
        let names = &config.symbols;
        let options = resolver.resolve(&names.options)?.cast::<JlOptions>();
        // SAFETY: upheld by the caller; the initialiser is `void (*)(void)`.
        let init_fn: JlInitFn = unsafe { fn_from_addr(resolver.resolve(&names.init)?) };
        let exception_occurred_fn = match resolver.resolve(&names.exception_occurred) {
            // SAFETY: `jl_value_t *(void)`.
            Ok(addr) => Some(unsafe { fn_from_addr::<JlExceptionOccurredFn>(addr) }),
            Err(_) => {
                tracing::debug!(
                    "`{}` not exported by {}; exception queries disabled",
                    names.exception_occurred,
                    resolver.origin()
                );
                None
            }
        };
        let dispatcher = CallDispatcher::resolve(Arc::clone(&resolver), names)?;

        let mut runtime = Self {
            resolver,
            dispatcher,
            options,
            init_fn,
            exception_occurred_fn,
            initialized: false,
        };
        runtime.apply_options(&config.startup)?;
        Ok(runtime)
    }

    /// Open the library an [`EmbedConfig`] points at and set up a session
    /// with its symbol names and startup options.
    ///
    /// # Safety
    ///
    /// The library must be the runtime, and the config's `symbols` must name
    /// its entry points. See [`EmbeddedRuntime::new`].
    pub unsafe fn from_embed_config(config: &EmbedConfig) -> EmbedResult<Self> {
        let library = match config.get_library_location() {
            LibraryLocation::Path(path) => NativeLibrary::open(path)?,
            LibraryLocation::CurrentProcess => NativeLibrary::this_process()?,
        };
        // SAFETY: upheld by the caller.
        unsafe {
            Self::new(
                Arc::new(library),
                &EmbedRuntimeConfig::create_from_embed_config(config),
            )
        }
    }

    /// Writable view over the runtime's options record. Fails once the
    /// runtime is initialized; use [`EmbeddedRuntime::snapshot`] to read it then.
    pub fn options(&mut self) -> EmbedResult<JlOptionsView<'_>> {
        if self.initialized {
            return Err(EmbedError::AlreadyInitialized);
        }
        // SAFETY: before init nobody else touches the record (see `new`).
        Ok(unsafe { self.options_unchecked() })
    }

    /// Writable view over the options record, whatever the session state.
    ///
    /// # Safety
    ///
    /// After [`EmbeddedRuntime::init`], no runtime thread may be reading or
    /// writing the record while the view is used.
    pub unsafe fn options_unchecked(&mut self) -> JlOptionsView<'_> {
        // SAFETY: the address is the runtime's exported record, which lives
        // as long as the library `self.resolver` keeps loaded.
        unsafe { JlOptionsView::from_non_null(self.options) }
    }

    /// Copy of the options record as it is right now.
    pub fn snapshot(&self) -> JlOptions {
        // SAFETY: as in `options_unchecked`; a single volatile read.
        unsafe { std::ptr::read_volatile(self.options.as_ptr()) }
    }

    /// Write every set startup option into the options record.
    pub fn apply_options(&mut self, startup: &StartupOptions) -> EmbedResult<()> {
        let mut view = self.options()?;
        for (name, value) in startup.overrides() {
            view.set(name, value)?;
            tracing::debug!("option {} = {:?}", name, value);
        }
        Ok(())
    }

    /// Run the runtime's initialiser. Options are read by the runtime here.
    ///
    /// # Safety
    ///
    /// The runtime must not have been initialized in this process yet, by this
    /// or any other session, and the calling thread becomes the one the
    /// runtime accepts calls from.
    pub unsafe fn init(&mut self) -> EmbedResult<()> {
        if self.initialized {
            return Err(EmbedError::AlreadyInitialized);
        }
        tracing::info!("Initializing runtime from {}", self.resolver.origin());
        // SAFETY: `init_fn` is the runtime's initialiser (see `new`); the
        // once-per-process contract is upheld by the caller.
        unsafe { (self.init_fn)() };
        self.initialized = true;

        let options = self.snapshot();
        tracing::info!(
            "Runtime initialized (nthreads={}, nprocs={})",
            options.nthreads,
            options.nprocs
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn dispatcher(&self) -> &CallDispatcher {
        &self.dispatcher
    }

    pub fn resolver(&self) -> &dyn SymbolResolver {
        self.resolver.as_ref()
    }

    /// The runtime's pending exception, as the runtime reports it.
    ///
    /// `None` means the library does not export the query. `Some` carries the
    /// raw handle, which is null when no exception is pending. A null result
    /// from a call-through is not interpreted either way.
    ///
    /// # Safety
    ///
    /// Must be called on a thread the runtime accepts calls from, after
    /// [`EmbeddedRuntime::init`].
    pub unsafe fn exception_occurred(&self) -> Option<JlHandle> {
        let query = self.exception_occurred_fn?;
        // SAFETY: upheld by the caller.
        Some(unsafe { query() })
    }
}
