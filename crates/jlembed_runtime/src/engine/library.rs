use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use indexmap::IndexMap;

use crate::error::{EmbedError, EmbedResult};

/// Turns exported symbol names into addresses.
///
/// Kept separate from the dispatcher so the same call-through code works
/// against a dynamically loaded runtime, a runtime linked into the host, or an
/// in-process table of stand-in functions.
pub trait SymbolResolver {
    /// Address of `symbol`, or `None` if it is not exported.
    fn lookup(&self, symbol: &str) -> Option<*mut c_void>;

    /// Human-readable origin of the symbols, for logs.
    fn origin(&self) -> String;

    fn resolve(&self, symbol: &str) -> EmbedResult<NonNull<c_void>> {
        let addr = self
            .lookup(symbol)
            .and_then(NonNull::new)
            .ok_or_else(|| EmbedError::SymbolNotFound(symbol.to_string()))?;
        tracing::debug!("resolved `{}` at {:p} in {}", symbol, addr, self.origin());
        Ok(addr)
    }
}

/// A runtime loaded with the platform's dynamic loader.
pub struct NativeLibrary {
    library: libloading::Library,
    origin: PathBuf,
}

impl NativeLibrary {
    pub fn open<P: AsRef<Path>>(path: P) -> EmbedResult<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initialisers; the runtime's
        // shared library has no initialisers with preconditions on the host.
        let library = unsafe { libloading::Library::new(path) }.map_err(|source| {
            EmbedError::LibraryLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tracing::info!("Loaded native library {}", path.display());
        Ok(Self {
            library,
            origin: path.to_path_buf(),
        })
    }

    /// Symbols of the running executable and everything already loaded into it.
    pub fn this_process() -> EmbedResult<Self> {
        #[cfg(unix)]
        let library: libloading::Library = libloading::os::unix::Library::this().into();
        #[cfg(windows)]
        let library: libloading::Library = libloading::os::windows::Library::this()
            .map_err(|source| EmbedError::LibraryLoad {
                path: PathBuf::from("<current process>"),
                source,
            })?
            .into();

        Ok(Self {
            library,
            origin: PathBuf::from("<current process>"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.origin
    }
}

impl SymbolResolver for NativeLibrary {
    fn lookup(&self, symbol: &str) -> Option<*mut c_void> {
        // SAFETY: the symbol is only read as an address, never called or
        // dereferenced here.
        unsafe {
            self.library
                .get::<*mut c_void>(symbol.as_bytes())
                .ok()
                .map(|sym| *sym)
        }
    }

    fn origin(&self) -> String {
        self.origin.display().to_string()
    }
}

/// In-process name-to-address table.
///
/// Useful when the runtime is linked statically and its symbols are taken by
/// address, and for stand-in functions that probe what the binding passes.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    symbols: IndexMap<String, usize>,
}

impl SymbolTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, addr: *const c_void) -> &mut Self {
        self.symbols.insert(symbol.into(), addr as usize);
        self
    }

    pub fn with(mut self, symbol: impl Into<String>, addr: *const c_void) -> Self {
        self.insert(symbol, addr);
        self
    }

    pub fn remove(&mut self, symbol: &str) -> Option<usize> {
        self.symbols.shift_remove(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }
}

impl SymbolResolver for SymbolTable {
    fn lookup(&self, symbol: &str) -> Option<*mut c_void> {
        self.symbols.get(symbol).map(|addr| *addr as *mut c_void)
    }

    fn origin(&self) -> String {
        format!("symbol table `{}`", self.name)
    }
}
