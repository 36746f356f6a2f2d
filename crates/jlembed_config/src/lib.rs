use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, String>;

/// Entry points the binding resolves by name, with the symbol each one maps to
/// unless overridden in the `symbols` section.
pub const DEFAULT_SYMBOLS: &[(&str, &str)] = &[
    ("call", "jl_call"),
    ("call0", "jl_call0"),
    ("call1", "jl_call1"),
    ("call2", "jl_call2"),
    ("call3", "jl_call3"),
    ("init", "jl_init"),
    ("options", "jl_options"),
    ("exception_occurred", "jl_exception_occurred"),
];

/// Default exported symbol for an entry point, `None` if the entry point is unknown.
pub fn default_symbol(entry_point: &str) -> Option<&'static str> {
    DEFAULT_SYMBOLS
        .iter()
        .find(|(name, _)| *name == entry_point)
        .map(|(_, symbol)| *symbol)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedConfig {
    /// Name of the embedding profile.
    pub name: String,
    /// Where the native runtime's symbols come from.
    pub library: LibraryConfig,
    /// Overrides for exported symbol names.
    /// Key is the entry point name (see [`DEFAULT_SYMBOLS`]), value is the exported symbol.
    #[serde(default)]
    pub symbols: IndexMap<String, String>,
    /// Startup options written into the runtime's options record before init.
    #[serde(default)]
    pub options: StartupOptions,

    /// Directory where the config file is located.
    /// Relative library paths are resolved against it.
    #[serde(skip)]
    config_dir: PathBuf,
}

impl EmbedConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config: EmbedConfig = serde_yaml::from_reader(
            std::fs::File::open(path).map_err(|e| format!("Failed to open file: {}", e))?,
        )
        .map_err(|e| format!("Failed to parse YAML: {}", e))?;

        let path = path
            .canonicalize()
            .map_err(|e| format!("Failed to canonicalize path: {}", e))?;
        config.config_dir = path
            .parent()
            .ok_or_else(|| format!("Failed to get parent directory of path: {}", path.display()))?
            .to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn get_library_location(&self) -> LibraryLocation {
        if let Some(path) = &self.library.path {
            if path.is_relative() {
                return LibraryLocation::Path(self.config_dir.join(path));
            } else {
                return LibraryLocation::Path(path.clone());
            }
        }

        LibraryLocation::CurrentProcess
    }

    /// Exported symbol name for an entry point, honoring overrides.
    pub fn symbol_name<'a>(&'a self, entry_point: &'a str) -> &'a str {
        if let Some(symbol) = self.symbols.get(entry_point) {
            return symbol;
        }
        default_symbol(entry_point).unwrap_or(entry_point)
    }

    fn validate(&self) -> Result<()> {
        if !self.config_dir.is_dir() {
            return Err(format!(
                "Broken config path: config_dir is not a directory: {}",
                self.config_dir.display()
            ));
        }

        if self.name.is_empty() {
            return Err("Name is required in the name field".to_string());
        }

        if self.library.path.is_some() && self.library.current_process {
            return Err("Only one of path or current_process can be specified".to_string());
        }

        if self.library.path.is_none() && !self.library.current_process {
            return Err("One of path or current_process must be specified".to_string());
        }

        for (entry_point, symbol) in self.symbols.iter() {
            if default_symbol(entry_point).is_none() {
                return Err(format!("Unknown entry point in symbols: {}", entry_point));
            }
            if symbol.is_empty() {
                return Err(format!("Symbol for {} must not be empty", entry_point));
            }
        }

        self.options.validate()
    }
}

pub enum LibraryLocation {
    /// Load the runtime from a shared library on disk.
    Path(PathBuf),
    /// Resolve symbols from the running process (runtime linked into the host).
    CurrentProcess,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Path to the runtime's shared library.
    /// If relative path is specified, it is relative to the directory where the config file is located.
    /// condition: Only one of path or current_process must be specified
    path: Option<PathBuf>,
    /// Resolve symbols from the host process itself.
    /// condition: Only one of path or current_process must be specified
    #[serde(default)]
    pub current_process: bool,
}

/// Scalar value of a startup option, sized like the record field it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
    Int8(i8),
    Int32(i32),
}

macro_rules! startup_options {
    ($( $(#[$doc:meta])* $field:ident : $ty:ident => $variant:ident ),* $(,)?) => {
        /// Overrides for the scalar fields of the runtime's options record.
        ///
        /// Fields left unset keep whatever the record already holds.
        /// Pointer-typed fields are not configurable here since their storage
        /// must be owned by the runtime.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
        #[serde(deny_unknown_fields)]
        pub struct StartupOptions {
            $(
                $(#[$doc])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl StartupOptions {
            /// Set options, in record order, paired with their field names.
            pub fn overrides(&self) -> Vec<(&'static str, OptionValue)> {
                let mut out = Vec::new();
                $(
                    if let Some(value) = self.$field {
                        out.push((stringify!($field), OptionValue::$variant(value)));
                    }
                )*
                out
            }
        }
    };
}

startup_options! {
    quiet: i8 => Int8,
    banner: i8 => Int8,
    /// Number of threads the runtime starts with.
    nthreads: i32 => Int32,
    /// Number of worker processes.
    nprocs: i32 => Int32,
    isinteractive: i8 => Int8,
    color: i8 => Int8,
    historyfile: i8 => Int8,
    startupfile: i8 => Int8,
    compile_enabled: i8 => Int8,
    code_coverage: i8 => Int8,
    malloc_log: i8 => Int8,
    /// Optimization level, 0 to 3.
    opt_level: i8 => Int8,
    /// Debug info level, 0 to 2.
    debug_level: i8 => Int8,
    check_bounds: i8 => Int8,
    depwarn: i8 => Int8,
    warn_overwrite: i8 => Int8,
    can_inline: i8 => Int8,
    polly: i8 => Int8,
    fast_math: i8 => Int8,
    worker: i8 => Int8,
    handle_signals: i8 => Int8,
    use_sysimage_native_code: i8 => Int8,
    use_compiled_modules: i8 => Int8,
    incremental: i8 => Int8,
    image_file_specified: i8 => Int8,
    warn_scope: i8 => Int8,
}

impl StartupOptions {
    fn validate(&self) -> Result<()> {
        if let Some(nthreads) = self.nthreads {
            if nthreads < 1 {
                return Err(format!("nthreads must be at least 1, got {}", nthreads));
            }
        }

        if let Some(nprocs) = self.nprocs {
            if nprocs < 0 {
                return Err(format!("nprocs must not be negative, got {}", nprocs));
            }
        }

        if let Some(opt_level) = self.opt_level {
            if !(0..=3).contains(&opt_level) {
                return Err(format!("opt_level must be between 0 and 3, got {}", opt_level));
            }
        }

        if let Some(debug_level) = self.debug_level {
            if !(0..=2).contains(&debug_level) {
                return Err(format!(
                    "debug_level must be between 0 and 2, got {}",
                    debug_level
                ));
            }
        }

        Ok(())
    }
}
