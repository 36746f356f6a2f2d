use jlembed_config::{EmbedConfig, StartupOptions, default_symbol};

/// Exported symbol names the binding resolves. Names are looked up verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolNames {
    pub call: String,
    pub call0: String,
    pub call1: String,
    pub call2: String,
    pub call3: String,
    /// Initialiser, `void (*)(void)`.
    pub init: String,
    /// Data symbol of the options record.
    pub options: String,
    /// Error-slot query. Optional: missing from the library is not an error.
    pub exception_occurred: String,
}

impl SymbolNames {
    pub fn create_from_embed_config(config: &EmbedConfig) -> Self {
        Self::from_lookup(|entry_point| config.symbol_name(entry_point))
    }

    fn from_lookup<'a>(symbol_name: impl Fn(&'static str) -> &'a str) -> Self {
        Self {
            call: symbol_name("call").to_string(),
            call0: symbol_name("call0").to_string(),
            call1: symbol_name("call1").to_string(),
            call2: symbol_name("call2").to_string(),
            call3: symbol_name("call3").to_string(),
            init: symbol_name("init").to_string(),
            options: symbol_name("options").to_string(),
            exception_occurred: symbol_name("exception_occurred").to_string(),
        }
    }

    /// `(entry point, symbol)` pairs, in the order of [`jlembed_config::DEFAULT_SYMBOLS`].
    pub fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("call", self.call.as_str()),
            ("call0", self.call0.as_str()),
            ("call1", self.call1.as_str()),
            ("call2", self.call2.as_str()),
            ("call3", self.call3.as_str()),
            ("init", self.init.as_str()),
            ("options", self.options.as_str()),
            ("exception_occurred", self.exception_occurred.as_str()),
        ]
    }
}

impl Default for SymbolNames {
    fn default() -> Self {
        Self::from_lookup(|entry_point| default_symbol(entry_point).unwrap_or(entry_point))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbedRuntimeConfig {
    pub symbols: SymbolNames,
    /// Written into the runtime's options record when the session is created.
    pub startup: StartupOptions,
}

impl EmbedRuntimeConfig {
    pub fn create_from_embed_config(config: &EmbedConfig) -> Self {
        Self {
            symbols: SymbolNames::create_from_embed_config(config),
            startup: config.options.clone(),
        }
    }
}
