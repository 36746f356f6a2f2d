use std::{ffi::c_char, path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{Parser, Subcommand};
use jlembed_config::{EmbedConfig, LibraryLocation};
use jlembed_runtime::abi::{
    FieldValue, JL_OPTIONS_FIELDS, JL_OPTIONS_SIZE, JlOptions, JlOptionsView, c_str_array_lossy,
    c_str_lossy,
};
use jlembed_runtime::engine::{EmbeddedRuntime, NativeLibrary, SymbolNames, SymbolResolver};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Inspect and drive the Julia runtime's embedding ABI.
#[derive(Parser)]
#[command(name = "jlembed", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the options record layout this binding was built with.
    Layout {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check that a native library exports every entry point the binding uses.
    Doctor {
        /// Path to the runtime's shared library. Defaults to the config's
        /// library, or the current process without a config.
        library: Option<PathBuf>,

        /// Embedding config whose symbol names are checked instead of the defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show symbol addresses.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Apply an embedding config to the runtime's options and initialize it.
    Init {
        /// Path to the embedding config file.
        config: PathBuf,

        /// Apply the options to a zeroed local record instead of loading the runtime.
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "jlembed_runtime=info,jlembed_cli=info") };
    }

    let subscriber = tracing_subscriber::Registry::default()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::from_default_env());
    subscriber.try_init()?;
    Ok(())
}

fn main() -> ExitCode {
    if let Err(err) = init_tracing() {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Layout { json } => layout(json),
        Command::Doctor {
            library,
            config,
            verbose,
        } => doctor(library, config, verbose),
        Command::Init { config, dry_run } => init(config, dry_run),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn layout(json: bool) -> Result<ExitCode> {
    if json {
        let out = serde_json::json!({
            "size": JL_OPTIONS_SIZE,
            "fields": JL_OPTIONS_FIELDS,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("jl_options_t: {} bytes, {} fields", JL_OPTIONS_SIZE, JL_OPTIONS_FIELDS.len());
    println!("{:>6}  {:>4}  {:<8} name", "offset", "size", "kind");
    for field in JL_OPTIONS_FIELDS {
        println!(
            "{:>6}  {:>4}  {:<8} {}",
            field.offset(),
            field.size(),
            format!("{:?}", field.kind()).to_lowercase(),
            field.name()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn doctor(library: Option<PathBuf>, config: Option<PathBuf>, verbose: bool) -> Result<ExitCode> {
    let config = config
        .map(|path| {
            EmbedConfig::load(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load embedding config: {}", e))
        })
        .transpose()?;

    let library = match (library, &config) {
        (Some(path), _) => NativeLibrary::open(path)?,
        (None, Some(config)) => match config.get_library_location() {
            LibraryLocation::Path(path) => NativeLibrary::open(path)?,
            LibraryLocation::CurrentProcess => NativeLibrary::this_process()?,
        },
        (None, None) => NativeLibrary::this_process()?,
    };
    let names = match &config {
        Some(config) => SymbolNames::create_from_embed_config(config),
        None => SymbolNames::default(),
    };
    println!("library: {}", library.path().display());

    let mut has_error = false;
    for check in check_symbols(&library, &names) {
        match check.addr {
            Some(addr) if verbose => println!("  {}: found at {addr:p}", check.symbol),
            Some(_) => println!("  {}: found", check.symbol),
            None if check.optional => println!("  {}: missing (optional)", check.symbol),
            None => {
                println!("  {}: missing", check.symbol);
                has_error = true;
            }
        }
    }
    println!("options record: {} bytes expected", JL_OPTIONS_SIZE);

    if has_error {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

struct SymbolCheck<'a> {
    symbol: &'a str,
    optional: bool,
    addr: Option<*mut std::ffi::c_void>,
}

fn check_symbols<'a>(
    resolver: &dyn SymbolResolver,
    names: &'a SymbolNames,
) -> Vec<SymbolCheck<'a>> {
    names
        .entries()
        .into_iter()
        .map(|(entry_point, symbol)| SymbolCheck {
            symbol,
            optional: entry_point == "exception_occurred",
            addr: resolver.lookup(symbol).filter(|addr| !addr.is_null()),
        })
        .collect()
}

fn init(config: PathBuf, dry_run: bool) -> Result<ExitCode> {
    let config = EmbedConfig::load(&config)
        .map_err(|e| anyhow::anyhow!("Failed to load embedding config: {}", e))?;

    if dry_run {
        let mut options = JlOptions::zeroed();
        let mut view = options.view();
        for (name, value) in config.options.overrides() {
            view.set(name, value)?;
        }
        print_options(&view);
        return Ok(ExitCode::SUCCESS);
    }

    // SAFETY: the config names the runtime's library and its entry points,
    // and this is the only initialization in the process, on the main thread.
    let mut runtime = unsafe { EmbeddedRuntime::from_embed_config(&config) }
        .map_err(|e| anyhow::anyhow!("Failed to set up runtime `{}`: {}", config.name, e))?;
    unsafe { runtime.init() }
        .map_err(|e| anyhow::anyhow!("Failed to initialize runtime: {}", e))?;
    tracing::info!("Runtime `{}` is up", config.name);

    let mut snapshot = runtime.snapshot();
    print_options(&snapshot.view());
    Ok(ExitCode::SUCCESS)
}

fn print_options(view: &JlOptionsView<'_>) {
    for field in JL_OPTIONS_FIELDS {
        let shown = match view.read_field(field) {
            FieldValue::CString(addr) if addr != 0 => {
                // SAFETY: non-null string fields point at runtime-owned C strings.
                let text = unsafe { c_str_lossy(addr as *const c_char) };
                text.map(|s| format!("{s:?}")).unwrap_or_default()
            }
            FieldValue::CStringArray(addr) if addr != 0 => {
                // SAFETY: non-null string arrays are NULL-terminated runtime-owned arrays.
                let items = unsafe { c_str_array_lossy(addr as *const *const c_char) };
                items.map(|items| format!("{items:?}")).unwrap_or_default()
            }
            value => value.to_string(),
        };
        println!("{:<26}{}", field.name(), shown);
    }
}
