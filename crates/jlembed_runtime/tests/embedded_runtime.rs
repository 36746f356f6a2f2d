//! Session lifecycle against a stand-in runtime whose `jl_options` record and
//! `jl_init` live in this test binary.

use std::cell::Cell;
use std::ffi::c_void;
use std::io::Write as _;
use std::sync::Arc;

use jlembed_config::{EmbedConfig, StartupOptions};
use jlembed_runtime::EmbedError;
use jlembed_runtime::abi::{FieldValue, JL_OPTIONS_FIELDS, JlHandle, JlOptions};
use jlembed_runtime::engine::{
    EmbedRuntimeConfig, EmbeddedRuntime, JlCall0Fn, JlCall1Fn, JlCall2Fn, JlCall3Fn, JlCallFn,
    JlExceptionOccurredFn, JlInitFn, SymbolNames, SymbolTable,
};

thread_local! {
    static RECORD: Cell<*mut JlOptions> = const { Cell::new(std::ptr::null_mut()) };
    static OBSERVED_NTHREADS: Cell<Option<i32>> = const { Cell::new(None) };
    static INIT_CALLS: Cell<u32> = const { Cell::new(0) };
}

/// Reads `nthreads` the way the runtime does at startup, then writes back a
/// field the runtime owns.
unsafe extern "C" fn fake_init() {
    let record = RECORD.with(Cell::get);
    let nthreads = unsafe { (*record).nthreads };
    OBSERVED_NTHREADS.with(|cell| cell.set(Some(nthreads)));
    INIT_CALLS.with(|cell| cell.set(cell.get() + 1));
    unsafe { (*record).nprocs = 1 };
}

unsafe extern "C" fn no_exception() -> JlHandle {
    JlHandle::null()
}

unsafe extern "C" fn call(f: JlHandle, _args: *mut JlHandle, _nargs: i32) -> JlHandle {
    f
}

unsafe extern "C" fn call0(f: JlHandle) -> JlHandle {
    f
}

unsafe extern "C" fn call1(_f: JlHandle, a0: JlHandle) -> JlHandle {
    a0
}

unsafe extern "C" fn call2(_f: JlHandle, _a0: JlHandle, a1: JlHandle) -> JlHandle {
    a1
}

unsafe extern "C" fn call3(_f: JlHandle, _a0: JlHandle, _a1: JlHandle, a2: JlHandle) -> JlHandle {
    a2
}

/// Fresh zeroed record registered for this thread's `fake_init`.
fn fake_record() -> *mut JlOptions {
    let record = Box::into_raw(Box::new(JlOptions::zeroed()));
    RECORD.with(|cell| cell.set(record));
    OBSERVED_NTHREADS.with(|cell| cell.set(None));
    INIT_CALLS.with(|cell| cell.set(0));
    record
}

fn fake_runtime(record: *mut JlOptions) -> SymbolTable {
    SymbolTable::new("fake runtime")
        .with("jl_options", record as *const c_void)
        .with("jl_init", fake_init as JlInitFn as *const c_void)
        .with(
            "jl_exception_occurred",
            no_exception as JlExceptionOccurredFn as *const c_void,
        )
        .with("jl_call", call as JlCallFn as *const c_void)
        .with("jl_call0", call0 as JlCall0Fn as *const c_void)
        .with("jl_call1", call1 as JlCall1Fn as *const c_void)
        .with("jl_call2", call2 as JlCall2Fn as *const c_void)
        .with("jl_call3", call3 as JlCall3Fn as *const c_void)
}

/// Session over a table of stand-ins.
fn session(
    table: SymbolTable,
    config: &EmbedRuntimeConfig,
) -> Result<EmbeddedRuntime, EmbedError> {
    // SAFETY: every symbol in the table is either the boxed record from
    // `fake_record` or a function with the runtime's signature.
    unsafe { EmbeddedRuntime::new(Arc::new(table), config) }
}

fn release(record: *mut JlOptions) {
    RECORD.with(|cell| cell.set(std::ptr::null_mut()));
    drop(unsafe { Box::from_raw(record) });
}

#[test]
fn init_observes_configured_options() -> anyhow::Result<()> {
    let record = fake_record();
    let config = EmbedRuntimeConfig {
        symbols: SymbolNames::default(),
        startup: StartupOptions {
            nthreads: Some(4),
            quiet: Some(1),
            ..Default::default()
        },
    };

    let mut runtime = session(fake_runtime(record), &config)?;
    {
        let options = runtime.options()?;
        assert_eq!(options.nthreads(), 4);
        assert_eq!(options.quiet(), 1);
        assert_eq!(options.as_ptr(), record);
        for field in JL_OPTIONS_FIELDS {
            if let FieldValue::CString(addr)
            | FieldValue::CStringArray(addr)
            | FieldValue::Opaque(addr) = options.read_field(field)
            {
                assert_eq!(addr, 0, "{} should be null", field.name());
            }
        }
    }

    unsafe { runtime.init() }?;
    assert!(runtime.is_initialized());
    assert_eq!(OBSERVED_NTHREADS.with(Cell::get), Some(4));
    // Written by the runtime during init.
    assert_eq!(runtime.snapshot().nprocs, 1);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn host_can_adjust_options_before_init() -> anyhow::Result<()> {
    let record = fake_record();
    let mut runtime = session(fake_runtime(record), &EmbedRuntimeConfig::default())?;

    runtime.options()?.set_nthreads(3);
    unsafe { runtime.init() }?;
    assert_eq!(OBSERVED_NTHREADS.with(Cell::get), Some(3));

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn init_runs_once() -> anyhow::Result<()> {
    let record = fake_record();
    let mut runtime = session(fake_runtime(record), &EmbedRuntimeConfig::default())?;

    unsafe { runtime.init() }?;
    assert!(matches!(
        unsafe { runtime.init() },
        Err(EmbedError::AlreadyInitialized)
    ));
    assert_eq!(INIT_CALLS.with(Cell::get), 1);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn options_are_frozen_after_init() -> anyhow::Result<()> {
    let record = fake_record();
    let mut runtime = session(fake_runtime(record), &EmbedRuntimeConfig::default())?;

    let before = StartupOptions {
        nthreads: Some(2),
        ..Default::default()
    };
    runtime.apply_options(&before)?;
    unsafe { runtime.init() }?;
    assert_eq!(OBSERVED_NTHREADS.with(Cell::get), Some(2));

    let after = StartupOptions {
        nthreads: Some(8),
        ..Default::default()
    };
    assert!(matches!(
        runtime.apply_options(&after),
        Err(EmbedError::AlreadyInitialized)
    ));
    assert!(matches!(
        runtime.options().err(),
        Some(EmbedError::AlreadyInitialized)
    ));
    assert_eq!(runtime.snapshot().nthreads, 2);
    assert_eq!(unsafe { (*record).nthreads }, 2);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn unchecked_writes_after_init_reach_the_record() -> anyhow::Result<()> {
    let record = fake_record();
    let mut runtime = session(fake_runtime(record), &EmbedRuntimeConfig::default())?;
    unsafe { runtime.init() }?;

    // The stand-in runtime has no threads of its own reading the record.
    unsafe { runtime.options_unchecked() }.set_quiet(1);
    assert_eq!(runtime.snapshot().quiet, 1);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn exception_query_is_passed_through() -> anyhow::Result<()> {
    let record = fake_record();
    let mut runtime = session(fake_runtime(record), &EmbedRuntimeConfig::default())?;
    unsafe { runtime.init() }?;

    let pending = unsafe { runtime.exception_occurred() };
    assert_eq!(pending, Some(JlHandle::null()));

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn missing_exception_query_is_not_an_error() -> anyhow::Result<()> {
    let record = fake_record();
    let mut table = fake_runtime(record);
    table.remove("jl_exception_occurred");

    let runtime = session(table, &EmbedRuntimeConfig::default())?;
    assert_eq!(unsafe { runtime.exception_occurred() }, None);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn dispatcher_is_reachable_from_session() -> anyhow::Result<()> {
    let record = fake_record();
    let runtime = session(fake_runtime(record), &EmbedRuntimeConfig::default())?;

    let f = JlHandle::from_raw(0x40 as *mut c_void);
    let a = JlHandle::from_raw(0x41 as *mut c_void);
    assert_eq!(unsafe { runtime.dispatcher().call0(f) }, f);
    assert_eq!(unsafe { runtime.dispatcher().call1(f, a) }, a);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn renamed_initialiser_from_symbol_names() -> anyhow::Result<()> {
    let record = fake_record();
    let mut table = fake_runtime(record);
    table.remove("jl_init");
    table.insert("jl_init__threading", fake_init as JlInitFn as *const c_void);

    let err = session(table.clone(), &EmbedRuntimeConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, EmbedError::SymbolNotFound(name) if name == "jl_init"));

    let config = EmbedRuntimeConfig {
        symbols: SymbolNames {
            init: "jl_init__threading".to_string(),
            ..SymbolNames::default()
        },
        ..Default::default()
    };
    let mut runtime = session(table, &config)?;
    unsafe { runtime.init() }?;
    assert_eq!(INIT_CALLS.with(Cell::get), 1);

    drop(runtime);
    release(record);
    Ok(())
}

#[test]
fn missing_library_from_config() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("embed.yaml");
    let mut file = std::fs::File::create(&path)?;
    writeln!(
        file,
        "name: missing\nlibrary:\n  path: libjulia-not-here.so\noptions:\n  nthreads: 4"
    )?;

    let config = EmbedConfig::load(&path).map_err(anyhow::Error::msg)?;
    let err = unsafe { EmbeddedRuntime::from_embed_config(&config) }
        .err()
        .unwrap();
    assert!(matches!(err, EmbedError::LibraryLoad { .. }));
    Ok(())
}

#[cfg(unix)]
#[test]
fn current_process_without_runtime_lacks_options_symbol() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("embed.yaml");
    std::fs::write(&path, "name: linked\nlibrary:\n  current_process: true\n")?;

    let config = EmbedConfig::load(&path).map_err(anyhow::Error::msg)?;
    // Fails at the first lookup, before anything is written or called.
    let err = unsafe { EmbeddedRuntime::from_embed_config(&config) }
        .err()
        .unwrap();
    assert!(matches!(err, EmbedError::SymbolNotFound(name) if name == "jl_options"));
    Ok(())
}
