//! Process-lifecycle control (component C8): one-time startup from a
//! process constructor, thread-creation interposition so every new thread
//! arms sampling, and interposed exit paths so buffers are flushed before
//! the real exit runs.

use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::code::CodeMap;
use crate::config::Config;
use crate::counters::Registry;
use crate::engine::Engine;
use crate::profiler::Profiler;
use crate::sample::Pipeline;
use crate::sampling;

/// Every piece of global state the rest of the crate reaches through
/// `runtime()`. Registry and engine are always live (the macros need them
/// even before `initialize()` has run, e.g. in a process where the
/// constructor has not yet fired); the pipeline and the profiler thread
/// handle only exist once `initialize()` has actually armed sampling.
pub struct Runtime {
    pub registry: Registry,
    pub engine: Engine,
    pipeline: OnceLock<Arc<Pipeline>>,
    profiler_thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
    armed: AtomicBool,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

pub fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime {
        registry: Registry::new(),
        engine: Engine::new(),
        pipeline: OnceLock::new(),
        profiler_thread: std::sync::Mutex::new(None),
        armed: AtomicBool::new(false),
    })
}

impl Runtime {
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.get()
    }
}

/// Idempotent: the first call performs real initialization; later calls
/// (including the one `reinitialize()` makes after `fork`) are no-ops
/// unless explicitly reset first (invariant 8).
pub fn initialize() {
    let runtime = runtime();
    if runtime.is_armed() {
        return;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("causal-rs: fatal configuration error: {e}");
            std::process::abort();
        }
    };
    init_logging(config.log_level);

    let exclude = [
        env!("CARGO_PKG_NAME"),
        "libcausal",
        "libperf_event_open",
        "libiced_x86",
    ];
    let code = match CodeMap::discover(&exclude) {
        Ok(code) => code,
        Err(e) => {
            log::error!("fatal: could not build code map: {e}");
            std::process::abort();
        }
    };

    let pipeline = Arc::new(Pipeline::new());
    runtime
        .pipeline
        .set(Arc::clone(&pipeline))
        .unwrap_or_else(|_| panic!("pipeline initialized twice"));

    // SAFETY: `runtime()` returns `&'static Runtime`; the engine and
    // registry borrowed into the profiler thread below live for the
    // process's remaining lifetime.
    let engine_ref: &'static Engine = &runtime.engine;
    let registry_ref: &'static Registry = &runtime.registry;
    let pipeline_for_thread = Arc::clone(&pipeline);

    let handle = std::thread::Builder::new()
        .name("causal-profiler".to_string())
        .spawn(move || {
            let profiler = Profiler::new(pipeline_for_thread, engine_ref, registry_ref, config, code);
            profiler.run();
        })
        .expect("failed to spawn profiler thread");

    *runtime
        .profiler_thread
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(handle);

    runtime.armed.store(true, Ordering::Release);

    // The calling thread's hardware counters are load-bearing: if the
    // very first thread can't be armed, nothing will ever be sampled, so
    // this is a fatal configuration error (taxon: fatal).
    runtime.engine.init_thread();
    if let Err(e) = sampling::arm_current_thread() {
        log::error!("fatal: could not arm sampling on the initializing thread: {e}");
        std::process::abort();
    }
}

/// Re-runs initialization in a freshly forked child: the parent's profiler
/// thread does not exist in the child's address space, so a plain flag
/// check would otherwise permanently wedge the child into "armed" with no
/// profiler actually running.
pub fn reinitialize() {
    let runtime = runtime();
    runtime.armed.store(false, Ordering::Release);
    initialize();
}

/// Arms sampling on a newly created thread. Unlike the initializing
/// thread's own arming in [`initialize`], failure here is degraded, not
/// fatal: a worker thread that could not get hardware counters (e.g. the
/// per-process perf event fd limit was hit) simply runs unsampled rather
/// than aborting the whole target program.
pub fn init_current_thread() {
    runtime().engine.init_thread();
    if let Err(e) = sampling::arm_current_thread() {
        log::warn!("degraded: could not arm sampling on new thread: {e}");
    }
}

/// Disarms sampling on the calling thread: flushes its partially-filled
/// buffer and stops its counters. Safe to call on a thread that was never
/// armed (e.g. sampling failed to initialize there).
pub fn disarm_current_thread() {
    sampling::disarm_current_thread();
}

pub fn shutdown() {
    let runtime = runtime();
    if !runtime.is_armed() {
        return;
    }
    disarm_current_thread();
    if let Some(pipeline) = runtime.pipeline() {
        pipeline.shut_down();
    }
    if let Some(handle) = runtime
        .profiler_thread
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    {
        let _ = handle.join();
    }
    runtime.armed.store(false, Ordering::Release);
}

fn init_logging(level: log::LevelFilter) {
    #[cfg(feature = "env_logger")]
    {
        let _ = env_logger::Builder::new().filter_level(level).try_init();
    }
    #[cfg(not(feature = "env_logger"))]
    {
        log::set_max_level(level);
    }
}

// ---------------------------------------------------------------------
// Process-lifetime constructor and libc interposition.
// ---------------------------------------------------------------------

#[ctor::ctor]
fn on_load() {
    initialize();
}

#[ctor::dtor]
fn on_unload() {
    shutdown();
}

unsafe fn resolve_real(name: &'static str) -> *mut c_void {
    let c_name = CString::new(name).expect("symbol name has no interior nul");
    let ptr = libc::dlsym(libc::RTLD_NEXT, c_name.as_ptr());
    if ptr.is_null() {
        let e = crate::error::Error::SymbolNotFound(name);
        log::error!("fatal: {e}");
        std::process::abort();
    }
    ptr
}

type ExitFn = unsafe extern "C" fn(c_int) -> !;
type ForkFn = unsafe extern "C" fn() -> libc::pid_t;
type PthreadCreateFn = unsafe extern "C" fn(
    *mut libc::pthread_t,
    *const libc::pthread_attr_t,
    extern "C" fn(*mut c_void) -> *mut c_void,
    *mut c_void,
) -> c_int;
type PthreadExitFn = unsafe extern "C" fn(*mut c_void) -> !;

static REAL_EXIT: OnceLock<usize> = OnceLock::new();
static REAL_UNDERSCORE_EXIT: OnceLock<usize> = OnceLock::new();
static REAL_UNDERSCORE_EXIT_CAP: OnceLock<usize> = OnceLock::new();
static REAL_FORK: OnceLock<usize> = OnceLock::new();
static REAL_PTHREAD_CREATE: OnceLock<usize> = OnceLock::new();
static REAL_PTHREAD_EXIT: OnceLock<usize> = OnceLock::new();

fn real_exit() -> ExitFn {
    let addr = *REAL_EXIT.get_or_init(|| unsafe { resolve_real("exit") as usize });
    unsafe { std::mem::transmute::<usize, ExitFn>(addr) }
}

fn real_underscore_exit() -> ExitFn {
    let addr = *REAL_UNDERSCORE_EXIT.get_or_init(|| unsafe { resolve_real("_exit") as usize });
    unsafe { std::mem::transmute::<usize, ExitFn>(addr) }
}

fn real_underscore_exit_cap() -> ExitFn {
    let addr =
        *REAL_UNDERSCORE_EXIT_CAP.get_or_init(|| unsafe { resolve_real("_Exit") as usize });
    unsafe { std::mem::transmute::<usize, ExitFn>(addr) }
}

fn real_fork() -> ForkFn {
    let addr = *REAL_FORK.get_or_init(|| unsafe { resolve_real("fork") as usize });
    unsafe { std::mem::transmute::<usize, ForkFn>(addr) }
}

fn real_pthread_create() -> PthreadCreateFn {
    let addr =
        *REAL_PTHREAD_CREATE.get_or_init(|| unsafe { resolve_real("pthread_create") as usize });
    unsafe { std::mem::transmute::<usize, PthreadCreateFn>(addr) }
}

fn real_pthread_exit() -> PthreadExitFn {
    let addr =
        *REAL_PTHREAD_EXIT.get_or_init(|| unsafe { resolve_real("pthread_exit") as usize });
    unsafe { std::mem::transmute::<usize, PthreadExitFn>(addr) }
}

/// # Safety
/// Only called by the C runtime as the process's `exit`.
#[no_mangle]
pub unsafe extern "C" fn exit(status: c_int) -> ! {
    shutdown();
    real_exit()(status)
}

/// # Safety
/// Only called by the C runtime as the process's `_exit`.
#[no_mangle]
pub unsafe extern "C" fn _exit(status: c_int) -> ! {
    shutdown();
    real_underscore_exit()(status)
}

/// # Safety
/// Only called by the C runtime as the process's `_Exit`.
#[no_mangle]
pub unsafe extern "C" fn _Exit(status: c_int) -> ! {
    shutdown();
    real_underscore_exit_cap()(status)
}

/// # Safety
/// Only called by the C runtime as the process's `fork`.
#[no_mangle]
pub unsafe extern "C" fn fork() -> libc::pid_t {
    let pid = real_fork()();
    if pid == 0 {
        reinitialize();
    }
    pid
}

struct ThreadTrampolineArgs {
    real_start: extern "C" fn(*mut c_void) -> *mut c_void,
    real_arg: *mut c_void,
}

extern "C" fn thread_trampoline(arg: *mut c_void) -> *mut c_void {
    let boxed = unsafe { Box::from_raw(arg as *mut ThreadTrampolineArgs) };
    init_current_thread();
    let result = (boxed.real_start)(boxed.real_arg);
    disarm_current_thread();
    result
}

/// # Safety
/// Only called by the C runtime as the process's `pthread_create`.
#[no_mangle]
pub unsafe extern "C" fn pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> c_int {
    let boxed = Box::new(ThreadTrampolineArgs {
        real_start: start_routine,
        real_arg: arg,
    });
    let raw = Box::into_raw(boxed) as *mut c_void;
    real_pthread_create()(thread, attr, thread_trampoline, raw)
}

/// # Safety
/// Only called by the C runtime as the process's `pthread_exit`.
#[no_mangle]
pub unsafe extern "C" fn pthread_exit(retval: *mut c_void) -> ! {
    disarm_current_thread();
    real_pthread_exit()(retval)
}

// Silence "unused" warnings for the `c_char` import used only by the
// `CString` construction above on some platforms' bindgen-free builds.
#[allow(unused_imports)]
use c_char as _unused_c_char;
