//! Per-thread arming of hardware-counter sampling and the overflow signal
//! handler that ties the sample buffer (C3), the sample pipeline (C4) and
//! the perturbation engine (C5) together.
//!
//! Two overflow-driven counters are opened per thread through the
//! `perf-event-open` crate, one for cycles and one for retired
//! instructions, matching the reference profiler's use of one hardware
//! overflow source per sample kind. Each counter is wired to deliver a
//! *distinct* real-time signal on overflow (via `fcntl`'s `F_SETSIG`/
//! `F_SETOWN_EX`, exactly as the crate's own documentation demonstrates
//! for `SIGIO`), so the handler never has to disambiguate which counter
//! fired from `siginfo_t` — it already knows from which signal invoked it.
//! The sampled instruction pointer is read directly out of the signal's
//! `ucontext_t`, which is simpler and just as signal-safe as parsing the
//! counter's mmap ring buffer.

use std::cell::RefCell;
use std::ffi::c_void;
use std::os::fd::AsRawFd;
use std::sync::Once;

use perf_event_open::config::{Cpu, Opts, Proc, SampleOn};
use perf_event_open::count::Counter;
use perf_event_open::event::hw::Hardware;

use crate::error::{Error, Result};
use crate::sample::{Kind, SampleBlock};

/// Instruction-count period between instruction-overflow samples.
const INSTRUCTION_PERIOD: u64 = 10_000_000;
/// Cycle-count period between cycle-overflow samples.
const CYCLE_PERIOD: u64 = 10_000_000;

/// Not bound by the `libc` crate; see `perf-event-open`'s own
/// documentation example for `SampleOn`, which uses the same raw value.
const F_SETSIG: i32 = 10;

/// The configured sampling periods, exposed for the `blockstats` artifact's
/// header (component A3's output, §6).
pub fn cycle_period() -> u64 {
    CYCLE_PERIOD
}

pub fn instruction_period() -> u64 {
    INSTRUCTION_PERIOD
}

fn cycle_signal() -> i32 {
    unsafe { libc::SIGRTMIN() }
}

fn instruction_signal() -> i32 {
    unsafe { libc::SIGRTMIN() + 1 }
}

struct ThreadCounters {
    cycle: Counter,
    instruction: Counter,
}

thread_local! {
    static COUNTERS: RefCell<Option<ThreadCounters>> = const { RefCell::new(None) };
    static CURRENT_BLOCK: RefCell<Option<SampleBlock>> = const { RefCell::new(None) };
}

static HANDLERS_INSTALLED: Once = Once::new();

/// Opens both counters for the calling thread, arms signal delivery, and
/// enables them. Idempotent: re-arming an already-armed thread replaces
/// its counters (used after the trampoline re-enters for a fresh OS
/// thread; never called twice for the same live thread in practice).
pub fn arm_current_thread() -> Result<()> {
    install_handlers();

    let target = (Proc::CURRENT, Cpu::ALL);

    let mut cycle_opts = Opts::default();
    cycle_opts.sample_on = SampleOn::Count(CYCLE_PERIOD);
    let cycle = Counter::new(Hardware::CpuCycle, target, cycle_opts)
        .map_err(Error::HardwareCountersUnavailable)?;

    let mut instruction_opts = Opts::default();
    instruction_opts.sample_on = SampleOn::Count(INSTRUCTION_PERIOD);
    let instruction = Counter::new(Hardware::Instr, target, instruction_opts)
        .map_err(Error::HardwareCountersUnavailable)?;

    unsafe {
        arm_signal_delivery(cycle.file().as_raw_fd(), cycle_signal());
        arm_signal_delivery(instruction.file().as_raw_fd(), instruction_signal());
    }

    cycle.enable().map_err(Error::HardwareCountersUnavailable)?;
    instruction
        .enable()
        .map_err(Error::HardwareCountersUnavailable)?;

    COUNTERS.with(|cell| {
        *cell.borrow_mut() = Some(ThreadCounters { cycle, instruction });
    });
    Ok(())
}

/// Disarms the calling thread: disables and drops both counters (which
/// closes their file descriptors, stopping further overflow signals), and
/// flushes whatever partially-filled buffer the thread was still holding.
///
/// This runs as ordinary (non-signal) code and takes the pipeline mutex via
/// `flush_current_block`'s `publish`, so both sampling signals are blocked
/// for the duration: the signal-safety discipline (§4.4/§5) requires that
/// any thread holding that mutex have the sampling signal blocked, and
/// `install_handler`'s `sa_mask` only covers re-entrant delivery while a
/// handler is already executing, not this ordinary call path.
pub fn disarm_current_thread() {
    let previous_mask = block_sampling_signals();
    flush_current_block();
    COUNTERS.with(|cell| {
        if let Some(counters) = cell.borrow_mut().take() {
            let _ = counters.cycle.disable();
            let _ = counters.instruction.disable();
        }
    });
    restore_signal_mask(previous_mask);
}

/// Blocks both sampling signals on the calling thread and returns the prior
/// mask, so the caller can later restore it with [`restore_signal_mask`].
fn block_sampling_signals() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, cycle_signal());
        libc::sigaddset(&mut set, instruction_signal());

        let mut previous: libc::sigset_t = std::mem::zeroed();
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous);
        previous
    }
}

fn restore_signal_mask(mask: libc::sigset_t) {
    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut());
    }
}

fn flush_current_block() {
    let runtime = crate::lifecycle::runtime();
    let Some(pipeline) = runtime.pipeline() else {
        return;
    };
    CURRENT_BLOCK.with(|cell| {
        if let Some(mut block) = cell.borrow_mut().take() {
            if !block.is_empty() {
                block.seal();
                pipeline.publish(block);
            }
        }
    });
}

fn install_handlers() {
    HANDLERS_INSTALLED.call_once(|| unsafe {
        install_handler(cycle_signal(), cycle_overflow as usize);
        install_handler(instruction_signal(), instruction_overflow as usize);
    });
}

unsafe fn install_handler(signum: i32, handler: usize) {
    let mut mask: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut mask);
    // Each handler blocks both sampling signals for its own duration: the
    // signal-safety discipline requires the sampling signal be masked
    // while the current thread holds the pipeline mutex (publishing a
    // sealed block), and either counter's overflow can trigger a publish.
    libc::sigaddset(&mut mask, cycle_signal());
    libc::sigaddset(&mut mask, instruction_signal());

    let act = libc::sigaction {
        sa_sigaction: handler,
        sa_mask: mask,
        sa_flags: libc::SA_SIGINFO | libc::SA_RESTART,
        sa_restorer: None,
    };
    if libc::sigaction(signum, &act, std::ptr::null_mut()) != 0 {
        log::error!(
            "sigaction({signum}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Directs overflow signals from this thread's counters to this thread
/// alone (`F_OWNER_TID`), rather than the whole process.
unsafe fn arm_signal_delivery(fd: i32, signum: i32) {
    libc::fcntl(fd, libc::F_SETFL, libc::O_ASYNC);
    libc::fcntl(fd, F_SETSIG, signum);
    let owner = libc::f_owner_ex {
        type_: libc::F_OWNER_TID,
        pid: libc::syscall(libc::SYS_gettid) as libc::pid_t,
    };
    libc::fcntl(fd, libc::F_SETOWN_EX, &owner as *const libc::f_owner_ex);
}

extern "C" fn cycle_overflow(_sig: i32, _info: *mut libc::siginfo_t, ctx: *mut c_void) {
    // A logic error here must never unwind through the libc frame that
    // invoked this handler. Catch it, log, and drop the sample rather than
    // risk undefined behavior unwinding across an FFI boundary.
    let _ = std::panic::catch_unwind(|| handle_overflow(Kind::Cycle, ctx));
}

extern "C" fn instruction_overflow(_sig: i32, _info: *mut libc::siginfo_t, ctx: *mut c_void) {
    let _ = std::panic::catch_unwind(|| handle_overflow(Kind::Instruction, ctx));
}

/// The overflow handler proper. Never allocates except, unavoidably, the
/// first time this thread publishes a sealed block and a fresh
/// `SampleBlock` is constructed for the next one — `SampleBlock::new` only
/// stores a capacity-1024 `ArrayVec` inline, so this is a fixed-size stack
/// write, not a heap allocation.
fn handle_overflow(kind: Kind, ctx: *mut c_void) {
    let runtime = crate::lifecycle::runtime();
    if !runtime.is_armed() {
        return;
    }
    let address = unsafe { instruction_pointer(ctx) };

    record_sample(kind, address);
    runtime.engine.on_sample(kind, address, crate::wait::wait_nanos);
}

fn record_sample(kind: Kind, address: usize) {
    let runtime = crate::lifecycle::runtime();
    let Some(pipeline) = runtime.pipeline() else {
        return;
    };
    let current_mode = runtime.engine.mode();

    CURRENT_BLOCK.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(SampleBlock::new(current_mode));
        }

        // Mode seal (invariant 3): a sample is attributed to the mode in
        // effect when its buffer was opened. If the engine has moved on
        // to a new mode mid-buffer, seal the old one and open a fresh
        // buffer stamped with the new mode before recording this sample.
        if slot.as_ref().unwrap().mode != current_mode {
            let mut sealed = slot.replace(SampleBlock::new(current_mode)).unwrap();
            sealed.seal();
            pipeline.publish(sealed);
        }

        if !slot.as_mut().unwrap().push(kind, address) {
            let mut sealed = slot.replace(SampleBlock::new(current_mode)).unwrap();
            sealed.seal();
            pipeline.publish(sealed);
            let _ = slot.as_mut().unwrap().push(kind, address);
        }

        if slot.as_ref().unwrap().is_full() {
            let mut sealed = slot.take().unwrap();
            sealed.seal();
            pipeline.publish(sealed);
        }
    });
}

#[cfg(target_arch = "x86_64")]
unsafe fn instruction_pointer(ctx: *mut c_void) -> usize {
    let ctx = ctx as *mut libc::ucontext_t;
    (*ctx).uc_mcontext.gregs[libc::REG_RIP as usize] as usize
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn instruction_pointer(_ctx: *mut c_void) -> usize {
    0
}
