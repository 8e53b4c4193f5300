//! Sleep prevention while a reservation is near or running.
//!
//! The OS declaration is per thread, so a dedicated worker owns it. The poll
//! thread only swaps the requested state and wakes the worker when it changed.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

pub const ES_SYSTEM_REQUIRED: u32 = 0x0000_0001;
pub const ES_AWAYMODE_REQUIRED: u32 = 0x0000_0040;

/// Flags asserted while busy.
const BUSY: i32 = (ES_SYSTEM_REQUIRED | ES_AWAYMODE_REQUIRED) as i32;
const EXIT: i32 = -1;

/// Where the worker sends its declarations.
pub trait ExecutionStateSink: Send {
    /// Declare `flags` (0 clears). Returns false if the OS rejected them.
    fn declare(&mut self, flags: u32) -> bool;
}

#[cfg(windows)]
pub struct SystemSink;

#[cfg(windows)]
impl ExecutionStateSink for SystemSink {
    fn declare(&mut self, flags: u32) -> bool {
        use winapi::um::winbase::SetThreadExecutionState;
        use winapi::um::winnt::ES_CONTINUOUS;
        unsafe { SetThreadExecutionState(ES_CONTINUOUS | flags) != 0 }
    }
}

/// Sink for platforms without a per-thread declaration.
#[cfg(not(windows))]
pub struct SystemSink;

#[cfg(not(windows))]
impl ExecutionStateSink for SystemSink {
    fn declare(&mut self, flags: u32) -> bool {
        debug!("KeepAwake: execution state 0x{:08x}", flags);
        true
    }
}

pub struct KeepAwake {
    state: Arc<AtomicI32>,
    signal: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl KeepAwake {
    pub fn start(mut sink: Box<dyn ExecutionStateSink>) -> io::Result<Self> {
        let state = Arc::new(AtomicI32::new(0));
        let (signal, wake) = mpsc::channel::<()>();
        let worker_state = Arc::clone(&state);

        let worker = thread::Builder::new()
            .name("keep-awake".to_string())
            .spawn(move || {
                while wake.recv().is_ok() {
                    let requested = worker_state.load(Ordering::SeqCst);
                    if requested < 0 {
                        break;
                    }
                    let flags = requested as u32;
                    if !sink.declare(flags) && flags & ES_AWAYMODE_REQUIRED != 0 {
                        debug!("KeepAwake: away mode rejected, falling back");
                        sink.declare(flags & !ES_AWAYMODE_REQUIRED);
                    }
                }
                debug!("KeepAwake: worker stopped");
            })?;

        Ok(Self {
            state,
            signal: Some(signal),
            worker: Some(worker),
        })
    }

    pub fn with_system_sink() -> io::Result<Self> {
        Self::start(Box::new(SystemSink))
    }

    /// Request (or release) sleep prevention.
    pub fn set(&self, busy: bool) {
        let requested = if busy { BUSY } else { 0 };
        let previous = self.state.swap(requested, Ordering::SeqCst);
        if previous != requested && previous != EXIT {
            self.wake();
        }
    }

    pub fn is_asserted(&self) -> bool {
        self.state.load(Ordering::SeqCst) > 0
    }

    fn wake(&self) {
        if let Some(signal) = &self.signal {
            if signal.send(()).is_err() {
                warn!("KeepAwake: worker is gone");
            }
        }
    }

    /// Stop the worker and wait for it.
    pub fn shutdown(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.state.store(EXIT, Ordering::SeqCst);
        self.wake();
        self.signal = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("KeepAwake: worker panicked");
            }
        }
    }
}

impl Drop for KeepAwake {
    fn drop(&mut self) {
        self.shutdown();
    }
}
