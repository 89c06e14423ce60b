//! # Analysis Processor
//!
//! Runs one [`AnalysisEngine`] on a dedicated thread, pulling bytes from a
//! [`DataSource`].
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start──► Running ◄──resume── Paused
//!                    │ └────pause────►  │
//!                    ▼                  ▼
//!                 Stopped ◄────stop─────┘
//! ```
//!
//! The pump thread checks the pause gate and the stop flag once per
//! iteration, so pausing never splits a record. It leaves the loop on end of
//! stream, a stop request, a fatal decode failure, or when every analyzer has
//! retired, and always ends the engine before handing it back through
//! [`AnalysisProcessor::wait`].

mod source;

pub use source::{ChannelSource, DataSource, ReaderSource, SourceRead};

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use serde::Serialize;

use crate::analysis::{AnalysisEngine, EngineStatus};
use crate::config::ProcessorConfig;
use crate::domain::ProcessorError;
use crate::stream::{StreamBuffer, StreamReader};

const THREAD_NAME: &str = "tracepump-analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Why the pump loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorExit {
    EndOfStream,
    Stopped,
    DecodeFailed,
    AnalyzersRetired,
}

pub struct ProcessorReport {
    pub exit: ProcessorExit,
    pub bytes_read: u64,
    /// The engine, already ended.
    pub engine: AnalysisEngine,
}

struct Control {
    state: ProcessorState,
    stop_requested: bool,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while paused. Returns false once a stop was requested.
    fn pass_gate(&self) -> bool {
        let mut control = self.lock();
        while control.state == ProcessorState::Paused && !control.stop_requested {
            control = self.wake.wait(control).unwrap_or_else(PoisonError::into_inner);
        }
        !control.stop_requested
    }
}

/// Cloneable handle for controlling a running processor from other threads.
#[derive(Clone)]
pub struct ProcessorControl {
    shared: Arc<Shared>,
}

impl ProcessorControl {
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.shared.lock().state
    }

    /// Holds the pump loop before its next iteration. Only a running
    /// processor can pause.
    pub fn pause(&self) -> bool {
        let mut control = self.shared.lock();
        if control.state != ProcessorState::Running {
            return false;
        }
        control.state = ProcessorState::Paused;
        true
    }

    pub fn resume(&self) -> bool {
        let mut control = self.shared.lock();
        if control.state != ProcessorState::Paused {
            return false;
        }
        control.state = ProcessorState::Running;
        self.shared.wake.notify_all();
        true
    }

    /// Asks the pump loop to exit; also releases a paused loop.
    pub fn stop(&self) {
        self.shared.lock().stop_requested = true;
        self.shared.wake.notify_all();
    }
}

pub struct AnalysisProcessor {
    control: ProcessorControl,
    config: ProcessorConfig,
    pending: Option<(AnalysisEngine, Box<dyn DataSource>)>,
    handle: Option<JoinHandle<ProcessorReport>>,
}

impl AnalysisProcessor {
    #[must_use]
    pub fn new(engine: AnalysisEngine, source: impl DataSource + 'static, config: ProcessorConfig) -> Self {
        let shared = Shared {
            control: Mutex::new(Control { state: ProcessorState::Idle, stop_requested: false }),
            wake: Condvar::new(),
        };
        Self {
            control: ProcessorControl { shared: Arc::new(shared) },
            config,
            pending: Some((engine, Box::new(source))),
            handle: None,
        }
    }

    /// Spawns the pump thread.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AlreadyStarted`] on a second call,
    /// [`ProcessorError::Spawn`] when the thread cannot be created.
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        let Some((engine, source)) = self.pending.take() else {
            return Err(ProcessorError::AlreadyStarted);
        };
        self.control.shared.lock().state = ProcessorState::Running;

        let shared = Arc::clone(&self.control.shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || pump_loop(&shared, engine, source, &config))
            .map_err(|err| {
                self.control.shared.lock().state = ProcessorState::Stopped;
                ProcessorError::Spawn(err)
            })?;
        self.handle = Some(handle);
        info!("analysis processor started");
        Ok(())
    }

    #[must_use]
    pub fn control(&self) -> ProcessorControl {
        self.control.clone()
    }

    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.control.state()
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    /// Blocks until the pump thread exits and returns its report.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::NotStarted`] before [`start`](Self::start),
    /// [`ProcessorError::Panicked`] when an analyzer panicked.
    pub fn wait(mut self) -> Result<ProcessorReport, ProcessorError> {
        let handle = self.handle.take().ok_or(ProcessorError::NotStarted)?;
        let report = handle.join().map_err(|_| ProcessorError::Panicked);
        self.control.shared.lock().state = ProcessorState::Stopped;
        report
    }
}

fn pump_loop(
    shared: &Shared,
    mut engine: AnalysisEngine,
    mut source: Box<dyn DataSource>,
    config: &ProcessorConfig,
) -> ProcessorReport {
    let mut buffer = StreamBuffer::with_capacity(config.read_size);
    let mut bytes_read = 0u64;

    let exit = loop {
        if !shared.pass_gate() {
            break ProcessorExit::Stopped;
        }

        let mut outcome = SourceRead::Pending;
        buffer.fill(config.read_size, |slot| {
            outcome = source.read(slot);
            match outcome {
                SourceRead::Bytes(count) => count,
                SourceRead::Pending | SourceRead::End => 0,
            }
        });

        match outcome {
            SourceRead::Bytes(count) => {
                bytes_read += count as u64;
                if !engine.on_data(&mut buffer) {
                    break if engine.status() == EngineStatus::Failed {
                        ProcessorExit::DecodeFailed
                    } else {
                        ProcessorExit::AnalyzersRetired
                    };
                }
            }
            SourceRead::Pending => thread::sleep(config.poll_interval()),
            SourceRead::End => break ProcessorExit::EndOfStream,
        }
    };

    if exit == ProcessorExit::EndOfStream && !buffer.is_empty() {
        warn!("{} trailing bytes never formed a complete record", buffer.remaining());
    }
    engine.end();
    shared.lock().state = ProcessorState::Stopped;
    debug!("pump loop exited ({exit:?}) after {bytes_read} bytes");
    ProcessorReport { exit, bytes_read, engine }
}
