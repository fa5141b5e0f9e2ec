//
// host.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

//! The scheduling contract between the kernel and its host.
//!
//! The host owns a single cooperative thread, so the kernel never runs a
//! blocking receive loop there. Instead the host supplies a scheduler and the
//! kernel asks it to run bounded poll ticks at a configurable interval. A
//! toolkit with socket-readiness notifications can additionally trigger an
//! immediate tick when a channel becomes readable; interval polling is the
//! portable fallback.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection_file::ConnectionFile;
use crate::error::KernelError;
use crate::interpreter::Interpreter;
use crate::server::{KernelServer, PollOutcome};

/// The default poll interval: short enough that interactive pointer-driven
/// operations do not appear laggy, long enough to avoid burning CPU while
/// idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a tick tells the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Keep ticking at the current interval
    Continue,

    /// Keep ticking, at a new interval
    Reschedule(Duration),

    /// Cancel the schedule
    Stop,
}

/// A cancellation handle for a scheduled tick.
pub trait ScheduleHandle: Send {
    fn cancel(&mut self);
}

/// The host's task-scheduling primitive.
///
/// `tick` must run on the host's cooperative thread (or a thread the host
/// dedicates to the kernel), repeatedly, `interval` apart, until it returns
/// [`SchedulerCommand::Stop`] or the handle is cancelled.
pub trait HostScheduler {
    fn schedule(
        &self,
        interval: Duration,
        tick: Box<dyn FnMut() -> SchedulerCommand + Send>,
    ) -> Box<dyn ScheduleHandle>;
}

/// A scheduler for hosts without a cooperative loop of their own: runs ticks
/// on a dedicated thread, sleeping between them.
pub struct ThreadScheduler;

impl HostScheduler for ThreadScheduler {
    fn schedule(
        &self,
        interval: Duration,
        mut tick: Box<dyn FnMut() -> SchedulerCommand + Send>,
    ) -> Box<dyn ScheduleHandle> {
        let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
        let join = std::thread::Builder::new()
            .name(String::from("pandia-poll"))
            .spawn(move || {
                let mut interval = interval;
                loop {
                    match cancel_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    match tick() {
                        SchedulerCommand::Continue => {}
                        SchedulerCommand::Reschedule(new_interval) => interval = new_interval,
                        SchedulerCommand::Stop => break,
                    }
                }
            })
            .expect("failed to spawn poll thread");
        Box::new(ThreadScheduleHandle {
            cancel_tx: Some(cancel_tx),
            join: Some(join),
        })
    }
}

struct ThreadScheduleHandle {
    cancel_tx: Option<std::sync::mpsc::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl ScheduleHandle for ThreadScheduleHandle {
    fn cancel(&mut self) {
        // Dropping the sender wakes the sleeping thread immediately
        self.cancel_tx.take();
        if let Some(join) = self.join.take() {
            // A tick may cancel its own schedule; never join ourselves
            if join.thread().id() != std::thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

/// The kernel as the host consumes it: start from a connection descriptor,
/// stop, and tune the poll interval at runtime.
pub struct EmbeddedKernel {
    server: Arc<Mutex<KernelServer>>,
    poll_interval_ms: Arc<AtomicU64>,
    handle: Option<Box<dyn ScheduleHandle>>,
}

impl EmbeddedKernel {
    /// Bind and start a kernel from a connection descriptor, and begin
    /// scheduling poll ticks through the host's scheduler.
    ///
    /// Bind failures are reported here, synchronously; the kernel never
    /// reaches the Running state. `on_stopped` is invoked exactly once when
    /// the kernel stops, whether from [`EmbeddedKernel::stop`] or a client's
    /// shutdown_request.
    pub fn start<P: AsRef<Path>>(
        connection_file: P,
        username: String,
        interpreter: Box<dyn Interpreter>,
        scheduler: &dyn HostScheduler,
        on_stopped: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Self, KernelError> {
        let file = ConnectionFile::from_file(connection_file)?;
        let mut server = KernelServer::bind(file, username, interpreter)?;
        if let Some(callback) = on_stopped {
            server.on_stopped(callback);
        }
        server.start()?;

        let server = Arc::new(Mutex::new(server));
        let poll_interval_ms =
            Arc::new(AtomicU64::new(DEFAULT_POLL_INTERVAL.as_millis() as u64));

        let tick_server = server.clone();
        let tick_interval = poll_interval_ms.clone();
        let mut scheduled_ms = poll_interval_ms.load(Ordering::Relaxed);
        let tick = Box::new(move || {
            let mut server = tick_server.lock().unwrap();
            let hint = Duration::from_millis(tick_interval.load(Ordering::Relaxed));
            match server.poll(hint) {
                Ok(PollOutcome::Stopped) => SchedulerCommand::Stop,
                Ok(_) => {
                    let current_ms = tick_interval.load(Ordering::Relaxed);
                    if current_ms != scheduled_ms {
                        scheduled_ms = current_ms;
                        SchedulerCommand::Reschedule(Duration::from_millis(current_ms))
                    } else {
                        SchedulerCommand::Continue
                    }
                }
                Err(err) => {
                    log::error!("Kernel poll failed: {}", err);
                    SchedulerCommand::Continue
                }
            }
        });

        let handle = scheduler.schedule(DEFAULT_POLL_INTERVAL, tick);

        Ok(Self {
            server,
            poll_interval_ms,
            handle: Some(handle),
        })
    }

    /// Change the poll interval. Takes effect on the next tick.
    pub fn set_poll_interval(&self, interval: Duration) {
        self.poll_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// The current poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::Relaxed))
    }

    /// Whether the kernel is in the Running state.
    pub fn is_running(&self) -> bool {
        self.server.lock().unwrap().is_running()
    }

    /// The connection file the kernel is serving.
    pub fn connection_file(&self) -> ConnectionFile {
        self.server.lock().unwrap().connection_file().clone()
    }

    /// Stop the kernel and cancel the polling schedule. Idempotent.
    pub fn stop(&mut self) -> Result<(), KernelError> {
        {
            let mut server = self.server.lock().unwrap();
            server.stop()?;
        }
        if let Some(mut handle) = self.handle.take() {
            handle.cancel();
        }
        Ok(())
    }
}
