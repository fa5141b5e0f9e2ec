//
// kernel_state.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use std::fmt;
use std::sync::Mutex;

/// The lifecycle of a kernel instance.
///
/// Created at start, advanced by stop or a shutdown request, never
/// resurrected; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelStatus::NotStarted => write!(f, "not started"),
            KernelStatus::Running => write!(f, "running"),
            KernelStatus::StopRequested => write!(f, "stop requested"),
            KernelStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The shared lifecycle cell for a kernel instance.
///
/// Transitions are logged; illegal transitions are refused rather than
/// panicking, which is what makes duplicate stop() calls no-ops.
#[derive(Debug)]
pub struct StatusCell {
    session_id: String,
    status: Mutex<KernelStatus>,
}

impl StatusCell {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            status: Mutex::new(KernelStatus::NotStarted),
        }
    }

    /// The current lifecycle status.
    pub fn status(&self) -> KernelStatus {
        *self.status.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.status() == KernelStatus::Running
    }

    /// True once a stop has been requested or completed.
    pub fn is_stopping(&self) -> bool {
        matches!(
            self.status(),
            KernelStatus::StopRequested | KernelStatus::Stopped
        )
    }

    /// Mark the kernel Running. Only valid from NotStarted.
    pub fn mark_running(&self) -> bool {
        self.transition(KernelStatus::NotStarted, KernelStatus::Running)
    }

    /// Request a stop. Returns false if the kernel already left the Running
    /// state, in which case the caller must treat stop() as a no-op.
    pub fn begin_stop(&self) -> bool {
        self.transition(KernelStatus::Running, KernelStatus::StopRequested)
    }

    /// Mark the kernel Stopped. Only valid from StopRequested.
    pub fn finish_stop(&self) -> bool {
        self.transition(KernelStatus::StopRequested, KernelStatus::Stopped)
    }

    fn transition(&self, from: KernelStatus, to: KernelStatus) -> bool {
        let mut status = self.status.lock().unwrap();
        if *status != from {
            log::debug!(
                "[session {}] refusing status '{}' => '{}' (currently '{}')",
                self.session_id,
                from,
                to,
                status
            );
            return false;
        }
        log::debug!("[session {}] status '{}' => '{}'", self.session_id, from, to);
        *status = to;
        true
    }
}
