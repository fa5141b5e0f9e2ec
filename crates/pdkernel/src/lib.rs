//
// lib.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

//! Pandia is an embeddable Jupyter kernel core.
//!
//! It implements the Jupyter kernel wire protocol (channel sockets, message
//! framing and signing, heartbeat, background publishing) on behalf of a host
//! application that owns a single-threaded cooperative event loop and a
//! non-reentrant scripting engine. The host supplies an [`interpreter::Interpreter`]
//! and a [`host::HostScheduler`]; the kernel supplies bounded, non-blocking
//! [`server::KernelServer::poll`] cycles that keep the host UI responsive while
//! external Jupyter clients drive execution, completion, introspection, and
//! rich-output capture.

pub mod connection_file;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod host;
pub mod interpreter;
pub mod jupyter_messages;
pub mod kernel_connection;
pub mod kernel_state;
pub mod sentinel;
pub mod server;
pub mod wire_message;

pub use connection_file::{ConnectionFile, ConnectionInfo};
pub use error::KernelError;
pub use host::{
    EmbeddedKernel, HostScheduler, ScheduleHandle, SchedulerCommand, ThreadScheduler,
    DEFAULT_POLL_INTERVAL,
};
pub use interpreter::{Completion, DisplayPayload, ExecutionOutcome, Inspection, Interpreter};
pub use kernel_state::KernelStatus;
pub use server::{KernelServer, PollOutcome};
