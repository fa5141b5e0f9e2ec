//
// error.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

/// The error taxonomy for the kernel core.
///
/// Only `TransportBind` is fatal; it prevents the kernel from ever reaching
/// the Running state and is reported to the host synchronously at startup.
/// Every other variant is recovered locally by the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("failed to bind {channel} channel to {endpoint}: {source}")]
    TransportBind {
        channel: &'static str,
        endpoint: String,
        #[source]
        source: zeromq::ZmqError,
    },

    #[error("message signature verification failed")]
    SignatureVerification,

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("interpreter fault: {0}")]
    InterpreterFault(String),

    #[error("unsupported signature scheme: {0}")]
    UnsupportedSignatureScheme(String),

    #[error("kernel is not running")]
    NotRunning,

    #[error("timed out waiting for input reply")]
    InputTimeout,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
