//
// jupyter_message.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use serde::{Deserialize, Serialize};

/// The header of a Jupyter message.
///
/// All fields of the wire header are carried here so that replies can echo
/// the triggering request's header verbatim as their `parent_header`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JupyterMessageHeader {
    /// The message ID
    pub msg_id: String,

    /// The type of the message
    pub msg_type: String,

    /// The ID of the session that produced the message
    #[serde(default)]
    pub session: String,

    /// The name of the user that produced the message
    #[serde(default)]
    pub username: String,

    /// The date/time the message was produced, ISO 8601
    #[serde(default)]
    pub date: String,

    /// The version of the Jupyter protocol
    #[serde(default)]
    pub version: String,
}

/// The set of all Jupyter sockets ("channels") over which messages are sent
/// and received.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JupyterChannel {
    /// The shell channel
    Shell,

    /// The control channel
    Control,

    /// The stdin channel
    Stdin,

    /// The iopub channel
    IOPub,

    /// The heartbeat channel
    Heartbeat,
}

/// A Jupyter message, decoded from (or about to be encoded into) its signed
/// multipart wire form.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JupyterMessage {
    /// The header of the message
    pub header: JupyterMessageHeader,

    /// The header of the message's parent (the message that caused this message)
    pub parent_header: Option<JupyterMessageHeader>,

    /// Additional metadata
    pub metadata: serde_json::Value,

    /// The message payload
    pub content: serde_json::Value,

    /// The message's binary buffers, carried as raw frames
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
}
