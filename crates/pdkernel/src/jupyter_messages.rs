//
// jupyter_messages.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use pdshared::jupyter_message::{JupyterMessage, JupyterMessageHeader};
use serde::Deserialize;
use serde_json::json;

use crate::kernel_connection::KernelConnection;

/// An enum of the request types this kernel handles. Anything else is
/// answered generically rather than aborting the kernel.
pub enum JupyterRequest {
    Execute(ExecuteRequest),
    Complete(CompleteRequest),
    Inspect(InspectRequest),
    History(HistoryRequest),
    IsComplete(IsCompleteRequest),
    KernelInfo,
    Shutdown(ShutdownRequest),
    InputReply(InputReply),

    /// A known request type whose content did not parse
    Malformed(String),

    /// A request type this kernel does not implement
    Unknown(String),
}

/// Convert a JupyterMessage (generic type) into a JupyterRequest (specific
/// type). Parse failures yield `Malformed` so the dispatcher can answer an
/// error-status reply instead of dropping the request.
impl From<&JupyterMessage> for JupyterRequest {
    fn from(msg: &JupyterMessage) -> Self {
        fn parse<T: for<'de> Deserialize<'de>>(
            msg: &JupyterMessage,
            build: fn(T) -> JupyterRequest,
        ) -> JupyterRequest {
            match serde_json::from_value::<T>(msg.content.clone()) {
                Ok(content) => build(content),
                Err(err) => JupyterRequest::Malformed(format!(
                    "bad {} content: {}",
                    msg.header.msg_type, err
                )),
            }
        }

        match msg.header.msg_type.as_str() {
            "execute_request" => parse(msg, JupyterRequest::Execute),
            "complete_request" => parse(msg, JupyterRequest::Complete),
            "inspect_request" => parse(msg, JupyterRequest::Inspect),
            "history_request" => parse(msg, JupyterRequest::History),
            "is_complete_request" => parse(msg, JupyterRequest::IsComplete),
            "kernel_info_request" => JupyterRequest::KernelInfo,
            "shutdown_request" => parse(msg, JupyterRequest::Shutdown),
            "input_reply" => parse(msg, JupyterRequest::InputReply),
            other => JupyterRequest::Unknown(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub code: String,

    #[serde(default)]
    pub silent: bool,

    #[serde(default = "default_true")]
    pub store_history: bool,

    #[serde(default)]
    pub allow_stdin: bool,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: u64,
}

#[derive(Deserialize)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: u64,

    #[serde(default)]
    pub detail_level: u8,
}

#[derive(Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub output: bool,

    #[serde(default)]
    pub raw: bool,

    #[serde(default)]
    pub hist_access_type: String,
}

#[derive(Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

#[derive(Deserialize)]
pub struct InputReply {
    pub value: String,
}

fn default_true() -> bool {
    true
}

/// Generate a unique message ID for Jupyter messages.
///
/// # Returns
///
/// A random hexadecimal string of 10 characters.
pub fn make_message_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| format!("{:x}", rng.gen_range(0..16)))
        .take(10)
        .collect()
}

/// Mint a fresh header for a message this kernel originates.
pub fn fresh_header(connection: &KernelConnection, msg_type: &str) -> JupyterMessageHeader {
    JupyterMessageHeader {
        msg_id: make_message_id(),
        msg_type: msg_type.to_string(),
        session: connection.session_id.clone(),
        username: connection.username.clone(),
        date: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        version: connection.protocol_version.clone(),
    }
}

/// Compose a reply correlated to the triggering request's header.
pub fn reply(
    connection: &KernelConnection,
    msg_type: &str,
    parent: &JupyterMessageHeader,
    content: serde_json::Value,
) -> JupyterMessage {
    JupyterMessage {
        header: fresh_header(connection, msg_type),
        parent_header: Some(parent.clone()),
        metadata: json!({}),
        content,
        buffers: Vec::new(),
    }
}

/// Compose a kernel status publication (starting/busy/idle).
pub fn status_message(
    connection: &KernelConnection,
    execution_state: &str,
    parent: Option<&JupyterMessageHeader>,
) -> JupyterMessage {
    JupyterMessage {
        header: fresh_header(connection, "status"),
        parent_header: parent.cloned(),
        metadata: json!({}),
        content: json!({ "execution_state": execution_state }),
        buffers: Vec::new(),
    }
}

/// Compose a stream (stdout/stderr) publication.
pub fn stream_message(
    connection: &KernelConnection,
    name: &str,
    text: &str,
    parent: &JupyterMessageHeader,
) -> JupyterMessage {
    reply(
        connection,
        "stream",
        parent,
        json!({ "name": name, "text": text }),
    )
}

/// Compose an execute_result publication carrying a display-data bundle.
pub fn execute_result(
    connection: &KernelConnection,
    execution_count: u64,
    data: serde_json::Value,
    parent: &JupyterMessageHeader,
) -> JupyterMessage {
    reply(
        connection,
        "execute_result",
        parent,
        json!({
            "execution_count": execution_count,
            "data": data,
            "metadata": {},
        }),
    )
}

/// Compose an input_request for the stdin channel.
pub fn input_request(
    connection: &KernelConnection,
    prompt: &str,
    parent: JupyterMessageHeader,
) -> JupyterMessage {
    reply(
        connection,
        "input_request",
        &parent,
        json!({ "prompt": prompt, "password": false }),
    )
}
