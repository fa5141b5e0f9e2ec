//
// dispatcher.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use async_channel::Sender;
use pdshared::jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader};
use serde_json::json;

use crate::interpreter::{kernel_info_reply, Interpreter};
use crate::jupyter_messages::{self, ExecuteRequest, JupyterRequest};
use crate::kernel_connection::KernelConnection;
use crate::sentinel::{self, CodeDirective};
use crate::server::InboundEnvelope;

/// A message the dispatcher wants sent, with the channel to send it on and
/// the routing identities to address it with.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub channel: JupyterChannel,
    pub identities: Vec<Vec<u8>>,
    pub message: JupyterMessage,
}

/// Everything a single dispatch produced.
pub struct DispatchResult {
    /// Replies and publications, in send order
    pub outbound: Vec<Outbound>,

    /// Whether the request asked the kernel to shut down
    pub shutdown: bool,
}

/// The protocol state machine.
///
/// Routes decoded requests to interpreter operations by message type and
/// composes the replies and iopub publications each one calls for. Owned and
/// driven exclusively by the host thread's poll cycle, so its mutable state
/// (execution counter, debug flag) needs no synchronization.
pub struct Dispatcher {
    interpreter: Box<dyn Interpreter>,
    connection: KernelConnection,
    execution_count: u64,
    debug_enabled: bool,
    input_tx: Sender<String>,
    input_route: Option<(Vec<Vec<u8>>, JupyterMessageHeader)>,
}

impl Dispatcher {
    pub fn new(
        interpreter: Box<dyn Interpreter>,
        connection: KernelConnection,
        input_tx: Sender<String>,
    ) -> Self {
        Self {
            interpreter,
            connection,
            execution_count: 0,
            debug_enabled: false,
            input_tx,
            input_route: None,
        }
    }

    /// The identities and parent header to route an input_request with:
    /// those of the most recent shell request.
    pub fn input_route(&self) -> Option<(Vec<Vec<u8>>, JupyterMessageHeader)> {
        self.input_route.clone()
    }

    /// The number of non-silent executions performed so far.
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Dispatch one decoded request and compose its replies.
    pub fn dispatch(&mut self, channel: JupyterChannel, envelope: InboundEnvelope) -> DispatchResult {
        let InboundEnvelope {
            identities,
            message,
        } = envelope;

        if self.debug_enabled {
            log::debug!(
                "[session {}] {:?} request {} ({}): {}",
                self.connection.session_id,
                channel,
                message.header.msg_type,
                message.header.msg_id,
                message.content
            );
        }

        let request = JupyterRequest::from(&message);

        // input_reply is a client answer, not a request; it gets no status
        // wrapping and no reply of its own.
        if let JupyterRequest::InputReply(reply) = &request {
            if self.input_tx.try_send(reply.value.clone()).is_err() {
                log::warn!("No pending stdin read; dropping input reply");
            }
            return DispatchResult {
                outbound: Vec::new(),
                shutdown: false,
            };
        }

        if channel == JupyterChannel::Shell {
            self.input_route = Some((identities.clone(), message.header.clone()));
        }

        let mut replies = Replies::new(self.connection.clone(), channel, identities, message.header);

        replies.publish_status("busy");

        match request {
            JupyterRequest::Execute(request) => self.execute(request, &mut replies),
            JupyterRequest::Complete(request) => {
                let completion = self
                    .interpreter
                    .complete(&request.code, request.cursor_pos);
                replies.reply(
                    "complete_reply",
                    json!({
                        "status": "ok",
                        "matches": completion.matches,
                        "cursor_start": completion.cursor_start,
                        "cursor_end": completion.cursor_end,
                        "metadata": {},
                    }),
                );
            }
            JupyterRequest::Inspect(request) => {
                let inspection = self.interpreter.inspect(
                    &request.code,
                    request.cursor_pos,
                    request.detail_level,
                );
                let data = if inspection.found {
                    json!({ "text/plain": inspection.text })
                } else {
                    json!({})
                };
                replies.reply(
                    "inspect_reply",
                    json!({
                        "status": "ok",
                        "found": inspection.found,
                        "data": data,
                        "metadata": {},
                    }),
                );
            }
            JupyterRequest::History(_) => {
                // The minimal single-entry record the protocol requires for
                // liveness; this kernel does not keep a history store.
                replies.reply(
                    "history_reply",
                    json!({
                        "status": "ok",
                        "history": [[self.connection.session_id, 0, ""]],
                    }),
                );
            }
            JupyterRequest::IsComplete(_) => {
                // Always "complete": this kernel performs no multi-line
                // continuation analysis. Known limitation.
                replies.reply("is_complete_reply", json!({ "status": "complete" }));
            }
            JupyterRequest::KernelInfo => {
                let info = kernel_info_reply(self.interpreter.as_ref());
                let content = serde_json::to_value(&info).unwrap_or_else(|err| {
                    log::error!("Failed to serialize kernel info: {}", err);
                    json!({ "status": "error" })
                });
                replies.reply("kernel_info_reply", content);
            }
            JupyterRequest::Shutdown(request) => {
                log::info!(
                    "[session {}] Client requested shutdown (restart: {})",
                    self.connection.session_id,
                    request.restart
                );
                replies.reply(
                    "shutdown_reply",
                    json!({ "status": "ok", "restart": request.restart }),
                );
                replies.shutdown = true;
            }
            JupyterRequest::Malformed(detail) => {
                log::warn!("Malformed request: {}", detail);
                replies.error_reply(&detail);
            }
            JupyterRequest::Unknown(msg_type) => {
                log::warn!("Unsupported message type: {}", msg_type);
                replies.error_reply(&format!("unsupported message type: {}", msg_type));
            }
            JupyterRequest::InputReply(_) => unreachable!("handled above"),
        }

        replies.publish_status("idle");
        replies.finish()
    }

    /// Run an execute_request through the reserved-token cases.
    fn execute(&mut self, request: ExecuteRequest, replies: &mut Replies) {
        if !request.silent {
            self.execution_count += 1;
        }
        let count = self.execution_count;

        let (faulted, pub_data) = match sentinel::classify(&request.code) {
            CodeDirective::DebugEnable => {
                self.debug_enabled = true;
                replies.publish_stream("stdout", "Kernel debug output enabled\n");
                (false, None)
            }
            CodeDirective::DebugDisable => {
                self.debug_enabled = false;
                replies.publish_stream("stdout", "Kernel debug output disabled\n");
                (false, None)
            }
            CodeDirective::Display(code) => {
                let outcome = self.interpreter.execute(&code);
                if outcome.faulted {
                    (true, Some(text_payload(&outcome.stderr)))
                } else {
                    match self.interpreter.capture_display() {
                        Some(payload) => {
                            let mut data = serde_json::Map::new();
                            data.insert(
                                payload.mime_type,
                                serde_json::Value::String(payload.data_base64),
                            );
                            (false, Some(serde_json::Value::Object(data)))
                        }
                        // No snapshot primitive; fall back to the captured text
                        None => (false, Some(text_payload(&outcome.stdout))),
                    }
                }
            }
            CodeDirective::Plain(code) => {
                let outcome = self.interpreter.execute(&code);
                if outcome.faulted {
                    (true, Some(text_payload(&outcome.stderr)))
                } else {
                    (false, Some(text_payload(&outcome.stdout)))
                }
            }
        };

        // Silent requests suppress the broadcast result.
        if !request.silent {
            if let Some(data) = pub_data {
                let parent = replies.parent.clone();
                replies.publish(jupyter_messages::execute_result(
                    &self.connection,
                    count,
                    data,
                    &parent,
                ));
            }
        }

        let status = if faulted { "error" } else { "ok" };
        replies.reply(
            "execute_reply",
            json!({
                "status": status,
                "execution_count": count,
                "user_expressions": {},
            }),
        );
    }
}

fn text_payload(text: &str) -> serde_json::Value {
    json!({ "text/plain": text })
}

/// Accumulates the replies and publications one dispatch produces.
struct Replies {
    connection: KernelConnection,
    channel: JupyterChannel,
    identities: Vec<Vec<u8>>,
    parent: JupyterMessageHeader,
    outbound: Vec<Outbound>,
    shutdown: bool,
}

impl Replies {
    fn new(
        connection: KernelConnection,
        channel: JupyterChannel,
        identities: Vec<Vec<u8>>,
        parent: JupyterMessageHeader,
    ) -> Self {
        Self {
            connection,
            channel,
            identities,
            parent,
            outbound: Vec::new(),
            shutdown: false,
        }
    }

    /// Queue a reply on the request's own channel.
    fn reply(&mut self, msg_type: &str, content: serde_json::Value) {
        let message = jupyter_messages::reply(&self.connection, msg_type, &self.parent, content);
        self.outbound.push(Outbound {
            channel: self.channel,
            identities: self.identities.clone(),
            message,
        });
    }

    /// Queue an error-status reply whose type is derived from the request's.
    fn error_reply(&mut self, detail: &str) {
        let msg_type = match self.parent.msg_type.strip_suffix("_request") {
            Some(stem) => format!("{}_reply", stem),
            None => String::from("error"),
        };
        self.reply(
            &msg_type,
            json!({
                "status": "error",
                "ename": "RequestError",
                "evalue": detail,
                "traceback": [],
            }),
        );
    }

    /// Queue an iopub publication.
    fn publish(&mut self, message: JupyterMessage) {
        self.outbound.push(Outbound {
            channel: JupyterChannel::IOPub,
            identities: Vec::new(),
            message,
        });
    }

    fn publish_status(&mut self, execution_state: &str) {
        self.publish(jupyter_messages::status_message(
            &self.connection,
            execution_state,
            Some(&self.parent),
        ));
    }

    fn publish_stream(&mut self, name: &str, text: &str) {
        self.publish(jupyter_messages::stream_message(
            &self.connection,
            name,
            text,
            &self.parent,
        ));
    }

    fn finish(self) -> DispatchResult {
        DispatchResult {
            outbound: self.outbound,
            shutdown: self.shutdown,
        }
    }
}
