//
// dispatcher_tests.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use std::sync::{Arc, Mutex};

use pdkernel::connection_file::ConnectionInfo;
use pdkernel::dispatcher::{DispatchResult, Dispatcher};
use pdkernel::interpreter::{DisplayPayload, ExecutionOutcome, Interpreter};
use pdkernel::jupyter_messages::make_message_id;
use pdkernel::kernel_connection::KernelConnection;
use pdkernel::server::InboundEnvelope;
use pdshared::jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader};
use pdshared::kernel_info::LanguageInfo;
use serde_json::json;

/// A stand-in scripting engine: echoes code as stdout, answers "2" to
/// "1+1", and faults on anything containing "fail".
struct StubInterpreter {
    executed: Arc<Mutex<Vec<String>>>,
    display_calls: Arc<Mutex<u32>>,
}

impl StubInterpreter {
    fn new() -> (Self, Arc<Mutex<Vec<String>>>, Arc<Mutex<u32>>) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let display_calls = Arc::new(Mutex::new(0));
        (
            Self {
                executed: executed.clone(),
                display_calls: display_calls.clone(),
            },
            executed,
            display_calls,
        )
    }
}

impl Interpreter for StubInterpreter {
    fn execute(&mut self, code: &str) -> ExecutionOutcome {
        self.executed.lock().unwrap().push(code.to_string());
        if code.contains("fail") {
            ExecutionOutcome {
                faulted: true,
                stdout: String::new(),
                stderr: format!("engine fault in: {}", code),
            }
        } else if code == "1+1" {
            ExecutionOutcome {
                faulted: false,
                stdout: String::from("2"),
                stderr: String::new(),
            }
        } else {
            ExecutionOutcome {
                faulted: false,
                stdout: code.to_string(),
                stderr: String::new(),
            }
        }
    }

    fn capture_display(&mut self) -> Option<DisplayPayload> {
        *self.display_calls.lock().unwrap() += 1;
        Some(DisplayPayload {
            mime_type: String::from("image/png"),
            data_base64: String::from("aGVsbG8="),
        })
    }

    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: String::from("stub"),
            version: String::from("0.0.1"),
            mimetype: String::from("text/x-stub"),
            file_extension: String::from(".stub"),
            pygments_lexer: None,
            codemirror_mode: None,
            nbconvert_exporter: None,
        }
    }
}

fn test_dispatcher() -> (Dispatcher, Arc<Mutex<Vec<String>>>, Arc<Mutex<u32>>) {
    let info = ConnectionInfo {
        transport: String::from("tcp"),
        ip: String::from("127.0.0.1"),
        shell_port: 9001,
        iopub_port: 9002,
        stdin_port: 9003,
        control_port: 9004,
        hb_port: 9005,
        signature_scheme: String::from("hmac-sha256"),
        key: String::from("0123abcd"),
        kernel_name: String::new(),
    };
    let connection = KernelConnection::from_connection_info(&info, String::from("tester"))
        .expect("failed to build connection");
    let (interpreter, executed, display_calls) = StubInterpreter::new();
    let (input_tx, _input_rx) = async_channel_pair();
    let dispatcher = Dispatcher::new(Box::new(interpreter), connection, input_tx);
    (dispatcher, executed, display_calls)
}

fn async_channel_pair() -> (async_channel::Sender<String>, async_channel::Receiver<String>) {
    async_channel::unbounded()
}

fn request(msg_type: &str, content: serde_json::Value) -> InboundEnvelope {
    InboundEnvelope {
        identities: vec![b"client".to_vec()],
        message: JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: make_message_id(),
                msg_type: msg_type.to_string(),
                session: String::from("client-session"),
                username: String::from("client"),
                date: String::new(),
                version: String::from("5.3"),
            },
            parent_header: None,
            metadata: json!({}),
            content,
            buffers: Vec::new(),
        },
    }
}

fn execute_request(code: &str, silent: bool) -> InboundEnvelope {
    request(
        "execute_request",
        json!({ "code": code, "silent": silent, "store_history": !silent }),
    )
}

fn find<'a>(result: &'a DispatchResult, msg_type: &str) -> &'a pdkernel::dispatcher::Outbound {
    result
        .outbound
        .iter()
        .find(|o| o.message.header.msg_type == msg_type)
        .unwrap_or_else(|| panic!("no {} in outbound set", msg_type))
}

#[test]
fn replies_correlate_to_their_request() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let envelope = execute_request("1+1", false);
    let request_id = envelope.message.header.msg_id.clone();

    let result = dispatcher.dispatch(JupyterChannel::Shell, envelope);

    assert!(!result.outbound.is_empty());
    for outbound in &result.outbound {
        let parent = outbound
            .message
            .parent_header
            .as_ref()
            .expect("outbound message without parent header");
        assert_eq!(parent.msg_id, request_id);
        assert_ne!(outbound.message.header.msg_id, request_id);
    }
}

#[test]
fn execution_count_increments_only_for_non_silent_requests() {
    let (mut dispatcher, _, _) = test_dispatcher();

    let first = dispatcher.dispatch(JupyterChannel::Shell, execute_request("a = 1", false));
    assert_eq!(
        find(&first, "execute_reply").message.content["execution_count"],
        1
    );

    let silent = dispatcher.dispatch(JupyterChannel::Shell, execute_request("b = 2", true));
    assert_eq!(
        find(&silent, "execute_reply").message.content["execution_count"],
        1
    );

    let second = dispatcher.dispatch(JupyterChannel::Shell, execute_request("c = 3", false));
    assert_eq!(
        find(&second, "execute_reply").message.content["execution_count"],
        2
    );
    assert_eq!(dispatcher.execution_count(), 2);
}

#[test]
fn successful_execution_publishes_stdout_as_plain_text() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let result = dispatcher.dispatch(JupyterChannel::Shell, execute_request("1+1", false));

    let reply = find(&result, "execute_reply");
    assert_eq!(reply.message.content["status"], "ok");

    let published = find(&result, "execute_result");
    assert_eq!(published.channel, JupyterChannel::IOPub);
    assert_eq!(published.message.content["data"]["text/plain"], "2");
}

#[test]
fn display_sentinel_publishes_rich_media_and_captures_once() {
    let (mut dispatcher, executed, display_calls) = test_dispatcher();
    let result = dispatcher.dispatch(
        JupyterChannel::Shell,
        execute_request("setup_view()\ndisplay()", false),
    );

    // The sentinel itself never reaches the interpreter
    assert_eq!(executed.lock().unwrap().as_slice(), ["setup_view()\n"]);
    assert_eq!(*display_calls.lock().unwrap(), 1);

    let published = find(&result, "execute_result");
    let data = &published.message.content["data"];
    assert!(data.get("image/png").is_some());
    assert!(data.get("text/plain").is_none());
    assert_eq!(find(&result, "execute_reply").message.content["status"], "ok");
}

#[test]
fn debug_toggle_skips_the_interpreter() {
    let (mut dispatcher, executed, _) = test_dispatcher();
    let result = dispatcher.dispatch(
        JupyterChannel::Shell,
        execute_request("__kernel_debug_enable()", false),
    );

    assert!(executed.lock().unwrap().is_empty());
    let stream = find(&result, "stream");
    assert!(stream.message.content["text"]
        .as_str()
        .expect("stream text")
        .contains("enabled"));
    assert_eq!(find(&result, "execute_reply").message.content["status"], "ok");
}

#[test]
fn engine_fault_reports_error_with_captured_stderr() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let result = dispatcher.dispatch(JupyterChannel::Shell, execute_request("fail here", false));

    let reply = find(&result, "execute_reply");
    assert_eq!(reply.message.content["status"], "error");

    let published = find(&result, "execute_result");
    assert_eq!(
        published.message.content["data"]["text/plain"],
        "engine fault in: fail here"
    );
}

#[test]
fn back_to_back_requests_reply_in_order_without_interleaving() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let first = execute_request("alpha", false);
    let second = execute_request("beta", false);
    let first_id = first.message.header.msg_id.clone();
    let second_id = second.message.header.msg_id.clone();

    let first_result = dispatcher.dispatch(JupyterChannel::Shell, first);
    let second_result = dispatcher.dispatch(JupyterChannel::Shell, second);

    let first_published = find(&first_result, "execute_result");
    assert_eq!(
        first_published.message.parent_header.as_ref().unwrap().msg_id,
        first_id
    );
    assert_eq!(first_published.message.content["data"]["text/plain"], "alpha");

    let second_published = find(&second_result, "execute_result");
    assert_eq!(
        second_published.message.parent_header.as_ref().unwrap().msg_id,
        second_id
    );
    assert_eq!(second_published.message.content["data"]["text/plain"], "beta");
}

#[test]
fn execute_wraps_in_busy_and_idle_statuses() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let result = dispatcher.dispatch(JupyterChannel::Shell, execute_request("1+1", false));

    let first = result.outbound.first().expect("no outbound messages");
    assert_eq!(first.message.header.msg_type, "status");
    assert_eq!(first.message.content["execution_state"], "busy");

    let last = result.outbound.last().expect("no outbound messages");
    assert_eq!(last.message.header.msg_type, "status");
    assert_eq!(last.message.content["execution_state"], "idle");
}

#[test]
fn completion_and_inspection_degrade_gracefully() {
    let (mut dispatcher, _, _) = test_dispatcher();

    let completion = dispatcher.dispatch(
        JupyterChannel::Shell,
        request("complete_request", json!({ "code": "ab", "cursor_pos": 2 })),
    );
    let reply = find(&completion, "complete_reply");
    assert_eq!(reply.message.content["status"], "ok");
    assert_eq!(reply.message.content["cursor_start"], 2);
    assert_eq!(reply.message.content["cursor_end"], 2);

    let inspection = dispatcher.dispatch(
        JupyterChannel::Shell,
        request(
            "inspect_request",
            json!({ "code": "ab", "cursor_pos": 2, "detail_level": 0 }),
        ),
    );
    let reply = find(&inspection, "inspect_reply");
    assert_eq!(reply.message.content["found"], false);
}

#[test]
fn fixed_protocol_answers() {
    let (mut dispatcher, _, _) = test_dispatcher();

    let history = dispatcher.dispatch(
        JupyterChannel::Shell,
        request("history_request", json!({ "hist_access_type": "tail" })),
    );
    let reply = find(&history, "history_reply");
    assert_eq!(
        reply.message.content["history"]
            .as_array()
            .expect("history array")
            .len(),
        1
    );

    let is_complete = dispatcher.dispatch(
        JupyterChannel::Shell,
        request("is_complete_request", json!({ "code": "while True:" })),
    );
    assert_eq!(
        find(&is_complete, "is_complete_reply").message.content["status"],
        "complete"
    );

    let info = dispatcher.dispatch(JupyterChannel::Shell, request("kernel_info_request", json!({})));
    let reply = find(&info, "kernel_info_reply");
    assert_eq!(reply.message.content["language_info"]["name"], "stub");
    assert_eq!(reply.message.content["protocol_version"], "5.3");
}

#[test]
fn shutdown_request_flags_shutdown_and_replies_first() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let result = dispatcher.dispatch(
        JupyterChannel::Control,
        request("shutdown_request", json!({ "restart": false })),
    );

    assert!(result.shutdown);
    let reply = find(&result, "shutdown_reply");
    assert_eq!(reply.channel, JupyterChannel::Control);
    assert_eq!(reply.message.content["restart"], false);
}

#[test]
fn unknown_request_type_answers_with_error_status() {
    let (mut dispatcher, _, _) = test_dispatcher();
    let result = dispatcher.dispatch(
        JupyterChannel::Shell,
        request("comm_open_request", json!({})),
    );

    assert!(!result.shutdown);
    let reply = find(&result, "comm_open_reply");
    assert_eq!(reply.message.content["status"], "error");
}

#[test]
fn malformed_content_answers_with_error_status() {
    let (mut dispatcher, _, _) = test_dispatcher();
    // execute_request with no code field at all
    let result = dispatcher.dispatch(
        JupyterChannel::Shell,
        request("execute_request", serde_json::Value::Null),
    );

    let reply = find(&result, "execute_reply");
    assert_eq!(reply.message.content["status"], "error");
}

#[test]
fn input_reply_is_delivered_to_the_pending_read() {
    let info = ConnectionInfo {
        transport: String::from("tcp"),
        ip: String::from("127.0.0.1"),
        shell_port: 9001,
        iopub_port: 9002,
        stdin_port: 9003,
        control_port: 9004,
        hb_port: 9005,
        signature_scheme: String::from("hmac-sha256"),
        key: String::from("0123abcd"),
        kernel_name: String::new(),
    };
    let connection = KernelConnection::from_connection_info(&info, String::from("tester"))
        .expect("failed to build connection");
    let (interpreter, _, _) = StubInterpreter::new();
    let (input_tx, input_rx) = async_channel_pair();
    let mut dispatcher = Dispatcher::new(Box::new(interpreter), connection, input_tx);

    let result = dispatcher.dispatch(
        JupyterChannel::Shell,
        request("input_reply", json!({ "value": "forty-two" })),
    );

    // An answer, not a request: no reply and no status wrapping
    assert!(result.outbound.is_empty());
    assert_eq!(input_rx.try_recv().expect("no input delivered"), "forty-two");
}
