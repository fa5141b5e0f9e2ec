//
// interpreter.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use pdshared::kernel_info::{KernelInfoReply, LanguageInfo};

/// The result of running code against the host scripting engine.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Whether the engine signaled a fault
    pub faulted: bool,

    /// Console output captured while the code ran
    pub stdout: String,

    /// Error output captured while the code ran
    pub stderr: String,
}

/// A rich-media payload produced by a view snapshot.
#[derive(Debug, Clone)]
pub struct DisplayPayload {
    /// The payload's MIME type, e.g. "image/png"
    pub mime_type: String,

    /// The payload, base64-encoded
    pub data_base64: String,
}

/// A completion answer.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Replacement candidates, in presentation order
    pub matches: Vec<String>,

    /// The start of the region the matches replace
    pub cursor_start: u64,

    /// The end of the region the matches replace
    pub cursor_end: u64,
}

/// An introspection answer.
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    /// Whether anything was found at the cursor
    pub found: bool,

    /// Plain-text documentation for what was found
    pub text: String,
}

/// The bridge between protocol requests and the host scripting engine.
///
/// One kernel holds one interpreter, constructed with whatever context it
/// needs; there are no global lookups. The kernel invokes it only from the
/// single dispatch path, never concurrently. Implementations run code
/// against one persistent global namespace so state survives across cells.
pub trait Interpreter: Send {
    /// Execute code synchronously, capturing console output for the duration
    /// of the call. The capture window opens before the code runs and closes
    /// immediately after.
    fn execute(&mut self, code: &str) -> ExecutionOutcome;

    /// Force pending render work to complete and capture a snapshot of the
    /// host's views. Invoked only by the display-token execution path.
    ///
    /// The default answers with no payload; hosts without a snapshot
    /// primitive need not implement it.
    fn capture_display(&mut self) -> Option<DisplayPayload> {
        None
    }

    /// Complete the code at the cursor. Hosts without a completion provider
    /// degrade to no matches rather than failing.
    fn complete(&mut self, code: &str, cursor_pos: u64) -> Completion {
        let _ = code;
        Completion {
            matches: Vec::new(),
            cursor_start: cursor_pos,
            cursor_end: cursor_pos,
        }
    }

    /// Inspect the code at the cursor. Hosts without an introspection
    /// provider degrade to found=false rather than failing.
    fn inspect(&mut self, code: &str, cursor_pos: u64, detail_level: u8) -> Inspection {
        let _ = (code, cursor_pos, detail_level);
        Inspection::default()
    }

    /// Static language and runtime metadata for kernel_info replies.
    fn language_info(&self) -> LanguageInfo;

    /// A banner shown by console clients at startup.
    fn banner(&self) -> String {
        String::new()
    }
}

/// Assemble the kernel_info reply for an interpreter.
pub fn kernel_info_reply(interpreter: &dyn Interpreter) -> KernelInfoReply {
    KernelInfoReply {
        status: String::from("ok"),
        protocol_version: String::from("5.3"),
        language_info: interpreter.language_info(),
        banner: interpreter.banner(),
        debugger: false,
        help_links: Vec::new(),
    }
}
