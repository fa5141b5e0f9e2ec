//
// sentinel.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

//! Reserved-token pre-parse for execute_request code.
//!
//! A handful of tokens are reserved by the execute contract and recognized
//! before the interpreter sees the code: a trailing display token that asks
//! for a rich-media snapshot instead of literal execution of that token, and
//! a pair of debug toggles that never reach the interpreter at all.

/// The trailing token that triggers a view snapshot.
pub const DISPLAY_TOKEN: &str = "display()";

/// The tokens that toggle verbose request logging.
pub const DEBUG_ENABLE_TOKEN: &str = "__kernel_debug_enable()";
pub const DEBUG_DISABLE_TOKEN: &str = "__kernel_debug_disable()";

/// What an execute_request's code resolves to once reserved tokens are
/// recognized. The cases are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeDirective {
    /// Execute the code verbatim
    Plain(String),

    /// Execute the remainder, then capture and publish a view snapshot
    Display(String),

    /// Toggle verbose request logging; the interpreter is not invoked
    DebugEnable,
    DebugDisable,
}

/// Classify a code string by its reserved tokens.
pub fn classify(code: &str) -> CodeDirective {
    let trimmed = code.trim_end();

    if trimmed == DEBUG_ENABLE_TOKEN {
        return CodeDirective::DebugEnable;
    }
    if trimmed == DEBUG_DISABLE_TOKEN {
        return CodeDirective::DebugDisable;
    }
    if let Some(rest) = trimmed.strip_suffix(DISPLAY_TOKEN) {
        return CodeDirective::Display(rest.to_string());
    }

    CodeDirective::Plain(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_code_passes_through() {
        assert_eq!(
            classify("1+1"),
            CodeDirective::Plain(String::from("1+1"))
        );
    }

    #[test]
    fn trailing_display_token_is_stripped() {
        assert_eq!(
            classify("setup()\ndisplay()\n"),
            CodeDirective::Display(String::from("setup()\n"))
        );
    }

    #[test]
    fn display_token_must_be_trailing() {
        assert_eq!(
            classify("display() and more"),
            CodeDirective::Plain(String::from("display() and more"))
        );
    }

    #[test]
    fn debug_toggles_match_whole_code() {
        assert_eq!(classify("__kernel_debug_enable()"), CodeDirective::DebugEnable);
        assert_eq!(
            classify("__kernel_debug_disable()\n"),
            CodeDirective::DebugDisable
        );
    }
}
