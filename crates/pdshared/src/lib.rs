//
// lib.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

//! Shared types for the Pandia embedded Jupyter kernel and its hosts.

/// Jupyter message types
pub mod jupyter_message;

/// Kernel info reply models
pub mod kernel_info;
