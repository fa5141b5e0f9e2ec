//
// wire_message.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use hmac::Mac;
use pdshared::jupyter_message::{JupyterMessage, JupyterMessageHeader};

use crate::error::KernelError;
use crate::kernel_connection::KernelConnection;

/// The frame separating routing identities from the signed payload.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// A Jupyter message in its multipart wire form:
/// `[identities…, <IDS|MSG>, signature, header, parent_header, metadata,
/// content, buffers…]`.
pub struct WireMessage {
    /// The routing identities preceding the delimiter
    pub identities: Vec<Vec<u8>>,

    /// The signed parts of the message: signature, header, parent_header,
    /// metadata, content, and any binary buffers
    pub parts: Vec<Vec<u8>>,
}

impl WireMessage {
    /// Create a new wire message from a Jupyter message, signing it with the
    /// connection's key.
    pub fn from_message(
        msg: &JupyterMessage,
        identities: Vec<Vec<u8>>,
        connection: &KernelConnection,
    ) -> Result<Self, KernelError> {
        let mut parts: Vec<Vec<u8>> = Vec::new();

        parts.push(serde_json::to_vec(&msg.header)?);

        // Add the parent header, if any
        match &msg.parent_header {
            Some(parent) => parts.push(serde_json::to_vec(parent)?),
            None => parts.push(serde_json::to_vec(&serde_json::Map::new())?),
        }

        // Add the metadata
        parts.push(serde_json::to_vec(&msg.metadata)?);

        // Add the content
        parts.push(serde_json::to_vec(&msg.content)?);

        // Compute the HMAC signature over the four JSON blocks and prepend
        // it. Buffers are not part of the signed region.
        let signature = match &connection.hmac_key {
            Some(key) => {
                let mut signature = key.clone();
                for part in &parts {
                    signature.update(part);
                }
                hex::encode(signature.finalize().into_bytes()).into_bytes()
            }
            None => Vec::new(),
        };
        parts.insert(0, signature);

        // Append the buffers after the signed region
        for buffer in &msg.buffers {
            parts.push(buffer.clone());
        }

        Ok(WireMessage { identities, parts })
    }

    /// Split raw socket frames on the identity delimiter.
    pub fn from_frames(frames: Vec<Vec<u8>>) -> Result<Self, KernelError> {
        let delimiter = match frames.iter().position(|f| f.as_slice() == DELIMITER) {
            Some(pos) => pos,
            None => {
                return Err(KernelError::MalformedMessage(String::from(
                    "no identity delimiter in frames",
                )))
            }
        };

        let mut frames = frames;
        let parts = frames.split_off(delimiter + 1);
        frames.pop();

        // signature, header, parent_header, metadata, content
        if parts.len() < 5 {
            return Err(KernelError::MalformedMessage(format!(
                "expected at least 5 frames after delimiter, got {}",
                parts.len()
            )));
        }

        Ok(WireMessage {
            identities: frames,
            parts,
        })
    }

    /// Verify the message's signature and parse it into a Jupyter message.
    ///
    /// A signature mismatch yields `SignatureVerification`; the caller drops
    /// the message without surfacing anything to the client. An unparseable
    /// header yields `MalformedMessage`. A parseable header with unparseable
    /// metadata or content decodes with the bad block replaced by null, so
    /// the dispatcher can still answer an error reply.
    pub fn to_message(&self, connection: &KernelConnection) -> Result<JupyterMessage, KernelError> {
        if let Some(key) = &connection.hmac_key {
            let signature = hex::decode(&self.parts[0])
                .map_err(|_| KernelError::SignatureVerification)?;
            let mut mac = key.clone();
            for part in &self.parts[1..5] {
                mac.update(part);
            }
            // verify_slice is a constant-time comparison
            mac.verify_slice(&signature)
                .map_err(|_| KernelError::SignatureVerification)?;
        }

        let header: JupyterMessageHeader = serde_json::from_slice(&self.parts[1])
            .map_err(|e| KernelError::MalformedMessage(format!("bad header: {}", e)))?;

        let parent_header = match serde_json::from_slice::<JupyterMessageHeader>(&self.parts[2]) {
            Ok(parent) => Some(parent),
            // An empty JSON object marks "no parent"
            Err(_) => None,
        };

        let metadata = serde_json::from_slice(&self.parts[3]).unwrap_or(serde_json::Value::Null);
        let content = serde_json::from_slice(&self.parts[4]).unwrap_or(serde_json::Value::Null);

        let buffers = self.parts[5..].iter().cloned().collect();

        Ok(JupyterMessage {
            header,
            parent_header,
            metadata,
            content,
            buffers,
        })
    }

    /// Assemble the full frame sequence for the socket.
    pub fn into_frames(self) -> Vec<Vec<u8>> {
        let mut frames = self.identities;
        frames.push(DELIMITER.to_vec());
        frames.extend(self.parts);
        frames
    }
}
