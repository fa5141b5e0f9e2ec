//
// kernel_connection.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::connection_file::ConnectionInfo;
use crate::error::KernelError;

/// The identity this kernel instance signs and stamps messages with.
#[derive(Debug, Clone)]
pub struct KernelConnection {
    /// The ID of the session
    pub session_id: String,

    /// The username of the user who owns the session
    pub username: String,

    /// The signing key, as a string
    pub key: Option<String>,

    /// The Jupyter protocol version
    pub protocol_version: String,

    /// The HMAC key used to sign messages, if any
    pub hmac_key: Option<Hmac<Sha256>>,
}

impl KernelConnection {
    /// Create a connection identity from parsed connection information.
    ///
    /// An empty key disables signing, as the protocol allows. A non-empty key
    /// with a signature scheme other than hmac-sha256 is rejected; the key was
    /// distributed for a scheme this kernel cannot honor.
    pub fn from_connection_info(
        info: &ConnectionInfo,
        username: String,
    ) -> Result<Self, KernelError> {
        let (key, hmac_key) = if info.key.is_empty() {
            (None, None)
        } else {
            if !info.signature_scheme.is_empty() && info.signature_scheme != "hmac-sha256" {
                return Err(KernelError::UnsupportedSignatureScheme(
                    info.signature_scheme.clone(),
                ));
            }
            let hmac_key = Hmac::<Sha256>::new_from_slice(info.key.as_bytes())
                .map_err(|e| KernelError::Other(anyhow::anyhow!("invalid HMAC key: {}", e)))?;
            (Some(info.key.clone()), Some(hmac_key))
        };

        Ok(Self {
            session_id: make_session_id(),
            username,
            protocol_version: String::from("5.3"),
            key,
            hmac_key,
        })
    }
}

/// Generate a unique session ID for this kernel instance.
///
/// # Returns
///
/// A random hexadecimal string of 16 characters.
fn make_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| format!("{:x}", rng.gen_range(0..16)))
        .take(16)
        .collect()
}
