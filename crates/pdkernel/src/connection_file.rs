//
// connection_file.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

/// The connection information distributed out-of-band to Jupyter clients:
/// transport kind, bind address, the five channel ports, and the signing key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionInfo {
    /// The transport kind; only "tcp" is supported
    pub transport: String,

    /// The address to bind the channel sockets to
    pub ip: String,

    /// The port for the shell channel
    pub shell_port: u16,

    /// The port for the iopub channel
    pub iopub_port: u16,

    /// The port for the stdin channel
    pub stdin_port: u16,

    /// The port for the control channel
    pub control_port: u16,

    /// The port for the heartbeat channel
    pub hb_port: u16,

    /// The signature scheme; "hmac-sha256" or empty
    pub signature_scheme: String,

    /// The signing key; an empty key disables signing
    pub key: String,

    /// The kernel name, if the launching client recorded one
    #[serde(default)]
    pub kernel_name: String,
}

/// The contents of the Connection File as listed in the Jupyter specification;
/// directly parsed from JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionFile {
    pub info: ConnectionInfo,
}

impl ConnectionFile {
    /// Create a ConnectionFile from a ConnectionInfo struct.
    pub fn from_info(info: ConnectionInfo) -> Self {
        Self { info }
    }

    /// Create a ConnectionFile by parsing the contents of a connection file.
    pub fn from_file<P: AsRef<Path>>(connection_file: P) -> Result<Self, anyhow::Error> {
        let file = File::open(connection_file.as_ref())?;
        let reader = BufReader::new(file);
        let info = serde_json::from_reader(reader)?;

        Ok(Self { info })
    }

    /// Write the connection information to a file, for clients to pick up.
    pub fn to_file<P: AsRef<Path>>(&self, connection_file: P) -> Result<(), anyhow::Error> {
        let file = File::create(connection_file.as_ref())?;
        serde_json::to_writer_pretty(file, &self.info)?;
        Ok(())
    }

    /// Generate a new ConnectionFile by picking free ports and minting a
    /// random signing key.
    ///
    /// # Arguments
    ///
    /// * `ip` - The IP address the kernel will bind to
    pub fn generate(ip: String) -> Result<Self, anyhow::Error> {
        use rand::Rng;

        let key_bytes = rand::thread_rng().gen::<[u8; 16]>();
        let key = hex::encode(key_bytes);

        let info = ConnectionInfo {
            transport: "tcp".to_string(),
            ip,
            shell_port: Self::find_port("shell")?,
            iopub_port: Self::find_port("iopub")?,
            stdin_port: Self::find_port("stdin")?,
            control_port: Self::find_port("control")?,
            hb_port: Self::find_port("heartbeat")?,
            signature_scheme: "hmac-sha256".to_string(),
            key,
            kernel_name: String::new(),
        };
        Ok(Self { info })
    }

    /// Find a free port for the named channel.
    fn find_port(name: &str) -> Result<u16, anyhow::Error> {
        match portpicker::pick_unused_port() {
            Some(port) => {
                log::trace!("Picked {} port: {}", name, port);
                Ok(port)
            }
            None => Err(anyhow::anyhow!(
                "Failed to pick {} port; no free ports available or port range exhausted",
                name
            )),
        }
    }

    /// Given a port, return a URI-like string that can be used to bind the
    /// port, given the other parameters in the connection file.
    ///
    /// Example: `32` => `"tcp://127.0.0.1:32"`
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.info.transport, self.info.ip, port)
    }
}
