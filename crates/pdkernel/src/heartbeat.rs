//
// heartbeat.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use std::sync::Arc;

use event_listener::Event;
use zeromq::{RepSocket, Socket, SocketRecv, SocketSend};

use crate::error::KernelError;
use crate::kernel_state::StatusCell;
use crate::server::GRACE_DELAY;

/// The kernel-side heartbeat channel: a blocking echo of each datagram it
/// receives, proving the kernel process is alive.
pub struct HeartbeatEcho {
    socket: RepSocket,
    session_id: String,
    state: Arc<StatusCell>,
    stop_event: Arc<Event>,
}

impl HeartbeatEcho {
    /// Bind the heartbeat socket. A bind failure here is fatal to kernel
    /// startup, like any other channel bind failure.
    pub async fn bind(
        endpoint: &str,
        session_id: String,
        state: Arc<StatusCell>,
        stop_event: Arc<Event>,
    ) -> Result<Self, KernelError> {
        let mut socket = RepSocket::new();
        socket
            .bind(endpoint)
            .await
            .map_err(|source| KernelError::TransportBind {
                channel: "heartbeat",
                endpoint: endpoint.to_string(),
                source,
            })?;
        log::info!(
            "[session {}] Heartbeat channel bound to {}",
            session_id,
            endpoint
        );
        Ok(Self {
            socket,
            session_id,
            state,
            stop_event,
        })
    }

    /// Echo datagrams until the stop event fires.
    pub async fn run(mut self) {
        loop {
            let stop_listener = self.stop_event.listen();
            if self.state.is_stopping() {
                break;
            }
            tokio::select! {
                _ = stop_listener => {
                    log::debug!(
                        "[session {}] Stopping heartbeat echo (stop event signaled).",
                        self.session_id
                    );
                    break;
                }
                result = self.socket.recv() => match result {
                    Ok(msg) => {
                        log::trace!("[session {}] Echoing heartbeat.", self.session_id);
                        if let Err(err) = self.socket.send(msg).await {
                            log::error!(
                                "[session {}] Failed to echo heartbeat: {}",
                                self.session_id,
                                err
                            );
                            break;
                        }
                    }
                    Err(err) => {
                        log::error!(
                            "[session {}] Error receiving heartbeat: {}",
                            self.session_id,
                            err
                        );
                        break;
                    }
                }
            }
        }

        // Hold the socket open through the grace delay so a client pinging
        // mid-shutdown does not see a connection failure.
        tokio::time::sleep(GRACE_DELAY).await;
        self.socket.close().await;
    }
}
