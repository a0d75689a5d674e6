//! Control socket server
//!
//! Accepts length-prefixed `ControlEnvelope` frames on a loopback TCP port
//! and answers each request with exactly one frame carrying the same
//! `request_id`.

use anyhow::{Context, Result};
use kiosk_shared::{codec, control_envelope::Payload, ControlAck, ControlEnvelope};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::status::AgentHandle;

pub struct ControlServer {
    listener: TcpListener,
    handle: AgentHandle,
}

impl ControlServer {
    /// Bind the listener; fails if the address is taken
    pub async fn bind(addr: &str, handle: AgentHandle) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding control socket on {}", addr))?;
        Ok(Self { listener, handle })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.local_addr() {
            info!("[CONTROL] Listening on {}", addr);
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!("[CONTROL] Connection from {}", peer);
                        let handle = self.handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(socket, handle).await {
                                warn!("[CONTROL] {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("[CONTROL] Accept failed: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("[CONTROL] Stopped");
    }
}

async fn serve_connection(mut socket: TcpStream, handle: AgentHandle) -> Result<()> {
    let mut decoder = codec::FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        while let Some(request) = decoder.decode_next()? {
            let reply = respond(&request, &handle).await;
            socket.write_all(&codec::encode(&reply)?).await?;
        }
    }
}

async fn respond(request: &ControlEnvelope, handle: &AgentHandle) -> ControlEnvelope {
    let payload = match &request.payload {
        Some(Payload::StatusRequest(_)) => Payload::Status(handle.status_report().await),
        Some(Payload::ManualRestart(_)) => match handle.trigger_manual_restart() {
            Ok(()) => {
                info!("[CONTROL] Manual restart requested");
                Payload::Ack(ControlAck::accepted("restart queued"))
            }
            Err(e) => Payload::Ack(ControlAck::rejected(e.to_string())),
        },
        Some(Payload::Status(_)) | Some(Payload::Ack(_)) => {
            Payload::Ack(ControlAck::rejected("not a request"))
        }
        None => Payload::Ack(ControlAck::rejected("empty request")),
    };
    ControlEnvelope::new(request.request_id, payload)
}
