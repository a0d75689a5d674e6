//! Client for an agent's loopback control socket

use anyhow::{anyhow, bail, Result};
use kiosk_shared::{
    codec::{self, FrameDecoder},
    control_envelope::Payload,
    ControlAck, ControlEnvelope, StatusReport,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub struct ControlClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    next_request_id: u64,
    reply_timeout: Duration,
}

impl ControlClient {
    pub async fn connect(addr: &str, reply_timeout: Duration) -> Result<Self> {
        let stream = timeout(reply_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow!("connecting to {} timed out", addr))??;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            next_request_id: 1,
            reply_timeout,
        })
    }

    pub async fn status(&mut self) -> Result<StatusReport> {
        let id = self.take_request_id();
        match self.request(ControlEnvelope::status_request(id)).await? {
            Payload::Status(report) => Ok(report),
            Payload::Ack(ack) => bail!("agent refused status request: {}", ack.message),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    pub async fn manual_restart(&mut self) -> Result<ControlAck> {
        let id = self.take_request_id();
        match self.request(ControlEnvelope::manual_restart(id)).await? {
            Payload::Ack(ack) => Ok(ack),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    async fn request(&mut self, request: ControlEnvelope) -> Result<Payload> {
        let request_id = request.request_id;
        self.stream.write_all(&codec::encode(&request)?).await?;

        let reply = timeout(self.reply_timeout, self.read_reply())
            .await
            .map_err(|_| anyhow!("no reply within {:?}", self.reply_timeout))??;

        if reply.request_id != request_id {
            bail!(
                "reply for request {} while waiting for {}",
                reply.request_id,
                request_id
            );
        }
        reply.payload.ok_or_else(|| anyhow!("empty reply"))
    }

    async fn read_reply(&mut self) -> Result<ControlEnvelope> {
        let mut buf = vec![0u8; 4096];
        loop {
            if let Some(reply) = self.decoder.decode_next()? {
                return Ok(reply);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                bail!("agent closed the connection");
            }
            self.decoder.extend(&buf[..n]);
        }
    }
}
