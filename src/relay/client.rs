// Minimal relay client used by the CLI and the integration tests

use crate::relay::cipher::PayloadCipher;
use crate::relay::wire::{FrameCodec, Message, MessageKind, DATA_LEN};
use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

/// How long request/response helpers wait for the relay
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection to a relay server
pub struct RelayClient {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    /// Frames that arrived while waiting for a specific reply
    backlog: VecDeque<Message>,
    username: String,
}

impl RelayClient {
    /// Connect without logging in
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FramedRead::new(read_half, FrameCodec),
            writer: FramedWrite::new(write_half, FrameCodec),
            backlog: VecDeque::new(),
            username: String::new(),
        })
    }

    /// Name used as the sender of outgoing frames
    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.writer
            .send(message)
            .await
            .context("Failed to send frame")
    }

    /// Next frame from the relay, or `None` once the connection closed
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(Some(message));
        }
        self.read_frame().await
    }

    /// Next frame, failing if none arrives within `timeout`
    pub async fn expect(&mut self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Ok(Some(message))) => Ok(message),
            Ok(Ok(None)) => bail!("Connection closed by relay"),
            Ok(Err(e)) => Err(e),
            Err(_) => bail!("No frame within {:?}", timeout),
        }
    }

    /// Log in. Returns whether the relay accepted the credentials.
    pub async fn login(&mut self, id: &str, password: &str) -> Result<bool> {
        self.send(Message::text(
            MessageKind::Login,
            id,
            &format!("{} {}", id, password),
        ))
        .await?;

        let reply = self
            .wait_for(|kind| matches!(kind, MessageKind::LoginOk | MessageKind::LoginFail))
            .await?;
        if reply.kind == MessageKind::LoginOk {
            self.username = id.to_string();
            Ok(true)
        } else {
            tracing::debug!("Login refused: {}", reply.text_payload());
            Ok(false)
        }
    }

    /// Broadcast a chat line, or run a `/command`
    pub async fn chat(&mut self, text: &str) -> Result<()> {
        let message = Message::text(MessageKind::Chat, &self.username, text);
        self.send(message).await
    }

    /// Send a direct message encoded with `cipher`
    pub async fn direct(&mut self, to: &str, text: &str, cipher: &dyn PayloadCipher) -> Result<()> {
        let message = Message::direct(&self.username, to, &cipher.encode(text.as_bytes()));
        self.send(message).await
    }

    /// Ask the relay who is online
    pub async fn list_users(&mut self) -> Result<String> {
        self.send(Message::new(MessageKind::ListRequest, &self.username))
            .await?;
        let reply = self
            .wait_for(|kind| kind == MessageKind::ListResponse)
            .await?;
        Ok(reply.text_payload())
    }

    /// Say goodbye and close the write side
    pub async fn exit(mut self) -> Result<()> {
        self.send(Message::new(MessageKind::Exit, &self.username))
            .await?;
        self.writer.close().await.context("Failed to close connection")
    }

    /// Store `bytes` on the relay as `name`. A zero `ttl` keeps the file.
    ///
    /// The relay does not acknowledge the end of an upload. Any later request
    /// on this connection is handled after the file has been closed.
    pub async fn upload(&mut self, name: &str, bytes: &[u8], ttl: Duration) -> Result<()> {
        let request = format!("{} {} {}", name, bytes.len(), ttl.as_secs());
        self.send(Message::text(MessageKind::FileUpload, &self.username, &request))
            .await?;

        let reply = self
            .wait_for(|kind| matches!(kind, MessageKind::FileReady | MessageKind::Error))
            .await?;
        if reply.kind == MessageKind::Error {
            bail!("Upload of {} refused: {}", name, reply.text_payload());
        }

        for chunk in bytes.chunks(DATA_LEN) {
            let message = Message::chunk(&self.username, chunk)?;
            self.send(message).await?;
        }
        self.send(Message::text(MessageKind::FileEnd, &self.username, name))
            .await?;

        tracing::debug!("Uploaded {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    /// Fetch a stored file
    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        self.send(Message::text(MessageKind::FileDownload, &self.username, name))
            .await?;

        let reply = self
            .wait_for(|kind| matches!(kind, MessageKind::FileReady | MessageKind::Error))
            .await?;
        if reply.kind == MessageKind::Error {
            bail!("Download of {} refused: {}", name, reply.text_payload());
        }

        let mut content = Vec::new();
        loop {
            let message = self
                .wait_for(|kind| matches!(kind, MessageKind::FileData | MessageKind::FileEnd))
                .await?;
            match message.kind {
                MessageKind::FileData => content.extend_from_slice(message.chunk_payload()),
                _ => break,
            }
        }

        tracing::debug!("Downloaded {} ({} bytes)", name, content.len());
        Ok(content)
    }

    async fn read_frame(&mut self) -> Result<Option<Message>> {
        match self.reader.next().await {
            Some(frame) => Ok(Some(frame.context("Malformed frame from relay")?)),
            None => Ok(None),
        }
    }

    /// Read until a frame of a wanted kind arrives, parking everything else
    async fn wait_for(&mut self, wanted: impl Fn(MessageKind) -> bool) -> Result<Message> {
        tokio::time::timeout(REPLY_TIMEOUT, self.read_until(wanted))
            .await
            .context("Timed out waiting for the relay")?
    }

    async fn read_until(&mut self, wanted: impl Fn(MessageKind) -> bool) -> Result<Message> {
        loop {
            match self.read_frame().await? {
                Some(message) if wanted(message.kind) => return Ok(message),
                Some(message) => self.backlog.push_back(message),
                None => bail!("Connection closed by relay"),
            }
        }
    }
}
