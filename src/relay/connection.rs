// Per-connection task: framing, transfers and hand-off to the hub

use crate::relay::error::{RelayError, TransferError};
use crate::relay::hub::HubHandle;
use crate::relay::scheduler::SchedulerHandle;
use crate::relay::session::SessionId;
use crate::relay::transfer::{open_download, stream_download, Upload};
use crate::relay::wire::{FrameCodec, Message, MessageKind, SERVER_NAME};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};

/// How long a closing connection may spend flushing queued frames
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a connection task needs from the server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub hub: HubHandle,
    pub scheduler: SchedulerHandle,
    pub storage_dir: PathBuf,
    pub outbound_queue: usize,
}

/// Serve one accepted socket until it closes or the hub closes it
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> Result<()> {
    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.outbound_queue);
    let (closer_tx, mut closer_rx) = oneshot::channel();

    let session = match ctx.hub.connect(peer, outbound_tx.clone(), closer_tx).await {
        Ok(session) => session,
        Err(RelayError::ServerFull { .. }) => {
            let mut framed = FramedWrite::new(stream, FrameCodec);
            framed
                .send(Message::notice(MessageKind::Error, "SERVER_FULL"))
                .await?;
            framed.close().await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, FrameCodec);
    let writer = tokio::spawn(write_frames(write_half, outbound_rx));

    let mut conn = Connection {
        session,
        ctx: ctx.clone(),
        outbound: outbound_tx,
        upload: None,
    };

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(message)) => {
                    if let Err(e) = conn.handle_frame(message).await {
                        tracing::warn!("Session {}: {:#}", session, e);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Protocol error from {}: {}", peer, e);
                    break;
                }
                None => break,
            },
            _ = &mut closer_rx => {
                tracing::debug!("Session {} closed by the relay", session);
                break;
            }
        }
    }

    // A connection lost mid-upload keeps whatever arrived
    conn.finish_upload().await;
    ctx.hub.disconnected(session);
    drop(conn);

    if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        tracing::warn!("Session {} did not flush in time", session);
    }
    tracing::info!("Client {} ({}) disconnected", peer, session);
    Ok(())
}

/// Drain the outbound queue onto the socket, then shut down the write side
async fn write_frames(write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Message>) {
    let mut sink = FramedWrite::new(write_half, FrameCodec);
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            tracing::debug!("Write failed: {}", e);
            return;
        }
    }
    let _ = sink.close().await;
}

struct Connection {
    session: SessionId,
    ctx: Arc<ConnectionContext>,
    outbound: mpsc::Sender<Message>,
    upload: Option<Upload>,
}

impl Connection {
    async fn handle_frame(&mut self, message: Message) -> Result<()> {
        match (self.upload.is_some(), message.kind) {
            (true, MessageKind::FileData) => self.write_chunk(&message).await,
            (true, MessageKind::FileEnd) => {
                self.finish_upload().await;
                Ok(())
            }
            (true, MessageKind::FileUpload | MessageKind::FileDownload) => {
                self.send_error(&TransferError::InProgress).await
            }
            (false, MessageKind::FileUpload) => self.begin_upload(&message).await,
            (false, MessageKind::FileDownload) => self.download(&message).await,
            _ => self.ctx.hub.inbound(self.session, message),
        }
    }

    async fn begin_upload(&mut self, message: &Message) -> Result<()> {
        match Upload::begin(&self.ctx.storage_dir, &message.text_payload()).await {
            Ok(upload) => {
                tracing::info!("Session {} uploading {}", self.session, upload.filename());
                self.upload = Some(upload);
                self.send(Message::new(MessageKind::FileReady, SERVER_NAME))
                    .await
            }
            Err(e) => {
                tracing::warn!("Upload rejected for session {}: {}", self.session, e);
                self.send_error(&e).await
            }
        }
    }

    async fn write_chunk(&mut self, message: &Message) -> Result<()> {
        let Some(upload) = self.upload.as_mut() else {
            return Ok(());
        };
        if let Err(e) = upload.write_chunk(message.chunk_payload()).await {
            tracing::warn!("Writing {} failed: {}", upload.filename(), e);
            self.finish_upload().await;
            self.send(Message::notice(MessageKind::Error, "FILE_WRITE_FAIL"))
                .await?;
        }
        Ok(())
    }

    /// Close the current upload, if any, and schedule its deletion
    async fn finish_upload(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };

        match upload.finish().await {
            Ok(done) if !done.ttl.is_zero() => {
                if let Err(e) = self.ctx.scheduler.schedule(done.path, done.ttl).await {
                    tracing::error!("Could not schedule deletion of {}: {:#}", done.filename, e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Closing upload failed: {}", e),
        }
    }

    async fn download(&mut self, message: &Message) -> Result<()> {
        match open_download(&self.ctx.storage_dir, &message.text_payload()).await {
            Ok((name, file)) => {
                stream_download(&name, file, &self.outbound).await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Download rejected for session {}: {}", self.session, e);
                self.send_error(&e).await
            }
        }
    }

    async fn send_error(&self, error: &TransferError) -> Result<()> {
        self.send(Message::notice(MessageKind::Error, error.code())).await
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("connection closed"))
    }
}
