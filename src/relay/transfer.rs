// File upload and download handling
//
// Transfers run inside the connection task that requested them, so a slow
// transfer only holds up its own connection. Chunks are written and sent in
// the order they arrive.

use crate::relay::error::TransferError;
use crate::relay::wire::{Message, MessageKind, DATA_LEN, SERVER_NAME};
use anyhow::{Context, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

/// Map a client-supplied name onto the flat storage directory.
/// Anything other than a single plain file name is rejected.
pub fn resolve_storage_path(storage_dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => Ok(storage_dir.join(file)),
        _ => Err(TransferError::BadFileName(name.to_string())),
    }
}

/// Parsed `<filename> <size> [ttl]` upload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub filename: String,
    pub declared_size: u64,
    /// Zero means the file is kept
    pub ttl: Duration,
}

impl UploadRequest {
    pub fn parse(payload: &str) -> Result<Self, TransferError> {
        let bad = || TransferError::BadUploadFormat(payload.to_string());
        let mut tokens = payload.split_whitespace();

        let filename = tokens.next().ok_or_else(bad)?;
        let declared_size = tokens
            .next()
            .and_then(|t| t.parse::<u64>().ok())
            .ok_or_else(bad)?;
        // An unreadable or non-positive ttl means "keep forever"
        let ttl_secs = tokens
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0) as u64;

        Ok(Self {
            filename: filename.to_string(),
            declared_size,
            ttl: Duration::from_secs(ttl_secs),
        })
    }
}

/// An upload in progress on one connection
#[derive(Debug)]
pub struct Upload {
    request: UploadRequest,
    path: PathBuf,
    writer: BufWriter<File>,
    received: u64,
}

/// Result of a finished upload
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub filename: String,
    pub path: PathBuf,
    pub received: u64,
    pub declared_size: u64,
    pub ttl: Duration,
}

impl Upload {
    /// Validate the request and open the destination for writing
    pub async fn begin(storage_dir: &Path, payload: &str) -> Result<Self, TransferError> {
        let request = UploadRequest::parse(payload)?;
        tracing::info!(
            "File upload request: {} ({} bytes, ttl {}s)",
            request.filename,
            request.declared_size,
            request.ttl.as_secs()
        );

        let path = resolve_storage_path(storage_dir, &request.filename)?;
        let file = File::create(&path)
            .await
            .map_err(|source| TransferError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            request,
            path,
            writer: BufWriter::new(file),
            received: 0,
        })
    }

    /// Append one chunk
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.received += bytes.len() as u64;
        Ok(())
    }

    pub fn filename(&self) -> &str {
        &self.request.filename
    }

    /// Flush and close the file
    pub async fn finish(mut self) -> io::Result<CompletedUpload> {
        let flushed = self.writer.flush().await;

        if self.received != self.request.declared_size {
            tracing::warn!(
                "Upload of {} ended at {} bytes, {} were declared",
                self.request.filename,
                self.received,
                self.request.declared_size
            );
        }
        tracing::info!(
            "File upload finished: {} ({} bytes received)",
            self.request.filename,
            self.received
        );

        flushed?;
        Ok(CompletedUpload {
            filename: self.request.filename,
            path: self.path,
            received: self.received,
            declared_size: self.request.declared_size,
            ttl: self.request.ttl,
        })
    }
}

/// Open a stored file for download
pub async fn open_download(storage_dir: &Path, payload: &str) -> Result<(String, File), TransferError> {
    let name = payload.trim();
    tracing::info!("File download request: {}", name);

    let path = resolve_storage_path(storage_dir, name)?;
    match File::open(&path).await {
        Ok(file) => Ok((name.to_string(), file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TransferError::NoFile(name.to_string())),
        Err(source) => Err(TransferError::Open { path, source }),
    }
}

/// Send FileReady, the file in chunks, then FileEnd. Returns the bytes sent.
pub async fn stream_download(
    name: &str,
    mut file: File,
    out: &mpsc::Sender<Message>,
) -> Result<u64> {
    out.send(Message::new(MessageKind::FileReady, SERVER_NAME))
        .await
        .context("Connection closed before download started")?;

    let mut buf = [0u8; DATA_LEN];
    let mut sent = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("Failed to read {}", name))?;
        if n == 0 {
            break;
        }
        out.send(Message::chunk(SERVER_NAME, &buf[..n])?)
            .await
            .context("Connection closed during download")?;
        sent += n as u64;
    }

    out.send(Message::notice(MessageKind::FileEnd, name))
        .await
        .context("Connection closed before download finished")?;

    tracing::info!("File download finished: {} ({} bytes sent)", name, sent);
    Ok(sent)
}
