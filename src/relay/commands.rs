// Command handlers for the relay CLI

use crate::relay::cipher::{PayloadCipher, PlainText, XorCipher};
use crate::relay::cli::{LoginArgs, RelayCommand, ServeArgs};
use crate::relay::client::RelayClient;
use crate::relay::logging::init_tracing;
use crate::relay::server::RelayServer;
use crate::relay::wire::{Message, MessageKind};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long one-shot commands keep printing replies before exiting
const REPLY_WINDOW: Duration = Duration::from_millis(500);

/// Execute a CLI command
pub async fn execute_command(command: RelayCommand) -> Result<()> {
    match command {
        RelayCommand::Serve(args) => handle_serve(args).await,
        RelayCommand::Send { login, message } => {
            init_tracing(None)?;
            handle_send(login, message).await
        }
        RelayCommand::Whisper {
            login,
            to,
            message,
            plain,
        } => {
            init_tracing(None)?;
            handle_whisper(login, to, message, plain).await
        }
        RelayCommand::Users { login } => {
            init_tracing(None)?;
            handle_users(login).await
        }
        RelayCommand::Upload {
            login,
            file,
            name,
            ttl,
        } => {
            init_tracing(None)?;
            handle_upload(login, file, name, ttl).await
        }
        RelayCommand::Download {
            login,
            name,
            output,
        } => {
            init_tracing(None)?;
            handle_download(login, name, output).await
        }
    }
}

async fn handle_serve(args: ServeArgs) -> Result<()> {
    let config = args.to_config()?;
    init_tracing(config.log_file.as_deref())?;

    let server = RelayServer::bind(config).await?;
    let handle = server.start()?;
    println!("Relay listening on {}", handle.local_addr());
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down relay");
    handle.shutdown().await
}

async fn handle_send(login: LoginArgs, message: String) -> Result<()> {
    let mut client = open_session(&login).await?;
    client.chat(&message).await?;
    print_replies(&mut client).await?;
    client.exit().await
}

async fn handle_whisper(login: LoginArgs, to: String, message: String, plain: bool) -> Result<()> {
    let cipher: Box<dyn PayloadCipher> = if plain {
        Box::new(PlainText)
    } else {
        Box::new(XorCipher::default())
    };

    let mut client = open_session(&login).await?;
    client.direct(&to, &message, cipher.as_ref()).await?;

    while let Ok(Ok(Some(reply))) = tokio::time::timeout(REPLY_WINDOW, client.recv()).await {
        match reply.kind {
            MessageKind::DirectMessageFail => bail!("{}: {}", to, reply.text_payload()),
            MessageKind::DirectMessage => {
                println!("Delivered to {}", reply.target);
                break;
            }
            _ => print_message(&reply),
        }
    }
    client.exit().await
}

async fn handle_users(login: LoginArgs) -> Result<()> {
    let mut client = open_session(&login).await?;
    print!("{}", client.list_users().await?);
    client.exit().await
}

async fn handle_upload(login: LoginArgs, file: PathBuf, name: Option<String>, ttl: u64) -> Result<()> {
    let content = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let name = match name {
        Some(name) => name,
        None => file_name(&file)?,
    };

    let mut client = open_session(&login).await?;
    client
        .upload(&name, &content, Duration::from_secs(ttl))
        .await?;
    // Round trip so the relay has closed the file before we hang up
    client.list_users().await?;

    if ttl > 0 {
        println!("Uploaded {} ({} bytes), deleted after {}s", name, content.len(), ttl);
    } else {
        println!("Uploaded {} ({} bytes)", name, content.len());
    }
    client.exit().await
}

async fn handle_download(login: LoginArgs, name: String, output: Option<PathBuf>) -> Result<()> {
    let mut client = open_session(&login).await?;
    let content = client.download(&name).await?;

    let output = output.unwrap_or_else(|| PathBuf::from(&name));
    tokio::fs::write(&output, &content)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;

    println!("Saved {} ({} bytes) to {:?}", name, content.len(), output);
    client.exit().await
}

/// Connect and log in, failing on rejected credentials
async fn open_session(login: &LoginArgs) -> Result<RelayClient> {
    let mut client = RelayClient::connect(login.server).await?;
    if !client.login(&login.user, &login.password).await? {
        bail!("Login rejected for {}", login.user);
    }
    tracing::debug!("Logged in to {} as {}", login.server, login.user);
    Ok(client)
}

/// Print whatever the relay sends during the reply window
async fn print_replies(client: &mut RelayClient) -> Result<()> {
    loop {
        match tokio::time::timeout(REPLY_WINDOW, client.recv()).await {
            Ok(Ok(Some(message))) => print_message(&message),
            Ok(Ok(None)) | Err(_) => return Ok(()),
            Ok(Err(e)) => return Err(e),
        }
    }
}

fn print_message(message: &Message) {
    match message.kind {
        MessageKind::KickNotice => println!("[KICK] {}", message.text_payload()),
        MessageKind::Error => println!("[ERROR] {}", message.text_payload()),
        _ => println!("[{}] {}", message.sender, message.text_payload()),
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{:?} has no usable file name", path))
}
