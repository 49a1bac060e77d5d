// CLI commands for the relay

use crate::relay::config::ServerConfig;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Relay CLI
#[derive(Debug, Parser)]
#[command(name = "chatrelay")]
#[command(about = "Multi-client chat relay with file sharing")]
pub struct RelayCli {
    #[command(subcommand)]
    pub command: RelayCommand,
}

/// Relay subcommands
#[derive(Debug, Subcommand)]
pub enum RelayCommand {
    /// Run the relay server
    Serve(ServeArgs),

    /// Log in and broadcast one chat line
    Send {
        #[command(flatten)]
        login: LoginArgs,

        /// Text to send; lines starting with '/' are commands
        message: String,
    },

    /// Log in and send one direct message
    Whisper {
        #[command(flatten)]
        login: LoginArgs,

        /// Recipient username
        #[arg(long)]
        to: String,

        /// Message text
        message: String,

        /// Send the body unencoded
        #[arg(long)]
        plain: bool,
    },

    /// List users currently online
    Users {
        #[command(flatten)]
        login: LoginArgs,
    },

    /// Upload a local file
    Upload {
        #[command(flatten)]
        login: LoginArgs,

        /// File to upload
        file: PathBuf,

        /// Name to store it under (default: the file's own name)
        #[arg(long)]
        name: Option<String>,

        /// Seconds until the relay deletes it (0 keeps it)
        #[arg(long, default_value = "0")]
        ttl: u64,
    },

    /// Download a stored file
    Download {
        #[command(flatten)]
        login: LoginArgs,

        /// Name of the stored file
        name: String,

        /// Where to write it (default: the same name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options for `serve`. Flags override values from `--config`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Maximum concurrent sessions
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Directory for uploaded files
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Credentials file (`id password` per line)
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    /// Build the effective configuration
    pub fn to_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        if let Some(path) = &self.credentials {
            config.credentials = path.clone();
        }
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }
        Ok(config)
    }
}

/// Where and as whom a client subcommand connects
#[derive(Debug, Clone, Args)]
pub struct LoginArgs {
    /// Relay address
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    pub server: SocketAddr,

    /// Username
    #[arg(short, long)]
    pub user: String,

    /// Password
    #[arg(short, long)]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parsing() {
        let cli = RelayCli::try_parse_from(["chatrelay", "serve", "--bind", "127.0.0.1:7000"]);
        assert!(cli.is_ok());

        let cli = RelayCli::try_parse_from([
            "chatrelay", "send", "-u", "alice", "-p", "secret", "hello there",
        ])
        .unwrap();
        match cli.command {
            RelayCommand::Send { login, message } => {
                assert_eq!(login.server.port(), 9000);
                assert_eq!(login.user, "alice");
                assert_eq!(message, "hello there");
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = RelayCli::try_parse_from(["chatrelay", "users", "-u", "alice"]);
        assert!(cli.is_err(), "password is required");
    }

    #[test]
    fn test_upload_defaults() {
        let cli = RelayCli::try_parse_from([
            "chatrelay", "upload", "-u", "bob", "-p", "pw", "notes.txt",
        ])
        .unwrap();
        match cli.command {
            RelayCommand::Upload { file, name, ttl, .. } => {
                assert_eq!(file, PathBuf::from("notes.txt"));
                assert_eq!(name, None);
                assert_eq!(ttl, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"max_sessions": 3, "storage_dir": "/srv/files"}"#).unwrap();

        let cli = RelayCli::try_parse_from([
            "chatrelay",
            "serve",
            "--config",
            path.to_str().unwrap(),
            "--max-sessions",
            "5",
        ])
        .unwrap();
        let RelayCommand::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = args.to_config().unwrap();
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.storage_dir, PathBuf::from("/srv/files"));
        assert_eq!(config.bind_addr.port(), 9000);
    }
}
