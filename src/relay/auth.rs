// Credential file lookups

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Line-oriented file of `id password` pairs, re-read on every attempt
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check an id/password pair against the file
    pub async fn verify(&self, id: &str, password: &str) -> Result<bool> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read credentials from {:?}", self.path))?;

        Ok(content.lines().any(|line| {
            let mut fields = line.split_whitespace();
            matches!(
                (fields.next(), fields.next()),
                (Some(fid), Some(fpw)) if fid == id && fpw == password
            )
        }))
    }
}

/// Split a login payload into `(id, password)`
pub fn parse_login(payload: &str) -> Option<(&str, &str)> {
    let mut tokens = payload.split_whitespace();
    Some((tokens.next()?, tokens.next()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_verify_pairs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "alice secret\n\nbob hunter2\nbroken\n").unwrap();

        let store = CredentialFile::new(&path);
        assert!(store.verify("alice", "secret").await.unwrap());
        assert!(store.verify("bob", "hunter2").await.unwrap());
        assert!(!store.verify("alice", "hunter2").await.unwrap());
        assert!(!store.verify("broken", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_is_reread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "alice secret\n").unwrap();
        let store = CredentialFile::new(&path);
        assert!(!store.verify("carol", "pw").await.unwrap());

        std::fs::write(&path, "alice secret\ncarol pw\n").unwrap();
        assert!(store.verify("carol", "pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let store = CredentialFile::new(dir.path().join("nope.txt"));
        assert!(store.verify("alice", "secret").await.is_err());
    }

    #[test]
    fn test_parse_login() {
        assert_eq!(parse_login("alice secret"), Some(("alice", "secret")));
        assert_eq!(parse_login("  bob \t pw extra"), Some(("bob", "pw")));
        assert_eq!(parse_login("alice"), None);
        assert_eq!(parse_login(""), None);
    }
}
