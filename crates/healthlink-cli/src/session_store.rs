//! On-disk persistence of the identity session between invocations.
//!
//! The file holds bearer and refresh tokens, so it is written atomically
//! with mode `0600` and removed on sign-out.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use healthlink_core::identity::{AuthSession, Identity};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Default session file under the user's config directory.
pub fn default_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("healthlink")
        .join("session.json")
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    refresh_token: String,
    expires_at: Option<DateTime<Utc>>,
    identity: Identity,
}

impl From<&AuthSession> for StoredSession {
    fn from(session: &AuthSession) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_string(),
            refresh_token: session.refresh_token.expose_secret().to_string(),
            expires_at: session.expires_at,
            identity: session.identity.clone(),
        }
    }
}

impl From<StoredSession> for AuthSession {
    fn from(stored: StoredSession) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: SecretString::from(stored.refresh_token),
            expires_at: stored.expires_at,
            identity: stored.identity,
        }
    }
}

/// Reads the persisted session, `None` if there is none.
pub fn load(path: &Path) -> Result<Option<AuthSession>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        },
    };
    let stored: StoredSession = serde_json::from_slice(&bytes)
        .with_context(|| format!("corrupt session file {}", path.display()))?;
    Ok(Some(stored.into()))
}

/// Writes `session`, replacing any previous file.
pub fn save(path: &Path, session: &AuthSession) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let payload = serde_json::to_vec_pretty(&StoredSession::from(session))
        .context("failed to serialize session")?;
    let mut temp = tempfile::NamedTempFile::new_in(parent).context("failed to create temp file")?;
    restrict_permissions(temp.as_file())?;
    temp.write_all(&payload).context("failed to write session")?;
    temp.as_file().sync_all().context("failed to sync session")?;
    temp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

/// Removes the session file if present.
pub fn clear(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .context("failed to restrict session file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use healthlink_core::identity::{IdentityId, Role};

    use super::*;

    fn session() -> AuthSession {
        AuthSession {
            access_token: SecretString::from("access-abc"),
            refresh_token: SecretString::from("refresh-def"),
            expires_at: None,
            identity: Identity {
                id: IdentityId::new("u1"),
                email: "patient@example.com".into(),
                role: Role::Patient,
                wallet_address: None,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        assert!(load(&path).unwrap().is_none());

        save(&path, &session()).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.identity, session().identity);
        assert_eq!(loaded.refresh_token.expose_secret(), "refresh-def");

        clear(&path).unwrap();
        assert!(load(&path).unwrap().is_none());
        clear(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save(&path, &session()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(load(&path).is_err());
    }
}
