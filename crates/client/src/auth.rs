//! Key lookup and the authentication exchange.

use std::fmt;
use std::path::{Path, PathBuf};

use corelink_domain::config::AuthLevel;
use corelink_domain::trace::TraceEvent;
use corelink_protocol::{AuthRequest, ClientInfo, KeyInfo};
use corelink_rpc::RpcError;

use crate::caps::{AuthPromise, DaemonServer, DaemonSession};
use crate::types::ClientError;

/// Secret read from a key file. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(String);

impl AuthKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(<redacted>)")
    }
}

/// Path of the key granting `level`, if any.
pub fn key_path(info: &KeyInfo, level: AuthLevel) -> Option<&str> {
    match level {
        AuthLevel::None => None,
        AuthLevel::Basic => Some(&info.basic_key_path),
        AuthLevel::Admin => Some(&info.auth_key_path),
    }
}

/// Read the key file verbatim.
pub async fn read_key(path: &Path) -> Result<AuthKey, ClientError> {
    match tokio::fs::read_to_string(path).await {
        Ok(secret) => Ok(AuthKey(secret)),
        Err(source) => Err(ClientError::KeyUnreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Issue an authentication request for `level` with an already read key.
pub(crate) fn request(
    server: &DaemonServer,
    level: AuthLevel,
    key: &AuthKey,
    info: ClientInfo,
) -> Result<Option<AuthPromise>, ClientError> {
    let request = AuthRequest {
        key: key.expose().to_string(),
        info,
    };
    Ok(server.authenticate(level, &request)?)
}

/// Result of a successful handshake at a level other than `none`.
#[derive(Debug)]
pub(crate) struct Authenticated {
    pub session: DaemonSession,
    pub key: AuthKey,
}

/// Run the full authentication exchange.
///
/// `Ok(None)` means "not authenticated" (level `none`). An unreadable key
/// or a rejected request is returned as a permanent error; a lost
/// connection stays transient.
pub(crate) async fn authenticate(
    server: &DaemonServer,
    level: AuthLevel,
    info: ClientInfo,
) -> Result<Option<Authenticated>, ClientError> {
    if !level.requires_key() {
        return Ok(None);
    }

    let key_info = server.key().await?;
    let path = match key_path(&key_info, level) {
        Some(p) => PathBuf::from(p),
        None => return Ok(None),
    };
    tracing::debug!(level = %level, path = %path.display(), "reading auth key");

    let key = match read_key(&path).await {
        Ok(k) => k,
        Err(e) => {
            TraceEvent::KeyUnreadable {
                path: path.display().to_string(),
                error: e.to_string(),
            }
            .emit();
            tracing::error!(
                path = %path.display(),
                "could not read key file; this usually means insufficient permissions"
            );
            return Err(e);
        }
    };

    let promise = match request(server, level, &key, info)? {
        Some(p) => p,
        None => return Ok(None),
    };

    match promise.session().await {
        Ok(session) => {
            TraceEvent::Authenticated {
                level: level.to_string(),
            }
            .emit();
            Ok(Some(Authenticated { session, key }))
        }
        Err(RpcError::Fault(fault)) => {
            TraceEvent::AuthRejected {
                level: level.to_string(),
                error: fault.message.clone(),
            }
            .emit();
            tracing::error!(level = %level, error = %fault, "invalid auth key");
            Err(ClientError::AuthRejected {
                level: level.to_string(),
                reason: fault.message,
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn key_info() -> KeyInfo {
        KeyInfo {
            basic_key_path: "/tmp/basic.key".into(),
            auth_key_path: "/tmp/auth.key".into(),
        }
    }

    #[test]
    fn path_follows_level() {
        let info = key_info();
        assert_eq!(key_path(&info, AuthLevel::None), None);
        assert_eq!(key_path(&info, AuthLevel::Basic), Some("/tmp/basic.key"));
        assert_eq!(key_path(&info, AuthLevel::Admin), Some("/tmp/auth.key"));
    }

    #[test]
    fn debug_redacts_secret() {
        let key = AuthKey::new("hunter2");
        assert_eq!(format!("{key:?}"), "AuthKey(<redacted>)");
    }

    #[tokio::test]
    async fn reads_key_verbatim() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"s3cret\n").unwrap();
        let key = read_key(file.path()).await.unwrap();
        assert_eq!(key.expose(), "s3cret\n");
    }

    #[tokio::test]
    async fn missing_key_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_key(&dir.path().join("absent.key")).await.unwrap_err();
        assert!(matches!(err, ClientError::KeyUnreadable { .. }));
        assert_eq!(err.recovery(), crate::types::Recovery::Permanent);
    }
}
