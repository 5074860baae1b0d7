use serde::Serialize;

use crate::vfs::error::{FsError, FsResult};
use crate::vfs::path;
use crate::vfs::store::FsStore;

use super::credentials::{CredentialsEntry, generate_token};

/// The privileged tag set used for reading and writing files under `/etc`
/// on behalf of the auth layer itself.
pub fn sysadmin_tags() -> Vec<String> {
    vec!["sysadmin".to_string()]
}

/// What the auth substrate determined about the caller. Flows with every
/// command a client runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthStatus {
    pub username: String,
    pub tags: Vec<String>,
    #[serde(skip)]
    pub sess_id: String,
}

/// Resolve a path under a fixed prefix, rejecting anything that escapes it.
/// Session ids and usernames come from the network; `..` must not turn them
/// into reads of arbitrary files.
fn jailed_path(prefix: &str, name: &str, suffix: &str) -> FsResult<String> {
    let clean = path::abs_path(prefix, &format!("{name}{suffix}"))?;
    if !clean.starts_with(&format!("{prefix}/")) {
        return Err(FsError::Invalid(format!(
            "path traversal: {clean} escapes {prefix}"
        )));
    }
    Ok(clean)
}

pub fn session_file_path(sess_id: &str) -> FsResult<String> {
    jailed_path("/etc/sess", sess_id, ".sess")
}

pub fn login_file_path(username: &str) -> FsResult<String> {
    jailed_path("/etc/passwd", username, ".login")
}

pub fn signup_file_path(token: &str) -> FsResult<String> {
    jailed_path("/etc/passwd", token, ".signup")
}

/// Load and parse `/etc/passwd/<username>.login`.
pub async fn load_credentials(store: &FsStore, username: &str) -> FsResult<CredentialsEntry> {
    let path = login_file_path(username)?;
    let bytes = store
        .lookup_read_all(Some(&sysadmin_tags()), &path)
        .await?;
    serde_yaml::from_slice(&bytes)
        .map_err(|e| FsError::Invalid(format!("login file contains invalid YAML: {e}")))
}

/// Persist a credentials entry for `username`.
pub async fn store_credentials(
    store: &FsStore,
    username: &str,
    entry: &CredentialsEntry,
) -> FsResult<()> {
    let yaml = serde_yaml::to_string(entry)
        .map_err(|e| FsError::Invalid(format!("cannot serialize credentials: {e}")))?;
    let passwd = store.lookup(Some(&sysadmin_tags()), "/etc/passwd").await?;
    store
        .write_file_contents(
            Some(&sysadmin_tags()),
            passwd.id,
            &format!("{username}.login"),
            yaml.as_bytes(),
        )
        .await?;
    Ok(())
}

/// Issue a session: generate a token and materialize
/// `/etc/sess/<token>.sess` whose body is the username.
pub async fn create_session(store: &FsStore, username: &str) -> FsResult<String> {
    let token =
        generate_token().map_err(|e| FsError::Backend(format!("token generation: {e}")))?;
    let sess_dir = store.lookup(Some(&sysadmin_tags()), "/etc/sess").await?;
    store
        .write_file_contents(
            Some(&sysadmin_tags()),
            sess_dir.id,
            &format!("{token}.sess"),
            username.as_bytes(),
        )
        .await?;
    Ok(token)
}

/// Resolve a presented session id to the caller's authorization: the
/// session file names the user, the user's login file carries the tags.
pub async fn resolve_session(store: &FsStore, sess_id: &str) -> FsResult<AuthStatus> {
    let sess_path = session_file_path(sess_id)?;
    let bytes = store
        .lookup_read_all(Some(&sysadmin_tags()), &sess_path)
        .await?;
    let username = String::from_utf8(bytes)
        .map_err(|_| FsError::Invalid("session file is not valid UTF-8".into()))?;

    let credentials = load_credentials(store, &username).await?;
    Ok(AuthStatus {
        username,
        tags: credentials.tags,
        sess_id: sess_id.to_string(),
    })
}

/// Delete the session file; an already-absent file counts as logged out.
pub async fn remove_session(store: &FsStore, sess_id: &str) -> FsResult<()> {
    let sess_path = session_file_path(sess_id)?;
    match store
        .remove_file(Some(&sysadmin_tags()), &sess_path, false, false)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == crate::vfs::FsErrorKind::NotExist => Ok(()),
        Err(err) => Err(err),
    }
}
