use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// One user's login record, stored as YAML at
/// `/etc/passwd/<username>.login`. The tag list is the source of truth for
/// everything the user may do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsEntry {
    pub password: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub fn hash_pwd(plain: &str) -> Result<String> {
    Ok(bcrypt::hash(plain, bcrypt::DEFAULT_COST)?)
}

/// Constant-time verification against a stored bcrypt hash.
pub fn check_pwd(stored: &str, plain: &str) -> bool {
    bcrypt::verify(plain, stored).unwrap_or(false)
}

/// A fresh session id: 32 random bytes, URL-safe base64.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let stored = hash_pwd("hunter2").unwrap();
        assert!(check_pwd(&stored, "hunter2"));
        assert!(!check_pwd(&stored, "hunter3"));
    }

    #[test]
    fn check_pwd_rejects_garbage_hashes() {
        assert!(!check_pwd("not-a-bcrypt-hash", "anything"));
    }

    #[test]
    fn tokens_are_distinct_and_urlsafe() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a, b);
        assert!(!a.contains('/') && !a.contains('+'));
        // 32 bytes, unpadded: 43 base64 chars
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn credentials_yaml_roundtrip() {
        let entry = CredentialsEntry {
            password: "$2b$12$abcdefghijklmnopqrstuv".into(),
            tags: vec!["pilot".into(), "user-alice".into()],
        };
        let yaml = serde_yaml::to_string(&entry).unwrap();
        let back: CredentialsEntry = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.password, entry.password);
        assert_eq!(back.tags, entry.tags);
    }
}
