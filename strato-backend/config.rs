use crate::auth::apikeys::DEFAULT_HASH_ITERATIONS;

/// Process-wide configuration, read from the environment once at startup.
/// Nothing below this layer reaches into the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Cookie domain for session cookies; empty means host-only.
    pub domain: String,
    /// Mark session cookies `Secure`.
    pub is_https: bool,
    /// Shared secret for the telemetry ingest client on the MQTT check
    /// endpoint. Empty disables env-key authentication.
    pub mqtt_key: String,
    /// SHA-256 rounds for API key hashing.
    pub hash_iterations: u32,
    pub mongodb_uri: String,
    pub db_name: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let hash_iterations = std::env::var("HASH_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HASH_ITERATIONS);
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        Config {
            port,
            domain: env_or("DOMAIN", ""),
            is_https: std::env::var("IS_HTTPS").is_ok_and(|v| v == "TRUE"),
            mqtt_key: env_or("MQTT_KEY", ""),
            hash_iterations,
            mongodb_uri: env_or("MONGODB_URI", "mongodb://localhost:27017"),
            db_name: env_or("STRATO_DB", "strato"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // env-var tests mutate process state; keep them in one test so they
    // cannot race each other
    #[test]
    fn defaults_and_overrides() {
        // SAFETY: single-threaded within this test
        unsafe {
            std::env::remove_var("PORT");
            std::env::remove_var("IS_HTTPS");
            std::env::remove_var("HASH_ITERATIONS");
        }
        let config = Config::from_env();
        assert_eq!(config.port, 8080);
        assert!(!config.is_https);
        assert_eq!(config.hash_iterations, DEFAULT_HASH_ITERATIONS);
        assert_eq!(config.db_name, "strato");

        unsafe {
            std::env::set_var("PORT", "9999");
            std::env::set_var("IS_HTTPS", "TRUE");
            std::env::set_var("HASH_ITERATIONS", "250");
        }
        let config = Config::from_env();
        assert_eq!(config.port, 9999);
        assert!(config.is_https);
        assert_eq!(config.hash_iterations, 250);

        unsafe {
            std::env::remove_var("PORT");
            std::env::remove_var("IS_HTTPS");
            std::env::remove_var("HASH_ITERATIONS");
        }
    }
}
