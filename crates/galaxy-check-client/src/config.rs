use crate::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_PREFIX: &str = "api/galaxy";

/// Where the service lives and how to log in to it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_validate_certs")]
    pub validate_certs: bool,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

fn default_validate_certs() -> bool {
    true
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_owned()
}

impl ServiceEndpoint {
    pub fn new(url: &str, username: &str, password: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
            validate_certs: true,
            api_prefix: default_api_prefix(),
        }
    }

    #[must_use]
    pub fn with_validate_certs(mut self, validate: bool) -> Self {
        self.validate_certs = validate;
        self
    }

    #[must_use]
    pub fn with_api_prefix(mut self, prefix: &str) -> Self {
        self.api_prefix = prefix.trim_matches('/').to_owned();
        self
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)?;
        let mut endpoint: Self = serde_json::from_str(&content)
            .map_err(|e| ClientError::Config(format!("invalid endpoint config: {e}")))?;
        endpoint.url = endpoint.url.trim_end_matches('/').to_owned();
        endpoint.api_prefix = endpoint.api_prefix.trim_matches('/').to_owned();
        Ok(endpoint)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fail early on values that cannot produce a usable session.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "server URL must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        if self.username.is_empty() {
            return Err(ClientError::Config("username is required".to_owned()));
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"********")
            .field("validate_certs", &self.validate_certs)
            .field("api_prefix", &self.api_prefix)
            .finish()
    }
}

pub fn default_config_path() -> Result<PathBuf, ClientError> {
    let home = std::env::var("HOME").map_err(|_| ClientError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/galaxy-check/endpoint.json"))
}

/// Import polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(secs),
            ..Self::default()
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.json");

        let endpoint = ServiceEndpoint::new("https://galaxy.example.com", "admin", "s3cret")
            .with_validate_certs(false)
            .with_api_prefix("/api/hub/");
        endpoint.save(&path).unwrap();

        let loaded = ServiceEndpoint::load(&path).unwrap();
        assert_eq!(loaded.url, "https://galaxy.example.com");
        assert_eq!(loaded.username, "admin");
        assert_eq!(loaded.password, "s3cret");
        assert!(!loaded.validate_certs);
        assert_eq!(loaded.api_prefix, "api/hub");
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.json");
        std::fs::write(
            &path,
            r#"{"url": "http://localhost:8080/", "username": "a", "password": "b"}"#,
        )
        .unwrap();

        let loaded = ServiceEndpoint::load(&path).unwrap();
        assert_eq!(loaded.url, "http://localhost:8080");
        assert!(loaded.validate_certs);
        assert_eq!(loaded.api_prefix, DEFAULT_API_PREFIX);
    }

    #[test]
    fn config_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ServiceEndpoint::load(&path),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn config_strips_trailing_slash() {
        let endpoint = ServiceEndpoint::new("https://example.com/", "u", "p");
        assert_eq!(endpoint.url, "https://example.com");
    }

    #[test]
    fn debug_hides_password() {
        let endpoint = ServiceEndpoint::new("https://example.com", "u", "hunter2");
        let rendered = format!("{endpoint:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn validate_requires_scheme_and_username() {
        assert!(ServiceEndpoint::new("galaxy.local", "u", "p")
            .validate()
            .is_err());
        assert!(ServiceEndpoint::new("http://galaxy.local", "", "p")
            .validate()
            .is_err());
        assert!(ServiceEndpoint::new("http://galaxy.local", "u", "p")
            .validate()
            .is_ok());
    }

    #[test]
    fn poll_settings_default_cadence() {
        let settings = PollSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.timeout, Duration::from_secs(120));
        assert_eq!(
            PollSettings::with_timeout_secs(4).timeout,
            Duration::from_secs(4)
        );
    }
}
