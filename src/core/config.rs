use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::path::Path;

/// API credentials for the private account stream.
///
/// Both fields are required; the recorder refuses to start without them.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: Secret<String>,
    pub api_secret: Secret<String>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for Credentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Credentials", 2)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("api_secret", "[REDACTED]")?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CredentialsHelper {
            api_key: String,
            api_secret: String,
        }

        let helper = CredentialsHelper::deserialize(deserializer)?;
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            api_secret: Secret::new(helper.api_secret),
        })
    }
}

impl Credentials {
    #[must_use]
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
        }
    }

    /// Load credentials from a JSON file with `api_key` and `api_secret`
    /// string fields.
    ///
    /// A missing or malformed file is a startup fault.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::UnreadableFile {
                path: path.display().to_string(),
                source: e,
            }
        })?;

        let credentials: Self = serde_json::from_str(&contents).map_err(|e| {
            ConfigError::InvalidConfiguration(format!(
                "credential file '{}' is malformed: {}",
                path.display(),
                e
            ))
        })?;

        credentials.validate()?;
        Ok(credentials)
    }

    /// Load credentials from the file, falling back to the environment when
    /// the file cannot be used. Reports the file error if both fail.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::from_file(path) {
            Ok(credentials) => Ok(credentials),
            Err(file_err) => Self::from_env().map_err(|_| file_err),
        }
    }

    /// Load credentials from `MEXC_API_KEY` / `MEXC_API_SECRET`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("MEXC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvironmentVariable("MEXC_API_KEY".to_string()))?;

        let api_secret = env::var("MEXC_API_SECRET")
            .map_err(|_| ConfigError::MissingEnvironmentVariable("MEXC_API_SECRET".to_string()))?;

        let credentials = Self::new(api_key, api_secret);
        credentials.validate()?;
        Ok(credentials)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "api_key must not be empty".to_string(),
            ));
        }
        if self.api_secret.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "api_secret must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get API secret (use carefully - exposes secret)
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read credential file '{path}': {source}")]
    UnreadableFile {
        path: String,
        source: std::io::Error,
    },

    #[error("missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
