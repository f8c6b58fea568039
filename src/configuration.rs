use std::path::PathBuf;
use std::time::Duration;

use secrecy::Secret;
use serde_aux::field_attributes::deserialize_number_from_string;

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub storage: StorageSettings,
    pub rate_limit: RateLimitSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub base_url: String,
    /// Take the client address from the last `X-Forwarded-For` hop, the one
    /// appended by the single trusted proxy.
    #[serde(default)]
    pub trust_proxy: bool,
}

#[derive(serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Document,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub file: FileStorageSettings,
    pub document: DocumentStorageSettings,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct FileStorageSettings {
    pub path: PathBuf,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct DocumentStorageSettings {
    pub uri: Secret<String>,
    pub database_name: String,
    pub collection: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub connect_timeout_millis: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub operation_timeout_millis: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_millis: u64,
}

impl DocumentStorageSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_millis)
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_requests: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub window_seconds: u64,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Secret<String>,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT.");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}
