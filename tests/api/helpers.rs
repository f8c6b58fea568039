use std::path::PathBuf;

use once_cell::sync::Lazy;
use newsletter::configuration::{get_configuration, Settings, StorageBackend};
use newsletter::startup::Application;
use newsletter::telemetry::init_subscriber;
use tempfile::TempDir;

static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();
    let configuration = get_configuration().expect("Failed to read configuration.");

    if std::env::var("TEST_LOG").is_ok() {
        init_subscriber(
            subscriber_name,
            default_filter_level,
            std::io::stdout,
            &configuration.telemetry,
        )
        .expect("Failed to initialize tracing.");
    } else {
        init_subscriber(
            subscriber_name,
            default_filter_level,
            std::io::sink,
            &configuration.telemetry,
        )
        .expect("Failed to initialize tracing.");
    };
});

pub struct TestApp {
    pub address: String,
    pub subscribers_file: PathBuf,
    pub api_client: reqwest::Client,
    // Removed together with the subscriber file when the app is dropped.
    _data_dir: TempDir,
}

impl TestApp {
    pub async fn post_newsletter(&self, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/newsletter", &self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_newsletter_raw(&self, body: &'static str) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/newsletter", &self.address))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_newsletter(&self, email: &str) -> reqwest::Response {
        self.api_client
            .get(&format!("{}/newsletter/{}", &self.address, email))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete_newsletter(&self, email: &str) -> reqwest::Response {
        self.api_client
            .delete(&format!("{}/newsletter/{}", &self.address, email))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub fn stored_subscribers(&self) -> Vec<String> {
        let contents =
            std::fs::read(&self.subscribers_file).expect("Failed to read the subscriber file.");
        serde_json::from_slice(&contents).expect("Subscriber file is not an array of strings.")
    }
}

/// Test configuration: random port, a private subscriber file, no rate
/// limiting.
pub fn test_configuration(data_dir: &TempDir) -> Settings {
    let mut c = get_configuration().expect("Failed to read configuration.");
    c.application.host = "127.0.0.1".to_string();
    c.application.port = 0;
    c.storage.backend = StorageBackend::File;
    c.storage.file.path = data_dir.path().join("subscribers.json");
    c.rate_limit.enabled = false;
    c.telemetry.enabled = false;
    c
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut Settings)) -> TestApp {
    Lazy::force(&TRACING);

    let data_dir = TempDir::new().expect("Failed to create a data directory.");
    let mut configuration = test_configuration(&data_dir);
    customize(&mut configuration);
    let subscribers_file = configuration.storage.file.path.clone();

    let application = Application::build(configuration)
        .await
        .expect("Failed to build application.");
    let port = application.port();
    tokio::spawn(application.run_until_stopped());

    TestApp {
        address: format!("http://127.0.0.1:{port}"),
        subscribers_file,
        api_client: reqwest::Client::new(),
        _data_dir: data_dir,
    }
}
