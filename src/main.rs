use anyhow::Context;
use newsletter::configuration::get_configuration;
use newsletter::startup::Application;
use newsletter::telemetry::{init_subscriber, shutdown_telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = get_configuration().context("Failed to read configuration.")?;
    init_subscriber(
        "newsletter".into(),
        "info".into(),
        std::io::stdout,
        &configuration.telemetry,
    )?;

    let telemetry = configuration.telemetry.clone();
    let application = Application::build(configuration).await?;
    let outcome = application.run_until_stopped().await;
    shutdown_telemetry(&telemetry);
    outcome
}
