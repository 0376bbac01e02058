pub mod attempt;
pub mod cli;
pub mod core;
pub mod errors;
pub mod schemas;
pub mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::{config::Settings, telemetry};

pub async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    crate::core::metrics::init(&settings)?;

    tracing::debug!(
        environment = %settings.runtime().environment.as_str(),
        base_url = %settings.backend().base_url.as_str(),
        "LMS exam client configured"
    );

    cli::execute(cli, &settings).await
}
