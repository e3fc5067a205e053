use anyhow::Result;
use holiday_proxy::{serve, telemetry, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init_tracing(&config.log_level, config.log_format)?;

    serve(config).await
}
