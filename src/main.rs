use anyhow::{Context, Result};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = face_sentiment_worker::config::Settings::from_env().context("load settings")?;
    face_sentiment_worker::logging::init(&settings.log_level);

    face_sentiment_worker::app::run(settings).await
}
