use anyhow::Context;
use parlance_lib::config::ConfigManager;
use parlance_lib::pipeline::TranslationPipeline;
use parlance_lib::utils::{init_logging, AppError};

const DEFAULT_CONFIG_PATH: &str = "parlance.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = ConfigManager::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path))?;
    config.validate().context("invalid configuration")?;

    tracing::info!(
        config = %path,
        mode = %config.pipeline.mode,
        target = %config.link.target_language,
        "Configuration loaded"
    );

    let mut pipeline = TranslationPipeline::new(config);
    if let Err(e) = pipeline.start().await {
        let ctx = AppError::from(e).context();
        tracing::error!(code = ?ctx.code, detail = ?ctx.detail, "{}", ctx.message);
        if let Some(hint) = &ctx.recovery_hint {
            tracing::info!("{}", hint);
        }
        pipeline.stop().await;
        anyhow::bail!("{}", ctx.message);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Interrupted, shutting down");

    pipeline.stop().await;
    println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
    Ok(())
}
