use std::error::Error;
use std::sync::Arc;

use recipe_extractor_api::{
    config::Settings,
    fetch::HttpFetcher,
    providers::OpenAIModel,
    router, AppState, ExtractorOptions, RecipeExtractor,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::load()?;

    let fetcher = HttpFetcher::new(&settings.fetch)?;
    let model = OpenAIModel::new(&settings.openai)?;
    tracing::info!(model = %settings.openai.model, "using OpenAI structured output");

    let extractor = RecipeExtractor::new(
        Arc::new(fetcher),
        Arc::new(model),
        ExtractorOptions::from_settings(&settings),
    );
    let app = router(AppState::new(extractor));

    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
