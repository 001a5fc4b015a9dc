// deckstore - generate a presentation and persist it
// Entry point and application setup

use anyhow::Context;
use deckstore::app;
use deckstore::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SLIDE_COUNT: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deckstore=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let topic = args
        .next()
        .context("usage: deckstore <topic> [n_slides]")?;
    let n_slides = match args.next() {
        Some(n) => n
            .parse::<u32>()
            .with_context(|| format!("invalid slide count: {}", n))?,
        None => DEFAULT_SLIDE_COUNT,
    };

    tracing::info!("Starting deckstore");

    let state = app::setup(AppConfig::from_env())
        .await
        .context("failed to initialize application")?;

    let presentation_id = state
        .store
        .mutate(|s| s.presentations.create_presentation(topic.clone(), None))
        .await;

    let outcome = state
        .store
        .generate_full_presentation(state.api.as_ref(), &topic, n_slides, None)
        .await;

    match &outcome {
        Ok(result) => {
            let slides = state
                .store
                .select(|s| {
                    s.generation
                        .task(&result.content_task_id)
                        .and_then(|t| t.result.clone())
                })
                .await;
            if let Some(slides) = slides {
                println!("{}", serde_json::to_string_pretty(&slides)?);
            }
            state.store.save_version("Generated presentation").await;
            tracing::info!(
                "Presentation {} generated with {} images",
                presentation_id,
                result.image_task_ids.len()
            );
        }
        Err(e) => tracing::error!("Generation failed: {}", e),
    }

    state.shutdown().await;

    outcome.map(|_| ()).context("presentation generation failed")
}
