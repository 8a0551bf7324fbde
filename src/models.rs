//! Pulls model artifacts into the LLM runtime's local cache.

use crate::WorkshopError;
use crate::retry::retry;
use log::{debug, info, warn};
use serde_json::json;
use std::time::Duration;

const PULL_ATTEMPTS: u32 = 2;
const PULL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Pulls every named model via the runtime's pull API. Each failed pull gets
/// exactly one retry; a model failing twice is recorded and the remaining
/// models are still attempted. Returns the collected failures.
pub(crate) async fn pull_models(base_url: &str, models: &[String]) -> Vec<WorkshopError> {
    pull_models_with_delay(base_url, models, PULL_RETRY_DELAY).await
}

async fn pull_models_with_delay(
    base_url: &str,
    models: &[String],
    delay: Duration,
) -> Vec<WorkshopError> {
    let client = reqwest::Client::new();
    let mut failures = Vec::new();

    for model in models {
        info!("pulling model `{model}`");
        let result = retry(PULL_ATTEMPTS, delay, || async {
            if pull_once(&client, base_url, model).await {
                Ok(())
            } else {
                Err(WorkshopError::ModelPullFailed(model.clone()))
            }
        })
        .await;

        match result {
            Ok(()) => info!("model `{model}` is available"),
            Err(e) => {
                warn!("{e}");
                failures.push(e);
            }
        }
    }

    failures
}

async fn pull_once(client: &reqwest::Client, base_url: &str, model: &str) -> bool {
    let response = match client
        .post(format!("{base_url}/api/pull"))
        .json(&json!({ "model": model, "stream": false }))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            debug!("pull request for `{model}` failed: {e}");
            return false;
        }
    };
    if !response.status().is_success() {
        debug!("pull of `{model}` answered {}", response.status());
        return false;
    }
    match response.json::<serde_json::Value>().await {
        Ok(body) => body.get("error").is_none(),
        // some runtime versions stream plain text even with stream=false
        Err(_) => true,
    }
}
