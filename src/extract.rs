use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::Settings;
use crate::fetch::{page_to_prompt_text, FetchError, PageFetcher};
use crate::models::Recipe;
use crate::providers::{
    build_correction_prompt, build_user_prompt, recipe_schema, ChatMessage, ModelError,
    ModelRequest, StructuredModel, RECIPE_EXTRACTION_PROMPT, RECIPE_SCHEMA_NAME,
};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("Failed to fetch URL: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to extract recipe: {0}")]
    Model(#[from] ModelError),
    #[error("Failed to extract recipe: output did not match the recipe schema after {attempts} attempts: {reason}")]
    MalformedOutput { attempts: u32, reason: String },
    #[error("Failed to process page: {0}")]
    PageProcessing(String),
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Re-asks after a malformed answer. Total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Characters of cleaned page text sent to the model.
    pub content_limit: usize,
    pub fetch_timeout: Duration,
    pub model_timeout: Duration,
}

impl ExtractorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.extraction.max_retries,
            content_limit: settings.extraction.content_limit,
            fetch_timeout: Duration::from_secs(settings.fetch.timeout_secs),
            model_timeout: Duration::from_secs(settings.openai.timeout_secs),
        }
    }
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Fetches a page and turns it into a validated [`Recipe`]. Holds no
/// per-request state; one instance serves all requests.
pub struct RecipeExtractor {
    fetcher: Arc<dyn PageFetcher>,
    model: Arc<dyn StructuredModel>,
    options: ExtractorOptions,
}

impl RecipeExtractor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        model: Arc<dyn StructuredModel>,
        options: ExtractorOptions,
    ) -> Self {
        Self {
            fetcher,
            model,
            options,
        }
    }

    pub async fn extract(&self, url: &Url) -> Result<Recipe, ExtractionError> {
        let page = tokio::time::timeout(self.options.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout(self.options.fetch_timeout))??;

        // HTML parsing is CPU-bound and grows with nesting depth.
        let limit = self.options.content_limit;
        let content = tokio::task::spawn_blocking(move || page_to_prompt_text(&page, limit))
            .await
            .map_err(|e| ExtractionError::PageProcessing(e.to_string()))?;
        tracing::debug!(url = %url, chars = content.chars().count(), "page cleaned");

        self.extract_from_content(url, &content).await
    }

    async fn extract_from_content(&self, url: &Url, content: &str) -> Result<Recipe, ExtractionError> {
        let attempts = self.options.max_retries + 1;
        let mut messages = vec![
            ChatMessage::system(RECIPE_EXTRACTION_PROMPT),
            ChatMessage::user(build_user_prompt(content)),
        ];
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let request = ModelRequest {
                messages: messages.clone(),
                schema_name: RECIPE_SCHEMA_NAME,
                schema: recipe_schema(),
            };

            let raw = self.call_model(&request).await?;

            match parse_recipe(&raw, url) {
                Ok(recipe) => {
                    tracing::info!(
                        url = %url,
                        attempt,
                        ingredients = recipe.ingredients.len(),
                        steps = recipe.steps.len(),
                        "recipe extracted"
                    );
                    return Ok(recipe);
                }
                Err(reason) => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        attempts,
                        reason = %reason,
                        "model output rejected"
                    );
                    messages.push(ChatMessage::assistant(raw));
                    messages.push(ChatMessage::user(build_correction_prompt(&reason)));
                    last_reason = reason;
                }
            }
        }

        Err(ExtractionError::MalformedOutput {
            attempts,
            reason: last_reason,
        })
    }

    async fn call_model(&self, request: &ModelRequest) -> Result<String, ModelError> {
        tracing::debug!(provider = self.model.provider_name(), "requesting structured output");
        tokio::time::timeout(self.options.model_timeout, self.model.complete(request))
            .await
            .map_err(|_| ModelError::Timeout(self.options.model_timeout))?
    }
}

// ── Output checking ──────────────────────────────────────────────────────────

/// Parses model output into a recipe stamped with `source_url`, or explains
/// why it was rejected.
fn parse_recipe(raw: &str, source_url: &Url) -> Result<Recipe, String> {
    let json = strip_code_fence(raw);
    let mut recipe: Recipe =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON for recipe schema: {}", e))?;
    recipe.source_url = source_url.as_str().to_string();
    recipe.validate().map_err(|problems| problems.join("; "))?;
    Ok(recipe)
}

/// Models sometimes wrap JSON in a Markdown code fence despite the schema.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Page;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const VALID: &str = r#"{
        "title": "Tomato Soup",
        "ingredients": [
            {"name": "tomatoes", "amount": "6", "unit": null, "notes": "ripe"},
            {"name": "salt", "amount": "1/2", "unit": "tsp", "notes": null}
        ],
        "steps": [
            {"step_number": 1, "instruction": "Chop the tomatoes."},
            {"step_number": 2, "instruction": "Simmer for 20 minutes.", "duration": "20 minutes"},
            {"step_number": 3, "instruction": "Blend and season."}
        ],
        "tags": ["soup"]
    }"#;

    struct StaticFetcher(Result<Page, u16>);

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
            match &self.0 {
                Ok(page) => Ok(Page {
                    url: url.clone(),
                    ..page.clone()
                }),
                Err(status) => Err(FetchError::Status(*status)),
            }
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl PageFetcher for SlowFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Page, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(FetchError::Request("unreachable".to_string()))
        }
    }

    /// Replays scripted answers in order and records what it was sent.
    #[derive(Default)]
    struct ScriptedModel {
        answers: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: AtomicUsize,
        last_messages: Mutex<Vec<ChatMessage>>,
        delay: Option<Duration>,
    }

    impl ScriptedModel {
        fn new(answers: Vec<Result<String, ModelError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl StructuredModel for ScriptedModel {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock().unwrap() = request.messages.clone();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::EmptyResponse("script exhausted".to_string())))
        }
    }

    fn html_page() -> Page {
        Page {
            url: Url::parse("https://example.com/").unwrap(),
            content_type: "text/html".to_string(),
            body: "<html><body><h1>Tomato Soup</h1><p>6 tomatoes</p></body></html>".to_string(),
        }
    }

    fn extractor(fetcher: impl PageFetcher + 'static, model: Arc<ScriptedModel>) -> RecipeExtractor {
        RecipeExtractor::new(Arc::new(fetcher), model, ExtractorOptions::default())
    }

    fn url() -> Url {
        Url::parse("https://example.com/recipe-page").unwrap()
    }

    #[tokio::test]
    async fn extracts_and_stamps_source_url() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(VALID.to_string())]));
        let recipe = extractor(StaticFetcher(Ok(html_page())), model.clone())
            .extract(&url())
            .await
            .unwrap();

        assert_eq!(recipe.source_url, "https://example.com/recipe-page");
        assert_eq!(recipe.ingredients.len(), 2);
        assert_eq!(recipe.steps[2].step_number, 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let messages = model.last_messages.lock().unwrap();
        assert!(messages[1].content.contains("Tomato Soup\n6 tomatoes"));
    }

    #[tokio::test]
    async fn malformed_output_is_retried_with_feedback() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("not json at all".to_string()),
            Ok(VALID.to_string()),
        ]));
        let recipe = extractor(StaticFetcher(Ok(html_page())), model.clone())
            .extract(&url())
            .await
            .unwrap();

        assert_eq!(recipe.title.as_deref(), Some("Tomato Soup"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let messages = model.last_messages.lock().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].content, "not json at all");
        assert!(messages[3].content.contains("invalid JSON"));
    }

    #[tokio::test]
    async fn invalid_step_order_counts_as_malformed() {
        let bad_steps = r#"{"ingredients": [], "steps": [
            {"step_number": 2, "instruction": "Serve."},
            {"step_number": 1, "instruction": "Cook."}
        ]}"#;
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(bad_steps.to_string()),
            Ok(bad_steps.to_string()),
            Ok(bad_steps.to_string()),
        ]));
        let err = extractor(StaticFetcher(Ok(html_page())), model.clone())
            .extract(&url())
            .await
            .unwrap_err();

        match err {
            ExtractionError::MalformedOutput { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("step_number"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn provider_errors_are_not_retried() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(ModelError::Api {
                status: 500,
                message: "overloaded".to_string(),
            }),
            Ok(VALID.to_string()),
        ]));
        let err = extractor(StaticFetcher(Ok(html_page())), model.clone())
            .extract(&url())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Model(ModelError::Api { status: 500, .. })));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_skips_model() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(VALID.to_string())]));
        let err = extractor(StaticFetcher(Err(503)), model.clone())
            .extract(&url())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Fetch(FetchError::Status(503))));
        assert!(err.to_string().starts_with("Failed to fetch URL"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn long_page_keeps_image_candidates() {
        let mut body = String::from(
            r#"<html><head><meta property="og:image" content="/img/soup-hero.jpg"></head><body><h1>Tomato Soup</h1>"#,
        );
        for i in 0..2000 {
            body.push_str(&format!("<p>Reader comment number {i} says this soup is lovely.</p>"));
        }
        body.push_str("</body></html>");
        let page = Page {
            body,
            ..html_page()
        };

        let model = Arc::new(ScriptedModel::new(vec![Ok(VALID.to_string())]));
        extractor(StaticFetcher(Ok(page)), model.clone())
            .extract(&url())
            .await
            .unwrap();

        let messages = model.last_messages.lock().unwrap();
        let sent = &messages[1].content;
        assert!(sent.contains("Image candidates:"));
        assert!(sent.contains("https://example.com/img/soup-hero.jpg"));
        assert!(!sent.contains("Reader comment number 1999"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let err = extractor(SlowFetcher, model).extract(&url()).await.unwrap_err();

        assert!(matches!(err, ExtractionError::Fetch(FetchError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let model = Arc::new(ScriptedModel {
            answers: Mutex::new(vec![Ok(VALID.to_string())].into()),
            delay: Some(Duration::from_secs(3600)),
            ..ScriptedModel::default()
        });
        let err = extractor(StaticFetcher(Ok(html_page())), model)
            .extract(&url())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Model(ModelError::Timeout(_))));
    }

    #[test]
    fn strips_markdown_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn model_output_cannot_override_source_url() {
        let raw = r#"{"ingredients": [], "steps": [], "source_url": "https://evil.example/"}"#;
        let recipe = parse_recipe(raw, &url()).unwrap();
        assert_eq!(recipe.source_url, "https://example.com/recipe-page");
    }
}
