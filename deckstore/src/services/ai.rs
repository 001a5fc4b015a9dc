//! AI generation service client
//!
//! Talks to the outline/slides/images endpoints of the AI service. Requests
//! are validated before they leave the process, failed calls are classified
//! by status, and retryable failures are retried with exponential backoff.

use crate::config::{
    API_INITIAL_BACKOFF_MS, API_MAX_ATTEMPTS, MAX_LANG_LENGTH, MIN_LANG_LENGTH, MIN_TOPIC_LENGTH,
};
use crate::error::{ApiErrorKind, AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MISSING_KEYS_MESSAGE: &str =
    "Backend service is missing API keys. Please check the server configuration.";

/// The generation endpoints the store depends on
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Slide titles for a topic
    async fn generate_outline(&self, request: &OutlineRequest) -> Result<Vec<String>>;

    async fn generate_slides(&self, request: &SlidesRequest) -> Result<Vec<GeneratedSlide>>;

    async fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<GeneratedImage>>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutlineRequest {
    pub topic: String,
    pub n_slides: u32,
    pub instructional_level: String,
    pub lang: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlidesRequest {
    pub slides_titles: Vec<String>,
    pub topic: String,
    pub instructional_level: String,
    pub lang: String,
}

/// A slide handed to the image endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageSlide {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bullet_points: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImagesRequest {
    pub slides: Vec<ImageSlide>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedSlide {
    pub title: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub bullet_points: Option<Vec<String>>,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedImage {
    pub slide_index: usize,
    pub image_url: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default)]
    pub prompt_used: Option<String>,
}

fn validate_topic(topic: &str) -> Result<String> {
    let topic = topic.trim();
    if topic.chars().count() < MIN_TOPIC_LENGTH {
        return Err(AppError::Validation(format!(
            "Topic must be at least {} characters",
            MIN_TOPIC_LENGTH
        )));
    }
    Ok(topic.to_string())
}

/// Accept 2-10 character language tags and reduce them to the two-letter code
fn validate_lang(lang: &str) -> Result<String> {
    let lang = lang.trim();
    let len = lang.chars().count();
    if !(MIN_LANG_LENGTH..=MAX_LANG_LENGTH).contains(&len) {
        return Err(AppError::Validation(format!(
            "Language must be between {} and {} characters",
            MIN_LANG_LENGTH, MAX_LANG_LENGTH
        )));
    }
    Ok(lang.chars().take(2).collect::<String>().to_lowercase())
}

impl OutlineRequest {
    pub fn validated(self) -> Result<Self> {
        if self.n_slides == 0 {
            return Err(AppError::Validation(
                "Number of slides must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            topic: validate_topic(&self.topic)?,
            lang: validate_lang(&self.lang)?,
            ..self
        })
    }
}

impl SlidesRequest {
    pub fn validated(self) -> Result<Self> {
        if self.slides_titles.is_empty() {
            return Err(AppError::Validation(
                "At least one slide title is required".to_string(),
            ));
        }
        Ok(Self {
            topic: validate_topic(&self.topic)?,
            lang: validate_lang(&self.lang)?,
            ..self
        })
    }
}

impl ImagesRequest {
    pub fn validated(self) -> Result<Self> {
        if self.slides.is_empty() {
            return Err(AppError::Validation(
                "At least one slide is required".to_string(),
            ));
        }
        if self.slides.iter().any(|s| s.title.trim().is_empty()) {
            return Err(AppError::Validation("Slide title is required".to_string()));
        }
        Ok(self)
    }
}

#[derive(Deserialize)]
struct OutlineTitle {
    title: String,
}

/// The service answers `{outlines}`; the web proxy answers `{slides: [{title}]}`
#[derive(Deserialize)]
struct OutlineResponse {
    #[serde(default)]
    outlines: Option<Vec<String>>,
    #[serde(default)]
    slides: Option<Vec<OutlineTitle>>,
}

#[derive(Deserialize)]
struct SlidesResponse {
    slides: Vec<GeneratedSlide>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    images: Vec<GeneratedImage>,
}

/// Turn a failed response body into a user-facing message
fn error_message(body: &str, fallback: &str) -> String {
    if body.contains("No API keys found") {
        return MISSING_KEYS_MESSAGE.to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "error"] {
            if let Some(message) = value.get(field).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let body = body.trim();
    if body.is_empty() || body.starts_with('{') {
        fallback.to_string()
    } else {
        body.to_string()
    }
}

fn classify(status: u16, message: &str) -> ApiErrorKind {
    match ApiErrorKind::from_status(status) {
        ApiErrorKind::Unknown if message.contains("API key") => ApiErrorKind::Authentication,
        kind => kind,
    }
}

fn transport_error(e: reqwest::Error) -> AppError {
    let kind = if e.is_timeout() {
        ApiErrorKind::Timeout
    } else if e.is_connect() || e.is_request() {
        ApiErrorKind::Network
    } else {
        ApiErrorKind::Unknown
    };
    AppError::Api {
        kind,
        status: e.status().map(|s| s.as_u16()),
        message: format!("Network error calling AI service: {}", e),
    }
}

/// `GenerationApi` over HTTP
pub struct HttpGenerationApi {
    client: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl HttpGenerationApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("deckstore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: API_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(API_INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff = initial_backoff;
        self
    }

    async fn post<B, T>(&self, path: &str, body: &B, what: &str) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            match self.post_once(path, body, what).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.initial_backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        "Attempt {}/{} to generate {} failed, retrying in {:?}: {}",
                        attempt,
                        self.max_attempts,
                        what,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Error generating {}: {}", what, e);
                    return Err(e);
                }
            }
        }
    }

    async fn post_once<B, T>(&self, path: &str, body: &B, what: &str) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let fallback = format!("Failed to generate {}: HTTP {}", what, status);
            let message = error_message(&text, &fallback);
            return Err(AppError::Api {
                kind: classify(status.as_u16(), &message),
                status: Some(status.as_u16()),
                message,
            });
        }

        response.json::<T>().await.map_err(|e| {
            AppError::Generation(format!("Invalid {} response from AI service: {}", what, e))
        })
    }
}

#[async_trait]
impl GenerationApi for HttpGenerationApi {
    async fn generate_outline(&self, request: &OutlineRequest) -> Result<Vec<String>> {
        let request = request.clone().validated()?;
        tracing::info!(
            "Generating outline for \"{}\" ({} slides)",
            request.topic,
            request.n_slides
        );

        let response: OutlineResponse = self.post("/generate/outline", &request, "outline").await?;
        match (response.outlines, response.slides) {
            (Some(outlines), _) => Ok(outlines),
            (None, Some(slides)) => Ok(slides.into_iter().map(|s| s.title).collect()),
            (None, None) => Err(AppError::Generation(
                "Invalid outline response from AI service".to_string(),
            )),
        }
    }

    async fn generate_slides(&self, request: &SlidesRequest) -> Result<Vec<GeneratedSlide>> {
        let request = request.clone().validated()?;
        tracing::info!("Generating content for {} slides", request.slides_titles.len());

        let response: SlidesResponse = self.post("/generate/slides", &request, "slides").await?;
        Ok(response.slides)
    }

    async fn generate_images(&self, request: &ImagesRequest) -> Result<Vec<GeneratedImage>> {
        let request = request.clone().validated()?;
        tracing::info!("Generating images for {} slides", request.slides.len());

        let response: ImagesResponse = self.post("/generate/images", &request, "images").await?;
        Ok(response.images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{json, response, serve};

    fn outline_request(topic: &str, lang: &str) -> OutlineRequest {
        OutlineRequest {
            topic: topic.to_string(),
            n_slides: 5,
            instructional_level: "intermediate".to_string(),
            lang: lang.to_string(),
        }
    }

    fn client(url: &str) -> HttpGenerationApi {
        HttpGenerationApi::new(url)
            .unwrap()
            .with_retry(3, Duration::from_millis(1))
    }

    #[test]
    fn test_outline_validation() {
        assert!(matches!(
            outline_request("AI", "en").validated(),
            Err(AppError::Validation(_))
        ));
        assert!(outline_request("Dogs", "e").validated().is_err());
        assert!(outline_request("Dogs", "english-united").validated().is_err());

        let request = outline_request("  Dogs  ", "English").validated().unwrap();
        assert_eq!(request.topic, "Dogs");
        assert_eq!(request.lang, "en");
    }

    #[test]
    fn test_slides_and_images_validation() {
        let slides = SlidesRequest {
            slides_titles: Vec::new(),
            topic: "Dogs".to_string(),
            instructional_level: "beginner".to_string(),
            lang: "en".to_string(),
        };
        assert!(slides.validated().is_err());

        assert!(ImagesRequest { slides: Vec::new() }.validated().is_err());
    }

    #[test]
    fn test_error_message_parsing() {
        assert_eq!(error_message(r#"{"detail":"Model overloaded"}"#, "fallback"), "Model overloaded");
        assert_eq!(error_message(r#"{"error":"Bad topic"}"#, "fallback"), "Bad topic");
        assert_eq!(error_message("upstream timed out", "fallback"), "upstream timed out");
        assert_eq!(error_message("", "fallback"), "fallback");
        assert_eq!(error_message(r#"{"code":7}"#, "fallback"), "fallback");
        assert_eq!(
            error_message(r#"{"detail":"No API keys found for provider"}"#, "fallback"),
            MISSING_KEYS_MESSAGE
        );
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(401, "nope"), ApiErrorKind::Authentication);
        assert_eq!(classify(403, "Invalid API key"), ApiErrorKind::Authentication);
        assert_eq!(classify(502, "bad gateway"), ApiErrorKind::Server);
    }

    #[tokio::test]
    async fn test_outline_accepts_both_shapes() {
        let (url, server) = serve(vec![
            json("200 OK", r#"{"outlines":["Intro","History"]}"#),
            json("200 OK", r#"{"slides":[{"title":"Intro"}]}"#),
        ])
        .await;
        let api = client(&url);

        let titles = api.generate_outline(&outline_request("Dogs", "en")).await.unwrap();
        assert_eq!(titles, vec!["Intro", "History"]);
        let titles = api.generate_outline(&outline_request("Dogs", "en")).await.unwrap();
        assert_eq!(titles, vec!["Intro"]);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /generate/outline"));
        assert!(requests[0].contains(r#""n_slides":5"#));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, server) = serve(vec![
            json("503 Service Unavailable", r#"{"detail":"busy"}"#),
            json(
                "200 OK",
                r#"{"slides":[{"title":"Intro","template":"title","content":"Hello"}]}"#,
            ),
        ])
        .await;
        let request = SlidesRequest {
            slides_titles: vec!["Intro".to_string()],
            topic: "Dogs".to_string(),
            instructional_level: "beginner".to_string(),
            lang: "en".to_string(),
        };

        let slides = client(&url).generate_slides(&request).await.unwrap();
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].content, "Hello");
        assert_eq!(slides[0].notes, None);
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let (url, server) = serve(vec![response(
            "400 Bad Request",
            "text/plain",
            "topic too vague",
        )])
        .await;

        let err = client(&url)
            .generate_outline(&outline_request("Dogs", "en"))
            .await
            .unwrap_err();
        match err {
            AppError::Api { kind, status, message } => {
                assert_eq!(kind, ApiErrorKind::Validation);
                assert_eq!(status, Some(400));
                assert_eq!(message, "topic too vague");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_images_endpoint() {
        let (url, _server) = serve(vec![json(
            "200 OK",
            r#"{"images":[{"slide_index":0,"image_url":"https://img/0.png","alt_text":"A dog"}]}"#,
        )])
        .await;
        let request = ImagesRequest {
            slides: vec![ImageSlide {
                title: "Intro".to_string(),
                content: None,
                template: "title".to_string(),
                image_prompt: Some("a happy dog".to_string()),
                bullet_points: None,
            }],
        };

        let images = client(&url).generate_images(&request).await.unwrap();
        assert_eq!(images[0].image_url, "https://img/0.png");
        assert_eq!(images[0].prompt_used, None);
    }
}
