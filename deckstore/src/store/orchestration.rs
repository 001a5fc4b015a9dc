//! Generation workflows
//!
//! Async actions that drive tasks through the generation slice while the
//! AI service does the work. Each workflow creates and starts a task, runs
//! the API call against the task's cancellation handle and a timeout, then
//! completes, fails or cancels the task from the outcome.
//!
//! The store lock is never held across the API call; a task can therefore
//! be cancelled (or cleared) while its request is in flight, and every
//! write after the call re-checks the task through the slice guards.

use super::generation::{GenerationSettings, GenerationSettingsUpdate};
use super::machine::{GenerationKind, TaskStatus};
use super::Store;
use crate::error::{AppError, Result};
use crate::services::ai::{GenerationApi, ImageSlide, ImagesRequest, OutlineRequest, SlidesRequest};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Task ids produced by `generate_full_presentation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullPresentationResult {
    pub outline_task_id: String,
    pub content_task_id: String,
    pub image_task_ids: Vec<String>,
}

/// Await `call` unless the task is cancelled or the timeout elapses first.
///
/// A timeout fires the token too, so the task's handle reflects that the
/// request was abandoned.
async fn run_cancellable<T, F>(token: &CancellationToken, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(AppError::Cancelled(
            "Generation request aborted: task was cancelled".to_string(),
        )),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                Err(AppError::Cancelled(format!(
                    "Generation request aborted after timeout of {}ms",
                    timeout.as_millis()
                )))
            }
        },
    }
}

fn metadata(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Store {
    /// Global generation settings with an optional per-call override
    async fn effective_settings(&self, update: Option<&GenerationSettingsUpdate>) -> GenerationSettings {
        self.select(|s| match update {
            Some(update) => s.generation.global_settings.merged(update),
            None => s.generation.global_settings.clone(),
        })
        .await
    }

    /// Create and start a task, refusing up front when credits are short
    async fn begin_task(
        &self,
        kind: GenerationKind,
        prompt: String,
        metadata: Map<String, Value>,
    ) -> Result<(String, CancellationToken)> {
        self.mutate(|s| {
            if !s.generation.can_generate(kind) {
                tracing::warn!(
                    "Not enough credits for {} task ({} remaining)",
                    kind,
                    s.generation.remaining_credits
                );
                return Err(AppError::InsufficientCredits(kind.to_string()));
            }

            let id = s.generation.create_task(kind, prompt, metadata);
            if !s.generation.start_task(&id) {
                return Err(AppError::Generation(format!("Task {} could not be started", id)));
            }
            let token = s
                .generation
                .cancel_token(&id)
                .ok_or_else(|| AppError::Generation(format!("Task {} has no cancel handle", id)))?;
            Ok((id, token))
        })
        .await
    }

    async fn checkpoint(&self, task_id: &str, progress: i64, partial: Option<Value>) {
        self.mutate(|s| s.generation.update_task_progress(task_id, progress, partial))
            .await;
    }

    /// Settle a started task from the outcome of its API call
    async fn settle_task(&self, task_id: String, outcome: Result<Value>) -> Result<String> {
        let error = match outcome {
            Ok(result) => {
                let completed = self
                    .mutate(|s| s.generation.complete_task(&task_id, result))
                    .await;
                if completed {
                    return Ok(task_id);
                }
                let status = self
                    .select(|s| s.generation.task(&task_id).map(|t| t.status))
                    .await;
                match status {
                    Some(TaskStatus::Cancelled) | None => AppError::Cancelled(format!(
                        "Task {} was cancelled before its result arrived",
                        task_id
                    )),
                    Some(status) => AppError::Generation(format!(
                        "Task {} could not complete from status {}",
                        task_id, status
                    )),
                }
            }
            Err(e) => e,
        };

        self.mutate(|s| {
            let status = s.generation.task(&task_id).map(|t| t.status);
            if error.is_cancellation() {
                if status != Some(TaskStatus::Cancelled) {
                    s.generation.cancel_task(&task_id);
                }
            } else {
                s.generation.fail_task(&task_id, error.to_string());
            }
        })
        .await;

        Err(error)
    }

    /// Generate slide titles for `topic`; returns the outline task id.
    ///
    /// The task result is `{slides: [{id, title, bullets}]}`.
    pub async fn generate_outline(
        &self,
        api: &dyn GenerationApi,
        topic: &str,
        n_slides: u32,
        settings: Option<GenerationSettingsUpdate>,
    ) -> Result<String> {
        let settings = self.effective_settings(settings.as_ref()).await;
        let prompt = format!(
            "Create an outline for a presentation about \"{}\" with {} slides.",
            topic, n_slides
        );
        let (task_id, token) = self
            .begin_task(
                GenerationKind::Outline,
                prompt,
                metadata(json!({ "topic": topic, "numSlides": n_slides })),
            )
            .await?;

        let request = OutlineRequest {
            topic: topic.to_string(),
            n_slides,
            instructional_level: settings.instructional_level().to_string(),
            lang: settings.language.clone(),
        };
        self.checkpoint(&task_id, 10, None).await;

        let timeout = Duration::from_millis(settings.abort_timeout_ms);
        let outcome = run_cancellable(&token, timeout, api.generate_outline(&request))
            .await
            .map(|titles| {
                let slides: Vec<Value> = titles
                    .into_iter()
                    .enumerate()
                    .map(|(index, title)| {
                        json!({
                            "id": index + 1,
                            "title": title,
                            "bullets": ["Point 1", "Point 2", "Point 3"],
                        })
                    })
                    .collect();
                json!({ "slides": slides })
            });

        self.settle_task(task_id, outcome).await
    }

    /// Generate slide content from a completed outline task; returns the
    /// content task id.
    ///
    /// The task result is `{slideContents: [{id, title, content, notes}]}`.
    pub async fn generate_content(
        &self,
        api: &dyn GenerationApi,
        outline_id: &str,
        settings: Option<GenerationSettingsUpdate>,
    ) -> Result<String> {
        let settings = self.effective_settings(settings.as_ref()).await;

        let outline = self
            .select(|s| {
                let task = s.generation.task(outline_id)?;
                let slides = task.result.as_ref()?.get("slides")?.as_array()?;
                let titles: Vec<String> = slides
                    .iter()
                    .filter_map(|slide| slide.get("title").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                let topic = task
                    .metadata
                    .get("topic")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some((titles, topic))
            })
            .await;
        let Some((titles, topic)) = outline else {
            return Err(AppError::Generation(
                "Invalid outline task ID or missing outline data".to_string(),
            ));
        };

        let prompt = format!(
            "Generate content for a presentation with this outline: {}",
            serde_json::to_string(&titles)?
        );
        let (task_id, token) = self
            .begin_task(
                GenerationKind::Content,
                prompt,
                metadata(json!({ "outlineId": outline_id, "slideTitles": titles })),
            )
            .await?;

        let total = titles.len();
        self.checkpoint(
            &task_id,
            0,
            Some(json!({
                "completedSlides": 0,
                "slideIndex": 0,
                "completedSteps": [format!("Generated content for 0 of {} slides", total)],
            })),
        )
        .await;

        let request = SlidesRequest {
            slides_titles: titles.clone(),
            topic,
            instructional_level: settings.instructional_level().to_string(),
            lang: settings.language.clone(),
        };
        let timeout = Duration::from_millis(settings.abort_timeout_ms);
        let outcome = run_cancellable(&token, timeout, api.generate_slides(&request)).await;

        let outcome = match outcome {
            Ok(slides) => {
                self.checkpoint(
                    &task_id,
                    100,
                    Some(json!({
                        "completedSlides": slides.len(),
                        "slideIndex": slides.len(),
                        "completedSteps": [format!("Generated content for {} of {} slides", slides.len(), total)],
                    })),
                )
                .await;

                let contents: Vec<Value> = slides
                    .into_iter()
                    .enumerate()
                    .map(|(index, slide)| {
                        let title = if slide.title.is_empty() {
                            titles.get(index).cloned().unwrap_or_default()
                        } else {
                            slide.title
                        };
                        json!({
                            "id": index + 1,
                            "title": title,
                            "content": slide.content,
                            "notes": slide.notes.unwrap_or_default(),
                        })
                    })
                    .collect();
                Ok(json!({ "slideContents": contents }))
            }
            Err(e) => Err(e),
        };

        self.settle_task(task_id, outcome).await
    }

    /// Generate a single image for `prompt`; returns the image task id.
    ///
    /// The task result is `{url}`.
    pub async fn generate_image(
        &self,
        api: &dyn GenerationApi,
        prompt: &str,
        settings: Option<GenerationSettingsUpdate>,
    ) -> Result<String> {
        let settings = self.effective_settings(settings.as_ref()).await;
        let (task_id, token) = self
            .begin_task(GenerationKind::Image, prompt.to_string(), Map::new())
            .await?;

        let request = ImagesRequest {
            slides: vec![ImageSlide {
                title: prompt.to_string(),
                content: None,
                template: "image".to_string(),
                image_prompt: Some(prompt.to_string()),
                bullet_points: None,
            }],
        };
        self.checkpoint(&task_id, 10, None).await;

        let timeout = Duration::from_millis(settings.abort_timeout_ms);
        let outcome = run_cancellable(&token, timeout, api.generate_images(&request))
            .await
            .and_then(|images| {
                images
                    .into_iter()
                    .next()
                    .map(|image| json!({ "url": image.image_url }))
                    .ok_or_else(|| AppError::Generation("AI service returned no image".to_string()))
            });

        self.settle_task(task_id, outcome).await
    }

    /// Outline, then content, then (when auto-enhance is on) one image per
    /// slide.
    ///
    /// Outline and content failures abort the pipeline. Image failures are
    /// logged and the presentation is returned without images.
    pub async fn generate_full_presentation(
        &self,
        api: &dyn GenerationApi,
        topic: &str,
        n_slides: u32,
        settings: Option<GenerationSettingsUpdate>,
    ) -> Result<FullPresentationResult> {
        tracing::info!("Generating full presentation about \"{}\"", topic);

        let outline_task_id = self
            .generate_outline(api, topic, n_slides, settings.clone())
            .await?;
        self.ensure_completed(&outline_task_id, "Outline").await?;

        let content_task_id = self
            .generate_content(api, &outline_task_id, settings.clone())
            .await?;
        self.ensure_completed(&content_task_id, "Content").await?;

        let effective = self.effective_settings(settings.as_ref()).await;
        let image_task_ids = if effective.auto_enhance {
            self.generate_slide_images(api, &content_task_id, &effective)
                .await
        } else {
            Vec::new()
        };

        tracing::info!(
            "Presentation generated: outline {}, content {}, {} images",
            outline_task_id,
            content_task_id,
            image_task_ids.len()
        );

        Ok(FullPresentationResult {
            outline_task_id,
            content_task_id,
            image_task_ids,
        })
    }

    async fn ensure_completed(&self, task_id: &str, stage: &str) -> Result<()> {
        let status = self
            .select(|s| s.generation.task(task_id).map(|t| t.status))
            .await;
        if status == Some(TaskStatus::Completed) {
            Ok(())
        } else {
            Err(AppError::Generation(format!("{} generation failed", stage)))
        }
    }

    /// One completed image task per generated slide image; errors are not
    /// fatal
    async fn generate_slide_images(
        &self,
        api: &dyn GenerationApi,
        content_task_id: &str,
        settings: &GenerationSettings,
    ) -> Vec<String> {
        let slides: Vec<ImageSlide> = self
            .select(|s| {
                s.generation
                    .task(content_task_id)
                    .and_then(|t| t.result.as_ref())
                    .and_then(|r| r.get("slideContents"))
                    .and_then(Value::as_array)
                    .map(|contents| {
                        contents
                            .iter()
                            .map(|slide| ImageSlide {
                                title: slide
                                    .get("title")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                content: slide
                                    .get("content")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                                template: "standard".to_string(),
                                image_prompt: None,
                                bullet_points: None,
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .await;
        if slides.is_empty() {
            return Vec::new();
        }

        let token = CancellationToken::new();
        let timeout = Duration::from_millis(settings.abort_timeout_ms);
        let request = ImagesRequest { slides: slides.clone() };
        let images = match run_cancellable(&token, timeout, api.generate_images(&request)).await {
            Ok(images) => images,
            Err(e) => {
                tracing::error!("Image generation failed: {}", e);
                return Vec::new();
            }
        };

        let mut task_ids = Vec::new();
        for image in images {
            let title = slides
                .get(image.slide_index)
                .map(|s| s.title.clone())
                .unwrap_or_default();
            let prompt = format!("Image for slide: {}", title);
            let meta = metadata(json!({ "slideIndex": image.slide_index, "slideTitle": title }));

            // The image already exists; the task only records it
            match self.begin_task(GenerationKind::Image, prompt, meta).await {
                Ok((task_id, _)) => {
                    self.mutate(|s| {
                        s.generation
                            .complete_task(&task_id, json!({ "url": image.image_url }))
                    })
                    .await;
                    task_ids.push(task_id);
                }
                Err(e) => {
                    tracing::warn!("Skipping remaining slide images: {}", e);
                    break;
                }
            }
        }
        task_ids
    }
}
