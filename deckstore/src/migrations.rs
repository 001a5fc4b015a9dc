//! Upgrades from older storage formats
//!
//! Two generations of legacy data are handled:
//! - single-key blobs written by the first editor (`presentationSettings`,
//!   `presentationOutline` and friends)
//! - the non-versioned store envelope written before enhanced persistence
//!
//! Every migration reads and parses its source before touching the store,
//! and never deletes legacy data. Purging is a separate, flag-guarded step.

use crate::config::LEGACY_STORE_NAME;
use crate::error::{AppError, Result};
use crate::storage::StorageAdapter;
use crate::store::presentations::{
    default_color_scheme, ImageSource, PresentationMetadata, PresentationSettingsUpdate,
    PresentationUpdate, TextDensity, Theme,
};
use crate::store::{GenerationKind, Store};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub const LEGACY_SETTINGS_KEY: &str = "presentationSettings";
pub const LEGACY_OUTLINE_KEY: &str = "presentationOutline";
pub const LEGACY_EDITOR_SLIDES_KEY: &str = "editor_slides";
pub const LEGACY_GENERATED_SLIDES_KEY: &str = "generatedSlides";
pub const MIGRATED_FLAG_KEY: &str = "presentationSettings_migrated";

const MIGRATED_TITLE: &str = "Migrated Presentation";
const MIGRATED_DESCRIPTION: &str = "Migrated from your previous presentation";

/// Slide as stored by the first editor
#[derive(Debug, Clone, Deserialize)]
struct LegacySlide {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    bullets: Vec<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySettings {
    #[serde(default)]
    outline: Vec<LegacySlide>,
    #[serde(default)]
    theme: Option<Map<String, Value>>,
    #[serde(default)]
    text_density: Option<String>,
    #[serde(default)]
    image_source: Option<String>,
    #[serde(default)]
    ai_model: Option<String>,
}

/// State held by the pre-versioning store
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyStoreState {
    #[serde(default)]
    pub presentations: HashMap<String, PresentationMetadata>,
    #[serde(default)]
    pub current_presentation_id: Option<String>,
}

/// Persist envelope of the pre-versioning store
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyStore {
    pub state: LegacyStoreState,
    #[serde(default)]
    pub version: u32,
}

/// What `migrate_all_data` found and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Presentation created from the legacy settings blob
    pub migrated_presentation: Option<String>,
    /// Legacy slide keys still present, left for a later migration
    pub legacy_slide_keys: Vec<String>,
}

fn parse_text_density(value: &str) -> Option<TextDensity> {
    match value {
        "Brief" | "Low" => Some(TextDensity::Low),
        "Medium" => Some(TextDensity::Medium),
        "Detailed" | "High" => Some(TextDensity::High),
        _ => None,
    }
}

fn parse_image_source(value: &str) -> Option<ImageSource> {
    serde_json::from_value(Value::String(value.to_string())).ok()
}

fn legacy_theme(theme: &Map<String, Value>) -> Theme {
    let color = |key: &str, fallback: &str| {
        theme
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    let color_scheme = theme
        .get("colorScheme")
        .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
        .filter(|scheme| !scheme.is_empty())
        .unwrap_or_else(default_color_scheme);

    Theme {
        id: "migrated".to_string(),
        name: "Migrated Theme".to_string(),
        background_color: color("backgroundColor", "#ffffff"),
        text_color: color("textColor", "#000000"),
        font_family: color("fontFamily", "Arial, sans-serif"),
        color_scheme,
    }
}

fn outline_result(slides: &[LegacySlide]) -> Value {
    let slides: Vec<Value> = slides
        .iter()
        .enumerate()
        .map(|(index, slide)| {
            json!({
                "id": slide.id.clone().unwrap_or_else(|| json!(index + 1)),
                "title": slide.title.clone().unwrap_or_default(),
                "bullets": slide.bullets,
                "content": slide.content,
            })
        })
        .collect();
    json!({ "slides": slides })
}

async fn is_migrated(legacy: &dyn StorageAdapter) -> Result<bool> {
    Ok(legacy.get(MIGRATED_FLAG_KEY).await?.as_deref() == Some("true"))
}

/// Turn the first editor's settings blob into a presentation.
///
/// Returns the new presentation id, or `None` when there is nothing to
/// migrate or the migration already ran. The legacy keys are left in place.
/// The migrated flag is written and read back before the store is touched,
/// so `cleanup_old_data` can purge the keys later and a restart never
/// migrates twice.
pub async fn migrate_local_storage_data(
    store: &Store,
    legacy: &dyn StorageAdapter,
) -> Result<Option<String>> {
    if is_migrated(legacy).await? {
        tracing::debug!("Legacy presentation settings already migrated");
        return Ok(None);
    }
    let Some(raw) = legacy.get(LEGACY_SETTINGS_KEY).await? else {
        tracing::info!("No old presentation settings found");
        return Ok(None);
    };

    let settings: LegacySettings = serde_json::from_str(&raw).map_err(|e| {
        AppError::Migration(format!("Unreadable {}: {}", LEGACY_SETTINGS_KEY, e))
    })?;

    let mut outline = settings.outline;
    if outline.is_empty() {
        if let Some(raw) = legacy.get(LEGACY_OUTLINE_KEY).await? {
            match serde_json::from_str::<Vec<LegacySlide>>(&raw) {
                Ok(slides) => outline = slides,
                Err(e) => tracing::warn!("Ignoring unreadable {}: {}", LEGACY_OUTLINE_KEY, e),
            }
        }
    }

    let theme = settings
        .theme
        .as_ref()
        .filter(|theme| !theme.is_empty())
        .map(legacy_theme);
    let update = PresentationSettingsUpdate {
        text_density: settings.text_density.as_deref().and_then(parse_text_density),
        image_source: settings.image_source.as_deref().and_then(parse_image_source),
        ai_model: settings.ai_model.filter(|m| !m.is_empty()),
    };

    // The flag must be durable before anything is created, or a lost write
    // would migrate the same blob again on the next start
    legacy.set(MIGRATED_FLAG_KEY, "true").await?;
    if !is_migrated(legacy).await? {
        return Err(AppError::Migration(format!(
            "Could not record {}; legacy data left unmigrated",
            MIGRATED_FLAG_KEY
        )));
    }

    let id = store
        .mutate(|s| {
            let id = s.presentations.create_presentation(MIGRATED_TITLE, None);
            if let Some(theme) = theme {
                s.presentations.update_theme(&id, theme);
            }
            s.presentations.update_settings(&id, update);
            s.presentations.update_presentation(
                &id,
                PresentationUpdate {
                    description: Some(MIGRATED_DESCRIPTION.to_string()),
                    ..Default::default()
                },
            );

            if !outline.is_empty() {
                let mut metadata = Map::new();
                metadata.insert("presentationId".to_string(), json!(id));
                metadata.insert("migrated".to_string(), json!(true));

                // Migrated work is not charged
                let credits = s.generation.remaining_credits;
                let task_id = s.generation.create_task(
                    GenerationKind::Outline,
                    "Migrated outline",
                    metadata,
                );
                s.generation.start_task(&task_id);
                s.generation.complete_task(&task_id, outline_result(&outline));
                s.generation.set_remaining_credits(credits);
            }
            id
        })
        .await;

    tracing::info!(
        "Migrated old presentation data into {} ({} outline slides)",
        id,
        outline.len()
    );
    Ok(Some(id))
}

/// Remove the legacy single-key blobs once they have been migrated.
///
/// Returns false (and removes nothing) when the migrated flag is absent.
pub async fn cleanup_old_data(legacy: &dyn StorageAdapter) -> Result<bool> {
    if !is_migrated(legacy).await? {
        tracing::warn!("Cannot clean up old data: migration has not been performed");
        return Ok(false);
    }

    for key in [
        LEGACY_SETTINGS_KEY,
        LEGACY_OUTLINE_KEY,
        LEGACY_EDITOR_SLIDES_KEY,
        LEGACY_GENERATED_SLIDES_KEY,
    ] {
        legacy.remove(key).await?;
    }

    tracing::info!("Old data cleaned up");
    Ok(true)
}

/// Local migration plus a scan for legacy slide data
pub async fn migrate_all_data(store: &Store, legacy: &dyn StorageAdapter) -> Result<MigrationReport> {
    let migrated_presentation = migrate_local_storage_data(store, legacy).await?;

    let mut legacy_slide_keys = Vec::new();
    for key in [LEGACY_EDITOR_SLIDES_KEY, LEGACY_GENERATED_SLIDES_KEY] {
        if legacy.get(key).await?.is_some() {
            legacy_slide_keys.push(key.to_string());
        }
    }
    if !legacy_slide_keys.is_empty() {
        tracing::info!("Found additional slide data to migrate: {:?}", legacy_slide_keys);
    }

    Ok(MigrationReport {
        migrated_presentation,
        legacy_slide_keys,
    })
}

/// Read the pre-versioning store envelope
pub async fn load_legacy_store(legacy: &dyn StorageAdapter) -> Result<Option<LegacyStore>> {
    let Some(raw) = legacy.get(LEGACY_STORE_NAME).await? else {
        return Ok(None);
    };
    let store = serde_json::from_str(&raw)
        .map_err(|e| AppError::Migration(format!("Unreadable legacy store: {}", e)))?;
    Ok(Some(store))
}

/// Copy presentations from the pre-versioning store into `store`.
///
/// Presentations missing from `store` are added; ones present in both keep
/// whichever copy was updated last. Returns how many entries were written.
pub async fn migrate_legacy_store_to_enhanced(
    store: &Store,
    legacy: &dyn StorageAdapter,
) -> Result<usize> {
    let Some(legacy_store) = load_legacy_store(legacy).await? else {
        tracing::debug!("No legacy store data to migrate");
        return Ok(0);
    };
    let LegacyStoreState {
        presentations,
        current_presentation_id,
    } = legacy_store.state;
    if presentations.is_empty() {
        tracing::debug!("No legacy store data to migrate");
        return Ok(0);
    }

    let migrated = store
        .mutate(|s| {
            let mut migrated = 0;
            for presentation in presentations.into_values() {
                let newer = match s.presentations.get(&presentation.id) {
                    None => true,
                    Some(existing) => presentation.updated_at > existing.updated_at,
                };
                if newer {
                    tracing::info!("Migrating presentation \"{}\" from legacy store", presentation.title);
                    s.presentations.upsert_presentation(presentation);
                    migrated += 1;
                }
            }
            if let Some(id) = current_presentation_id.as_deref() {
                s.presentations.set_current_presentation(Some(id));
            }
            migrated
        })
        .await;

    if current_presentation_id.is_some() {
        store.save_version("Migrated from legacy storage").await;
    }

    tracing::info!("Migrated {} presentations from legacy store", migrated);
    Ok(migrated)
}

/// Startup sequence for persisted state.
///
/// Loads the previous session, runs the migrations and records a startup
/// recovery point for the active presentation. Failures are logged; startup
/// always continues.
pub async fn initialize_persistence(store: &Store, legacy: &dyn StorageAdapter) {
    tracing::info!("Initializing persistence");

    if store.rehydrate().await {
        tracing::info!("Restored state from previous session");
    }

    if let Err(e) = migrate_local_storage_data(store, legacy).await {
        tracing::error!("Error migrating legacy presentation data: {}", e);
    }

    if let Err(e) = migrate_legacy_store_to_enhanced(store, legacy).await {
        tracing::error!("Error migrating legacy store: {}", e);
    }

    if store.current_presentation_id().await.is_some() {
        store.save_version("Application startup").await;
    }

    tracing::info!("Persistence initialized");
}
