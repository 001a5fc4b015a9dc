//! Presentations slice
//!
//! CRUD state for presentation metadata plus sync-status bookkeeping.
//! Every action is synchronous and local; remote sync is layered on top by
//! whoever owns the backend calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Visual theme of a presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    pub name: String,
    pub background_color: String,
    pub text_color: String,
    pub font_family: String,
    pub color_scheme: Vec<String>,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default".to_string(),
            background_color: "#ffffff".to_string(),
            text_color: "#000000".to_string(),
            font_family: "Arial, sans-serif".to_string(),
            color_scheme: default_color_scheme(),
        }
    }
}

pub fn default_color_scheme() -> Vec<String> {
    ["#3498db", "#2ecc71", "#e74c3c", "#f39c12", "#9b59b6"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextDensity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageSource {
    #[default]
    #[serde(rename = "AI")]
    Ai,
    Unsplash,
    None,
}

/// Per-presentation generation preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationSettings {
    pub text_density: TextDensity,
    pub image_source: ImageSource,
    pub ai_model: String,
}

impl Default for PresentationSettings {
    fn default() -> Self {
        Self {
            text_density: TextDensity::Medium,
            image_source: ImageSource::Ai,
            ai_model: "Flux Fast".to_string(),
        }
    }
}

/// Partial update for `PresentationSettings`
#[derive(Debug, Clone, Default)]
pub struct PresentationSettingsUpdate {
    pub text_density: Option<TextDensity>,
    pub image_source: Option<ImageSource>,
    pub ai_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    #[default]
    Local,
    Syncing,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub settings: PresentationSettings,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

/// Shallow patch applied by `update_presentation`
#[derive(Debug, Clone, Default)]
pub struct PresentationUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub theme: Option<Theme>,
    pub settings: Option<PresentationSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationsState {
    pub presentations: HashMap<String, PresentationMetadata>,
    pub current_presentation_id: Option<String>,
    #[serde(skip)]
    pub is_loading: bool,
    #[serde(skip)]
    pub error: Option<String>,
}

impl PresentationsState {
    /// Create a presentation and make it the current one
    pub fn create_presentation(&mut self, title: impl Into<String>, theme: Option<Theme>) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let title = title.into();

        tracing::info!("Creating presentation {}: {}", id, title);

        self.presentations.insert(
            id.clone(),
            PresentationMetadata {
                id: id.clone(),
                title,
                description: String::new(),
                created_at: now,
                updated_at: now,
                theme: theme.unwrap_or_default(),
                settings: PresentationSettings::default(),
                sync_status: SyncStatus::Local,
            },
        );
        self.current_presentation_id = Some(id.clone());

        id
    }

    pub fn get(&self, id: &str) -> Option<&PresentationMetadata> {
        self.presentations.get(id)
    }

    pub fn current(&self) -> Option<&PresentationMetadata> {
        self.current_presentation_id
            .as_deref()
            .and_then(|id| self.presentations.get(id))
    }

    /// Shallow-merge `update` into a presentation, bumping `updated_at`
    pub fn update_presentation(&mut self, id: &str, update: PresentationUpdate) -> bool {
        self.touch(id, |p| {
            if let Some(title) = update.title {
                p.title = title;
            }
            if let Some(description) = update.description {
                p.description = description;
            }
            if let Some(theme) = update.theme {
                p.theme = theme;
            }
            if let Some(settings) = update.settings {
                p.settings = settings;
            }
        })
    }

    /// Insert or replace a presentation verbatim, keeping its timestamps.
    ///
    /// Used when merging data that already carries authoritative metadata
    /// (legacy migration, version restore). The entry is marked local since
    /// it no longer matches what the backend holds.
    pub fn upsert_presentation(&mut self, mut presentation: PresentationMetadata) {
        presentation.sync_status = SyncStatus::Local;
        self.presentations.insert(presentation.id.clone(), presentation);
    }

    pub fn delete_presentation(&mut self, id: &str) -> bool {
        if self.presentations.remove(id).is_none() {
            return false;
        }
        if self.current_presentation_id.as_deref() == Some(id) {
            self.current_presentation_id = None;
        }
        tracing::info!("Deleted presentation {}", id);
        true
    }

    /// Switch the active presentation; unknown ids are ignored
    pub fn set_current_presentation(&mut self, id: Option<&str>) -> bool {
        match id {
            None => {
                self.current_presentation_id = None;
                true
            }
            Some(id) if self.presentations.contains_key(id) => {
                self.current_presentation_id = Some(id.to_string());
                true
            }
            Some(id) => {
                tracing::warn!("Cannot select unknown presentation {}", id);
                false
            }
        }
    }

    pub fn update_theme(&mut self, id: &str, theme: Theme) -> bool {
        self.touch(id, |p| p.theme = theme)
    }

    pub fn update_settings(&mut self, id: &str, update: PresentationSettingsUpdate) -> bool {
        self.touch(id, |p| {
            if let Some(density) = update.text_density {
                p.settings.text_density = density;
            }
            if let Some(source) = update.image_source {
                p.settings.image_source = source;
            }
            if let Some(model) = update.ai_model {
                p.settings.ai_model = model;
            }
        })
    }

    pub fn set_loading(&mut self, is_loading: bool) {
        self.is_loading = is_loading;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub fn mark_as_synced(&mut self, id: &str) -> bool {
        self.set_sync_status(id, SyncStatus::Synced)
    }

    pub fn mark_as_syncing(&mut self, id: &str) -> bool {
        self.set_sync_status(id, SyncStatus::Syncing)
    }

    pub fn mark_sync_error(&mut self, id: &str, error: Option<String>) -> bool {
        let marked = self.set_sync_status(id, SyncStatus::Error);
        if marked && error.is_some() {
            self.error = error;
        }
        marked
    }

    fn set_sync_status(&mut self, id: &str, status: SyncStatus) -> bool {
        match self.presentations.get_mut(id) {
            Some(p) => {
                p.sync_status = status;
                true
            }
            None => false,
        }
    }

    /// Apply a local edit: mutate, bump `updated_at`, mark unsynced
    fn touch<F>(&mut self, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut PresentationMetadata),
    {
        let Some(presentation) = self.presentations.get_mut(id) else {
            tracing::debug!("Ignoring edit for unknown presentation {}", id);
            return false;
        };
        edit(presentation);
        presentation.updated_at = Utc::now();
        presentation.sync_status = SyncStatus::Local;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sets_current() {
        let mut state = PresentationsState::default();
        let id = state.create_presentation("Dogs", None);

        assert_eq!(state.current_presentation_id.as_deref(), Some(id.as_str()));
        let p = state.get(&id).unwrap();
        assert_eq!(p.title, "Dogs");
        assert_eq!(p.theme, Theme::default());
        assert_eq!(p.sync_status, SyncStatus::Local);
    }

    #[test]
    fn test_update_marks_local_and_bumps_timestamp() {
        let mut state = PresentationsState::default();
        let id = state.create_presentation("Dogs", None);
        state.mark_as_synced(&id);
        let before = state.get(&id).unwrap().updated_at;

        assert!(state.update_presentation(
            &id,
            PresentationUpdate {
                description: Some("All about dogs".to_string()),
                ..Default::default()
            },
        ));

        let p = state.get(&id).unwrap();
        assert_eq!(p.title, "Dogs");
        assert_eq!(p.description, "All about dogs");
        assert_eq!(p.sync_status, SyncStatus::Local);
        assert!(p.updated_at >= before);
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let mut state = PresentationsState::default();
        assert!(!state.update_presentation("missing", PresentationUpdate::default()));
        assert!(!state.update_theme("missing", Theme::default()));
        assert!(state.presentations.is_empty());
    }

    #[test]
    fn test_delete_clears_current() {
        let mut state = PresentationsState::default();
        let a = state.create_presentation("A", None);
        let b = state.create_presentation("B", None);

        assert!(state.delete_presentation(&a));
        assert_eq!(state.current_presentation_id.as_deref(), Some(b.as_str()));

        assert!(state.delete_presentation(&b));
        assert!(state.current_presentation_id.is_none());
        assert!(!state.delete_presentation(&b));
    }

    #[test]
    fn test_set_current_requires_existing() {
        let mut state = PresentationsState::default();
        let id = state.create_presentation("A", None);

        assert!(!state.set_current_presentation(Some("ghost")));
        assert_eq!(state.current_presentation_id.as_deref(), Some(id.as_str()));

        assert!(state.set_current_presentation(None));
        assert!(state.current().is_none());
    }

    #[test]
    fn test_update_settings_is_partial() {
        let mut state = PresentationsState::default();
        let id = state.create_presentation("A", None);

        state.update_settings(
            &id,
            PresentationSettingsUpdate {
                text_density: Some(TextDensity::High),
                ..Default::default()
            },
        );

        let settings = &state.get(&id).unwrap().settings;
        assert_eq!(settings.text_density, TextDensity::High);
        assert_eq!(settings.image_source, ImageSource::Ai);
        assert_eq!(settings.ai_model, "Flux Fast");
    }

    #[test]
    fn test_sync_status_helpers() {
        let mut state = PresentationsState::default();
        let id = state.create_presentation("A", None);

        state.mark_as_syncing(&id);
        assert_eq!(state.get(&id).unwrap().sync_status, SyncStatus::Syncing);

        state.mark_sync_error(&id, Some("offline".to_string()));
        assert_eq!(state.get(&id).unwrap().sync_status, SyncStatus::Error);
        assert_eq!(state.error.as_deref(), Some("offline"));
    }

    #[test]
    fn test_wire_format() {
        let mut state = PresentationsState::default();
        let id = state.create_presentation("A", None);
        let json = serde_json::to_value(state.get(&id).unwrap()).unwrap();

        assert_eq!(json["syncStatus"], "local");
        assert_eq!(json["settings"]["imageSource"], "AI");
        assert_eq!(json["settings"]["textDensity"], "Medium");
        assert_eq!(json["theme"]["backgroundColor"], "#ffffff");
    }
}
