use crate::backend::api::{ConfigUpdate, ReadingDirection, ServerConfig};
use thiserror::Error;

pub const DEFAULT_PRELOAD_BUFFER: usize = 3;
pub const MAX_PRELOAD_BUFFER: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("please enter a valid path")]
    Blank,
    #[error("path already exists: {0}")]
    Duplicate(String),
    #[error("cannot remove the only library path")]
    LastPath,
    #[error("unknown library path: {0}")]
    Unknown(String),
}

/// What a successful removal changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    /// The active path was removed and the first remaining one selected.
    Reselected(ConfigUpdate),
    Pruned(ConfigUpdate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_paths: Vec<String>,
    pub current_base_path: String,
    pub reading_direction: ReadingDirection,
    pub preload_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_paths: Vec::new(),
            current_base_path: "/".to_string(),
            reading_direction: ReadingDirection::LeftToRight,
            preload_buffer: DEFAULT_PRELOAD_BUFFER,
        }
    }
}

impl Settings {
    pub fn from_server(config: ServerConfig) -> Self {
        let defaults = Settings::default();
        Settings {
            current_base_path: config
                .current_base_path
                .or_else(|| config.base_paths.first().cloned())
                .unwrap_or(defaults.current_base_path),
            base_paths: config.base_paths,
            reading_direction: config.reading_direction.unwrap_or_default(),
            preload_buffer: config
                .preload_buffer
                .unwrap_or(DEFAULT_PRELOAD_BUFFER)
                .min(MAX_PRELOAD_BUFFER),
        }
    }

    pub fn full_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            base_paths: Some(self.base_paths.clone()),
            current_base_path: Some(self.current_base_path.clone()),
            reading_direction: Some(self.reading_direction),
            preload_buffer: Some(self.preload_buffer),
        }
    }

    pub fn add_path(&mut self, input: &str) -> Result<ConfigUpdate, SettingsError> {
        let path = input.trim();
        if path.is_empty() {
            return Err(SettingsError::Blank);
        }
        if self.base_paths.iter().any(|p| p == path) {
            return Err(SettingsError::Duplicate(path.to_string()));
        }
        self.base_paths.push(path.to_string());
        Ok(ConfigUpdate {
            base_paths: Some(self.base_paths.clone()),
            ..Default::default()
        })
    }

    pub fn select_path(&mut self, path: &str) -> Result<ConfigUpdate, SettingsError> {
        if !self.base_paths.iter().any(|p| p == path) {
            return Err(SettingsError::Unknown(path.to_string()));
        }
        self.current_base_path = path.to_string();
        Ok(ConfigUpdate {
            base_paths: Some(self.base_paths.clone()),
            current_base_path: Some(self.current_base_path.clone()),
            ..Default::default()
        })
    }

    /// Removes `path`. When it is the active path, the first remaining path
    /// is selected in the same step so `current_base_path` never dangles.
    pub fn remove_path(&mut self, path: &str) -> Result<Removal, SettingsError> {
        if !self.base_paths.iter().any(|p| p == path) {
            return Err(SettingsError::Unknown(path.to_string()));
        }
        if self.base_paths.len() <= 1 {
            return Err(SettingsError::LastPath);
        }
        self.base_paths.retain(|p| p != path);

        if self.current_base_path == path {
            let first = self.base_paths[0].clone();
            return self.select_path(&first).map(Removal::Reselected);
        }
        Ok(Removal::Pruned(ConfigUpdate {
            base_paths: Some(self.base_paths.clone()),
            ..Default::default()
        }))
    }

    pub fn toggle_direction(&mut self) -> ConfigUpdate {
        self.reading_direction = self.reading_direction.toggled();
        self.full_update()
    }

    /// Returns `None` when the value did not change.
    pub fn set_preload_buffer(&mut self, buffer: usize) -> Option<ConfigUpdate> {
        let buffer = buffer.min(MAX_PRELOAD_BUFFER);
        if buffer == self.preload_buffer {
            return None;
        }
        self.preload_buffer = buffer;
        Some(self.full_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_paths() -> Settings {
        Settings {
            base_paths: vec!["/lib/a".into(), "/lib/b".into()],
            current_base_path: "/lib/a".into(),
            ..Default::default()
        }
    }

    #[test]
    fn add_rejects_blank_and_duplicates() {
        let mut settings = two_paths();
        assert_eq!(settings.add_path("   "), Err(SettingsError::Blank));
        assert_eq!(
            settings.add_path("/lib/a"),
            Err(SettingsError::Duplicate("/lib/a".into()))
        );
        assert_eq!(settings.base_paths, vec!["/lib/a", "/lib/b"]);

        let update = settings.add_path(" /lib/c ").unwrap();
        assert_eq!(
            update.base_paths,
            Some(vec!["/lib/a".into(), "/lib/b".into(), "/lib/c".into()])
        );
        assert_eq!(update.current_base_path, None);
    }

    #[test]
    fn removing_the_active_path_selects_the_first_remaining() {
        let mut settings = two_paths();
        let removal = settings.remove_path("/lib/a").unwrap();

        assert_eq!(settings.current_base_path, "/lib/b");
        assert_eq!(settings.base_paths, vec!["/lib/b"]);
        match removal {
            Removal::Reselected(update) => {
                assert_eq!(update.current_base_path.as_deref(), Some("/lib/b"));
                assert_eq!(update.base_paths, Some(vec!["/lib/b".into()]));
            }
            other => panic!("expected reselection, got {:?}", other),
        }
    }

    #[test]
    fn removing_another_path_only_prunes() {
        let mut settings = two_paths();
        let removal = settings.remove_path("/lib/b").unwrap();

        assert_eq!(settings.current_base_path, "/lib/a");
        assert_eq!(
            removal,
            Removal::Pruned(ConfigUpdate {
                base_paths: Some(vec!["/lib/a".into()]),
                ..Default::default()
            })
        );
    }

    #[test]
    fn last_path_cannot_be_removed() {
        let mut settings = two_paths();
        settings.remove_path("/lib/b").unwrap();
        assert_eq!(settings.remove_path("/lib/a"), Err(SettingsError::LastPath));
        assert_eq!(settings.base_paths, vec!["/lib/a"]);
    }

    #[test]
    fn preload_buffer_is_clamped_and_reports_changes() {
        let mut settings = Settings::default();
        assert!(settings.set_preload_buffer(DEFAULT_PRELOAD_BUFFER).is_none());
        let update = settings.set_preload_buffer(99).unwrap();
        assert_eq!(update.preload_buffer, Some(MAX_PRELOAD_BUFFER));
    }

    #[test]
    fn server_config_without_current_path_uses_first() {
        let settings = Settings::from_server(ServerConfig {
            base_paths: vec!["/x".into(), "/y".into()],
            ..Default::default()
        });
        assert_eq!(settings.current_base_path, "/x");
        assert_eq!(settings.preload_buffer, DEFAULT_PRELOAD_BUFFER);
    }
}
