//! Application state and the view state machine.
//!
//! Nothing in here touches the terminal or the network. Every operation
//! returns the [`Command`]s the event loop should run, and the loop feeds
//! their results back through the `*_loaded` methods.

pub mod debounce;
pub mod epub;
pub mod history;
pub mod input;
pub mod library;
pub mod reader;
pub mod settings;

use crate::backend::api::{
    ApiError, ChapterData, ConfigUpdate, EntryKind, HistoryEntry, HistoryWrite, LibraryEntry,
    ServerConfig,
};
use crate::backend::cache::ImageKey;
use crate::backend::epub::EpubOpener;
use epub::{EpubOutcome, EpubReader};
use history::{History, Resume};
use image::DynamicImage;
use input::{Logical, PointerTracker};
use library::{Library, join_path, parent_path};
use log::{error, info, warn};
use reader::{ChapterOutcome, Reader, StartAt, Step};
use settings::{Removal, Settings};
use std::time::Instant;

/// Side effects requested by the controllers.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadConfig,
    SaveConfig(ConfigUpdate),
    LoadList { path: String, generation: u64 },
    FetchChapter { path: String, generation: u64 },
    LoadPage { key: ImageKey, generation: u64 },
    Prefetch { key: ImageKey, epoch: u64 },
    FetchEpub { path: String, generation: u64, lookup_history: bool },
    SaveProgress(HistoryWrite),
    LoadHistory,
    DeleteHistory(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum View {
    #[default]
    List,
    Reader,
    History,
    Settings,
    Epub,
}

/// Reader-only overlays; both hidden whenever another view is shown.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Overlays {
    pub slider: bool,
    pub chapter_nav: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirm {
    PreviousChapter(String),
    RemovePath(String),
}

pub struct App {
    pub view: View,
    pub overlays: Overlays,
    /// Blocking message; the next key press dismisses it.
    pub notice: Option<String>,
    /// Non-blocking message shown in the footer.
    pub status: Option<String>,
    pub confirm: Option<Confirm>,
    pub settings: Settings,
    pub settings_cursor: usize,
    pub path_input: Option<String>,
    pub library: Library,
    pub history: History,
    pub reader: Reader,
    pub epub: EpubReader,
    pub pointer: PointerTracker,
    pub swipe_threshold: u16,
    pub terminal_size: (u16, u16),
    pub should_quit: bool,
}

impl App {
    pub fn new(opener: Box<dyn EpubOpener>, swipe_threshold: u16) -> Self {
        let settings = Settings::default();
        Self {
            view: View::List,
            overlays: Overlays::default(),
            notice: None,
            status: None,
            confirm: None,
            reader: Reader::new(settings.preload_buffer),
            settings,
            settings_cursor: 0,
            path_input: None,
            library: Library::default(),
            history: History::default(),
            epub: EpubReader::new(opener),
            pointer: PointerTracker::default(),
            swipe_threshold,
            terminal_size: (80, 24),
            should_quit: false,
        }
    }

    pub fn startup(&mut self) -> Vec<Command> {
        vec![Command::LoadConfig]
    }

    /// Hides every view, then shows `view`.
    fn show(&mut self, view: View) {
        self.overlays = Overlays::default();
        self.epub.header_visible = false;
        if self.view != view {
            info!("View {:?} -> {:?}", self.view, view);
        }
        self.view = view;
    }

    /// Tears down the reading view that `next` replaces. Late chapter and
    /// book completions can switch views without going through `go_back`.
    fn leave_for(&mut self, next: View) -> Vec<Command> {
        match self.view {
            View::Reader if next != View::Reader => self.reader.close(),
            View::Epub if next != View::Epub => self.epub.close(),
            _ => Vec::new(),
        }
    }

    pub fn report(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.notice = Some(message);
    }

    pub fn config_loaded(&mut self, result: Result<ServerConfig, ApiError>) -> Vec<Command> {
        match result {
            Ok(config) => {
                self.settings = Settings::from_server(config);
                info!(
                    "Loaded settings: {} base paths, current {}",
                    self.settings.base_paths.len(),
                    self.settings.current_base_path
                );
                self.reader.cache.set_preload_buffer(self.settings.preload_buffer);
                self.load_list("")
            }
            Err(err) => {
                self.report(format!("failed to load settings: {}", err));
                Vec::new()
            }
        }
    }

    pub fn config_saved(&mut self, result: Result<(), ApiError>) {
        if let Err(err) = result {
            self.report(format!("failed to save settings: {}", err));
        }
    }

    /// Progress writes are best effort.
    pub fn progress_saved(&mut self, result: Result<(), ApiError>) {
        if let Err(err) = result {
            warn!("Saving reading progress failed: {}", err);
        }
    }

    pub fn go_back(&mut self) -> Vec<Command> {
        match self.view {
            View::Reader => {
                let commands = self.reader.close();
                self.show(View::List);
                commands
            }
            View::Epub => {
                let commands = self.epub.close();
                self.show(View::List);
                commands
            }
            View::History | View::Settings => {
                self.path_input = None;
                self.show(View::List);
                Vec::new()
            }
            View::List => Vec::new(),
        }
    }

    // Library

    pub fn load_list(&mut self, path: &str) -> Vec<Command> {
        let generation = self.library.begin_load(path);
        vec![Command::LoadList {
            path: path.to_string(),
            generation,
        }]
    }

    pub fn list_loaded(&mut self, generation: u64, result: Result<Vec<LibraryEntry>, ApiError>) {
        match result {
            Ok(entries) => {
                self.library.finish_load(generation, entries);
            }
            Err(err) => {
                if self.library.fail_load(generation) {
                    self.report(format!("failed to load the library: {}", err));
                }
            }
        }
    }

    pub fn go_up(&mut self) -> Vec<Command> {
        if self.library.path.is_empty() {
            return Vec::new();
        }
        let parent = parent_path(&self.library.path);
        self.load_list(&parent)
    }

    pub fn open_selected(&mut self) -> Vec<Command> {
        let Some(entry) = self.library.selected().cloned() else {
            return Vec::new();
        };
        let path = join_path(&self.library.path, &entry.name);
        match entry.kind {
            EntryKind::Folder => self.load_list(&path),
            EntryKind::Image => {
                let folder = self.library.path.clone();
                self.open_chapter(&folder, StartAt::File(entry.name))
            }
            EntryKind::Epub => self.open_epub(&path, None),
        }
    }

    /// Opens the highlighted folder itself as a chapter.
    pub fn open_selected_folder(&mut self) -> Vec<Command> {
        match self.library.selected() {
            Some(entry) if entry.kind == EntryKind::Folder => {
                let path = join_path(&self.library.path, &entry.name);
                self.open_chapter(&path, StartAt::First)
            }
            _ => Vec::new(),
        }
    }

    // Reader

    pub fn open_chapter(&mut self, path: &str, start: StartAt) -> Vec<Command> {
        self.reader.open_chapter(path, start)
    }

    pub fn chapter_loaded(
        &mut self,
        generation: u64,
        result: Result<ChapterData, ApiError>,
        now: Instant,
    ) -> Vec<Command> {
        match self.reader.chapter_loaded(generation, result, now) {
            ChapterOutcome::Opened(opened) => {
                self.status = None;
                let mut commands = self.leave_for(View::Reader);
                commands.extend(opened);
                self.show(View::Reader);
                commands
            }
            ChapterOutcome::Failed(message) => {
                self.report(message);
                Vec::new()
            }
            ChapterOutcome::Stale => Vec::new(),
        }
    }

    pub fn page_loaded(
        &mut self,
        generation: u64,
        result: Result<DynamicImage, ApiError>,
        now: Instant,
    ) -> Vec<Command> {
        let (commands, failure) = self.reader.page_loaded(generation, result, now);
        if let Some(message) = failure {
            warn!("{}", message);
            self.status = Some(message);
        }
        commands
    }

    pub fn prefetch_done(&mut self, key: ImageKey, epoch: u64, image: Option<DynamicImage>) {
        self.reader.prefetch_done(key, epoch, image);
    }

    pub fn turn_page(&mut self, direction: Logical, now: Instant) -> Vec<Command> {
        match self.reader.advance(direction, now) {
            Step::Turned(commands) => {
                self.status = None;
                commands
            }
            Step::ConfirmPrevious(previous) => {
                self.confirm = Some(Confirm::PreviousChapter(previous));
                Vec::new()
            }
            Step::OfferNext(_) => {
                self.overlays.chapter_nav = true;
                Vec::new()
            }
            Step::Stay => Vec::new(),
        }
    }

    pub fn go_to_next_chapter(&mut self) -> Vec<Command> {
        self.overlays.chapter_nav = false;
        match self.reader.next_chapter().map(str::to_string) {
            Some(next) => self.open_chapter(&next, StartAt::First),
            None => Vec::new(),
        }
    }

    // Epub

    pub fn open_epub(&mut self, path: &str, locator: Option<String>) -> Vec<Command> {
        self.status = Some(format!("Opening {}...", library::display_name(path)));
        self.epub.open(path, locator)
    }

    pub fn epub_loaded(
        &mut self,
        generation: u64,
        result: Result<(Vec<u8>, Option<String>), ApiError>,
        now: Instant,
    ) -> Vec<Command> {
        match self.epub.archive_loaded(generation, result, now) {
            EpubOutcome::Opened => {
                self.status = None;
                let commands = self.leave_for(View::Epub);
                self.show(View::Epub);
                commands
            }
            EpubOutcome::Failed(message) => {
                self.status = None;
                self.report(message);
                Vec::new()
            }
            EpubOutcome::Stale => Vec::new(),
        }
    }

    // History

    pub fn show_history(&mut self) -> Vec<Command> {
        self.show(View::History);
        self.history.loading = true;
        vec![Command::LoadHistory]
    }

    pub fn history_loaded(&mut self, result: Result<Vec<HistoryEntry>, ApiError>) {
        match result {
            Ok(entries) => self.history.set_entries(entries),
            Err(err) => {
                self.history.loading = false;
                self.report(format!("failed to load history: {}", err));
            }
        }
    }

    pub fn delete_selected_history(&mut self) -> Vec<Command> {
        match self.history.selected_index() {
            Some(index) => vec![Command::DeleteHistory(index)],
            None => Vec::new(),
        }
    }

    pub fn history_deleted(&mut self, result: Result<(), ApiError>) -> Vec<Command> {
        match result {
            Ok(()) => vec![Command::LoadHistory],
            Err(err) => {
                self.report(format!("failed to delete history entry: {}", err));
                Vec::new()
            }
        }
    }

    pub fn resume_selected(&mut self) -> Vec<Command> {
        match self.history.resume_target() {
            Some(Resume::Chapter { path, index }) => self.open_chapter(&path, StartAt::Index(index)),
            Some(Resume::Epub { path, locator }) => self.open_epub(&path, locator),
            None => Vec::new(),
        }
    }

    // Settings

    pub fn show_settings(&mut self) {
        self.settings_cursor = self
            .settings
            .base_paths
            .iter()
            .position(|p| *p == self.settings.current_base_path)
            .unwrap_or(0);
        self.show(View::Settings);
    }

    pub fn move_settings_cursor(&mut self, delta: isize) {
        let max = self.settings.base_paths.len().saturating_sub(1);
        self.settings_cursor = self.settings_cursor.saturating_add_signed(delta).min(max);
    }

    fn selected_base_path(&self) -> Option<String> {
        self.settings.base_paths.get(self.settings_cursor).cloned()
    }

    pub fn add_path(&mut self, input: &str) -> Vec<Command> {
        match self.settings.add_path(input) {
            Ok(update) => {
                info!("Added library path {}", input.trim());
                vec![Command::SaveConfig(update)]
            }
            Err(err) => {
                self.report(err.to_string());
                Vec::new()
            }
        }
    }

    pub fn select_path(&mut self, path: &str) -> Vec<Command> {
        match self.settings.select_path(path) {
            Ok(update) => {
                info!("Selected library path {}", path);
                let mut commands = vec![Command::SaveConfig(update)];
                commands.extend(self.load_list(""));
                commands
            }
            Err(err) => {
                self.report(err.to_string());
                Vec::new()
            }
        }
    }

    pub fn select_highlighted_path(&mut self) -> Vec<Command> {
        match self.selected_base_path() {
            Some(path) => self.select_path(&path),
            None => Vec::new(),
        }
    }

    pub fn request_remove_highlighted_path(&mut self) {
        if let Some(path) = self.selected_base_path() {
            self.confirm = Some(Confirm::RemovePath(path));
        }
    }

    fn remove_path(&mut self, path: &str) -> Vec<Command> {
        match self.settings.remove_path(path) {
            Ok(Removal::Reselected(update)) => {
                info!(
                    "Removed active library path {}, switched to {}",
                    path, self.settings.current_base_path
                );
                self.move_settings_cursor(0);
                let mut commands = vec![Command::SaveConfig(update)];
                commands.extend(self.load_list(""));
                commands
            }
            Ok(Removal::Pruned(update)) => {
                info!("Removed library path {}", path);
                self.move_settings_cursor(0);
                vec![Command::SaveConfig(update)]
            }
            Err(err) => {
                self.report(err.to_string());
                Vec::new()
            }
        }
    }

    pub fn toggle_direction(&mut self) -> Vec<Command> {
        let update = self.settings.toggle_direction();
        info!("Reading direction set to {:?}", self.settings.reading_direction);
        vec![Command::SaveConfig(update)]
    }

    pub fn change_preload_buffer(&mut self, delta: isize) -> Vec<Command> {
        let target = self.settings.preload_buffer.saturating_add_signed(delta);
        match self.settings.set_preload_buffer(target) {
            Some(update) => {
                info!("Preload buffer set to {}", self.settings.preload_buffer);
                let mut commands = self.reader.set_preload_buffer(self.settings.preload_buffer);
                commands.push(Command::SaveConfig(update));
                commands
            }
            None => Vec::new(),
        }
    }

    // Confirmation prompts

    pub fn answer_confirm(&mut self, accept: bool) -> Vec<Command> {
        let Some(confirm) = self.confirm.take() else {
            return Vec::new();
        };
        if !accept {
            return Vec::new();
        }
        match confirm {
            Confirm::PreviousChapter(previous) => self.open_chapter(&previous, StartAt::Last),
            Confirm::RemovePath(path) => self.remove_path(&path),
        }
    }

    // Timers and lifecycle

    pub fn tick(&mut self, now: Instant) -> Vec<Command> {
        let mut commands = self.reader.tick(now);
        commands.extend(self.epub.tick(now));
        commands
    }

    pub fn resize(&mut self, width: u16, height: u16, now: Instant) {
        self.terminal_size = (width, height);
        self.epub.resize(width, height.saturating_sub(2), now);
    }

    /// Final progress writes before the process exits.
    pub fn shutdown(&mut self) -> Vec<Command> {
        let mut commands: Vec<Command> = Vec::new();
        match self.view {
            View::Reader | View::Epub => commands.extend(self.go_back()),
            _ => {}
        }
        commands.extend(self.reader.flush_save().map(Command::SaveProgress));
        commands
    }
}
