//! Keyboard, click-zone and swipe dispatch.

use super::{App, Command, View};
use super::epub::EpubKey;
use crate::backend::api::ReadingDirection;
use crate::backend::epub::PageDirection;
use crossterm::event::{KeyCode, MouseButton, MouseEvent, MouseEventKind};
use std::time::Instant;

/// Direction in reading order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Logical {
    Prev,
    Next,
}

/// Direction on screen.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Physical {
    Left,
    Right,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Zone {
    Left,
    Middle,
    Right,
}

pub fn to_logical(physical: Physical, right_to_left: bool) -> Logical {
    match (physical, right_to_left) {
        (Physical::Left, false) | (Physical::Right, true) => Logical::Prev,
        (Physical::Right, false) | (Physical::Left, true) => Logical::Next,
    }
}

pub fn map_physical(physical: Physical, direction: ReadingDirection) -> Logical {
    to_logical(physical, direction == ReadingDirection::RightToLeft)
}

/// Outer thirds turn pages, the middle third toggles chrome.
pub fn click_zone(column: u16, width: u16) -> Zone {
    let column = u32::from(column) * 3;
    let width = u32::from(width);
    if column < width {
        Zone::Left
    } else if column > width * 2 {
        Zone::Right
    } else {
        Zone::Middle
    }
}

/// Dragging rightwards pulls in the page on the left.
pub fn swipe(start: u16, end: u16, threshold: u16) -> Option<Physical> {
    let distance = i32::from(end) - i32::from(start);
    let threshold = i32::from(threshold);
    if distance >= threshold {
        Some(Physical::Left)
    } else if distance <= -threshold {
        Some(Physical::Right)
    } else {
        None
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Gesture {
    Click(u16),
    Swipe(Physical),
}

/// Pairs a button press with its release.
#[derive(Debug, Default)]
pub struct PointerTracker {
    pressed_at: Option<u16>,
}

impl PointerTracker {
    pub fn press(&mut self, column: u16) {
        self.pressed_at = Some(column);
    }

    pub fn release(&mut self, column: u16, threshold: u16) -> Option<Gesture> {
        let start = self.pressed_at.take()?;
        Some(match swipe(start, column, threshold) {
            Some(physical) => Gesture::Swipe(physical),
            None => Gesture::Click(start),
        })
    }
}

impl App {
    pub fn handle_key(&mut self, key: KeyCode, now: Instant) -> Vec<Command> {
        if self.notice.is_some() {
            self.notice = None;
            return Vec::new();
        }
        if self.confirm.is_some() {
            return match key {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => self.answer_confirm(true),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => self.answer_confirm(false),
                _ => Vec::new(),
            };
        }
        if self.path_input.is_some() {
            return self.handle_path_input(key);
        }
        match self.view {
            View::List => self.handle_list_key(key),
            View::Reader => self.handle_reader_key(key, now),
            View::Epub => self.handle_epub_key(key, now),
            View::History => self.handle_history_key(key),
            View::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_path_input(&mut self, key: KeyCode) -> Vec<Command> {
        let Some(input) = self.path_input.as_mut() else {
            return Vec::new();
        };
        match key {
            KeyCode::Char(c) => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Esc => self.path_input = None,
            KeyCode::Enter => {
                let input = self.path_input.take().unwrap_or_default();
                return self.add_path(&input);
            }
            _ => {}
        }
        Vec::new()
    }

    fn handle_list_key(&mut self, key: KeyCode) -> Vec<Command> {
        match key {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.library.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.library.move_cursor(1),
            KeyCode::PageUp => self.library.move_cursor(-10),
            KeyCode::PageDown => self.library.move_cursor(10),
            KeyCode::Enter => return self.open_selected(),
            KeyCode::Char('o') => return self.open_selected_folder(),
            KeyCode::Backspace | KeyCode::Left => return self.go_up(),
            KeyCode::Char('r') => {
                let path = self.library.path.clone();
                return self.load_list(&path);
            }
            KeyCode::Char('s') => self.library.cycle_sort(),
            KeyCode::Char('S') => self.library.toggle_order(),
            KeyCode::Char('h') => return self.show_history(),
            KeyCode::Char('c') => self.show_settings(),
            _ => {}
        }
        Vec::new()
    }

    fn turn_physical(&mut self, physical: Physical, now: Instant) -> Vec<Command> {
        let logical = map_physical(physical, self.settings.reading_direction);
        self.turn_page(logical, now)
    }

    /// Moves the slider thumb; the thumb follows the reading direction.
    fn slide(&mut self, physical: Physical, now: Instant) -> Vec<Command> {
        let target = match map_physical(physical, self.settings.reading_direction) {
            Logical::Prev => self.reader.index.checked_sub(1),
            Logical::Next => Some(self.reader.index + 1).filter(|&i| i < self.reader.image_count()),
        };
        match target {
            Some(index) => self.reader.jump(index, now),
            None => Vec::new(),
        }
    }

    fn handle_reader_key(&mut self, key: KeyCode, now: Instant) -> Vec<Command> {
        if self.overlays.slider {
            return match key {
                KeyCode::Esc | KeyCode::Char(' ') => {
                    self.overlays.slider = false;
                    Vec::new()
                }
                KeyCode::Left => self.slide(Physical::Left, now),
                KeyCode::Right => self.slide(Physical::Right, now),
                KeyCode::Home => self.reader.jump(0, now),
                KeyCode::End => {
                    let last = self.reader.image_count().saturating_sub(1);
                    self.reader.jump(last, now)
                }
                _ => Vec::new(),
            };
        }
        if self.overlays.chapter_nav {
            return match key {
                KeyCode::Enter => self.go_to_next_chapter(),
                KeyCode::Esc => {
                    self.overlays.chapter_nav = false;
                    Vec::new()
                }
                _ => Vec::new(),
            };
        }
        match key {
            KeyCode::Left | KeyCode::Char('a') | KeyCode::Char('A') => {
                self.turn_physical(Physical::Left, now)
            }
            KeyCode::Right | KeyCode::Char('d') | KeyCode::Char('D') => {
                self.turn_physical(Physical::Right, now)
            }
            KeyCode::Up | KeyCode::Char('w') | KeyCode::Char('W') => self.turn_page(Logical::Prev, now),
            KeyCode::Down | KeyCode::Char('s') | KeyCode::Char('S') => {
                self.turn_page(Logical::Next, now)
            }
            KeyCode::Char(' ') => {
                self.overlays.slider = true;
                Vec::new()
            }
            KeyCode::Esc => self.go_back(),
            _ => Vec::new(),
        }
    }

    fn handle_epub_key(&mut self, key: KeyCode, now: Instant) -> Vec<Command> {
        match self.epub.handle_key(key, now) {
            EpubKey::Back => self.go_back(),
            EpubKey::Handled => Vec::new(),
            // Still loading: only leaving is possible.
            EpubKey::Ignored if key == KeyCode::Esc => self.go_back(),
            EpubKey::Ignored => Vec::new(),
        }
    }

    fn handle_history_key(&mut self, key: KeyCode) -> Vec<Command> {
        match key {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => return self.go_back(),
            KeyCode::Up | KeyCode::Char('k') => self.history.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.history.move_cursor(1),
            KeyCode::Enter => return self.resume_selected(),
            KeyCode::Char('d') | KeyCode::Delete => return self.delete_selected_history(),
            KeyCode::Char('r') => return self.show_history(),
            _ => {}
        }
        Vec::new()
    }

    fn handle_settings_key(&mut self, key: KeyCode) -> Vec<Command> {
        match key {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => return self.go_back(),
            KeyCode::Up | KeyCode::Char('k') => self.move_settings_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_settings_cursor(1),
            KeyCode::Char('a') => self.path_input = Some(String::new()),
            KeyCode::Enter => return self.select_highlighted_path(),
            KeyCode::Char('x') | KeyCode::Delete => self.request_remove_highlighted_path(),
            KeyCode::Char('r') => return self.toggle_direction(),
            KeyCode::Char('+') | KeyCode::Char('=') => return self.change_preload_buffer(1),
            KeyCode::Char('-') => return self.change_preload_buffer(-1),
            _ => {}
        }
        Vec::new()
    }

    pub fn handle_mouse(&mut self, event: MouseEvent, now: Instant) -> Vec<Command> {
        if self.notice.is_some() || self.confirm.is_some() {
            return Vec::new();
        }
        if !matches!(self.view, View::Reader | View::Epub) {
            return Vec::new();
        }
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.pointer.press(event.column);
                Vec::new()
            }
            MouseEventKind::Up(MouseButton::Left) => {
                match self.pointer.release(event.column, self.swipe_threshold) {
                    Some(Gesture::Click(column)) => self.click(column, now),
                    Some(Gesture::Swipe(physical)) => self.swiped(physical, now),
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn click(&mut self, column: u16, now: Instant) -> Vec<Command> {
        let zone = click_zone(column, self.terminal_size.0);
        if self.view == View::Epub {
            self.epub.click(zone, now);
            return Vec::new();
        }
        if self.overlays.slider || self.overlays.chapter_nav {
            return Vec::new();
        }
        match zone {
            Zone::Left => self.turn_physical(Physical::Left, now),
            Zone::Right => self.turn_physical(Physical::Right, now),
            Zone::Middle => {
                self.overlays.slider = true;
                Vec::new()
            }
        }
    }

    fn swiped(&mut self, physical: Physical, now: Instant) -> Vec<Command> {
        if self.view == View::Epub {
            let logical = to_logical(physical, self.epub.direction == PageDirection::Rtl);
            self.epub.turn(logical, now);
            return Vec::new();
        }
        if self.overlays.slider || self.overlays.chapter_nav {
            return Vec::new();
        }
        self.turn_physical(physical, now)
    }
}
