//! EPUB rendering capability.
//!
//! The reader only talks to [`EpubEngine`]; [`TextEngine`] is the terminal
//! implementation that turns spine documents into wrapped text pages.

use epub::doc::EpubDoc;
use log::{debug, info, warn};
use regex::Regex;
use std::io::Cursor;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpubError {
    #[error("failed to open EPUB: {0}")]
    Open(String),
    #[error("EPUB has no readable content")]
    Empty,
}

/// Page progression declared by the document's package metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageDirection {
    #[default]
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritingMode {
    #[default]
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: u16,
    pub height: u16,
    /// Lay vertical-script content out as left-to-right lines.
    pub force_horizontal: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            width: 80,
            height: 24,
            force_horizontal: false,
        }
    }
}

/// A visible position, reported after every move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub locator: String,
}

pub trait EpubEngine {
    fn direction(&self) -> PageDirection;
    fn writing_mode(&self) -> WritingMode;
    fn render_to(&mut self, options: RenderOptions);
    /// Shows `locator`, or the start of the book when absent or unknown.
    fn display(&mut self, locator: Option<&str>) -> Location;
    fn prev(&mut self) -> Option<Location>;
    fn next(&mut self) -> Option<Location>;
    fn resize(&mut self, width: u16, height: u16) -> Location;
    fn locations_ready(&self) -> bool;
    /// Indexes the next batch of spine documents; call until
    /// `locations_ready`.
    fn generate_locations(&mut self);
    /// Whole-book progress in percent; `None` until locations are generated.
    fn percentage(&self, location: &Location) -> Option<u8>;
    fn visible_lines(&self) -> Vec<String>;
    fn destroy(&mut self);
}

/// Builds an engine for one downloaded archive.
pub trait EpubOpener {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn EpubEngine>, EpubError>;
}

pub struct TextOpener;

impl EpubOpener for TextOpener {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn EpubEngine>, EpubError> {
        Ok(Box::new(TextEngine::from_bytes(bytes)?))
    }
}

static RTL_PROGRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"page-progression-direction\s*=\s*["']rtl["']"#).expect("valid pattern")
});

static VERTICAL_WRITING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(-epub-|-webkit-)?writing-mode\s*:\s*vertical|primary-writing-mode"\s+content\s*=\s*"vertical"#,
    )
    .expect("valid pattern")
});

/// Spine documents wrapped per `generate_locations` call.
const LOCATION_BATCH: usize = 4;

fn detect_direction(opf: &str) -> PageDirection {
    if RTL_PROGRESSION.is_match(opf) {
        PageDirection::Rtl
    } else {
        PageDirection::Ltr
    }
}

fn detect_vertical(source: &str) -> bool {
    VERTICAL_WRITING.is_match(source)
}

pub struct TextEngine {
    chapters: Vec<String>,
    wrapped: Vec<Option<Vec<String>>>,
    options: RenderOptions,
    spine: usize,
    line: usize,
    direction: PageDirection,
    writing_mode: WritingMode,
    page_counts: Option<Vec<usize>>,
    counted: Vec<usize>,
}

impl TextEngine {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, EpubError> {
        let mut doc =
            EpubDoc::from_reader(Cursor::new(bytes)).map_err(|e| EpubError::Open(e.to_string()))?;

        let root_file = doc.root_file.clone();
        let opf = doc.get_resource_str_by_path(&root_file).unwrap_or_default();
        let direction = detect_direction(&opf);
        let mut vertical = detect_vertical(&opf);

        let mut chapters = Vec::new();
        loop {
            if let Some((chapter, _mime)) = doc.get_current_str() {
                vertical |= detect_vertical(&chapter);
                chapters.push(chapter);
            }
            if !doc.go_next() {
                break;
            }
        }

        let writing_mode = if vertical {
            WritingMode::Vertical
        } else {
            WritingMode::Horizontal
        };
        info!(
            "Opened EPUB with {} spine documents, direction {:?}, writing mode {:?}",
            chapters.len(),
            direction,
            writing_mode
        );
        Self::from_chapters(chapters, direction, writing_mode)
    }

    pub fn from_chapters(
        chapters: Vec<String>,
        direction: PageDirection,
        writing_mode: WritingMode,
    ) -> Result<Self, EpubError> {
        if chapters.is_empty() {
            return Err(EpubError::Empty);
        }
        let wrapped = vec![None; chapters.len()];
        Ok(Self {
            chapters,
            wrapped,
            options: RenderOptions::default(),
            spine: 0,
            line: 0,
            direction,
            writing_mode,
            page_counts: None,
            counted: Vec::new(),
        })
    }

    fn page_height(&self) -> usize {
        self.options.height.max(1) as usize
    }

    fn lines(&mut self, spine: usize) -> &[String] {
        if self.wrapped[spine].is_none() {
            let width = self.options.width.max(10) as usize;
            let html = &self.chapters[spine];
            let text = match html2text::from_read(html.as_bytes(), width) {
                Ok(text) => text,
                Err(err) => {
                    warn!("html2text failed on spine item {}: {}", spine, err);
                    html.clone()
                }
            };
            let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
            if lines.is_empty() {
                lines.push(String::new());
            }
            self.wrapped[spine] = Some(lines);
        }
        self.wrapped[spine].as_deref().unwrap_or_default()
    }

    fn line_count(&mut self, spine: usize) -> usize {
        self.lines(spine).len()
    }

    fn last_page_start(&mut self, spine: usize) -> usize {
        let h = self.page_height();
        (self.line_count(spine).saturating_sub(1) / h) * h
    }

    fn location(&self) -> Location {
        Location {
            locator: format!("{}:{}", self.spine, self.line),
        }
    }

    fn parse_locator(locator: &str) -> Option<(usize, usize)> {
        let (spine, line) = locator.split_once(':')?;
        Some((spine.parse().ok()?, line.parse().ok()?))
    }

    fn invalidate_layout(&mut self) {
        self.wrapped.iter_mut().for_each(|w| *w = None);
        self.page_counts = None;
        self.counted.clear();
    }
}

impl EpubEngine for TextEngine {
    fn direction(&self) -> PageDirection {
        self.direction
    }

    fn writing_mode(&self) -> WritingMode {
        self.writing_mode
    }

    fn render_to(&mut self, options: RenderOptions) {
        if options.force_horizontal && self.writing_mode == WritingMode::Vertical {
            info!("Vertical writing mode detected; laying out as horizontal lines");
        }
        self.options = options;
        self.invalidate_layout();
    }

    fn display(&mut self, locator: Option<&str>) -> Location {
        let (spine, line) = match locator.and_then(Self::parse_locator) {
            Some(pos) => pos,
            None => {
                if let Some(raw) = locator {
                    debug!("Unrecognised locator {:?}, showing start", raw);
                }
                (0, 0)
            }
        };
        self.spine = spine.min(self.chapters.len() - 1);
        let h = self.page_height();
        let max_line = self.line_count(self.spine).saturating_sub(1);
        self.line = (line.min(max_line) / h) * h;
        self.location()
    }

    fn prev(&mut self) -> Option<Location> {
        let h = self.page_height();
        if self.line > 0 {
            self.line = self.line.saturating_sub(h);
        } else if self.spine > 0 {
            self.spine -= 1;
            self.line = self.last_page_start(self.spine);
        } else {
            return None;
        }
        Some(self.location())
    }

    fn next(&mut self) -> Option<Location> {
        let h = self.page_height();
        if self.line + h < self.line_count(self.spine) {
            self.line += h;
        } else if self.spine + 1 < self.chapters.len() {
            self.spine += 1;
            self.line = 0;
        } else {
            return None;
        }
        Some(self.location())
    }

    fn resize(&mut self, width: u16, height: u16) -> Location {
        let old_total = self.line_count(self.spine).max(1);
        let fraction = self.line as f64 / old_total as f64;

        self.options.width = width;
        self.options.height = height;
        self.invalidate_layout();

        let h = self.page_height();
        let new_total = self.line_count(self.spine);
        let target = (fraction * new_total as f64) as usize;
        self.line = (target.min(new_total.saturating_sub(1)) / h) * h;
        self.location()
    }

    fn locations_ready(&self) -> bool {
        self.page_counts.is_some()
    }

    fn generate_locations(&mut self) {
        if self.page_counts.is_some() {
            return;
        }
        let h = self.page_height();
        let start = self.counted.len();
        let end = (start + LOCATION_BATCH).min(self.chapters.len());
        for spine in start..end {
            let pages = self.line_count(spine).div_ceil(h).max(1);
            self.counted.push(pages);
        }
        if self.counted.len() == self.chapters.len() {
            let counts = std::mem::take(&mut self.counted);
            debug!("Generated locations for {} pages", counts.iter().sum::<usize>());
            self.page_counts = Some(counts);
        }
    }

    fn percentage(&self, location: &Location) -> Option<u8> {
        let counts = self.page_counts.as_ref()?;
        let (spine, line) = Self::parse_locator(&location.locator)?;
        let total: usize = counts.iter().sum();
        if total == 0 || spine >= counts.len() {
            return None;
        }
        let before: usize = counts[..spine].iter().sum::<usize>() + line / self.page_height();
        Some((((before + 1) * 100) / total).min(100) as u8)
    }

    fn visible_lines(&self) -> Vec<String> {
        let h = self.page_height();
        self.wrapped
            .get(self.spine)
            .and_then(|w| w.as_ref())
            .map(|lines| lines.iter().skip(self.line).take(h).cloned().collect())
            .unwrap_or_default()
    }

    fn destroy(&mut self) {
        self.chapters.clear();
        self.wrapped.clear();
        self.page_counts = None;
        self.counted.clear();
    }
}
