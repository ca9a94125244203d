use super::Command;
use super::debounce::Debouncer;
use super::input::Logical;
use super::library::display_name;
use crate::backend::api::{AdjacentChapters, ApiError, ChapterData, HistoryWrite};
use crate::backend::cache::{ImageCache, ImageKey, prefetch_window};
use image::DynamicImage;
use log::{debug, info};
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ReaderPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    PageLoading,
}

/// Where a freshly opened chapter starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAt {
    First,
    Last,
    Index(usize),
    File(String),
}

impl StartAt {
    fn resolve(&self, images: &[String]) -> usize {
        let last = images.len().saturating_sub(1);
        match self {
            StartAt::First => 0,
            StartAt::Last => last,
            StartAt::Index(i) => (*i).min(last),
            StartAt::File(name) => images.iter().position(|f| f == name).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub path: String,
    pub images: Vec<String>,
    pub adjacent: AdjacentChapters,
}

#[derive(Debug, Clone, Default)]
pub enum PageView {
    #[default]
    Blank,
    Loading,
    Shown(DynamicImage),
    Failed(String),
}

/// Result of a page turn request.
#[derive(Debug, PartialEq)]
pub enum Step {
    Turned(Vec<Command>),
    /// At the first page with a previous chapter; needs user confirmation.
    ConfirmPrevious(String),
    /// At the last page with a next chapter; offer it without forcing.
    OfferNext(String),
    Stay,
}

#[derive(Debug, PartialEq)]
pub enum ChapterOutcome {
    Stale,
    Opened(Vec<Command>),
    Failed(String),
}

struct PendingOpen {
    generation: u64,
    path: String,
    start: StartAt,
    prior_phase: ReaderPhase,
}

#[derive(Default)]
pub struct Reader {
    pub phase: ReaderPhase,
    pub chapter: Option<Chapter>,
    pub index: usize,
    pub page: PageView,
    pub cache: ImageCache,
    pending_open: Option<PendingOpen>,
    open_generation: u64,
    page_generation: u64,
    save: Debouncer<HistoryWrite>,
}

impl Reader {
    pub fn new(preload_buffer: usize) -> Self {
        Self {
            cache: ImageCache::new(preload_buffer),
            ..Default::default()
        }
    }

    /// Bumped on every page request; the UI uses it to notice new pages.
    pub fn page_generation(&self) -> u64 {
        self.page_generation
    }

    pub fn image_count(&self) -> usize {
        self.chapter.as_ref().map(|c| c.images.len()).unwrap_or(0)
    }

    pub fn current_file(&self) -> Option<&str> {
        self.chapter
            .as_ref()
            .and_then(|c| c.images.get(self.index))
            .map(String::as_str)
    }

    pub fn open_chapter(&mut self, path: &str, start: StartAt) -> Vec<Command> {
        self.open_generation += 1;
        let prior_phase = match &self.pending_open {
            Some(pending) => pending.prior_phase,
            None => self.phase,
        };
        self.pending_open = Some(PendingOpen {
            generation: self.open_generation,
            path: path.to_string(),
            start,
            prior_phase,
        });
        if self.phase == ReaderPhase::Idle {
            self.phase = ReaderPhase::Loading;
        }
        info!("Opening chapter {}", path);
        vec![Command::FetchChapter {
            path: path.to_string(),
            generation: self.open_generation,
        }]
    }

    pub fn chapter_loaded(
        &mut self,
        generation: u64,
        result: Result<ChapterData, ApiError>,
        now: Instant,
    ) -> ChapterOutcome {
        match &self.pending_open {
            Some(pending) if pending.generation == generation => {}
            _ => {
                debug!("Discarding stale chapter response (generation {})", generation);
                return ChapterOutcome::Stale;
            }
        }
        let Some(pending) = self.pending_open.take() else {
            return ChapterOutcome::Stale;
        };

        let data = match result {
            Ok(data) if data.images.is_empty() => {
                self.phase = pending.prior_phase;
                return ChapterOutcome::Failed("this chapter contains no image files".to_string());
            }
            Ok(data) => data,
            Err(err) => {
                self.phase = pending.prior_phase;
                return ChapterOutcome::Failed(format!("failed to load chapter: {}", err));
            }
        };

        let mut commands: Vec<Command> = self.save.flush().map(Command::SaveProgress).into_iter().collect();

        let index = pending.start.resolve(&data.images);
        info!(
            "Chapter {} ready with {} images, starting at {}",
            pending.path,
            data.images.len(),
            index + 1
        );
        self.chapter = Some(Chapter {
            path: pending.path,
            images: data.images,
            adjacent: data.adjacent_chapters,
        });
        self.phase = ReaderPhase::Ready;
        commands.extend(self.show_page(index, now));
        ChapterOutcome::Opened(commands)
    }

    pub fn show_page(&mut self, index: usize, now: Instant) -> Vec<Command> {
        let Some(chapter) = &self.chapter else {
            return Vec::new();
        };
        let index = index.min(chapter.images.len().saturating_sub(1));
        let key = ImageKey::new(&chapter.path, &chapter.images[index]);

        self.index = index;
        self.page_generation += 1;

        if let Some(image) = self.cache.get(&key) {
            debug!("Page {} served from cache", index + 1);
            self.page = PageView::Shown(image.clone());
            self.phase = ReaderPhase::Ready;
            return self.page_revealed(now);
        }

        self.page = PageView::Loading;
        self.phase = ReaderPhase::PageLoading;
        vec![Command::LoadPage {
            key,
            generation: self.page_generation,
        }]
    }

    /// Applies a page response. A failed load still reveals (degraded) and
    /// still prefetches; the error text is returned for reporting.
    pub fn page_loaded(
        &mut self,
        generation: u64,
        result: Result<DynamicImage, ApiError>,
        now: Instant,
    ) -> (Vec<Command>, Option<String>) {
        if generation != self.page_generation || self.phase != ReaderPhase::PageLoading {
            debug!("Discarding stale page response (generation {})", generation);
            return (Vec::new(), None);
        }
        self.phase = ReaderPhase::Ready;
        match result {
            Ok(image) => {
                self.page = PageView::Shown(image);
                (self.page_revealed(now), None)
            }
            Err(err) => {
                let message = format!("image failed to load: {}", err);
                self.page = PageView::Failed(message.clone());
                (self.prefetch(), Some(message))
            }
        }
    }

    fn page_revealed(&mut self, now: Instant) -> Vec<Command> {
        let commands = self.prefetch();
        if let Some(record) = self.progress_record() {
            self.save.schedule(record, now);
        }
        commands
    }

    pub fn prefetch(&mut self) -> Vec<Command> {
        let Some(chapter) = &self.chapter else {
            return Vec::new();
        };
        let Some(window) = prefetch_window(self.index, chapter.images.len(), self.cache.preload_buffer())
        else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        for i in window.filter(|&i| i != self.index) {
            let key = ImageKey::new(&chapter.path, &chapter.images[i]);
            if self.cache.try_prefetch(&key) {
                commands.push(Command::Prefetch {
                    key,
                    epoch: self.cache.epoch(),
                });
            }
        }
        if !commands.is_empty() {
            debug!("Prefetching {} pages around {}", commands.len(), self.index + 1);
        }
        commands
    }

    pub fn prefetch_done(&mut self, key: ImageKey, epoch: u64, image: Option<DynamicImage>) {
        if self.cache.complete(key, epoch, image) {
            debug!("Cache now holds {} pages", self.cache.len());
        }
    }

    pub fn set_preload_buffer(&mut self, buffer: usize) -> Vec<Command> {
        self.cache.set_preload_buffer(buffer);
        if self.phase == ReaderPhase::Ready {
            self.prefetch()
        } else {
            Vec::new()
        }
    }

    pub fn progress_record(&self) -> Option<HistoryWrite> {
        let chapter = self.chapter.as_ref()?;
        if chapter.images.is_empty() {
            return None;
        }
        Some(HistoryWrite {
            manga_path: chapter.path.clone(),
            chapter_name: display_name(&chapter.path),
            image_index: self.index as i64,
            total_images: chapter.images.len() as i64,
            is_epub: false,
            cfi: None,
        })
    }

    pub fn advance(&mut self, direction: Logical, now: Instant) -> Step {
        let Some(chapter) = &self.chapter else {
            return Step::Stay;
        };
        let last = chapter.images.len().saturating_sub(1);
        match direction {
            Logical::Prev if self.index > 0 => Step::Turned(self.show_page(self.index - 1, now)),
            Logical::Prev => match &chapter.adjacent.previous {
                Some(previous) => Step::ConfirmPrevious(previous.clone()),
                None => Step::Stay,
            },
            Logical::Next if self.index < last => Step::Turned(self.show_page(self.index + 1, now)),
            Logical::Next => match &chapter.adjacent.next {
                Some(next) => Step::OfferNext(next.clone()),
                None => Step::Stay,
            },
        }
    }

    /// Moves within the chapter only; used by the page slider.
    pub fn jump(&mut self, index: usize, now: Instant) -> Vec<Command> {
        if self.chapter.is_none() || index == self.index {
            return Vec::new();
        }
        self.show_page(index, now)
    }

    pub fn next_chapter(&self) -> Option<&str> {
        self.chapter.as_ref()?.adjacent.next.as_deref()
    }

    pub fn tick(&mut self, now: Instant) -> Vec<Command> {
        self.save.poll(now).map(Command::SaveProgress).into_iter().collect()
    }

    /// Leaves the reader: persists progress right away and unloads the chapter.
    pub fn close(&mut self) -> Vec<Command> {
        self.save.cancel();
        let commands = self.progress_record().map(Command::SaveProgress).into_iter().collect();
        self.chapter = None;
        self.pending_open = None;
        self.index = 0;
        self.page = PageView::Blank;
        self.phase = ReaderPhase::Idle;
        commands
    }

    pub fn flush_save(&mut self) -> Option<HistoryWrite> {
        self.save.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::api::AdjacentChapters;
    use std::time::Duration;

    fn images(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{i:03}.jpg")).collect()
    }

    fn chapter_data(n: usize, previous: Option<&str>, next: Option<&str>) -> ChapterData {
        ChapterData {
            images: images(n),
            adjacent_chapters: AdjacentChapters {
                previous: previous.map(str::to_string),
                next: next.map(str::to_string),
            },
        }
    }

    fn fetch_generation(commands: &[Command]) -> u64 {
        match commands {
            [Command::FetchChapter { generation, .. }] => *generation,
            other => panic!("expected a chapter fetch, got {:?}", other),
        }
    }

    fn page_generation(commands: &[Command]) -> u64 {
        commands
            .iter()
            .find_map(|c| match c {
                Command::LoadPage { generation, .. } => Some(*generation),
                _ => None,
            })
            .expect("page request")
    }

    fn prefetched(commands: &[Command]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Prefetch { key, .. } => Some(key.filename.clone()),
                _ => None,
            })
            .collect()
    }

    fn opened(reader: &mut Reader, data: ChapterData, start: StartAt, now: Instant) -> Vec<Command> {
        let generation = fetch_generation(&reader.open_chapter("series/ch02", start));
        match reader.chapter_loaded(generation, Ok(data), now) {
            ChapterOutcome::Opened(commands) => commands,
            other => panic!("open failed: {:?}", other),
        }
    }

    fn pixel() -> DynamicImage {
        DynamicImage::new_rgb8(1, 1)
    }

    #[test]
    fn open_then_load_prefetches_the_window() {
        let now = Instant::now();
        let mut reader = Reader::new(4);
        let commands = opened(&mut reader, chapter_data(5, None, None), StartAt::Index(2), now);
        assert_eq!(reader.phase, ReaderPhase::PageLoading);
        assert_eq!(reader.index, 2);
        assert_eq!(reader.current_file(), Some("003.jpg"));

        let (commands, error) = reader.page_loaded(page_generation(&commands), Ok(pixel()), now);
        assert!(error.is_none());
        assert_eq!(reader.phase, ReaderPhase::Ready);
        assert_eq!(prefetched(&commands), vec!["001.jpg", "002.jpg", "004.jpg", "005.jpg"]);
    }

    #[test]
    fn stale_page_response_is_discarded() {
        let now = Instant::now();
        let mut reader = Reader::new(2);
        let first = opened(&mut reader, chapter_data(5, None, None), StartAt::First, now);
        let stale = page_generation(&first);

        let second = reader.show_page(3, now);
        let (commands, _) = reader.page_loaded(stale, Ok(pixel()), now);
        assert!(commands.is_empty());
        assert!(matches!(reader.page, PageView::Loading));

        reader.page_loaded(page_generation(&second), Ok(pixel()), now);
        assert!(matches!(reader.page, PageView::Shown(_)));
        assert_eq!(reader.index, 3);
    }

    #[test]
    fn failed_page_reveals_degraded_and_still_prefetches() {
        let now = Instant::now();
        let mut reader = Reader::new(2);
        let commands = opened(&mut reader, chapter_data(3, None, None), StartAt::Index(1), now);

        let (commands, error) = reader.page_loaded(
            page_generation(&commands),
            Err(ApiError::Server("Image not found".into())),
            now,
        );
        assert!(error.unwrap().contains("Image not found"));
        assert!(matches!(reader.page, PageView::Failed(_)));
        assert_eq!(reader.index, 1);
        assert_eq!(prefetched(&commands), vec!["001.jpg", "003.jpg"]);
        // A failed page schedules no progress save.
        assert!(reader.tick(now + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn empty_chapter_fails_and_keeps_prior_state() {
        let now = Instant::now();
        let mut reader = Reader::new(2);
        let generation = fetch_generation(&reader.open_chapter("empty", StartAt::First));
        assert_eq!(reader.phase, ReaderPhase::Loading);

        let outcome = reader.chapter_loaded(generation, Ok(chapter_data(0, None, None)), now);
        assert!(matches!(outcome, ChapterOutcome::Failed(_)));
        assert_eq!(reader.phase, ReaderPhase::Idle);
        assert!(reader.chapter.is_none());
    }

    #[test]
    fn boundaries_confirm_backwards_and_offer_forwards() {
        let now = Instant::now();
        let mut reader = Reader::new(0);
        opened(&mut reader, chapter_data(2, Some("series/ch01"), Some("series/ch03")), StartAt::First, now);

        assert_eq!(reader.advance(Logical::Prev, now), Step::ConfirmPrevious("series/ch01".into()));
        assert_eq!(reader.index, 0);

        assert!(matches!(reader.advance(Logical::Next, now), Step::Turned(_)));
        assert_eq!(reader.index, 1);
        assert_eq!(reader.advance(Logical::Next, now), Step::OfferNext("series/ch03".into()));
        assert_eq!(reader.index, 1);
    }

    #[test]
    fn boundaries_without_links_do_nothing() {
        let now = Instant::now();
        let mut reader = Reader::new(0);
        opened(&mut reader, chapter_data(1, None, None), StartAt::First, now);
        assert_eq!(reader.advance(Logical::Prev, now), Step::Stay);
        assert_eq!(reader.advance(Logical::Next, now), Step::Stay);
    }

    #[test]
    fn crossing_back_lands_on_last_page() {
        let now = Instant::now();
        let mut reader = Reader::new(0);
        opened(&mut reader, chapter_data(7, None, None), StartAt::Last, now);
        assert_eq!(reader.index, 6);
    }

    #[test]
    fn start_at_file_resolves_by_name() {
        assert_eq!(StartAt::File("003.jpg".into()).resolve(&images(5)), 2);
        assert_eq!(StartAt::File("missing.jpg".into()).resolve(&images(5)), 0);
        assert_eq!(StartAt::Index(40).resolve(&images(5)), 4);
    }

    #[test]
    fn quick_page_turns_save_once_with_latest_index() {
        let start = Instant::now();
        let mut reader = Reader::new(0);
        let commands = opened(&mut reader, chapter_data(5, None, None), StartAt::First, start);
        reader.page_loaded(page_generation(&commands), Ok(pixel()), start);

        let later = start + Duration::from_millis(300);
        let commands = reader.show_page(1, later);
        reader.page_loaded(page_generation(&commands), Ok(pixel()), later);

        assert!(reader.tick(start + Duration::from_millis(1100)).is_empty());
        let saved = reader.tick(later + Duration::from_millis(1000));
        match saved.as_slice() {
            [Command::SaveProgress(record)] => {
                assert_eq!(record.image_index, 1);
                assert_eq!(record.total_images, 5);
                assert_eq!(record.chapter_name, "ch02");
            }
            other => panic!("expected one save, got {:?}", other),
        }
    }

    #[test]
    fn cached_page_is_shown_without_a_request() {
        let now = Instant::now();
        let mut reader = Reader::new(2);
        let commands = opened(&mut reader, chapter_data(3, None, None), StartAt::First, now);
        let (commands, _) = reader.page_loaded(page_generation(&commands), Ok(pixel()), now);
        for command in commands {
            if let Command::Prefetch { key, epoch } = command {
                reader.prefetch_done(key, epoch, Some(pixel()));
            }
        }
        assert_eq!(reader.cache.len(), 1);

        let commands = reader.show_page(1, now);
        assert!(commands.iter().all(|c| !matches!(c, Command::LoadPage { .. })));
        assert_eq!(reader.phase, ReaderPhase::Ready);
        assert!(matches!(reader.page, PageView::Shown(_)));
    }

    #[test]
    fn buffer_change_clears_cache_before_refetching() {
        let now = Instant::now();
        let mut reader = Reader::new(2);
        let commands = opened(&mut reader, chapter_data(6, None, None), StartAt::Index(2), now);
        let (commands, _) = reader.page_loaded(page_generation(&commands), Ok(pixel()), now);
        for command in commands {
            if let Command::Prefetch { key, epoch } = command {
                reader.prefetch_done(key, epoch, Some(pixel()));
            }
        }
        assert_eq!(reader.cache.len(), 2);

        let commands = reader.set_preload_buffer(4);
        assert_eq!(reader.cache.len(), 0);
        assert_eq!(prefetched(&commands).len(), 4);
    }

    #[test]
    fn close_saves_immediately_and_unloads() {
        let now = Instant::now();
        let mut reader = Reader::new(0);
        opened(&mut reader, chapter_data(4, None, None), StartAt::Index(3), now);

        let commands = reader.close();
        assert!(matches!(
            commands.as_slice(),
            [Command::SaveProgress(record)] if record.image_index == 3
        ));
        assert_eq!(reader.phase, ReaderPhase::Idle);
        assert!(reader.chapter.is_none());
        assert!(reader.tick(now + Duration::from_secs(5)).is_empty());
    }
}
