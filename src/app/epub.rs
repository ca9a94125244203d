use super::Command;
use super::debounce::Debouncer;
use super::input::{Logical, Physical, Zone, to_logical};
use super::library::display_name;
use crate::backend::api::{ApiError, HistoryWrite};
use crate::backend::epub::{
    EpubEngine, EpubOpener, Location, PageDirection, RenderOptions, WritingMode,
};
use crossterm::event::KeyCode;
use log::{debug, info, warn};
use std::time::Instant;

#[derive(Debug, PartialEq)]
pub enum EpubOutcome {
    Stale,
    Opened,
    Failed(String),
}

/// What a key press inside the EPUB view asks the app to do.
#[derive(Debug, PartialEq, Eq)]
pub enum EpubKey {
    Handled,
    Back,
    Ignored,
}

struct PendingOpen {
    generation: u64,
    path: String,
    locator: Option<String>,
}

pub struct EpubReader {
    opener: Box<dyn EpubOpener>,
    engine: Option<Box<dyn EpubEngine>>,
    pending: Option<PendingOpen>,
    generation: u64,
    pub path: Option<String>,
    pub direction: PageDirection,
    pub location: Option<Location>,
    pub percentage: u8,
    pub header_visible: bool,
    keys_bound: bool,
    viewport: (u16, u16),
    save: Debouncer<HistoryWrite>,
}

fn physical_to_logical(physical: Physical, direction: PageDirection) -> Logical {
    to_logical(physical, direction == PageDirection::Rtl)
}

impl EpubReader {
    pub fn new(opener: Box<dyn EpubOpener>) -> Self {
        Self {
            opener,
            engine: None,
            pending: None,
            generation: 0,
            path: None,
            direction: PageDirection::Ltr,
            location: None,
            percentage: 0,
            header_visible: false,
            keys_bound: false,
            viewport: (80, 24),
            save: Debouncer::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    /// Whether the EPUB key handler is currently registered.
    pub fn keys_bound(&self) -> bool {
        self.keys_bound
    }

    fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.destroy();
            debug!("Destroyed previous EPUB engine");
        }
        self.keys_bound = false;
        self.header_visible = false;
        self.location = None;
        self.percentage = 0;
    }

    /// Starts opening `path`. Without a known `locator` the history is
    /// consulted for one.
    pub fn open(&mut self, path: &str, locator: Option<String>) -> Vec<Command> {
        let mut commands: Vec<Command> = self.save.flush().map(Command::SaveProgress).into_iter().collect();
        self.teardown();
        self.generation += 1;
        let lookup_history = locator.is_none();
        self.pending = Some(PendingOpen {
            generation: self.generation,
            path: path.to_string(),
            locator,
        });
        info!("Opening EPUB {}", path);
        commands.push(Command::FetchEpub {
            path: path.to_string(),
            generation: self.generation,
            lookup_history,
        });
        commands
    }

    /// `result` carries the archive bytes and the locator found in history.
    pub fn archive_loaded(
        &mut self,
        generation: u64,
        result: Result<(Vec<u8>, Option<String>), ApiError>,
        now: Instant,
    ) -> EpubOutcome {
        match &self.pending {
            Some(pending) if pending.generation == generation => {}
            _ => {
                debug!("Discarding stale EPUB response (generation {})", generation);
                return EpubOutcome::Stale;
            }
        }
        let Some(pending) = self.pending.take() else {
            return EpubOutcome::Stale;
        };

        let (bytes, history_locator) = match result {
            Ok(loaded) => loaded,
            Err(err) => return EpubOutcome::Failed(format!("failed to load EPUB: {}", err)),
        };
        let mut engine = match self.opener.open(bytes) {
            Ok(engine) => engine,
            Err(err) => return EpubOutcome::Failed(err.to_string()),
        };

        let (width, height) = self.viewport;
        let force_horizontal = engine.writing_mode() == WritingMode::Vertical;
        engine.render_to(RenderOptions {
            width,
            height,
            force_horizontal,
        });
        self.direction = engine.direction();

        let locator = pending.locator.or(history_locator);
        let location = engine.display(locator.as_deref());
        self.engine = Some(engine);
        self.path = Some(pending.path);
        self.keys_bound = true;
        self.relocated(location, now);
        EpubOutcome::Opened
    }

    fn relocated(&mut self, location: Location, now: Instant) {
        self.percentage = self
            .engine
            .as_ref()
            .and_then(|engine| engine.percentage(&location))
            .unwrap_or(0);
        self.location = Some(location);
        if let Some(record) = self.progress_record() {
            self.save.schedule(record, now);
        }
    }

    pub fn progress_record(&self) -> Option<HistoryWrite> {
        let path = self.path.as_ref()?;
        let location = self.location.as_ref()?;
        Some(HistoryWrite {
            manga_path: path.clone(),
            chapter_name: display_name(path),
            image_index: i64::from(self.percentage),
            total_images: 100,
            is_epub: true,
            cfi: Some(location.locator.clone()),
        })
    }

    pub fn turn(&mut self, direction: Logical, now: Instant) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let moved = match direction {
            Logical::Prev => engine.prev(),
            Logical::Next => engine.next(),
        };
        if let Some(location) = moved {
            self.relocated(location, now);
        }
    }

    pub fn click(&mut self, zone: Zone, now: Instant) {
        match zone {
            Zone::Middle => self.header_visible = !self.header_visible,
            Zone::Left => self.turn(physical_to_logical(Physical::Left, self.direction), now),
            Zone::Right => self.turn(physical_to_logical(Physical::Right, self.direction), now),
        }
    }

    pub fn handle_key(&mut self, key: KeyCode, now: Instant) -> EpubKey {
        if !self.keys_bound {
            return EpubKey::Ignored;
        }
        match key {
            KeyCode::Left | KeyCode::Char('a') | KeyCode::Char('A') => {
                self.turn(physical_to_logical(Physical::Left, self.direction), now)
            }
            KeyCode::Right | KeyCode::Char('d') | KeyCode::Char('D') => {
                self.turn(physical_to_logical(Physical::Right, self.direction), now)
            }
            KeyCode::Up | KeyCode::PageUp => self.turn(Logical::Prev, now),
            KeyCode::Down | KeyCode::PageDown => self.turn(Logical::Next, now),
            KeyCode::Char(' ') => self.header_visible = !self.header_visible,
            KeyCode::Esc => return EpubKey::Back,
            _ => return EpubKey::Ignored,
        }
        EpubKey::Handled
    }

    pub fn resize(&mut self, width: u16, height: u16, now: Instant) {
        self.viewport = (width, height);
        if let Some(engine) = self.engine.as_mut() {
            let location = engine.resize(width, height);
            self.relocated(location, now);
        }
    }

    pub fn visible_lines(&self) -> Vec<String> {
        self.engine
            .as_ref()
            .map(|engine| engine.visible_lines())
            .unwrap_or_default()
    }

    /// Builds the location index a batch per tick once a book is shown,
    /// then persists any due save.
    pub fn tick(&mut self, now: Instant) -> Vec<Command> {
        if let Some(engine) = self.engine.as_mut() {
            if !engine.locations_ready() {
                engine.generate_locations();
                if engine.locations_ready() {
                    if let Some(location) = &self.location {
                        self.percentage = engine.percentage(location).unwrap_or(0);
                    }
                    if let Some(record) = self.progress_record() {
                        self.save.update(record);
                    }
                }
            }
        }
        self.save.poll(now).map(Command::SaveProgress).into_iter().collect()
    }

    /// Leaves the view: flushes progress, destroys the engine and
    /// unregisters the key handler.
    pub fn close(&mut self) -> Vec<Command> {
        let commands = self.save.flush().map(Command::SaveProgress).into_iter().collect();
        if self.engine.is_none() && self.pending.is_some() {
            warn!("Leaving EPUB view while it is still loading");
        }
        self.pending = None;
        self.teardown();
        self.path = None;
        commands
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::epub::EpubError;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct Log {
        pub(crate) destroyed: usize,
        displayed: Vec<Option<String>>,
        render: Option<RenderOptions>,
    }

    struct FakeEngine {
        page: usize,
        pages: usize,
        direction: PageDirection,
        writing_mode: WritingMode,
        ready: bool,
        log: Rc<RefCell<Log>>,
    }

    impl FakeEngine {
        fn at(&self) -> Location {
            Location {
                locator: format!("p{}", self.page),
            }
        }
    }

    impl EpubEngine for FakeEngine {
        fn direction(&self) -> PageDirection {
            self.direction
        }
        fn writing_mode(&self) -> WritingMode {
            self.writing_mode
        }
        fn render_to(&mut self, options: RenderOptions) {
            self.log.borrow_mut().render = Some(options);
        }
        fn display(&mut self, locator: Option<&str>) -> Location {
            self.log.borrow_mut().displayed.push(locator.map(str::to_string));
            self.page = locator
                .and_then(|l| l.strip_prefix('p'))
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            self.at()
        }
        fn prev(&mut self) -> Option<Location> {
            (self.page > 0).then(|| {
                self.page -= 1;
                self.at()
            })
        }
        fn next(&mut self) -> Option<Location> {
            (self.page + 1 < self.pages).then(|| {
                self.page += 1;
                self.at()
            })
        }
        fn resize(&mut self, _width: u16, _height: u16) -> Location {
            self.at()
        }
        fn locations_ready(&self) -> bool {
            self.ready
        }
        fn generate_locations(&mut self) {
            self.ready = true;
        }
        fn percentage(&self, location: &Location) -> Option<u8> {
            let page: usize = location.locator.strip_prefix('p')?.parse().ok()?;
            self.ready.then(|| ((page + 1) * 100 / self.pages) as u8)
        }
        fn visible_lines(&self) -> Vec<String> {
            vec![format!("page {}", self.page)]
        }
        fn destroy(&mut self) {
            self.log.borrow_mut().destroyed += 1;
        }
    }

    struct FakeOpener {
        direction: PageDirection,
        writing_mode: WritingMode,
        log: Rc<RefCell<Log>>,
    }

    impl EpubOpener for FakeOpener {
        fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn EpubEngine>, EpubError> {
            if bytes.is_empty() {
                return Err(EpubError::Empty);
            }
            Ok(Box::new(FakeEngine {
                page: 0,
                pages: 4,
                direction: self.direction,
                writing_mode: self.writing_mode,
                ready: false,
                log: self.log.clone(),
            }))
        }
    }

    pub(crate) fn reader(direction: PageDirection) -> (EpubReader, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let opener = FakeOpener {
            direction,
            writing_mode: WritingMode::Horizontal,
            log: log.clone(),
        };
        (EpubReader::new(Box::new(opener)), log)
    }

    fn fetch_generation(commands: &[Command]) -> u64 {
        commands
            .iter()
            .find_map(|c| match c {
                Command::FetchEpub { generation, .. } => Some(*generation),
                _ => None,
            })
            .expect("epub fetch")
    }

    fn open(epub: &mut EpubReader, locator: Option<&str>, history: Option<&str>, now: Instant) {
        let commands = epub.open("books/novel.epub", locator.map(str::to_string));
        let outcome = epub.archive_loaded(
            fetch_generation(&commands),
            Ok((vec![1], history.map(str::to_string))),
            now,
        );
        assert_eq!(outcome, EpubOutcome::Opened);
    }

    #[test]
    fn restores_locator_from_history_when_none_given() {
        let now = Instant::now();
        let (mut epub, log) = reader(PageDirection::Ltr);

        let commands = epub.open("books/novel.epub", None);
        assert!(matches!(
            commands.as_slice(),
            [Command::FetchEpub { lookup_history: true, .. }]
        ));
        epub.archive_loaded(fetch_generation(&commands), Ok((vec![1], Some("p2".into()))), now);

        assert_eq!(log.borrow().displayed, vec![Some("p2".to_string())]);
        assert_eq!(epub.location.as_ref().unwrap().locator, "p2");
        assert!(epub.keys_bound());
    }

    #[test]
    fn reopening_destroys_the_previous_engine() {
        let now = Instant::now();
        let (mut epub, log) = reader(PageDirection::Ltr);
        open(&mut epub, None, None, now);
        assert_eq!(log.borrow().destroyed, 0);

        epub.open("books/other.epub", None);
        assert_eq!(log.borrow().destroyed, 1);
        assert!(!epub.is_open());
        assert!(!epub.keys_bound());
    }

    #[test]
    fn rtl_books_swap_outer_zones() {
        let now = Instant::now();
        let (mut epub, _) = reader(PageDirection::Rtl);
        open(&mut epub, Some("p1"), None, now);

        epub.click(Zone::Left, now);
        assert_eq!(epub.location.as_ref().unwrap().locator, "p2");
        epub.click(Zone::Right, now);
        assert_eq!(epub.location.as_ref().unwrap().locator, "p1");

        epub.click(Zone::Middle, now);
        assert!(epub.header_visible);
    }

    #[test]
    fn relocation_saves_are_debounced_with_locator() {
        let start = Instant::now();
        let (mut epub, _) = reader(PageDirection::Ltr);
        open(&mut epub, None, None, start);

        let later = start + Duration::from_millis(500);
        epub.turn(Logical::Next, later);

        assert!(epub.tick(start + Duration::from_millis(1200)).is_empty());
        let saved = epub.tick(later + Duration::from_millis(1000));
        match saved.as_slice() {
            [Command::SaveProgress(record)] => {
                assert!(record.is_epub);
                assert_eq!(record.cfi.as_deref(), Some("p1"));
                assert_eq!(record.chapter_name, "novel.epub");
                // Locations were generated on the first tick.
                assert_eq!(record.image_index, 50);
            }
            other => panic!("expected one save, got {:?}", other),
        }
    }

    #[test]
    fn percentage_is_zero_until_locations_exist() {
        let now = Instant::now();
        let (mut epub, _) = reader(PageDirection::Ltr);
        open(&mut epub, Some("p3"), None, now);
        assert_eq!(epub.percentage, 0);
        epub.tick(now);
        assert_eq!(epub.percentage, 100);
    }

    #[test]
    fn vertical_books_get_horizontal_layout() {
        let now = Instant::now();
        let log = Rc::new(RefCell::new(Log::default()));
        let opener = FakeOpener {
            direction: PageDirection::Rtl,
            writing_mode: WritingMode::Vertical,
            log: log.clone(),
        };
        let mut epub = EpubReader::new(Box::new(opener));
        open(&mut epub, None, None, now);
        assert!(log.borrow().render.unwrap().force_horizontal);
    }

    #[test]
    fn close_unbinds_keys_and_flushes_progress() {
        let now = Instant::now();
        let (mut epub, log) = reader(PageDirection::Ltr);
        open(&mut epub, None, None, now);
        assert_eq!(epub.handle_key(KeyCode::Right, now), EpubKey::Handled);

        let commands = epub.close();
        assert!(matches!(commands.as_slice(), [Command::SaveProgress(_)]));
        assert_eq!(log.borrow().destroyed, 1);
        assert!(!epub.keys_bound());
        assert_eq!(epub.handle_key(KeyCode::Right, now), EpubKey::Ignored);
    }

    #[test]
    fn stale_and_broken_archives() {
        let now = Instant::now();
        let (mut epub, _) = reader(PageDirection::Ltr);
        let first = fetch_generation(&epub.open("a.epub", None));
        let second = fetch_generation(&epub.open("b.epub", None));

        assert_eq!(epub.archive_loaded(first, Ok((vec![1], None)), now), EpubOutcome::Stale);
        assert!(matches!(
            epub.archive_loaded(second, Ok((Vec::new(), None)), now),
            EpubOutcome::Failed(_)
        ));
        assert!(!epub.is_open());
    }
}
