mod app;
mod backend;
mod ui;

use app::{App, Command};
use backend::api::{
    ApiClient, ApiError, ChapterData, HistoryEntry, LibraryEntry, ServerConfig,
};
use backend::cache::ImageKey;
use backend::client_config::{ClientConfig, log_file_path};
use backend::epub::TextOpener;
use image::DynamicImage;
use ui::ui::{Presenter, ui};

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{error::Error, fs::OpenOptions, io, time::Instant};
use tokio::{sync::mpsc, task::JoinHandle};

enum BackgroundTask {
    ConfigLoaded(Result<ServerConfig, ApiError>),
    ConfigSaved(Result<(), ApiError>),
    ListLoaded { generation: u64, result: Result<Vec<LibraryEntry>, ApiError> },
    ChapterLoaded { generation: u64, result: Result<ChapterData, ApiError> },
    PageLoaded { generation: u64, result: Result<DynamicImage, ApiError> },
    Prefetched { key: ImageKey, epoch: u64, image: Option<DynamicImage> },
    EpubLoaded { generation: u64, result: Result<(Vec<u8>, Option<String>), ApiError> },
    ProgressSaved(Result<(), ApiError>),
    HistoryLoaded(Result<Vec<HistoryEntry>, ApiError>),
    HistoryDeleted(Result<(), ApiError>),
}

const TICK_MS: u64 = 50;

fn init_logging(config: &ClientConfig) {
    let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    let mut builder = env_logger::Builder::from_env(env);

    // The terminal belongs to the UI, so log lines go to a file.
    match OpenOptions::new().create(true).append(true).open(log_file_path()) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    builder.init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut config = ClientConfig::load();
    if let Some(url) = std::env::args().nth(1) {
        config.server_url = url;
    }
    init_logging(&config);
    info!("Starting against {}", config.server_url);

    let api = ApiClient::new(&config.server_url)?;
    debug!("API base {}", api.base_url());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut presenter = Presenter::new();
    let mut app = App::new(Box::new(TextOpener), config.swipe_threshold);
    if let Ok((width, height)) = crossterm::terminal::size() {
        app.resize(width, height, Instant::now());
    }

    let res = run_app(&mut terminal, &mut app, &mut presenter, &api).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!("{}", err);
        eprintln!("{err}");
    }
    info!("Exited");
    Ok(())
}

fn spawn_command(
    command: Command,
    api: &ApiClient,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> JoinHandle<()> {
    let api = api.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let task = match command {
            Command::LoadConfig => BackgroundTask::ConfigLoaded(api.config().await),
            Command::SaveConfig(update) => BackgroundTask::ConfigSaved(api.save_config(&update).await),
            Command::LoadList { path, generation } => BackgroundTask::ListLoaded {
                generation,
                result: api.list(&path).await,
            },
            Command::FetchChapter { path, generation } => BackgroundTask::ChapterLoaded {
                generation,
                result: api.chapter(&path).await,
            },
            Command::LoadPage { key, generation } => BackgroundTask::PageLoaded {
                generation,
                result: api.image(&key.chapter, &key.filename).await,
            },
            Command::Prefetch { key, epoch } => {
                let image = match api.image(&key.chapter, &key.filename).await {
                    Ok(image) => Some(image),
                    Err(err) => {
                        debug!("Prefetch of {} failed: {}", key.filename, err);
                        None
                    }
                };
                BackgroundTask::Prefetched { key, epoch, image }
            }
            Command::FetchEpub { path, generation, lookup_history } => BackgroundTask::EpubLoaded {
                generation,
                result: fetch_epub(&api, &path, lookup_history).await,
            },
            Command::SaveProgress(record) => {
                BackgroundTask::ProgressSaved(api.save_history(&record).await)
            }
            Command::LoadHistory => BackgroundTask::HistoryLoaded(api.history().await),
            Command::DeleteHistory(index) => {
                BackgroundTask::HistoryDeleted(api.delete_history(index).await)
            }
        };
        let _ = tx.send(task);
    })
}

/// Downloads the archive and, when asked, the last saved locator for it.
async fn fetch_epub(
    api: &ApiClient,
    path: &str,
    lookup_history: bool,
) -> Result<(Vec<u8>, Option<String>), ApiError> {
    let bytes = api.epub(path).await?;
    if !lookup_history {
        return Ok((bytes, None));
    }
    let locator = match api.history().await {
        Ok(entries) => entries
            .into_iter()
            .find(|entry| entry.is_epub && entry.path == path)
            .and_then(|entry| entry.epub_locator),
        Err(err) => {
            warn!("Could not look up saved position for {}: {}", path, err);
            None
        }
    };
    Ok((bytes, locator))
}

fn apply_task(app: &mut App, task: BackgroundTask) -> Vec<Command> {
    let now = Instant::now();
    match task {
        BackgroundTask::ConfigLoaded(result) => app.config_loaded(result),
        BackgroundTask::ConfigSaved(result) => {
            app.config_saved(result);
            Vec::new()
        }
        BackgroundTask::ListLoaded { generation, result } => {
            app.list_loaded(generation, result);
            Vec::new()
        }
        BackgroundTask::ChapterLoaded { generation, result } => {
            app.chapter_loaded(generation, result, now)
        }
        BackgroundTask::PageLoaded { generation, result } => app.page_loaded(generation, result, now),
        BackgroundTask::Prefetched { key, epoch, image } => {
            app.prefetch_done(key, epoch, image);
            Vec::new()
        }
        BackgroundTask::EpubLoaded { generation, result } => {
            app.epub_loaded(generation, result, now)
        }
        BackgroundTask::ProgressSaved(result) => {
            app.progress_saved(result);
            Vec::new()
        }
        BackgroundTask::HistoryLoaded(result) => {
            app.history_loaded(result);
            Vec::new()
        }
        BackgroundTask::HistoryDeleted(result) => app.history_deleted(result),
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    presenter: &mut Presenter,
    api: &ApiClient,
) -> io::Result<()> {
    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();
    let mut event_stream = EventStream::new();

    for command in app.startup() {
        spawn_command(command, api, &task_tx);
    }

    while !app.should_quit {
        terminal.draw(|f| ui(f, app, presenter))?;

        let mut commands = Vec::new();
        tokio::select! {
            // Wakes the loop for debounced saves
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(TICK_MS)) => {}

            Some(Ok(event)) = event_stream.next() => {
                let now = Instant::now();
                match event {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        commands = app.handle_key(key.code, now);
                    }
                    Event::Mouse(mouse) => commands = app.handle_mouse(mouse, now),
                    Event::Resize(width, height) => app.resize(width, height, now),
                    _ => {}
                }
            }

            Some(task) = task_rx.recv() => {
                commands = apply_task(app, task);
            }
        }

        commands.extend(app.tick(Instant::now()));
        for command in commands {
            spawn_command(command, api, &task_tx);
        }
    }

    let pending: Vec<JoinHandle<()>> = app
        .shutdown()
        .into_iter()
        .map(|command| spawn_command(command, api, &task_tx))
        .collect();
    for handle in pending {
        let _ = handle.await;
    }
    Ok(())
}
