use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};

use crate::app::reader::{PageView, ReaderPhase};
use crate::app::{App, Confirm, View};
use crate::backend::api::{EntryKind, ReadingDirection};
use crate::backend::epub::PageDirection;
use chrono::Local;

/// Terminal graphics state that lives outside [`App`].
pub struct Presenter {
    picker: Option<Picker>,
    page: Option<(u64, StatefulProtocol)>,
}

impl Presenter {
    /// Must run after raw mode is enabled so the terminal can be queried.
    pub fn new() -> Self {
        Self {
            picker: Picker::from_query_stdio().ok(),
            page: None,
        }
    }

    /// Encodes the shown page once per page request.
    fn page_state(&mut self, app: &App) -> Option<&mut StatefulProtocol> {
        let PageView::Shown(image) = &app.reader.page else {
            self.page = None;
            return None;
        };
        let generation = app.reader.page_generation();
        let stale = !matches!(&self.page, Some((g, _)) if *g == generation);
        if stale {
            let picker = self.picker.as_ref()?;
            self.page = Some((generation, picker.new_resize_protocol(image.clone())));
        }
        self.page.as_mut().map(|(_, state)| state)
    }
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new()
    }
}

const ACCENT: Color = Color::Cyan;
const KEY: Color = Color::Yellow;

pub fn ui(f: &mut Frame, app: &App, presenter: &mut Presenter) {
    match app.view {
        View::Reader => draw_reader(f, app, presenter),
        View::Epub => draw_epub(f, app),
        View::List => draw_framed(f, app, draw_library),
        View::History => draw_framed(f, app, draw_history),
        View::Settings => draw_framed(f, app, draw_settings),
    }

    if let Some(confirm) = &app.confirm {
        let text = match confirm {
            Confirm::PreviousChapter(path) => {
                format!("Go to previous chapter \"{}\"?", display(path))
            }
            Confirm::RemovePath(path) => format!("Remove library path \"{}\"?", path),
        };
        draw_modal(f, "Confirm", &text, "y: yes  n: no", KEY);
    } else if let Some(notice) = &app.notice {
        draw_modal(f, "Error", notice, "press any key", Color::Red);
    }
}

fn draw_framed(f: &mut Frame, app: &App, body: fn(&mut Frame, Rect, &App)) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(5),    // content
            Constraint::Length(3), // footer
        ])
        .split(f.area());

    draw_header(f, root[0], app);
    body(f, root[1], app);
    draw_footer(f, root[2], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let titles = [(View::List, "Library"), (View::History, "History"), (View::Settings, "Settings")];
    let mut spans: Vec<Span> = Vec::new();
    for (view, title) in titles {
        let style = if app.view == view {
            Style::default().fg(KEY).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(format!(" {} ", title), style));
    }
    spans.push(Span::styled(
        format!("  {}", app.settings.current_base_path),
        Style::default().fg(Color::DarkGray),
    ));

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Shelf")
            .border_style(Style::default().fg(ACCENT)),
    );
    f.render_widget(header, area);
}

fn draw_library(f: &mut Frame, area: Rect, app: &App) {
    let library = &app.library;
    let mut crumbs = vec!["Home"];
    crumbs.extend(library.breadcrumb());
    let title = format!(
        "{}  [sort: {} {}]",
        crumbs.join(" › "),
        library.sort.label(),
        if library.descending { "↓" } else { "↑" }
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .title(truncate_text(&title, area.width.saturating_sub(4) as usize))
        .border_style(Style::default().fg(Color::White));

    if library.entries.is_empty() {
        let text = if library.loading { "Loading..." } else { "Nothing here" };
        let empty = Paragraph::new(text)
            .block(block)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(empty, area);
        return;
    }

    let width = area.width.saturating_sub(16) as usize;
    let items: Vec<ListItem> = library
        .entries
        .iter()
        .map(|entry| {
            let (icon, color) = match entry.kind {
                EntryKind::Folder => ("📁", Color::Blue),
                EntryKind::Image => ("🖼", Color::Magenta),
                EntryKind::Epub => ("📖", Color::Green),
            };
            let size = entry.size_bytes.map(format_size).unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::raw(format!("{} ", icon)),
                Span::styled(truncate_text(&entry.name, width), Style::default().fg(color)),
                Span::styled(format!("  {}", size), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(library.cursor));
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_history(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Recently read")
        .border_style(Style::default().fg(Color::White));

    if app.history.entries.is_empty() {
        let text = if app.history.loading { "Loading..." } else { "No reading history yet" };
        let empty = Paragraph::new(text)
            .block(block)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(empty, area);
        return;
    }

    let now_ms = Local::now().timestamp_millis();
    let width = area.width.saturating_sub(40) as usize;
    let items: Vec<ListItem> = app
        .history
        .entries
        .iter()
        .map(|entry| {
            let position = if entry.is_epub {
                format!("{}%", entry.position_index)
            } else {
                format!(
                    "{}/{}  {:.0}%",
                    entry.position_index + 1,
                    entry.total_units,
                    entry.progress_percent()
                )
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    truncate_text(&entry.display_name, width),
                    Style::default().fg(Color::White),
                ),
                Span::styled(format!("  {}", position), Style::default().fg(Color::DarkGray)),
                Span::styled(
                    format!("  {}", time_ago(entry.timestamp_ms, now_ms)),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.history.cursor));
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_settings(f: &mut Frame, area: Rect, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(4), Constraint::Length(3)])
        .split(area);

    let items: Vec<ListItem> = app
        .settings
        .base_paths
        .iter()
        .map(|path| {
            let active = *path == app.settings.current_base_path;
            let marker = if active { "● " } else { "  " };
            let style = if active {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(Span::styled(format!("{}{}", marker, path), style))
        })
        .collect();
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Library paths")
                .border_style(Style::default().fg(Color::White)),
        )
        .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");
    let mut state = ListState::default().with_selected(Some(app.settings_cursor));
    f.render_stateful_widget(list, layout[0], &mut state);

    let direction = match app.settings.reading_direction {
        ReadingDirection::LeftToRight => "left to right",
        ReadingDirection::RightToLeft => "right to left",
    };
    let reading = Paragraph::new(vec![
        Line::from(vec![
            Span::raw("Reading direction: "),
            Span::styled(direction, Style::default().fg(KEY)),
        ]),
        Line::from(vec![
            Span::raw("Preload buffer: "),
            Span::styled(app.settings.preload_buffer.to_string(), Style::default().fg(KEY)),
            Span::styled(
                format!("  (cache holds {} pages)", app.reader.cache.capacity()),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Reading"));
    f.render_widget(reading, layout[1]);

    if let Some(input) = &app.path_input {
        let entry = Paragraph::new(format!("{}▏", input)).block(
            Block::default()
                .borders(Borders::ALL)
                .title("New path (Enter to add, Esc to cancel)")
                .border_style(Style::default().fg(KEY)),
        );
        f.render_widget(entry, layout[2]);
    }
}

fn draw_reader(f: &mut Frame, app: &App, presenter: &mut Presenter) {
    let area = f.area();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    let reader = &app.reader;
    match &reader.page {
        PageView::Shown(_) => match presenter.page_state(app) {
            Some(state) => {
                let image = StatefulImage::new().resize(Resize::Scale(None));
                f.render_stateful_widget(image, layout[0], state);
            }
            None => draw_centered(f, layout[0], "This terminal cannot display images", Color::DarkGray),
        },
        PageView::Failed(message) => draw_centered(f, layout[0], message, Color::Red),
        PageView::Loading => draw_centered(f, layout[0], "Loading...", Color::DarkGray),
        PageView::Blank => {}
    }

    let count = reader.image_count();
    let chapter = reader.chapter.as_ref().map(|c| display(&c.path)).unwrap_or_default();
    let direction = match app.settings.reading_direction {
        ReadingDirection::LeftToRight => "LTR",
        ReadingDirection::RightToLeft => "RTL",
    };
    let file = reader.current_file().unwrap_or_default();
    let mut spans = vec![
        Span::styled(chapter, Style::default().fg(ACCENT)),
        Span::raw(format!("  {}/{}  {}  {}", reader.index + 1, count, file, direction)),
        Span::styled(
            format!("  cache {}/{}", reader.cache.len(), reader.cache.capacity()),
            Style::default().fg(Color::DarkGray),
        ),
    ];
    if reader.phase == ReaderPhase::PageLoading {
        spans.push(Span::styled("  loading", Style::default().fg(Color::DarkGray)));
    }
    if let Some(status) = &app.status {
        spans.push(Span::styled(format!("  {}", status), Style::default().fg(Color::Red)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), layout[1]);

    if app.overlays.slider {
        let slider_area = Rect::new(area.x, area.bottom().saturating_sub(4), area.width, 3);
        let rtl = app.settings.reading_direction == ReadingDirection::RightToLeft;
        let bar = slider_bar(reader.index, count, slider_area.width.saturating_sub(2) as usize, rtl);
        let slider = Paragraph::new(bar)
            .style(Style::default().fg(KEY))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(
                        "Page {}/{}  {}  (Home/End, Esc to close)",
                        reader.index + 1,
                        count,
                        reader.current_file().unwrap_or_default()
                    ))
                    .border_style(Style::default().fg(ACCENT)),
            );
        f.render_widget(Clear, slider_area);
        f.render_widget(slider, slider_area);
    }

    if app.overlays.chapter_nav {
        let next = reader.next_chapter().map(display).unwrap_or_default();
        draw_modal(
            f,
            "End of chapter",
            &format!("Next: {}", next),
            "Enter: next chapter  Esc: stay",
            ACCENT,
        );
    }
}

fn draw_epub(f: &mut Frame, app: &App) {
    let area = f.area();
    let epub = &app.epub;
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    if !epub.is_open() {
        draw_centered(f, layout[0], "Opening book...", Color::DarkGray);
        return;
    }
    let lines: Vec<Line> = epub.visible_lines().into_iter().map(Line::from).collect();
    f.render_widget(Paragraph::new(lines), layout[0]);

    let name = epub.path.as_deref().map(display).unwrap_or_default();
    let footer = Line::from(vec![
        Span::styled(name, Style::default().fg(ACCENT)),
        Span::raw(format!("  {}%", epub.percentage)),
    ]);
    f.render_widget(Paragraph::new(footer).alignment(Alignment::Right), layout[1]);

    if epub.header_visible {
        let direction = match epub.direction {
            PageDirection::Ltr => "left to right",
            PageDirection::Rtl => "right to left",
        };
        let header_area = Rect::new(area.x, area.y, area.width, 3.min(area.height));
        let hint = if epub.keys_bound() { "  Esc: back  ←/→: turn" } else { "" };
        let header = Paragraph::new(format!("{}{}", direction, hint))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(epub.path.as_deref().unwrap_or_default())
                .border_style(Style::default().fg(ACCENT)),
        );
        f.render_widget(Clear, header_area);
        f.render_widget(header, header_area);
    }
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let keys: &[(&str, &str)] = match app.view {
        View::List => &[
            ("Enter", "open"),
            ("o", "read folder"),
            ("Bksp", "up"),
            ("s/S", "sort/order"),
            ("h", "history"),
            ("c", "settings"),
            ("q", "quit"),
        ],
        View::History => &[("Enter", "resume"), ("d", "delete"), ("r", "reload"), ("Esc", "back")],
        View::Settings => &[
            ("a", "add"),
            ("Enter", "select"),
            ("x", "remove"),
            ("r", "direction"),
            ("+/-", "preload"),
            ("Esc", "back"),
        ],
        View::Reader | View::Epub => &[],
    };

    let mut spans = Vec::new();
    for (key, action) in keys {
        spans.push(Span::styled(*key, Style::default().fg(KEY)));
        spans.push(Span::raw(format!(": {}  ", action)));
    }
    if let Some(status) = &app.status {
        spans.push(Span::styled(status.as_str(), Style::default().fg(Color::DarkGray)));
    }

    let p = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

fn draw_centered(f: &mut Frame, area: Rect, text: &str, color: Color) {
    let middle = Rect::new(area.x, area.y + area.height / 2, area.width, 1.min(area.height));
    let p = Paragraph::new(text)
        .style(Style::default().fg(color))
        .alignment(Alignment::Center);
    f.render_widget(p, middle);
}

fn draw_modal(f: &mut Frame, title: &str, text: &str, hint: &str, color: Color) {
    let area = centered_rect(f.area(), 50, 7);
    let body = vec![
        Line::from(text.to_string()),
        Line::from(""),
        Line::from(Span::styled(hint.to_string(), Style::default().fg(Color::DarkGray))),
    ];
    let modal = Paragraph::new(body)
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title.to_string())
                .border_style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
        );
    f.render_widget(Clear, area);
    f.render_widget(modal, area);
}

fn centered_rect(area: Rect, percent_x: u16, height: u16) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x) / 100) as u16;
    let width = width.max(30).min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn display(path: &str) -> String {
    crate::app::library::display_name(path)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn time_ago(timestamp_ms: i64, now_ms: i64) -> String {
    if timestamp_ms <= 0 {
        return String::new();
    }
    let minutes = (now_ms - timestamp_ms).max(0) / 60_000;
    match minutes {
        0 => "just now".to_string(),
        1..=59 => format!("{}m ago", minutes),
        60..=1439 => format!("{}h ago", minutes / 60),
        _ => format!("{}d ago", minutes / 1440),
    }
}

/// Renders a page slider; the thumb runs right to left for RTL reading.
fn slider_bar(index: usize, count: usize, width: usize, rtl: bool) -> String {
    if width == 0 {
        return String::new();
    }
    let mut position = if count > 1 {
        index.min(count - 1) * (width - 1) / (count - 1)
    } else {
        0
    };
    if rtl {
        position = width - 1 - position;
    }
    (0..width)
        .map(|i| if i == position { '●' } else { '─' })
        .collect()
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slider_thumb_follows_direction() {
        assert_eq!(slider_bar(0, 5, 5, false), "●────");
        assert_eq!(slider_bar(4, 5, 5, false), "────●");
        assert_eq!(slider_bar(0, 5, 5, true), "────●");
        assert_eq!(slider_bar(0, 1, 3, false), "●──");
        assert_eq!(slider_bar(2, 3, 0, false), "");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn timestamps_are_relative() {
        let now = 10 * 86_400_000;
        assert_eq!(time_ago(now - 30_000, now), "just now");
        assert_eq!(time_ago(now - 5 * 60_000, now), "5m ago");
        assert_eq!(time_ago(now - 3 * 3_600_000, now), "3h ago");
        assert_eq!(time_ago(now - 2 * 86_400_000, now), "2d ago");
        assert_eq!(time_ago(0, now), "");
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate_text("chapter", 10), "chapter");
        assert_eq!(truncate_text("a very long chapter", 10), "a very ...");
    }
}
