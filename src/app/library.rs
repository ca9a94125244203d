use crate::backend::api::{EntryKind, LibraryEntry};
use std::cmp::Ordering;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SortKey {
    #[default]
    Name,
    Modified,
    Size,
}

impl SortKey {
    pub fn next(self) -> Self {
        match self {
            SortKey::Name => SortKey::Modified,
            SortKey::Modified => SortKey::Size,
            SortKey::Size => SortKey::Name,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Modified => "modified",
            SortKey::Size => "size",
        }
    }
}

/// One directory level of the active base path.
#[derive(Debug, Default)]
pub struct Library {
    pub path: String,
    pub entries: Vec<LibraryEntry>,
    pub cursor: usize,
    pub sort: SortKey,
    pub descending: bool,
    pub loading: bool,
    pending_path: String,
    generation: u64,
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

pub fn parent_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

pub fn display_name(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
        .to_string()
}

impl Library {
    /// Starts a listing request for `path`; returns its generation.
    pub fn begin_load(&mut self, path: &str) -> u64 {
        self.generation += 1;
        self.pending_path = path.to_string();
        self.loading = true;
        self.generation
    }

    /// Applies a listing and moves to its path. Stale generations are
    /// ignored and return `false`.
    pub fn finish_load(&mut self, generation: u64, entries: Vec<LibraryEntry>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.loading = false;
        self.path = std::mem::take(&mut self.pending_path);
        self.entries = entries;
        self.cursor = 0;
        self.sort_entries();
        true
    }

    pub fn fail_load(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.loading = false;
        true
    }

    pub fn breadcrumb(&self) -> Vec<&str> {
        self.path.split('/').filter(|p| !p.is_empty()).collect()
    }

    pub fn selected(&self) -> Option<&LibraryEntry> {
        self.entries.get(self.cursor)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.entries.is_empty() {
            self.cursor = 0;
            return;
        }
        let max = self.entries.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(max);
    }

    pub fn cycle_sort(&mut self) {
        self.sort = self.sort.next();
        self.sort_entries();
    }

    pub fn toggle_order(&mut self) {
        self.descending = !self.descending;
        self.sort_entries();
    }

    fn sort_entries(&mut self) {
        let key = self.sort;
        let descending = self.descending;
        self.entries.sort_by(|a, b| {
            let folders_first = (a.kind != EntryKind::Folder).cmp(&(b.kind != EntryKind::Folder));
            if folders_first != Ordering::Equal {
                return folders_first;
            }
            let by_key = match key {
                SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                SortKey::Modified => a.modified_time.cmp(&b.modified_time),
                SortKey::Size => a.size_bytes.cmp(&b.size_bytes),
            }
            .then_with(|| a.name.cmp(&b.name));
            if descending { by_key.reverse() } else { by_key }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: EntryKind, mtime: i64, size: u64) -> LibraryEntry {
        LibraryEntry {
            name: name.to_string(),
            kind,
            modified_time: Some(mtime),
            size_bytes: Some(size),
        }
    }

    fn names(lib: &Library) -> Vec<&str> {
        lib.entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn sample() -> Vec<LibraryEntry> {
        vec![
            entry("b.jpg", EntryKind::Image, 3, 10),
            entry("Zeta", EntryKind::Folder, 1, 0),
            entry("a.epub", EntryKind::Epub, 2, 30),
            entry("alpha", EntryKind::Folder, 5, 0),
        ]
    }

    #[test]
    fn folders_first_then_by_key() {
        let mut lib = Library::default();
        let generation = lib.begin_load("");
        assert!(lib.finish_load(generation, sample()));
        assert_eq!(names(&lib), vec!["alpha", "Zeta", "a.epub", "b.jpg"]);

        lib.cycle_sort();
        assert_eq!(lib.sort, SortKey::Modified);
        assert_eq!(names(&lib), vec!["Zeta", "alpha", "a.epub", "b.jpg"]);

        lib.cycle_sort();
        lib.toggle_order();
        assert_eq!(names(&lib), vec!["alpha", "Zeta", "a.epub", "b.jpg"]);
        assert_eq!(lib.sort, SortKey::Size);
    }

    #[test]
    fn stale_listing_is_ignored() {
        let mut lib = Library::default();
        let first = lib.begin_load("a");
        let second = lib.begin_load("b");
        assert!(!lib.finish_load(first, sample()));
        assert!(lib.entries.is_empty());
        assert!(lib.finish_load(second, sample()));
        assert_eq!(lib.path, "b");
    }

    #[test]
    fn path_helpers() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
        assert_eq!(parent_path("a/b/c"), "a/b");
        assert_eq!(parent_path("a"), "");
        assert_eq!(display_name("series/vol 1/ch 3"), "ch 3");
        assert_eq!(display_name("single"), "single");
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let mut lib = Library::default();
        let generation = lib.begin_load("");
        lib.finish_load(generation, sample());
        lib.move_cursor(-3);
        assert_eq!(lib.cursor, 0);
        lib.move_cursor(10);
        assert_eq!(lib.cursor, 3);
        assert_eq!(lib.selected().map(|e| e.name.as_str()), Some("b.jpg"));
    }
}
