use crate::backend::api::HistoryEntry;

/// Where resuming a history entry leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    Chapter { path: String, index: usize },
    Epub { path: String, locator: Option<String> },
}

#[derive(Debug, Default)]
pub struct History {
    pub entries: Vec<HistoryEntry>,
    pub cursor: usize,
    pub loading: bool,
}

impl History {
    pub fn set_entries(&mut self, entries: Vec<HistoryEntry>) {
        self.loading = false;
        self.entries = entries;
        self.cursor = self.cursor.min(self.entries.len().saturating_sub(1));
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let max = self.entries.len().saturating_sub(1);
        self.cursor = self.cursor.saturating_add_signed(delta).min(max);
    }

    pub fn selected_index(&self) -> Option<usize> {
        (self.cursor < self.entries.len()).then_some(self.cursor)
    }

    pub fn resume_target(&self) -> Option<Resume> {
        let entry = self.entries.get(self.cursor)?;
        Some(if entry.is_epub {
            Resume::Epub {
                path: entry.path.clone(),
                locator: entry.epub_locator.clone(),
            }
        } else {
            Resume::Chapter {
                path: entry.path.clone(),
                index: entry.position_index.max(0) as usize,
            }
        })
    }
}
