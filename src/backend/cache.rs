use image::DynamicImage;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;

/// Identifies one page of one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub chapter: String,
    pub filename: String,
}

impl ImageKey {
    pub fn new(chapter: &str, filename: &str) -> Self {
        Self {
            chapter: chapter.to_string(),
            filename: filename.to_string(),
        }
    }
}

/// Neighbouring page window around `current`, clamped to the chapter.
///
/// Returns `None` for an empty chapter. The window still contains
/// `current`; callers skip it.
pub fn prefetch_window(
    current: usize,
    image_count: usize,
    buffer: usize,
) -> Option<RangeInclusive<usize>> {
    if image_count == 0 {
        return None;
    }
    let start = current.saturating_sub(buffer / 2);
    let end = (image_count - 1).min(current + buffer.div_ceil(2));
    Some(start..=end)
}

/// Bounded set of prefetched pages with insertion-order eviction.
///
/// Re-requesting a cached key never moves it to the back of the queue.
/// Every `clear` bumps the epoch so completions issued earlier can be
/// recognised and dropped.
pub struct ImageCache {
    pages: HashMap<ImageKey, DynamicImage>,
    insertion_order: VecDeque<ImageKey>,
    in_flight: HashSet<ImageKey>,
    preload_buffer: usize,
    epoch: u64,
}

impl ImageCache {
    pub fn new(preload_buffer: usize) -> Self {
        Self {
            pages: HashMap::new(),
            insertion_order: VecDeque::new(),
            in_flight: HashSet::new(),
            preload_buffer,
            epoch: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.preload_buffer * 3
    }

    pub fn preload_buffer(&self) -> usize {
        self.preload_buffer
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn get(&self, key: &ImageKey) -> Option<&DynamicImage> {
        self.pages.get(key)
    }

    /// Marks `key` as requested. Returns `false` when it is cached or
    /// already being fetched, in which case no fetch should be issued.
    pub fn try_prefetch(&mut self, key: &ImageKey) -> bool {
        if self.pages.contains_key(key) || self.in_flight.contains(key) {
            return false;
        }
        self.in_flight.insert(key.clone());
        true
    }

    /// Records a finished prefetch. Failures and completions from an older
    /// epoch leave the cache untouched. Returns whether the key was stored.
    pub fn complete(&mut self, key: ImageKey, epoch: u64, image: Option<DynamicImage>) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.in_flight.remove(&key);
        let Some(image) = image else {
            return false;
        };
        if self.pages.insert(key.clone(), image).is_none() {
            self.insertion_order.push_back(key);
        }
        while self.pages.len() > self.capacity() {
            match self.insertion_order.pop_front() {
                Some(oldest) => {
                    self.pages.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.insertion_order.clear();
        self.in_flight.clear();
        self.epoch += 1;
    }

    /// Changing the buffer invalidates the eviction target, so the cache
    /// is emptied.
    pub fn set_preload_buffer(&mut self, preload_buffer: usize) {
        self.preload_buffer = preload_buffer;
        self.clear();
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(3)
    }
}
