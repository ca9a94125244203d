use chrono::{DateTime, Local, NaiveDateTime};
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Server(String),
    #[error("response carried no data")]
    MissingData,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform `{success, data, error}` wrapper used by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ApiError> {
        self.into_result()?.ok_or(ApiError::MissingData)
    }

    fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ApiError::Server(
                self.error.unwrap_or_else(|| "unknown server error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[serde(alias = "manga", alias = "chapter")]
    Folder,
    Image,
    Epub,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, alias = "mtime", alias = "modified")]
    pub modified_time: Option<i64>,
    #[serde(default, alias = "size")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AdjacentChapters {
    pub previous: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChapterData {
    pub images: Vec<String>,
    #[serde(default)]
    pub adjacent_chapters: AdjacentChapters,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "manga_path")]
    pub path: String,
    #[serde(rename = "chapter_name")]
    pub display_name: String,
    #[serde(rename = "image_index")]
    pub position_index: i64,
    #[serde(rename = "total_images")]
    pub total_units: i64,
    #[serde(default, rename = "timestamp", deserialize_with = "timestamp_ms")]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub is_epub: bool,
    #[serde(default, rename = "cfi")]
    pub epub_locator: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Iso(String),
}

/// Accepts epoch milliseconds or ISO-8601 text. The server writes naive
/// wall-clock time, which is read in the local zone; unparsable text is 0.
fn timestamp_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => ms,
        RawTimestamp::Fractional(ms) => ms as i64,
        RawTimestamp::Iso(text) => local_millis(&text).unwrap_or(0),
    })
}

fn local_millis(text: &str) -> Option<i64> {
    if let Ok(stamped) = DateTime::parse_from_rfc3339(text) {
        return Some(stamped.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|stamp| stamp.timestamp_millis())
}

impl HistoryEntry {
    pub fn progress_percent(&self) -> f64 {
        if self.is_epub {
            return self.position_index.clamp(0, 100) as f64;
        }
        if self.total_units <= 0 {
            return 0.0;
        }
        ((self.position_index + 1) as f64 / self.total_units as f64 * 100.0).min(100.0)
    }
}

/// Body of `POST /api/history`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryWrite {
    pub manga_path: String,
    pub chapter_name: String,
    pub image_index: i64,
    pub total_images: i64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_epub: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfi: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl ReadingDirection {
    pub fn toggled(self) -> Self {
        match self {
            ReadingDirection::LeftToRight => ReadingDirection::RightToLeft,
            ReadingDirection::RightToLeft => ReadingDirection::LeftToRight,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub base_paths: Vec<String>,
    #[serde(default)]
    pub current_base_path: Option<String>,
    #[serde(default)]
    pub reading_direction: Option<ReadingDirection>,
    #[serde(default)]
    pub preload_buffer: Option<usize>,
}

/// Partial body of `POST /api/config`; the server merges present keys only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_base_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_direction: Option<ReadingDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload_buffer: Option<usize>,
}

fn encode_path(path: &str) -> String {
    urlencoding::encode(path).into_owned()
}

pub fn list_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        format!("{}/api/manga", base)
    } else {
        format!("{}/api/manga?path={}", base, encode_path(path))
    }
}

pub fn chapter_url(base: &str, chapter: &str) -> String {
    format!("{}/api/manga/{}", base, encode_path(chapter))
}

pub fn image_url(base: &str, chapter: &str, filename: &str) -> String {
    format!(
        "{}/api/image/{}/{}",
        base,
        encode_path(chapter),
        encode_path(filename)
    )
}

pub fn epub_url(base: &str, path: &str) -> String {
    format!("{}/api/epub/{}", base, encode_path(path))
}

fn build_client() -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .user_agent("Shelf-TUI/0.1.0")
        .build()?)
}

/// Thin client for the media server's JSON API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let envelope: Envelope<T> = self.client.get(url).send().await?.json().await?;
        envelope.into_data()
    }

    pub async fn list(&self, path: &str) -> Result<Vec<LibraryEntry>, ApiError> {
        self.get_json(&list_url(&self.base_url, path)).await
    }

    pub async fn chapter(&self, chapter: &str) -> Result<ChapterData, ApiError> {
        self.get_json(&chapter_url(&self.base_url, chapter)).await
    }

    pub async fn image(&self, chapter: &str, filename: &str) -> Result<DynamicImage, ApiError> {
        let url = image_url(&self.base_url, chapter, filename);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        let image = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?;
        Ok(image)
    }

    pub async fn epub(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = epub_url(&self.base_url, path);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        self.get_json(&format!("{}/api/history", self.base_url)).await
    }

    pub async fn save_history(&self, record: &HistoryWrite) -> Result<(), ApiError> {
        let url = format!("{}/api/history", self.base_url);
        let envelope: Envelope<serde_json::Value> =
            self.client.post(&url).json(record).send().await?.json().await?;
        envelope.into_result().map(|_| ())
    }

    pub async fn delete_history(&self, index: usize) -> Result<(), ApiError> {
        let url = format!("{}/api/history/{}", self.base_url, index);
        let envelope: Envelope<serde_json::Value> =
            self.client.delete(&url).send().await?.json().await?;
        envelope.into_result().map(|_| ())
    }

    pub async fn config(&self) -> Result<ServerConfig, ApiError> {
        self.get_json(&format!("{}/api/config", self.base_url)).await
    }

    pub async fn save_config(&self, update: &ConfigUpdate) -> Result<(), ApiError> {
        let url = format!("{}/api/config", self.base_url);
        let envelope: Envelope<serde_json::Value> =
            self.client.post(&url).json(update).send().await?.json().await?;
        envelope.into_result().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn chapter_envelope_parses_adjacent_links() {
        let body = r#"{
            "success": true,
            "data": {
                "manga_path": "series/ch01",
                "images": ["001.jpg", "002.jpg"],
                "adjacent_chapters": {"previous": null, "next": "series/ch02"}
            }
        }"#;
        let envelope: Envelope<ChapterData> = serde_json::from_str(body).unwrap();
        let chapter = envelope.into_data().unwrap();

        assert_eq!(chapter.images, vec!["001.jpg", "002.jpg"]);
        assert_eq!(chapter.adjacent_chapters.previous, None);
        assert_eq!(chapter.adjacent_chapters.next.as_deref(), Some("series/ch02"));
    }

    #[test]
    fn failed_envelope_surfaces_server_message() {
        let body = r#"{"success": false, "error": "Image not found"}"#;
        let envelope: Envelope<ChapterData> = serde_json::from_str(body).unwrap();

        match envelope.into_data() {
            Err(ApiError::Server(msg)) => assert_eq!(msg, "Image not found"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn successful_envelope_without_data_is_an_error() {
        let envelope: Envelope<ServerConfig> = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(matches!(envelope.into_data(), Err(ApiError::MissingData)));
    }

    #[test]
    fn listing_accepts_optional_metadata() {
        let body = r#"[
            {"name": "Vol 1", "type": "folder"},
            {"name": "cover.png", "type": "image", "modified_time": 1700000000, "size_bytes": 2048},
            {"name": "novel.epub", "type": "epub", "size": 99}
        ]"#;
        let entries: Vec<LibraryEntry> = serde_json::from_str(body).unwrap();

        assert_eq!(entries[0].kind, EntryKind::Folder);
        assert_eq!(entries[0].modified_time, None);
        assert_eq!(entries[1].size_bytes, Some(2048));
        assert_eq!(entries[2].kind, EntryKind::Epub);
        assert_eq!(entries[2].size_bytes, Some(99));
    }

    #[test]
    fn history_write_omits_epub_fields_for_images() {
        let record = HistoryWrite {
            manga_path: "a/b".into(),
            chapter_name: "b".into(),
            image_index: 3,
            total_images: 10,
            is_epub: false,
            cfi: None,
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["manga_path"], "a/b");
        assert!(json.get("is_epub").is_none());
        assert!(json.get("cfi").is_none());
    }

    #[test]
    fn config_update_serializes_only_present_keys() {
        let update = ConfigUpdate {
            base_paths: Some(vec!["/lib/b".into()]),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"base_paths":["/lib/b"]}"#);

        let update = ConfigUpdate {
            reading_direction: Some(ReadingDirection::RightToLeft),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"reading_direction":"right_to_left"}"#);
    }

    #[test]
    fn urls_encode_path_segments() {
        assert_eq!(list_url("http://h", ""), "http://h/api/manga");
        assert_eq!(list_url("http://h", "a b/c"), "http://h/api/manga?path=a%20b%2Fc");
        assert_eq!(
            image_url("http://h", "vol 1/ch#2", "p 01.jpg"),
            "http://h/api/image/vol%201%2Fch%232/p%2001.jpg"
        );
    }

    #[test]
    fn history_timestamps_accept_iso_and_millis() {
        let body = r#"[
            {"manga_path": "a", "chapter_name": "a", "image_index": 0, "total_images": 3,
             "timestamp": "2000-03-01T00:00:01.250000"},
            {"manga_path": "b", "chapter_name": "b", "image_index": 1, "total_images": 3,
             "timestamp": 1700000000000, "is_epub": true, "cfi": "2:40"},
            {"manga_path": "c", "chapter_name": "c", "image_index": 2, "total_images": 3}
        ]"#;
        let entries: Vec<HistoryEntry> = serde_json::from_str(body).unwrap();

        let wall_clock = NaiveDate::from_ymd_opt(2000, 3, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 1, 250)
            .unwrap();
        let expected = Local.from_local_datetime(&wall_clock).earliest().unwrap();
        assert_eq!(entries[0].timestamp_ms, expected.timestamp_millis());
        assert_eq!(entries[1].timestamp_ms, 1_700_000_000_000);
        assert_eq!(entries[1].epub_locator.as_deref(), Some("2:40"));
        assert_eq!(entries[2].timestamp_ms, 0);
        assert_eq!(local_millis("yesterday"), None);
    }

    #[test]
    fn naive_timestamps_are_local_wall_clock() {
        let just_saved = Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        let age = Local::now().timestamp_millis() - local_millis(&just_saved).unwrap();
        assert!((0..60_000).contains(&age), "age was {age} ms");

        assert_eq!(local_millis("2000-03-01T00:00:01+00:00"), Some(951_868_801_000));
        assert_eq!(local_millis("2000-03-01T01:00:01+01:00"), Some(951_868_801_000));
    }

    #[test]
    fn history_progress_handles_both_kinds() {
        let mut entry = HistoryEntry {
            path: "x".into(),
            display_name: "x".into(),
            position_index: 4,
            total_units: 10,
            timestamp_ms: 0,
            is_epub: false,
            epub_locator: None,
        };
        assert_eq!(entry.progress_percent(), 50.0);

        entry.is_epub = true;
        entry.position_index = 37;
        entry.total_units = 100;
        assert_eq!(entry.progress_percent(), 37.0);
    }
}
