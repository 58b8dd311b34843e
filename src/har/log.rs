use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};

use super::model::{Creator, Entry, Har, Log, Page, PageTimings};
use crate::error::Result;

pub const HAR_VERSION: &str = "1.2";
pub const DEFAULT_PAGE_ID: &str = "page_1";

/// Overrides for the single page record created by [`create_har_log`].
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub started_date_time: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub page_timings: Option<PageTimings>,
}

impl PageInfo {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

pub fn creator() -> Creator {
    Creator {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Format a wall-clock time the way HAR viewers expect
/// (`2024-01-15T10:30:00.123Z`).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build a HAR 1.2 log with one page and the given entries.
pub fn create_har_log(entries: Vec<Entry>, page: PageInfo) -> Har {
    let page = Page {
        started_date_time: page
            .started_date_time
            .unwrap_or_else(|| format_timestamp(Utc::now())),
        id: page.id.unwrap_or_else(|| DEFAULT_PAGE_ID.to_string()),
        title: page.title.unwrap_or_else(|| "Page".to_string()),
        page_timings: page.page_timings.unwrap_or_default(),
    };

    Har {
        log: Log {
            version: HAR_VERSION.to_string(),
            creator: creator(),
            browser: None,
            pages: vec![page],
            entries,
        },
    }
}

/// Parse a HAR file from disk into strongly typed structures.
pub fn parse_har_file(path: &Path) -> Result<Har> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let har: Har = serde_json::from_reader(reader)?;
    Ok(har)
}

pub fn write_har_file(path: &Path, har: &Har) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), har)?;
    Ok(())
}

/// A caller-owned HAR log that captured entries are appended to.
///
/// Clones share the same log, so one handle can be given to a wrapper as
/// its default target while the caller keeps another to read it back.
#[derive(Debug, Clone)]
pub struct SharedHarLog {
    inner: Arc<Mutex<Har>>,
}

impl SharedHarLog {
    pub fn new(har: Har) -> Self {
        Self {
            inner: Arc::new(Mutex::new(har)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Har> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: Entry) {
        self.lock().log.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().log.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.lock().log.entries.clone()
    }

    pub fn snapshot(&self) -> Har {
        self.lock().clone()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let har = self.snapshot();
        write_har_file(path, &har)
    }
}

impl Default for SharedHarLog {
    fn default() -> Self {
        Self::new(create_har_log(Vec::new(), PageInfo::default()))
    }
}

impl From<Har> for SharedHarLog {
    fn from(har: Har) -> Self {
        Self::new(har)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_log_with_default_page() {
        let har = create_har_log(Vec::new(), PageInfo::default());
        assert_eq!(har.log.version, "1.2");
        assert_eq!(har.log.creator.name, "fetch-har");
        assert_eq!(har.log.pages.len(), 1);
        let page = &har.log.pages[0];
        assert_eq!(page.id, "page_1");
        assert_eq!(page.title, "Page");
        assert_eq!(page.page_timings.on_load, -1.0);
        assert!(page.started_date_time.ends_with('Z'));
    }

    #[test]
    fn page_overrides_apply() {
        let har = create_har_log(
            vec![Entry::default()],
            PageInfo::default().id("checkout").title("Checkout flow"),
        );
        assert_eq!(har.log.pages[0].id, "checkout");
        assert_eq!(har.log.pages[0].title, "Checkout flow");
        assert_eq!(har.log.entries.len(), 1);
    }

    #[test]
    fn shared_log_round_trips_through_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.har");

        let log = SharedHarLog::default();
        let handle = log.clone();
        handle.push(Entry::default());
        assert_eq!(log.len(), 1);

        log.write_to(&path).unwrap();
        let parsed = parse_har_file(&path).unwrap();
        assert_eq!(parsed.log.entries.len(), 1);
        assert_eq!(parsed.log.pages[0].id, "page_1");
    }
}
