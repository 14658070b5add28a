use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type SiteId = u64;
pub type PageId = u64;
pub type LemmaId = u64;

/// Status code recorded for pages that could not be fetched.
pub const ERROR_STATUS: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Indexing => "INDEXING",
            SiteStatus::Indexed => "INDEXED",
            SiteStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    /// Milliseconds since the unix epoch of the last status change.
    pub status_time: i64,
    pub last_error: String,
}

impl Site {
    /// A site that has not been written yet (`id == 0`).
    pub fn new(url: impl Into<String>, name: impl Into<String>, status: SiteStatus) -> Self {
        Self {
            id: 0,
            url: url.into(),
            name: name.into(),
            status,
            status_time: now_millis(),
            last_error: String::new(),
        }
    }

    pub fn mark_indexed(&mut self) {
        self.status = SiteStatus::Indexed;
        self.last_error.clear();
        self.status_time = now_millis();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = SiteStatus::Failed;
        self.last_error = error.into();
        self.status_time = now_millis();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    /// Path relative to the site root, always starting with `/`.
    pub path: String,
    pub code: u16,
    /// Raw body, or the failure description for error pages.
    pub content: String,
}

impl Page {
    pub fn new(path: impl Into<String>, code: u16, content: impl Into<String>) -> Self {
        Self { id: 0, site_id: 0, path: path.into(), code, content: content.into() }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, ERROR_STATUS, message)
    }

    pub fn is_error(&self) -> bool {
        self.code == ERROR_STATUS
    }
}

/// Identity of a lemma is its text within one site; `frequency` counts postings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub text: String,
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    /// Raw in-page occurrence count of the lemma.
    pub rank: f32,
}

/// Path of `url` relative to `root`, or `None` when `url` is not under it.
///
/// The check is a raw string prefix match: no trailing-slash or query normalisation.
pub fn relative_path(root: &str, url: &str) -> Option<String> {
    let rest = url.strip_prefix(root)?;
    if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        Some(format!("/{rest}"))
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
