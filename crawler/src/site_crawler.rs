use crate::state::{RunFlag, VisitedSet};
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{header, redirect, Client};
use sitesearch_core::model::relative_path;
use sitesearch_core::{html, ConnectionSettings, Page};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;
use tracing::{debug, info, warn};

lazy_static! {
    static ref NON_DOCUMENT: Regex = Regex::new(
        r"(?i)\.(webp|jpg|jpeg|png|gif|bmp|pdf|doc|docx|xls|xlsx|ppt|pptx|zip|rar|tar|gz|7z|mp3|wav|mp4|mkv|avi|mov|sql)$"
    )
    .expect("valid regex");
}

type Branch = Pin<Box<dyn Future<Output = Vec<Page>> + Send>>;

/// Result of a single GET. Failures are values, the crawl never propagates them.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched { status: u16, body: String },
    Failed { reason: String },
}

struct Shared {
    client: Client,
    root: String,
    run: RunFlag,
    visited: VisitedSet,
    permits: Arc<Semaphore>,
}

/// Crawls everything reachable under one site root.
///
/// Each URL is its own task: it fetches, then spawns a task per accepted link and waits for all of
/// them. Concurrent fetches are bounded by `permits`; the visited set and run flag are shared by the
/// whole tree.
#[derive(Clone)]
pub struct SiteCrawler {
    inner: Arc<Shared>,
}

impl SiteCrawler {
    pub fn new(
        root: impl Into<String>,
        settings: &ConnectionSettings,
        run: RunFlag,
        permits: Arc<Semaphore>,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::REFERER, header::HeaderValue::from_str(&settings.referer)?);
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .redirect(redirect::Policy::limited(5))
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            inner: Arc::new(Shared { client, root: root.into(), run, visited: VisitedSet::new(), permits }),
        })
    }

    pub fn root(&self) -> &str {
        &self.inner.root
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.inner.visited
    }

    /// Every page reachable from the root, in no particular order. Returns early, with whatever
    /// was fetched, once the run flag drops.
    pub async fn crawl(&self) -> Vec<Page> {
        // Discovered links are serialized by `Url`, so the start URL is too; otherwise a bare
        // `https://host` root and its `https://host/` self-link would be two visits.
        let start = Url::parse(&self.inner.root).map(String::from).unwrap_or_else(|_| self.inner.root.clone());
        let pages = self.clone().branch(start).await;
        info!(root = %self.inner.root, pages = pages.len(), "crawl finished");
        pages
    }

    /// Fetches exactly one URL without following links.
    pub async fn fetch_page(&self, url: &str) -> Page {
        let path = self.path_of(url);
        match self.fetch(url).await {
            FetchOutcome::Fetched { status, body } => Page::new(path, status, body),
            FetchOutcome::Failed { reason } => {
                info!(url, %reason, "page could not be fetched");
                Page::error(path, format!("{reason} url: {url}"))
            }
        }
    }

    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let Ok(_permit) = self.inner.permits.acquire().await else {
            return FetchOutcome::Failed { reason: "fetch permits closed".to_string() };
        };
        debug!(url, "fetching");
        let response = match self.inner.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed { reason: e.to_string() },
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => FetchOutcome::Fetched { status, body },
            Err(e) => FetchOutcome::Failed { reason: e.to_string() },
        }
    }

    /// Same root prefix (raw string match), no fragment, not yet visited, not a binary document.
    pub fn is_valid_link(&self, link: &str) -> bool {
        link.starts_with(&self.inner.root)
            && !link.contains('#')
            && !self.inner.visited.contains(link)
            && !NON_DOCUMENT.is_match(link)
    }

    fn path_of(&self, url: &str) -> String {
        relative_path(&self.inner.root, url).unwrap_or_else(|| url.to_string())
    }

    fn branch(self, url: String) -> Branch {
        Box::pin(async move {
            if !self.inner.run.is_running() || !self.inner.visited.insert(&url) {
                return Vec::new();
            }

            let path = self.path_of(&url);
            let (page, links) = match self.fetch(&url).await {
                FetchOutcome::Fetched { status, body } => {
                    let links = html::links(&body, &url);
                    (Page::new(path, status, body), links)
                }
                FetchOutcome::Failed { reason } => {
                    warn!(url = %url, %reason, "fetch failed");
                    (Page::error(path, format!("{reason} url: {url}")), Vec::new())
                }
            };

            let mut pages = vec![page];
            let mut children = JoinSet::new();
            let mut queued = HashSet::new();
            for link in links {
                if !self.inner.run.is_running() {
                    debug!(url = %url, "run flag dropped, not following remaining links");
                    break;
                }
                if self.is_valid_link(&link) && queued.insert(link.clone()) {
                    children.spawn(self.clone().branch(link));
                }
            }
            while let Some(joined) = children.join_next().await {
                match joined {
                    Ok(found) => pages.extend(found),
                    Err(e) => warn!(error = %e, "crawl task failed"),
                }
            }
            pages
        })
    }
}
