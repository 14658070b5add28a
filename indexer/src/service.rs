use crate::batch::{dedupe_by_path, merge_site};
use crate::locks::SiteLocks;
use crate::pool::{Job, WorkerPool};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sitesearch_core::model::relative_path;
use sitesearch_core::{AppConfig, LemmaExtractor, Page, Site, SiteConfig, SiteStatus, Store, StoreError};
use sitesearch_crawler::{RunFlag, SiteCrawler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const ALREADY_RUNNING: &str = "indexing already running";
pub const NOT_RUNNING: &str = "indexing not running";
pub const OUTSIDE_CONFIGURED_SITES: &str = "page outside configured sites";
pub const STOPPED_BY_USER: &str = "stopped by user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingResponse {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexingResponse {
    pub fn ok() -> Self {
        Self { result: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { result: false, error: Some(error.into()) }
    }
}

struct Inner {
    config: AppConfig,
    store: Store,
    extractor: Arc<LemmaExtractor>,
    run: RunFlag,
    pool: Mutex<Option<WorkerPool>>,
    pools_created: AtomicUsize,
    locks: SiteLocks,
    handle: Handle,
    parallelism: usize,
}

/// Full-site indexing runs and ad hoc single-page re-indexing over one store.
#[derive(Clone)]
pub struct IndexingService {
    inner: Arc<Inner>,
}

impl IndexingService {
    /// Must be called from inside a tokio runtime; jobs are spawned onto it.
    pub fn new(config: AppConfig, store: Store) -> Result<Self> {
        let handle = Handle::try_current().context("indexing service needs a tokio runtime")?;
        let parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let extractor = Arc::new(LemmaExtractor::new(config.language));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                extractor,
                run: RunFlag::new(),
                pool: Mutex::new(None),
                pools_created: AtomicUsize::new(0),
                locks: SiteLocks::new(),
                handle,
                parallelism,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn is_indexing(&self) -> bool {
        self.inner.run.is_running()
    }

    /// Number of worker pools ever created, one per accepted start.
    pub fn pools_created(&self) -> usize {
        self.inner.pools_created.load(Ordering::Acquire)
    }

    /// Starts one crawl-and-index job per configured site and returns without waiting for them.
    pub fn start(&self) -> IndexingResponse {
        let mut slot = self.inner.pool.lock();
        if !self.inner.run.try_start() {
            info!("start refused, indexing already running");
            return IndexingResponse::failure(ALREADY_RUNNING);
        }
        let pool = WorkerPool::new(self.inner.run.clone(), self.inner.parallelism);
        let jobs: Vec<Job> = self
            .inner
            .config
            .sites
            .iter()
            .cloned()
            .map(|site| {
                let inner = self.inner.clone();
                let pool = pool.clone();
                Box::pin(async move { index_site(inner, pool, site).await }) as Job
            })
            .collect();
        *slot = Some(pool.clone());
        self.inner.pools_created.fetch_add(1, Ordering::AcqRel);
        let submitted = pool.submit_all(&self.inner.handle, jobs);
        info!(sites = submitted, "indexing started");
        IndexingResponse::ok()
    }

    pub fn stop(&self) -> IndexingResponse {
        let slot = self.inner.pool.lock();
        match slot.as_ref() {
            Some(pool) if pool.stop() => {
                info!("indexing stopped by user");
                IndexingResponse::ok()
            }
            _ => IndexingResponse::failure(NOT_RUNNING),
        }
    }

    /// Waits for the jobs of the most recent run.
    pub async fn wait_idle(&self) {
        let pool = self.inner.pool.lock().clone();
        if let Some(pool) = pool {
            pool.join().await;
        }
    }

    /// Re-indexes one page of a configured site, replacing whatever was stored for its path.
    /// The address may arrive percent-encoded.
    pub async fn index_page(&self, url: &str) -> IndexingResponse {
        let decoded = match urlencoding::decode(url.trim()) {
            Ok(decoded) => decoded,
            Err(e) => {
                info!(url, error = %e, "page address is not valid utf-8 once decoded");
                return IndexingResponse::failure(OUTSIDE_CONFIGURED_SITES);
            }
        };
        let url = decoded.trim();
        let Some(site_config) = self.inner.config.site_for_url(url).cloned() else {
            info!(url, "page outside configured sites");
            return IndexingResponse::failure(OUTSIDE_CONFIGURED_SITES);
        };
        match self.index_page_of(&site_config, url).await {
            Ok(()) => IndexingResponse::ok(),
            Err(e) => {
                error!(url, error = %e, "single page indexing failed");
                IndexingResponse::failure(format!("{e:#}"))
            }
        }
    }

    async fn index_page_of(&self, site_config: &SiteConfig, url: &str) -> Result<()> {
        let inner = &self.inner;
        let path = relative_path(&site_config.url, url).unwrap_or_else(|| "/".to_string());
        let _guard = inner.locks.lock(&site_config.url).await;

        let mut site = match inner.store.find_site_by_url(&site_config.url)? {
            Some(site) => site,
            None => {
                info!(site = %site_config.name, "site not stored yet, creating it");
                Site::new(&site_config.url, &site_config.name, SiteStatus::Indexed)
            }
        };
        if site.id != 0 && inner.store.delete_page_by_path(site.id, &path)? {
            info!(url, "previous copy of the page removed");
        }

        let crawler = SiteCrawler::new(&site_config.url, &inner.config.connection, RunFlag::running(), Arc::new(Semaphore::new(1)))?;
        let mut page = crawler.fetch_page(url).await;

        let extractor = inner.extractor.clone();
        let content = page.content.clone();
        let lemmas = tokio::task::spawn_blocking(move || extractor.lemma_frequencies(&content))
            .await
            .context("lemma extraction task failed")?;
        info!(url, lemmas = lemmas.len(), "page normalized");

        site.mark_indexed();
        let store = inner.store.clone();
        tokio::task::spawn_blocking(move || store.save_single_page(&mut site, &mut page, &lemmas))
            .await
            .context("persist task failed")??;
        Ok(())
    }
}

async fn index_site(inner: Arc<Inner>, pool: WorkerPool, config: SiteConfig) {
    let mut site = match reset_site(&inner, &config).await {
        Ok(site) => site,
        Err(e) => {
            error!(site = %config.url, error = %e, "could not reset site");
            record_failure(&inner.store, &config, e.to_string());
            return;
        }
    };
    info!(site = %config.url, "site indexing started");

    let crawler = match SiteCrawler::new(&config.url, &inner.config.connection, pool.cancellation(), pool.permits()) {
        Ok(crawler) => crawler,
        Err(e) => {
            site.mark_failed(e.to_string());
            save_status(&inner.store, &mut site);
            return;
        }
    };
    let pages = dedupe_by_path(crawler.crawl().await);
    let page_lemmas = normalize(&inner.extractor, &pages).await;

    let index = match merge_site(site.id, pages, page_lemmas, || inner.store.generate_id()) {
        Ok(index) => index,
        Err(e) => {
            site.mark_failed(e.to_string());
            save_status(&inner.store, &mut site);
            return;
        }
    };
    if pool.is_stopped() {
        site.mark_failed(STOPPED_BY_USER);
    } else {
        site.mark_indexed();
    }

    let _guard = inner.locks.lock(&config.url).await;
    match inner.store.find_site_by_url(&config.url) {
        Ok(Some(stored)) if stored.id == site.id => {}
        Ok(_) => {
            info!(site = %config.url, "a newer run owns the site, dropping this run's pages");
            return;
        }
        Err(e) => {
            error!(site = %config.url, error = %e, "could not read site before saving");
            site.mark_failed(e.to_string());
            save_status(&inner.store, &mut site);
            return;
        }
    }
    info!(
        site = %config.url,
        status = site.status.as_str(),
        pages = index.pages.len(),
        lemmas = index.lemmas.len(),
        "saving site"
    );
    let store = inner.store.clone();
    let mut fallback = site.clone();
    let persisted = tokio::task::spawn_blocking(move || {
        let mut index = index;
        let saved = store.save_site_index(&mut site, &mut index.pages, &mut index.lemmas, &index.postings);
        (site, saved)
    })
    .await;
    match persisted {
        Ok((_, Ok(()))) => info!(site = %config.url, "site indexed"),
        Ok((mut site, Err(e))) => {
            error!(site = %config.url, error = %e, "persisting site failed");
            site.mark_failed(e.to_string());
            save_status(&inner.store, &mut site);
        }
        Err(e) => {
            error!(site = %config.url, error = %e, "persist task failed");
            fallback.mark_failed(format!("persist task failed: {e}"));
            save_status(&inner.store, &mut fallback);
        }
    }
}

/// Drops whatever a previous run stored for the site and records a fresh INDEXING row.
async fn reset_site(inner: &Inner, config: &SiteConfig) -> Result<Site, StoreError> {
    let _guard = inner.locks.lock(&config.url).await;
    if let Some(old) = inner.store.find_site_by_url(&config.url)? {
        info!(site = %config.url, "removing previous index of site");
        inner.store.delete_site(&old)?;
    }
    let mut site = Site::new(&config.url, &config.name, SiteStatus::Indexing);
    inner.store.save_site(&mut site)?;
    Ok(site)
}

/// Lemma counts for each page, in page order. One blocking task per page.
async fn normalize(extractor: &Arc<LemmaExtractor>, pages: &[Page]) -> Vec<HashMap<String, u32>> {
    let mut tasks = JoinSet::new();
    for (i, page) in pages.iter().enumerate() {
        let extractor = extractor.clone();
        let content = page.content.clone();
        tasks.spawn_blocking(move || (i, extractor.lemma_frequencies(&content)));
    }
    let mut results = vec![HashMap::new(); pages.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, lemmas)) => results[i] = lemmas,
            Err(e) => warn!(error = %e, "lemma extraction task failed"),
        }
    }
    results
}

/// Marks the configured site FAILED when no row of this run is at hand, reusing the stored row if
/// there is one.
fn record_failure(store: &Store, config: &SiteConfig, error: String) {
    let mut site = match store.find_site_by_url(&config.url) {
        Ok(Some(site)) => site,
        _ => Site::new(&config.url, &config.name, SiteStatus::Failed),
    };
    site.mark_failed(error);
    save_status(store, &mut site);
}

fn save_status(store: &Store, site: &mut Site) {
    if let Err(e) = store.save_site(site) {
        error!(site = %site.url, error = %e, "could not record site status");
    }
}
