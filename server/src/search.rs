use crate::snippet::{HighlightSnippets, SnippetGenerator};
use serde::{Deserialize, Serialize};
use sitesearch_core::{html, Language, Lemma, LemmaExtractor, PageId, Posting, Site, SiteId, Store, StoreError};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Lemmas on more than this share of all pages are too common to rank by.
pub const MAX_SELECTIVITY: f64 = 0.7;
pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// Root URL of one configured site; all sites when absent.
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), site: None, offset: 0, limit: DEFAULT_LIMIT }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub result: bool,
    /// Ranked pages before pagination.
    pub count: usize,
    pub data: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn empty() -> Self {
        Self { result: true, count: 0, data: Vec::new() }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("empty search query")]
    EmptyQuery,
    #[error("search storage lookup failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPage {
    pub page_id: PageId,
    pub absolute: f64,
    pub relative: f64,
}

pub struct SearchEngine {
    store: Store,
    extractor: Arc<LemmaExtractor>,
    snippets: Arc<dyn SnippetGenerator>,
}

impl SearchEngine {
    pub fn new(store: Store, language: Language) -> Self {
        Self::with_parts(store, Arc::new(LemmaExtractor::new(language)), Arc::new(HighlightSnippets))
    }

    pub fn with_parts(store: Store, extractor: Arc<LemmaExtractor>, snippets: Arc<dyn SnippetGenerator>) -> Self {
        Self { store, extractor, snippets }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        if query.query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        info!(query = %query.query, site = ?query.site, "search");

        let site_id = match query.site.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(url) => match self.store.find_site_by_url(url)? {
                Some(site) => Some(site.id),
                None => {
                    debug!(site = url, "site filter matches no stored site");
                    return Ok(SearchResponse::empty());
                }
            },
            None => None,
        };

        let texts = self.extractor.lemma_set(&query.query);
        let lemmas = self.ranking_lemmas(&texts, site_id)?;
        if lemmas.is_empty() {
            debug!("no query lemma survived filtering");
            return Ok(SearchResponse::empty());
        }

        let mut candidates: Option<HashSet<PageId>> = None;
        for lemma in &lemmas {
            let pages = self.store.find_page_ids_by_lemma_text(&lemma.text)?;
            candidates = Some(match candidates {
                Some(acc) => acc.intersection(&pages).copied().collect(),
                None => pages,
            });
        }
        let candidates = candidates.unwrap_or_default();

        let ids: Vec<_> = lemmas.iter().map(|l| l.id).collect();
        let postings = self.store.find_postings_by_lemma_ids(&ids)?;
        let ranked = rank_pages(&candidates, &postings);

        let count = ranked.len();
        let mut sites: HashMap<SiteId, Option<Site>> = HashMap::new();
        let mut data = Vec::new();
        for ranked in ranked.iter().skip(query.offset).take(query.limit) {
            if let Some(hit) = self.hit(ranked, &query.query, &mut sites)? {
                data.push(hit);
            }
        }
        info!(count, returned = data.len(), "search finished");
        Ok(SearchResponse { result: true, count, data })
    }

    /// Stored rows for each query lemma that are rare enough to rank by, one per text (the most
    /// frequent row when several sites have it).
    fn ranking_lemmas(&self, texts: &HashSet<String>, site_id: Option<SiteId>) -> Result<Vec<Lemma>, StoreError> {
        let total_pages = self.store.count_pages();
        if total_pages == 0 {
            return Ok(Vec::new());
        }
        let mut best: HashMap<String, Lemma> = HashMap::new();
        for text in texts {
            let rows = match site_id {
                Some(site_id) => self.store.find_lemma_by_text_and_site(text, site_id)?.into_iter().collect(),
                None => self.store.find_lemmas_by_text(text)?,
            };
            for lemma in rows {
                let selectivity = lemma.frequency as f64 / total_pages as f64;
                if selectivity > MAX_SELECTIVITY {
                    debug!(lemma = %lemma.text, selectivity, "lemma too common");
                    continue;
                }
                match best.get(&lemma.text) {
                    Some(kept) if kept.frequency >= lemma.frequency => {}
                    _ => {
                        best.insert(lemma.text.clone(), lemma);
                    }
                }
            }
        }
        Ok(best.into_values().collect())
    }

    fn hit(
        &self,
        ranked: &RankedPage,
        query: &str,
        sites: &mut HashMap<SiteId, Option<Site>>,
    ) -> Result<Option<SearchHit>, StoreError> {
        let Some(page) = self.store.find_page(ranked.page_id)? else {
            return Ok(None);
        };
        let site = match sites.get(&page.site_id) {
            Some(site) => site.clone(),
            None => {
                let site = self.store.find_site(page.site_id)?;
                sites.insert(page.site_id, site.clone());
                site
            }
        };
        let Some(site) = site else {
            return Ok(None);
        };
        Ok(Some(SearchHit {
            site: site.url,
            site_name: site.name,
            uri: page.path,
            title: html::title(&page.content),
            snippet: self.snippets.snippet(&page.content, query),
            relevance: ranked.relative,
        }))
    }
}

/// Sums posting ranks per candidate page and normalizes by the best page.
///
/// Postings for pages outside `candidates` are ignored. Sorted by absolute relevance descending,
/// then page id ascending.
pub fn rank_pages(candidates: &HashSet<PageId>, postings: &[Posting]) -> Vec<RankedPage> {
    let mut absolute: HashMap<PageId, f64> = HashMap::new();
    for posting in postings.iter().filter(|p| candidates.contains(&p.page_id)) {
        *absolute.entry(posting.page_id).or_insert(0.0) += posting.rank as f64;
    }
    let max = absolute.values().copied().fold(0.0_f64, f64::max);
    let mut ranked: Vec<RankedPage> = absolute
        .into_iter()
        .map(|(page_id, absolute)| RankedPage {
            page_id,
            absolute,
            relative: if max > 0.0 { absolute / max } else { 0.0 },
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.absolute.partial_cmp(&a.absolute).unwrap_or(Ordering::Equal).then(a.page_id.cmp(&b.page_id))
    });
    ranked
}
