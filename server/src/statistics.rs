use serde::Serialize;
use sitesearch_core::{AppConfig, Store, StoreError};

const NOT_INDEXED: &str = "NOT INDEXED";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalStatistics {
    pub sites: usize,
    pub pages: usize,
    pub lemmas: usize,
    pub indexing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: String,
    /// Milliseconds since the unix epoch; 0 for sites never indexed.
    pub status_time: i64,
    pub error: String,
    pub pages: usize,
    pub lemmas: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsData {
    pub total: TotalStatistics,
    pub detailed: Vec<SiteStatistics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsResponse {
    pub result: bool,
    pub statistics: StatisticsData,
}

/// Totals and per-site details for every configured site, stored or not.
pub fn collect(config: &AppConfig, store: &Store, indexing: bool) -> Result<StatisticsResponse, StoreError> {
    let mut total = TotalStatistics { sites: config.sites.len(), pages: 0, lemmas: 0, indexing };
    let mut detailed = Vec::with_capacity(config.sites.len());
    for configured in &config.sites {
        let item = match store.find_site_by_url(&configured.url)? {
            Some(site) => SiteStatistics {
                url: configured.url.clone(),
                name: configured.name.clone(),
                status: site.status.as_str().to_string(),
                status_time: site.status_time,
                error: site.last_error.clone(),
                pages: store.count_pages_for_site(site.id)?,
                lemmas: store.count_lemmas_for_site(site.id)?,
            },
            None => SiteStatistics {
                url: configured.url.clone(),
                name: configured.name.clone(),
                status: NOT_INDEXED.to_string(),
                status_time: 0,
                error: String::new(),
                pages: 0,
                lemmas: 0,
            },
        };
        total.pages += item.pages;
        total.lemmas += item.lemmas;
        detailed.push(item);
    }
    Ok(StatisticsResponse { result: true, statistics: StatisticsData { total, detailed } })
}
