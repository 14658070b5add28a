use sitesearch_core::{Lemma, Page, Posting, SiteId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Everything a finished crawl writes for one site.
#[derive(Debug, Default)]
pub struct SiteIndex {
    pub pages: Vec<Page>,
    pub lemmas: Vec<Lemma>,
    pub postings: Vec<Posting>,
}

/// First page wins for each path.
pub fn dedupe_by_path(pages: Vec<Page>) -> Vec<Page> {
    let mut seen = HashSet::new();
    pages.into_iter().filter(|p| seen.insert(p.path.clone())).collect()
}

/// Merges per-page lemma counts into one row per lemma text.
///
/// Each page gets one posting per lemma it contains, ranked by the in-page count, and each lemma's
/// frequency is the number of postings referencing it. `next_id` hands out ids for pages and lemmas.
pub fn merge_site<E>(
    site_id: SiteId,
    pages: Vec<Page>,
    page_lemmas: Vec<HashMap<String, u32>>,
    mut next_id: impl FnMut() -> Result<u64, E>,
) -> Result<SiteIndex, E> {
    let mut index = SiteIndex { pages: Vec::with_capacity(pages.len()), ..Default::default() };
    let mut by_text: BTreeMap<String, Lemma> = BTreeMap::new();

    for (mut page, lemmas) in pages.into_iter().zip(page_lemmas) {
        page.site_id = site_id;
        page.id = next_id()?;
        for (text, count) in lemmas {
            let id = if by_text.contains_key(&text) { 0 } else { next_id()? };
            let lemma = by_text
                .entry(text)
                .or_insert_with_key(|text| Lemma { id, site_id, text: text.clone(), frequency: 0 });
            lemma.frequency += 1;
            index.postings.push(Posting { page_id: page.id, lemma_id: lemma.id, rank: count as f32 });
        }
        index.pages.push(page);
    }
    index.lemmas = by_text.into_values().collect();
    Ok(index)
}
