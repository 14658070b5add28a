use crate::error::{Result, StoreError};
use crate::model::{Lemma, LemmaId, Page, PageId, Posting, Site, SiteId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Batch, Db, Transactional, Tree};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

// Secondary index prefixes inside the `keys` tree.
const SITE_BY_URL: u8 = b'u';
const PAGE_BY_PATH: u8 = b'p';
const LEMMA_BY_TEXT: u8 = b'l';
const SITE_LEMMA: u8 = b's';
const PAGE_POSTING: u8 = b'q';

const EMPTY: &[u8] = &[];

/// sled-backed storage for sites, pages, lemmas and postings.
///
/// Primary rows live in one tree per entity keyed by big-endian id. Postings are keyed by
/// `(lemma id, page id)` so all postings of a lemma are one prefix scan. Lookups by url, path or
/// text go through the `keys` tree.
#[derive(Clone)]
pub struct Store {
    db: Db,
    sites: Tree,
    pages: Tree,
    lemmas: Tree,
    postings: Tree,
    keys: Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            sites: db.open_tree("sites")?,
            pages: db.open_tree("pages")?,
            lemmas: db.open_tree("lemmas")?,
            postings: db.open_tree("postings")?,
            keys: db.open_tree("keys")?,
            db,
        })
    }

    /// Ids start at 1; 0 marks a row that was never written.
    pub fn generate_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- sites ---

    pub fn save_site(&self, site: &mut Site) -> Result<()> {
        if site.id == 0 {
            site.id = self.generate_id()?;
        }
        self.sites.insert(id_key(site.id), encode(&*site)?)?;
        self.keys.insert(url_key(&site.url), id_key(site.id))?;
        Ok(())
    }

    pub fn find_site(&self, id: SiteId) -> Result<Option<Site>> {
        self.sites.get(id_key(id))?.map(|v| decode(&v)).transpose()
    }

    pub fn find_site_by_url(&self, url: &str) -> Result<Option<Site>> {
        match self.keys.get(url_key(url))? {
            Some(id) => self.find_site(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn site_exists_by_url(&self, url: &str) -> Result<bool> {
        Ok(self.keys.contains_key(url_key(url))?)
    }

    pub fn sites(&self) -> Result<Vec<Site>> {
        self.sites.iter().map(|entry| decode(&entry?.1)).collect()
    }

    /// Removes the site with its pages, lemmas and postings.
    pub fn delete_site(&self, site: &Site) -> Result<()> {
        debug!(site = %site.url, id = site.id, "deleting site");
        self.clear_site_content(site.id)?;
        self.sites.remove(id_key(site.id))?;
        self.keys.remove(url_key(&site.url))?;
        Ok(())
    }

    fn clear_site_content(&self, site_id: SiteId) -> Result<()> {
        let mut keys = Batch::default();
        let mut pages = Batch::default();
        let mut lemmas = Batch::default();
        let mut postings = Batch::default();

        for entry in self.keys.scan_prefix(prefixed(PAGE_BY_PATH, site_id)) {
            let (key, value) = entry?;
            let page_id = decode_id(&value)?;
            for posting in self.keys.scan_prefix(prefixed(PAGE_POSTING, page_id)) {
                let (posting_ref, _) = posting?;
                postings.remove(posting_key(trailing_id(&posting_ref)?, page_id));
                keys.remove(posting_ref);
            }
            pages.remove(id_key(page_id));
            keys.remove(key);
        }
        for entry in self.keys.scan_prefix(prefixed(SITE_LEMMA, site_id)) {
            let (key, _) = entry?;
            let lemma_id = trailing_id(&key)?;
            if let Some(lemma) = self.find_lemma(lemma_id)? {
                keys.remove(text_key(&lemma.text, site_id));
            }
            lemmas.remove(id_key(lemma_id));
            keys.remove(key);
        }

        self.postings.apply_batch(postings)?;
        self.pages.apply_batch(pages)?;
        self.lemmas.apply_batch(lemmas)?;
        self.keys.apply_batch(keys)?;
        Ok(())
    }

    // --- pages ---

    pub fn save_page(&self, page: &mut Page) -> Result<()> {
        self.save_pages(std::slice::from_mut(page))
    }

    pub fn save_pages(&self, pages: &mut [Page]) -> Result<()> {
        let mut rows = Batch::default();
        let mut keys = Batch::default();
        for page in pages.iter_mut() {
            if page.id == 0 {
                page.id = self.generate_id()?;
            }
            rows.insert(id_key(page.id), encode(&*page)?);
            keys.insert(path_key(page.site_id, &page.path), id_key(page.id));
        }
        self.pages.apply_batch(rows)?;
        self.keys.apply_batch(keys)?;
        Ok(())
    }

    pub fn find_page(&self, id: PageId) -> Result<Option<Page>> {
        self.pages.get(id_key(id))?.map(|v| decode(&v)).transpose()
    }

    pub fn page_exists_by_path(&self, site_id: SiteId, path: &str) -> Result<bool> {
        Ok(self.keys.contains_key(path_key(site_id, path))?)
    }

    /// Deletes the page and its postings. Lemmas it referenced lose one from their frequency and
    /// disappear once nothing references them. Returns whether a page was found.
    pub fn delete_page_by_path(&self, site_id: SiteId, path: &str) -> Result<bool> {
        let Some(raw) = self.keys.get(path_key(site_id, path))? else {
            return Ok(false);
        };
        let page_id = decode_id(&raw)?;

        let mut keys = Batch::default();
        let mut lemmas = Batch::default();
        let mut postings = Batch::default();
        for entry in self.keys.scan_prefix(prefixed(PAGE_POSTING, page_id)) {
            let (posting_ref, _) = entry?;
            let lemma_id = trailing_id(&posting_ref)?;
            postings.remove(posting_key(lemma_id, page_id));
            keys.remove(posting_ref);

            if let Some(mut lemma) = self.find_lemma(lemma_id)? {
                lemma.frequency = lemma.frequency.saturating_sub(1);
                if lemma.frequency == 0 {
                    lemmas.remove(id_key(lemma_id));
                    keys.remove(text_key(&lemma.text, lemma.site_id));
                    keys.remove(site_lemma_key(lemma.site_id, lemma_id));
                } else {
                    lemmas.insert(id_key(lemma_id), encode(&lemma)?);
                }
            }
        }
        keys.remove(path_key(site_id, path));

        self.postings.apply_batch(postings)?;
        self.lemmas.apply_batch(lemmas)?;
        self.keys.apply_batch(keys)?;
        self.pages.remove(id_key(page_id))?;
        Ok(true)
    }

    /// Pages across all sites.
    pub fn count_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn count_pages_for_site(&self, site_id: SiteId) -> Result<usize> {
        count_prefix(&self.keys, prefixed(PAGE_BY_PATH, site_id))
    }

    // --- lemmas ---

    pub fn save_lemmas(&self, lemmas: &mut [Lemma]) -> Result<()> {
        let mut rows = Batch::default();
        let mut keys = Batch::default();
        for lemma in lemmas.iter_mut() {
            if lemma.id == 0 {
                lemma.id = self.generate_id()?;
            }
            rows.insert(id_key(lemma.id), encode(&*lemma)?);
            keys.insert(text_key(&lemma.text, lemma.site_id), id_key(lemma.id));
            keys.insert(site_lemma_key(lemma.site_id, lemma.id), EMPTY);
        }
        self.lemmas.apply_batch(rows)?;
        self.keys.apply_batch(keys)?;
        Ok(())
    }

    pub fn find_lemma(&self, id: LemmaId) -> Result<Option<Lemma>> {
        self.lemmas.get(id_key(id))?.map(|v| decode(&v)).transpose()
    }

    /// Rows for `text` in every site.
    pub fn find_lemmas_by_text(&self, text: &str) -> Result<Vec<Lemma>> {
        let mut found = Vec::new();
        for entry in self.keys.scan_prefix(text_prefix(text)) {
            let (_, id) = entry?;
            if let Some(lemma) = self.find_lemma(decode_id(&id)?)? {
                found.push(lemma);
            }
        }
        Ok(found)
    }

    pub fn find_lemma_by_text_and_site(&self, text: &str, site_id: SiteId) -> Result<Option<Lemma>> {
        match self.keys.get(text_key(text, site_id))? {
            Some(id) => self.find_lemma(decode_id(&id)?),
            None => Ok(None),
        }
    }

    pub fn count_lemmas_for_site(&self, site_id: SiteId) -> Result<usize> {
        count_prefix(&self.keys, prefixed(SITE_LEMMA, site_id))
    }

    // --- postings ---

    /// Bulk insert through one batch per tree.
    pub fn save_postings(&self, postings: &[Posting]) -> Result<()> {
        let mut rows = Batch::default();
        let mut keys = Batch::default();
        for posting in postings {
            rows.insert(posting_key(posting.lemma_id, posting.page_id), rank_bytes(posting.rank));
            keys.insert(page_posting_key(posting.page_id, posting.lemma_id), EMPTY);
        }
        self.postings.apply_batch(rows)?;
        self.keys.apply_batch(keys)?;
        Ok(())
    }

    /// Pages holding a posting for `text` in any site.
    pub fn find_page_ids_by_lemma_text(&self, text: &str) -> Result<HashSet<PageId>> {
        let mut pages = HashSet::new();
        for entry in self.keys.scan_prefix(text_prefix(text)) {
            let (_, id) = entry?;
            for posting in self.postings_for_lemma(decode_id(&id)?)? {
                pages.insert(posting.page_id);
            }
        }
        Ok(pages)
    }

    pub fn find_postings_by_lemma_ids(&self, lemma_ids: &[LemmaId]) -> Result<Vec<Posting>> {
        let mut found = Vec::new();
        for lemma_id in lemma_ids {
            found.extend(self.postings_for_lemma(*lemma_id)?);
        }
        Ok(found)
    }

    fn postings_for_lemma(&self, lemma_id: LemmaId) -> Result<Vec<Posting>> {
        self.postings
            .scan_prefix(id_key(lemma_id))
            .map(|entry| {
                let (key, value) = entry?;
                Ok(Posting { page_id: trailing_id(&key)?, lemma_id, rank: decode_rank(&value)? })
            })
            .collect()
    }

    // --- composite writes ---

    /// Writes the result of a full crawl. Anything stored under the site id before is replaced,
    /// including single-page writes that landed while the crawl was running.
    ///
    /// Pages and lemmas must already carry their ids and `site.id`, postings reference them.
    pub fn save_site_index(
        &self,
        site: &mut Site,
        pages: &mut [Page],
        lemmas: &mut [Lemma],
        postings: &[Posting],
    ) -> Result<()> {
        debug!(site = %site.url, pages = pages.len(), lemmas = lemmas.len(), postings = postings.len(), "writing site index");
        if site.id != 0 {
            self.clear_site_content(site.id)?;
        }
        self.save_site(site)?;
        self.save_pages(pages)?;
        self.save_lemmas(lemmas)?;
        self.save_postings(postings)?;
        self.flush()
    }

    /// Writes one page with its lemmas in a single serializable transaction. Lemmas already stored
    /// for the site gain one frequency, new ones start at one.
    pub fn save_single_page(&self, site: &mut Site, page: &mut Page, lemmas: &HashMap<String, u32>) -> Result<()> {
        // Ids are reserved up front: the transaction body may run more than once.
        if site.id == 0 {
            site.id = self.generate_id()?;
        }
        if page.id == 0 {
            page.id = self.generate_id()?;
        }
        page.site_id = site.id;
        let fresh_ids = (0..lemmas.len()).map(|_| self.generate_id()).collect::<Result<Vec<_>>>()?;

        let site_id = site.id;
        let page_id = page.id;
        let site_row = encode(&*site)?;
        let page_row = encode(&*page)?;
        let url = url_key(&site.url);
        let path = path_key(site_id, &page.path);

        let result: TransactionResult<(), StoreError> =
            (&self.sites, &self.pages, &self.lemmas, &self.postings, &self.keys).transaction(
                |(sites, pages, lemma_rows, postings, keys)| {
                    sites.insert(id_key(site_id), site_row.clone())?;
                    keys.insert(url.clone(), id_key(site_id))?;
                    pages.insert(id_key(page_id), page_row.clone())?;
                    keys.insert(path.clone(), id_key(page_id))?;

                    for ((text, count), fresh_id) in lemmas.iter().zip(&fresh_ids) {
                        let text_ref = text_key(text, site_id);
                        let existing = match keys.get(&text_ref)? {
                            Some(raw) => {
                                let id = decode_id(&raw).map_err(ConflictableTransactionError::Abort)?;
                                match lemma_rows.get(id_key(id))? {
                                    Some(row) => Some(decode::<Lemma>(&row).map_err(ConflictableTransactionError::Abort)?),
                                    None => None,
                                }
                            }
                            None => None,
                        };
                        let lemma = match existing {
                            Some(mut lemma) => {
                                lemma.frequency += 1;
                                lemma
                            }
                            None => Lemma { id: *fresh_id, site_id, text: text.clone(), frequency: 1 },
                        };
                        let row = encode(&lemma).map_err(ConflictableTransactionError::Abort)?;
                        lemma_rows.insert(id_key(lemma.id), row)?;
                        keys.insert(text_ref, id_key(lemma.id))?;
                        keys.insert(site_lemma_key(site_id, lemma.id), EMPTY)?;
                        postings.insert(posting_key(lemma.id, page_id), rank_bytes(*count as f32))?;
                        keys.insert(page_posting_key(page_id, lemma.id), EMPTY)?;
                    }
                    Ok(())
                },
            );
        result?;
        self.flush()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt("keys"))?;
    Ok(u64::from_be_bytes(raw))
}

/// The id stored in the last eight bytes of a composite key.
fn trailing_id(key: &[u8]) -> Result<u64> {
    let start = key.len().checked_sub(8).ok_or(StoreError::Corrupt("keys"))?;
    decode_id(&key[start..])
}

fn rank_bytes(rank: f32) -> Vec<u8> {
    rank.to_be_bytes().to_vec()
}

fn decode_rank(bytes: &[u8]) -> Result<f32> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| StoreError::Corrupt("postings"))?;
    Ok(f32::from_be_bytes(raw))
}

fn prefixed(tag: u8, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(tag);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn url_key(url: &str) -> Vec<u8> {
    let mut key = vec![SITE_BY_URL];
    key.extend_from_slice(url.as_bytes());
    key
}

fn path_key(site_id: SiteId, path: &str) -> Vec<u8> {
    let mut key = prefixed(PAGE_BY_PATH, site_id);
    key.extend_from_slice(path.as_bytes());
    key
}

fn text_prefix(text: &str) -> Vec<u8> {
    let mut key = vec![LEMMA_BY_TEXT];
    key.extend_from_slice(text.as_bytes());
    key.push(0);
    key
}

fn text_key(text: &str, site_id: SiteId) -> Vec<u8> {
    let mut key = text_prefix(text);
    key.extend_from_slice(&site_id.to_be_bytes());
    key
}

fn site_lemma_key(site_id: SiteId, lemma_id: LemmaId) -> Vec<u8> {
    let mut key = prefixed(SITE_LEMMA, site_id);
    key.extend_from_slice(&lemma_id.to_be_bytes());
    key
}

fn page_posting_key(page_id: PageId, lemma_id: LemmaId) -> Vec<u8> {
    let mut key = prefixed(PAGE_POSTING, page_id);
    key.extend_from_slice(&lemma_id.to_be_bytes());
    key
}

fn posting_key(lemma_id: LemmaId, page_id: PageId) -> Vec<u8> {
    let mut key = id_key(lemma_id);
    key.extend_from_slice(&page_id.to_be_bytes());
    key
}

fn count_prefix(tree: &Tree, prefix: Vec<u8>) -> Result<usize> {
    let mut count = 0;
    for entry in tree.scan_prefix(prefix) {
        entry?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SiteStatus;

    fn seeded() -> (Store, Site) {
        let store = Store::temporary().unwrap();
        let mut site = Site::new("https://a.ru", "A", SiteStatus::Indexing);
        store.save_site(&mut site).unwrap();

        let mut pages = vec![Page::new("/", 200, "root"), Page::new("/news", 200, "news")];
        for page in pages.iter_mut() {
            page.id = store.generate_id().unwrap();
            page.site_id = site.id;
        }
        let mut lemmas = vec![
            Lemma { id: store.generate_id().unwrap(), site_id: site.id, text: "кот".into(), frequency: 2 },
            Lemma { id: store.generate_id().unwrap(), site_id: site.id, text: "пес".into(), frequency: 1 },
        ];
        let postings = vec![
            Posting { page_id: pages[0].id, lemma_id: lemmas[0].id, rank: 3.0 },
            Posting { page_id: pages[1].id, lemma_id: lemmas[0].id, rank: 1.0 },
            Posting { page_id: pages[1].id, lemma_id: lemmas[1].id, rank: 2.0 },
        ];
        site.mark_indexed();
        store.save_site_index(&mut site, &mut pages, &mut lemmas, &postings).unwrap();
        (store, site)
    }

    #[test]
    fn site_index_round_trip() {
        let (store, site) = seeded();
        assert_eq!(store.find_site_by_url("https://a.ru").unwrap().unwrap().status, SiteStatus::Indexed);
        assert_eq!(store.count_pages(), 2);
        assert_eq!(store.count_pages_for_site(site.id).unwrap(), 2);
        assert_eq!(store.count_lemmas_for_site(site.id).unwrap(), 2);
        assert!(store.page_exists_by_path(site.id, "/news").unwrap());

        let cat = store.find_lemma_by_text_and_site("кот", site.id).unwrap().unwrap();
        assert_eq!(cat.frequency, 2);
        assert_eq!(store.find_page_ids_by_lemma_text("кот").unwrap().len(), 2);
        let mut ranks: Vec<f32> =
            store.find_postings_by_lemma_ids(&[cat.id]).unwrap().iter().map(|p| p.rank).collect();
        ranks.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ranks, vec![1.0, 3.0]);
    }

    #[test]
    fn delete_site_cascades() {
        let (store, site) = seeded();
        store.delete_site(&site).unwrap();
        assert!(!store.site_exists_by_url("https://a.ru").unwrap());
        assert_eq!(store.count_pages(), 0);
        assert!(store.find_lemmas_by_text("кот").unwrap().is_empty());
        assert!(store.find_page_ids_by_lemma_text("пес").unwrap().is_empty());
    }

    #[test]
    fn delete_page_keeps_frequency_equal_to_postings() {
        let (store, site) = seeded();
        assert!(store.delete_page_by_path(site.id, "/news").unwrap());
        assert!(!store.delete_page_by_path(site.id, "/news").unwrap());

        let cat = store.find_lemma_by_text_and_site("кот", site.id).unwrap().unwrap();
        assert_eq!(cat.frequency, 1);
        assert_eq!(store.find_postings_by_lemma_ids(&[cat.id]).unwrap().len(), 1);
        assert!(store.find_lemma_by_text_and_site("пес", site.id).unwrap().is_none());
        assert_eq!(store.count_lemmas_for_site(site.id).unwrap(), 1);
    }

    #[test]
    fn single_page_merges_into_existing_lemmas() {
        let (store, mut site) = seeded();
        let mut page = Page::new("/pets", 200, "pets");
        let lemmas = HashMap::from([("кот".to_string(), 4), ("мыш".to_string(), 1)]);
        store.save_single_page(&mut site, &mut page, &lemmas).unwrap();

        let cat = store.find_lemma_by_text_and_site("кот", site.id).unwrap().unwrap();
        assert_eq!(cat.frequency, 3);
        assert_eq!(store.find_lemmas_by_text("кот").unwrap().len(), 1);
        let mouse = store.find_lemma_by_text_and_site("мыш", site.id).unwrap().unwrap();
        assert_eq!(mouse.frequency, 1);
        assert_eq!(store.find_page(page.id).unwrap().unwrap().site_id, site.id);
        assert_eq!(store.count_pages_for_site(site.id).unwrap(), 3);
    }

    #[test]
    fn resaving_site_index_replaces_old_rows() {
        let (store, mut site) = seeded();
        let mut page = Page::new("/only", 200, "only");
        page.id = store.generate_id().unwrap();
        page.site_id = site.id;
        store.save_site_index(&mut site, &mut [page], &mut [], &[]).unwrap();
        assert_eq!(store.count_pages_for_site(site.id).unwrap(), 1);
        assert!(store.find_lemmas_by_text("кот").unwrap().is_empty());
    }
}
