pub mod config;
pub mod error;
pub mod html;
pub mod lemma;
pub mod model;
pub mod store;

pub use config::{AppConfig, ConnectionSettings, SiteConfig};
pub use error::StoreError;
pub use lemma::{Language, LemmaExtractor, Morphology, SnowballMorphology, WordTag};
pub use model::{Lemma, LemmaId, Page, PageId, Posting, Site, SiteId, SiteStatus};
pub use store::Store;
