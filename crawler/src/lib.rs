//! Site crawling: a recursive, cancellable fetcher bounded to one site root.

pub mod site_crawler;
pub mod state;

pub use site_crawler::{FetchOutcome, SiteCrawler};
pub use state::{RunFlag, VisitedSet};
