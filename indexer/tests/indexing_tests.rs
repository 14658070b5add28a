use sitesearch_core::{AppConfig, ConnectionSettings, Language, SiteConfig, SiteStatus, Store};
use sitesearch_indexer::service::{ALREADY_RUNNING, NOT_RUNNING, OUTSIDE_CONFIGURED_SITES, STOPPED_BY_USER};
use sitesearch_indexer::{IndexingResponse, IndexingService};
use std::path::PathBuf;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(uri: &str) -> AppConfig {
    AppConfig {
        language: Language::English,
        data_dir: PathBuf::new(),
        connection: ConnectionSettings::default(),
        sites: vec![SiteConfig { name: "Mock".to_string(), url: uri.to_string() }],
    }
}

async fn page(server: &MockServer, at: &str, body: &str, delay_ms: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(body)
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(server)
        .await;
}

async fn three_page_site(root_delay_ms: u64) -> MockServer {
    let server = MockServer::start().await;
    page(
        &server,
        "/",
        r#"<html><head><title>Home</title></head><body><p>cats and dogs</p><a href="/a">a</a><a href="/b">b</a></body></html>"#,
        root_delay_ms,
    )
    .await;
    page(&server, "/a", "<p>cats</p>", 0).await;
    page(&server, "/b", "<p>birds</p>", 0).await;
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_run_persists_site_pages_and_lemmas() {
    let server = three_page_site(0).await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();

    assert_eq!(service.start(), IndexingResponse::ok());
    service.wait_idle().await;
    assert!(!service.is_indexing());

    let store = service.store();
    let site = store.find_site_by_url(&server.uri()).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert!(site.last_error.is_empty());
    assert_eq!(store.count_pages_for_site(site.id).unwrap(), 3);
    assert!(store.page_exists_by_path(site.id, "/").unwrap());
    assert_eq!(store.find_lemma_by_text_and_site("cat", site.id).unwrap().unwrap().frequency, 2);
    assert_eq!(store.find_lemma_by_text_and_site("bird", site.id).unwrap().unwrap().frequency, 1);
    assert!(store.find_lemma_by_text_and_site("and", site.id).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_start_is_refused_while_running() {
    let server = three_page_site(300).await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();

    assert!(service.start().result);
    assert_eq!(service.start(), IndexingResponse::failure(ALREADY_RUNNING));
    assert_eq!(service.pools_created(), 1);

    service.wait_idle().await;
    assert!(service.start().result);
    assert_eq!(service.pools_created(), 2);
    service.wait_idle().await;

    // The rerun replaced the first run's rows instead of adding to them.
    let site = service.store().find_site_by_url(&server.uri()).unwrap().unwrap();
    assert_eq!(service.store().sites().unwrap().len(), 1);
    assert_eq!(service.store().count_pages_for_site(site.id).unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_without_start_is_not_running() {
    let service = IndexingService::new(config("http://127.0.0.1:9"), Store::temporary().unwrap()).unwrap();
    assert_eq!(service.stop(), IndexingResponse::failure(NOT_RUNNING));
    assert_eq!(service.pools_created(), 0);
}

async fn slow_site() -> MockServer {
    let server = MockServer::start().await;
    page(&server, "/", r#"<p>root words</p><a href="/slow1">1</a><a href="/slow2">2</a>"#, 0).await;
    page(&server, "/slow1", r#"<p>slow</p><a href="/deep">d</a>"#, 500).await;
    page(&server, "/slow2", "<p>slow</p>", 500).await;
    page(&server, "/deep", "<p>deep</p>", 0).await;
    server
}

async fn fetches_of(server: &MockServer, at: &str) -> usize {
    let requests = server.received_requests().await.unwrap_or_default();
    requests.iter().filter(|r| r.url.path() == at).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_marks_site_failed_and_keeps_fetched_pages() {
    let server = slow_site().await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();

    assert!(service.start().result);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.stop(), IndexingResponse::ok());
    assert!(!service.is_indexing());
    assert_eq!(service.stop(), IndexingResponse::failure(NOT_RUNNING));

    service.wait_idle().await;
    let store = service.store();
    let site = store.find_site_by_url(&server.uri()).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error, STOPPED_BY_USER);
    assert_eq!(store.count_pages_for_site(site.id).unwrap(), 3);
    assert!(!store.page_exists_by_path(site.id, "/deep").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_after_stop_leaves_the_stopped_crawl_stopped() {
    let server = slow_site().await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();

    assert!(service.start().result);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.stop(), IndexingResponse::ok());
    assert_eq!(service.start(), IndexingResponse::ok());
    service.wait_idle().await;
    // The stopped run's slow fetches land around 500ms; let its job wind down.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let store = service.store();
    assert_eq!(store.sites().unwrap().len(), 1);
    let site = store.find_site_by_url(&server.uri()).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(store.count_pages_for_site(site.id).unwrap(), 4);
    assert_eq!(store.count_pages(), 4);
    assert_eq!(fetches_of(&server, "/deep").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_again_after_an_abandoned_wait_sees_the_stop() {
    let server = slow_site().await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();

    assert!(service.start().result);
    tokio::select! {
        _ = service.wait_idle() => panic!("run finished before the stop"),
        _ = tokio::time::sleep(Duration::from_millis(200)) => {
            service.stop();
            service.wait_idle().await;
        }
    }

    let site = service.store().find_site_by_url(&server.uri()).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error, STOPPED_BY_USER);
    assert_eq!(service.store().count_pages_for_site(site.id).unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_page_address_may_be_percent_encoded() {
    let server = MockServer::start().await;
    page(&server, "/news", "<p>cats everywhere</p>", 0).await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();
    let encoded = format!("{}/news", server.uri()).replace(':', "%3A").replace('/', "%2F");

    assert_eq!(service.index_page(&encoded).await, IndexingResponse::ok());

    let site = service.store().find_site_by_url(&server.uri()).unwrap().unwrap();
    assert!(service.store().page_exists_by_path(site.id, "/news").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn page_outside_configured_sites_is_rejected() {
    let server = three_page_site(0).await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();

    let response = service.index_page("https://elsewhere.example/page").await;
    assert_eq!(response, IndexingResponse::failure(OUTSIDE_CONFIGURED_SITES));
    assert!(service.store().sites().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_page_creates_site_and_replaces_itself() {
    let server = MockServer::start().await;
    page(&server, "/news", r#"<p>cats everywhere</p><a href="/other">o</a>"#, 0).await;
    let service = IndexingService::new(config(&server.uri()), Store::temporary().unwrap()).unwrap();
    let url = format!("  {}/news ", server.uri());

    assert_eq!(service.index_page(&url).await, IndexingResponse::ok());
    assert_eq!(service.index_page(&url).await, IndexingResponse::ok());

    let store = service.store();
    let site = store.find_site_by_url(&server.uri()).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(store.count_pages_for_site(site.id).unwrap(), 1);
    assert!(store.page_exists_by_path(site.id, "/news").unwrap());
    assert_eq!(store.find_lemma_by_text_and_site("cat", site.id).unwrap().unwrap().frequency, 1);
    assert!(!service.is_indexing());
}

#[test]
fn response_omits_missing_error() {
    assert_eq!(serde_json::to_string(&IndexingResponse::ok()).unwrap(), r#"{"result":true}"#);
    assert_eq!(
        serde_json::to_string(&IndexingResponse::failure(NOT_RUNNING)).unwrap(),
        r#"{"result":false,"error":"indexing not running"}"#
    );
}
