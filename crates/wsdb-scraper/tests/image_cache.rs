//! Integration tests for `ImageCache::resolve` against a `wiremock` image
//! host and a throwaway filesystem store under the system temp dir.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wsdb_scraper::canonical::normalize_image_url;
use wsdb_scraper::image_cache::url_hash;
use wsdb_scraper::{BadHashRegistry, FsImageStore, ImageCache, ImageCacheError};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR-not-really-a-png";

struct TempCache {
    root: PathBuf,
    cache: ImageCache,
}

impl Drop for TempCache {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn temp_cache(registry: BadHashRegistry, max_bytes: u64) -> TempCache {
    let root = std::env::temp_dir().join(format!("wsdb-image-cache-{}", uuid::Uuid::new_v4()));
    let cache = ImageCache::new(
        reqwest::Client::new(),
        Arc::new(FsImageStore::new(&root)),
        Arc::new(registry),
        max_bytes,
    );
    TempCache { root, cache }
}

fn hash_of(url: &str) -> String {
    url_hash(&normalize_image_url(url, None).expect("test URL should normalize"))
}

async fn mount_png(server: &MockServer, image_path: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(PNG_BYTES, "image/png")
                .set_delay(Duration::from_millis(150)),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// deny-list and in-flight dedupe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_resolves_share_one_download_and_bad_hash_is_refused() {
    let server = MockServer::start().await;
    mount_png(&server, "/img/good.png", 1).await;
    mount_png(&server, "/img/banner.png", 0).await;

    let good = format!("{}/img/good.png", server.uri());
    let bad = format!("{}/img/banner.png", server.uri());
    let tmp = temp_cache(BadHashRegistry::from_hashes([hash_of(&bad)]), 1024);

    let (first, second, refused) = tokio::join!(
        tmp.cache.resolve(&good, None),
        tmp.cache.resolve(&good, None),
        tmp.cache.resolve(&bad, None),
    );

    let first = first.expect("good image should resolve");
    let second = second.expect("good image should resolve twice");
    assert_eq!(first.local_path, second.local_path);
    assert_eq!(first.content_type, "image/png");
    assert_eq!(first.hash, hash_of(&good));
    assert_eq!(std::fs::read(&first.local_path).unwrap(), PNG_BYTES);

    assert!(matches!(refused, Err(ImageCacheError::BadImageAsset { .. })));
}

#[tokio::test]
async fn cached_entry_is_served_without_network() {
    let server = MockServer::start().await;
    mount_png(&server, "/img/jar.png", 1).await;

    let url = format!("{}/img/jar.png", server.uri());
    let tmp = temp_cache(BadHashRegistry::new(), 1024);

    let first = tmp.cache.resolve(&url, None).await.unwrap();
    let again = tmp.cache.resolve(&url, None).await.unwrap();
    assert_eq!(first, again);
}

#[tokio::test]
async fn relative_url_resolves_against_base() {
    let server = MockServer::start().await;
    mount_png(&server, "/img/rel.png", 1).await;

    let base = format!("{}/product/1.html", server.uri());
    let tmp = temp_cache(BadHashRegistry::new(), 1024);
    let entry = tmp.cache.resolve("/img/rel.png", Some(&base)).await.unwrap();
    assert_eq!(entry.hash, hash_of(&format!("{}/img/rel.png", server.uri())));
}

#[tokio::test]
async fn deny_removes_stored_entry_and_blocks_future_resolves() {
    let server = MockServer::start().await;
    mount_png(&server, "/img/logo.png", 1).await;

    let url = format!("{}/img/logo.png", server.uri());
    let tmp = temp_cache(BadHashRegistry::new(), 1024);

    let entry = tmp.cache.resolve(&url, None).await.unwrap();
    assert!(entry.local_path.exists());

    assert!(tmp.cache.deny(&entry.hash).await.unwrap());
    assert!(!entry.local_path.exists());
    assert!(tmp.cache.registry().contains(&entry.hash));

    let refused = tmp.cache.resolve(&url, None).await;
    assert!(matches!(refused, Err(ImageCacheError::BadImageAsset { .. })));
}

// ---------------------------------------------------------------------------
// payload checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_payload_is_bad_asset_and_not_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/huge.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 4096], "image/png"))
        .mount(&server)
        .await;

    let url = format!("{}/img/huge.png", server.uri());
    let tmp = temp_cache(BadHashRegistry::new(), 1024);

    let result = tmp.cache.resolve(&url, None).await;
    assert!(matches!(result, Err(ImageCacheError::BadImageAsset { .. })));
    assert!(!tmp.root.join(&hash_of(&url)[..2]).exists());
}

#[tokio::test]
async fn html_response_is_bad_asset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/placeholder.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
        .mount(&server)
        .await;

    let url = format!("{}/img/placeholder.jpg", server.uri());
    let tmp = temp_cache(BadHashRegistry::new(), 1024);
    let result = tmp.cache.resolve(&url, None).await;
    assert!(matches!(result, Err(ImageCacheError::BadImageAsset { .. })));
}

#[tokio::test]
async fn upstream_error_is_download_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/img/missing.jpg", server.uri());
    let tmp = temp_cache(BadHashRegistry::new(), 1024);
    assert!(matches!(
        tmp.cache.resolve(&url, None).await,
        Err(ImageCacheError::Download(_))
    ));
}
