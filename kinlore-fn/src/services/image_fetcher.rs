//! Image pass-through fetcher
//!
//! Fetches remote images on behalf of clients that cannot load them
//! directly (CORS, mixed content). Successful fetches are cached for
//! [`IMAGE_CACHE_TTL`] and concurrent fetches of one URL share a request.
//! The cache holds at most [`IMAGE_CACHE_MAX_ENTRIES`] images and
//! [`IMAGE_CACHE_MAX_BYTES`] in total.
//!
//! The private-host check applies to the requested URL and to every
//! redirect hop.

use axum::body::Bytes;
use kinlore_common::request_cache::{CacheStats, RequestCache};
use reqwest::redirect;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::upstream::{check_status, http_client_builder, UpstreamError};

/// How long a fetched image is served from memory
pub const IMAGE_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Largest image the proxy will pass through
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Most images kept in memory at once
pub const IMAGE_CACHE_MAX_ENTRIES: usize = 256;

/// Total image bytes kept in memory at once
pub const IMAGE_CACHE_MAX_BYTES: usize = 64 * 1024 * 1024;

const MAX_REDIRECTS: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Fetched image body and its content type
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub content_type: String,
    pub bytes: Bytes,
}

pub struct ImageFetcher {
    http_client: reqwest::Client,
    cache: RequestCache<FetchedImage, UpstreamError>,
    allow_private_hosts: bool,
}

impl ImageFetcher {
    pub fn new(allow_private_hosts: bool) -> Result<Self, UpstreamError> {
        Self::with_client_builder(reqwest::Client::builder(), allow_private_hosts)
    }

    /// Build on `builder` (e.g. with DNS overrides), adding the timeouts,
    /// user agent and hop-checking redirect policy
    pub fn with_client_builder(
        builder: reqwest::ClientBuilder,
        allow_private_hosts: bool,
    ) -> Result<Self, UpstreamError> {
        let http_client = http_client_builder(builder, REQUEST_TIMEOUT)
            .redirect(redirect_policy(allow_private_hosts))
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            cache: RequestCache::new()
                .with_max_entries(IMAGE_CACHE_MAX_ENTRIES)
                .with_max_weight(IMAGE_CACHE_MAX_BYTES, |image: &FetchedImage| image.bytes.len()),
            allow_private_hosts,
        })
    }

    /// Fetch `url`, serving a cached copy when fresh
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage, Arc<UpstreamError>> {
        let parsed = validate_url(url, self.allow_private_hosts).map_err(Arc::new)?;
        let key = parsed.to_string();

        let client = self.http_client.clone();
        self.cache
            .get_or_fetch(&key, IMAGE_CACHE_TTL, move || download(client, parsed))
            .await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Images currently held in memory
    pub async fn cached_images(&self) -> usize {
        self.cache.entry_count().await
    }
}

/// Follow at most [`MAX_REDIRECTS`] hops, each one passing [`validate_url`]
fn redirect_policy(allow_private_hosts: bool) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {} redirects", MAX_REDIRECTS));
        }
        match check_redirect_target(attempt.url(), allow_private_hosts) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

fn check_redirect_target(url: &reqwest::Url, allow_private_hosts: bool) -> Result<(), String> {
    validate_url(url.as_str(), allow_private_hosts)
        .map(|_| ())
        .map_err(|e| format!("redirect refused: {}", e))
}

async fn download(client: reqwest::Client, url: reqwest::Url) -> Result<FetchedImage, UpstreamError> {
    tracing::debug!(operation = "image_proxy", url = %url, "Fetching image");

    let response = client.get(url.clone()).send().await.map_err(|e| {
        if e.is_redirect() {
            tracing::warn!(url = %url, error = %e, "Image redirect refused");
            UpstreamError::Refused(e.to_string())
        } else {
            UpstreamError::from(e)
        }
    })?;
    let response = check_status(response).await?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.to_ascii_lowercase().starts_with("image/") {
        return Err(UpstreamError::UnsupportedContent(if content_type.is_empty() {
            "missing content type".to_string()
        } else {
            content_type
        }));
    }

    if let Some(length) = response.content_length() {
        if length > MAX_IMAGE_BYTES {
            return Err(UpstreamError::TooLarge(length));
        }
    }

    let bytes = response.bytes().await?;
    if bytes.len() as u64 > MAX_IMAGE_BYTES {
        return Err(UpstreamError::TooLarge(bytes.len() as u64));
    }

    tracing::debug!(url = %url, bytes = bytes.len(), content_type = %content_type, "Image fetched");
    Ok(FetchedImage { content_type, bytes })
}

/// Accept only http(s) URLs, and only public hosts unless allowed
fn validate_url(raw: &str, allow_private_hosts: bool) -> Result<reqwest::Url, UpstreamError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| UpstreamError::InvalidRequest(format!("Invalid URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UpstreamError::InvalidRequest(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| UpstreamError::InvalidRequest("URL has no host".to_string()))?;

    if !allow_private_hosts && is_private_host(host) {
        return Err(UpstreamError::InvalidRequest(format!(
            "Refusing to fetch from private host: {}",
            host
        )));
    }

    Ok(url)
}

fn is_private_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_schemes() {
        for url in ["ftp://example.com/a.png", "file:///etc/passwd", "data:image/png;base64,AA"] {
            assert!(matches!(
                validate_url(url, false),
                Err(UpstreamError::InvalidRequest(_))
            ));
        }
        assert!(validate_url("not a url", false).is_err());
    }

    #[test]
    fn test_private_hosts_blocked_unless_allowed() {
        for url in [
            "http://127.0.0.1/a.png",
            "http://localhost:8080/a.png",
            "http://10.1.2.3/a.png",
            "http://192.168.0.10/a.png",
            "http://[::1]/a.png",
        ] {
            assert!(validate_url(url, false).is_err(), "{} should be blocked", url);
            assert!(validate_url(url, true).is_ok());
        }
        assert!(validate_url("https://images.example.com/photo.jpg", false).is_ok());
    }

    #[test]
    fn test_redirect_targets_are_checked() {
        let hop = |s: &str| reqwest::Url::parse(s).unwrap();
        assert!(check_redirect_target(&hop("http://169.254.169.254/latest/meta-data"), false).is_err());
        assert!(check_redirect_target(&hop("http://127.0.0.1/a.png"), false).is_err());
        assert!(check_redirect_target(&hop("file:///etc/passwd"), true).is_err());
        assert!(check_redirect_target(&hop("https://cdn.example.com/a.png"), false).is_ok());
        assert!(check_redirect_target(&hop("http://127.0.0.1/a.png"), true).is_ok());
    }

    const PIXEL: &[u8] = b"\x89PNG fake pixel";

    /// Image host on 127.0.0.1 that `photos.example.test` resolves to
    async fn image_host() -> std::net::SocketAddr {
        use axum::{http::header, response::Redirect, routing::get, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let port = addr.port();
        let app = Router::new()
            .route(
                "/photo.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], PIXEL) }),
            )
            .route(
                "/to-loopback",
                get(move || async move {
                    Redirect::temporary(&format!("http://127.0.0.1:{}/photo.png", port))
                }),
            )
            .route(
                "/to-public",
                get(move || async move {
                    Redirect::temporary(&format!("http://photos.example.test:{}/photo.png", port))
                }),
            )
            .route("/loop", get(|| async { Redirect::temporary("/loop") }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn public_fetcher(addr: std::net::SocketAddr) -> ImageFetcher {
        let builder = reqwest::Client::builder().resolve("photos.example.test", addr);
        ImageFetcher::with_client_builder(builder, false).unwrap()
    }

    #[tokio::test]
    async fn test_redirect_to_loopback_is_refused() {
        let addr = image_host().await;
        let fetcher = public_fetcher(addr);

        let url = format!("http://photos.example.test:{}/to-loopback", addr.port());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(*err, UpstreamError::Refused(_)), "got {:?}", err);
        assert_eq!(fetcher.cached_images().await, 0);
    }

    #[tokio::test]
    async fn test_redirect_to_public_host_is_followed() {
        let addr = image_host().await;
        let fetcher = public_fetcher(addr);

        let url = format!("http://photos.example.test:{}/to-public", addr.port());
        let image = fetcher.fetch(&url).await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert_eq!(&image.bytes[..], PIXEL);
        assert_eq!(fetcher.cached_images().await, 1);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_cut_off() {
        let addr = image_host().await;
        let fetcher = public_fetcher(addr);

        let url = format!("http://photos.example.test:{}/loop", addr.port());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(*err, UpstreamError::Refused(_)), "got {:?}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_images_are_released() {
        let fetcher = ImageFetcher::new(false).unwrap();
        let image = FetchedImage {
            content_type: "image/png".to_string(),
            bytes: Bytes::from_static(PIXEL),
        };
        for i in 0..50 {
            let key = format!("https://images.example.com/a.png?v={}", i);
            fetcher.cache.insert(&key, image.clone(), IMAGE_CACHE_TTL).await;
        }
        assert_eq!(fetcher.cached_images().await, 50);

        tokio::time::advance(IMAGE_CACHE_TTL + Duration::from_secs(1)).await;
        fetcher
            .cache
            .insert("https://images.example.com/a.png?v=50", image, IMAGE_CACHE_TTL)
            .await;
        assert_eq!(fetcher.cached_images().await, 1);
    }

    #[tokio::test]
    async fn test_image_cache_is_bounded() {
        let fetcher = ImageFetcher::new(false).unwrap();
        let image = FetchedImage {
            content_type: "image/jpeg".to_string(),
            bytes: Bytes::from(vec![0u8; 1024 * 1024]),
        };
        for i in 0..(IMAGE_CACHE_MAX_BYTES / (1024 * 1024) + 10) {
            let key = format!("https://images.example.com/big.jpg?v={}", i);
            fetcher.cache.insert(&key, image.clone(), IMAGE_CACHE_TTL).await;
        }
        assert_eq!(fetcher.cached_images().await, IMAGE_CACHE_MAX_BYTES / (1024 * 1024));
        assert!(fetcher.stats().evictions >= 10);
    }
}
