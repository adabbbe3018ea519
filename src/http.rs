use std::time::Duration;
use reqwest::{Client, ClientBuilder, Proxy};
use crate::errors::Result;

const USER_AGENT: &str = concat!("playlist-downloader/", env!("CARGO_PKG_VERSION"));

/// Builds the shared HTTP client used for catalog requests.
pub fn build_client(timeout_seconds: u64, proxy_url: Option<&str>) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(15))
        .user_agent(USER_AGENT)
        .gzip(true)
        .brotli(true)
        .tcp_keepalive(Duration::from_secs(60));

    if let Some(proxy_url) = proxy_url {
        log::info!("Using proxy: {}", proxy_url);
        builder = builder.proxy(Proxy::all(proxy_url)?);
    }

    Ok(builder.build()?)
}

/// Exponential backoff: `base`, `2*base`, `4*base`, ... for retry number `retry` (1-based).
pub fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(0, 5), Duration::ZERO);
    }

    #[test]
    fn test_build_client_with_and_without_proxy() {
        assert!(build_client(5, None).is_ok());
        assert!(build_client(5, Some("http://127.0.0.1:1080")).is_ok());
    }
}
