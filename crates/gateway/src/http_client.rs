use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

/// Shared HTTP client for upstream and identity-provider calls.
///
/// Keep-alive with a short pool idle timeout so DNS changes are picked up
/// between requests.
pub fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .build()
                .expect("failed to build the shared HTTP client")
        })
        .clone()
}
