//! DNS-over-HTTPS: a GET request carrying the base64url wire message in
//! the `dns` query parameter (RFC 8484). The underlying HTTP client is
//! rebuilt on `force_reconnect()` so a single idle-connection timeout
//! governs both ordinary idling and an explicit "this upstream looks
//! broken, start fresh" signal.

use crate::dns::DnsPacket;
use crate::error::{CoreError, Result};
use crate::resolver::transport::DnsTransport;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use reqwest::Client;
use std::time::Duration;

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
const ACCEPT_HEADER: &str = "application/dns-message";

fn build_client() -> Client {
    Client::builder()
        .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
        .build()
        .expect("reqwest client configuration is static and always valid")
}

pub struct DohTransport {
    url: String,
    client: RwLock<Client>,
}

impl DohTransport {
    pub fn new(url: String) -> Self {
        Self { url, client: RwLock::new(build_client()) }
    }
}

#[async_trait]
impl DnsTransport for DohTransport {
    async fn query(&self, query: &DnsPacket, deadline: Duration) -> Result<DnsPacket> {
        let bytes = query.serialize().map_err(|e| CoreError::Failure(e.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(bytes);

        let client = self.client.read().clone();
        let response = tokio::time::timeout(
            deadline,
            client
                .get(&self.url)
                .query(&[("dns", encoded)])
                .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
                .send(),
        )
        .await
        .map_err(|_| CoreError::Timeout)?
        .map_err(|e| CoreError::Io(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Failure(format!("doh upstream returned {}", response.status())));
        }

        let body = response.bytes().await.map_err(|e| CoreError::Io(e.to_string()))?;
        DnsPacket::parse(&body).map_err(|e| CoreError::Failure(e.to_string()))
    }

    async fn force_reconnect(&self) {
        *self.client.write() = build_client();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DnsResourceType;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    async fn spawn_server(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn queries_upstream_with_base64url_param() {
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let mut wire_reply = DnsPacket::response_shell(&query);
        wire_reply.answers.push(crate::dns::DnsRecord::a("example.com.", 60, "93.184.216.34".parse().unwrap()));
        let reply_bytes = wire_reply.serialize().unwrap();

        let router = Router::new().route(
            "/dns-query",
            get(move || {
                let body = reply_bytes.clone();
                async move { body }
            }),
        );
        let base = spawn_server(router).await;

        let transport = DohTransport::new(format!("{base}/dns-query"));
        let answer = transport.query(&query, Duration::from_secs(2)).await.unwrap();
        assert_eq!(answer.answers.len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let router = Router::new().route("/dns-query", get(|| async { StatusCode::BAD_GATEWAY }));
        let base = spawn_server(router).await;

        let transport = DohTransport::new(format!("{base}/dns-query"));
        let query = DnsPacket::new_query(1, "example.com.", DnsResourceType::A);
        let result = transport.query(&query, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}
