//! Fetching update windows from peers.
//!
//! [`UpdatesTransport`] is the seam between the replication worker and
//! the wire. The production implementation, [`HttpTransport`], issues
//! `GET /{checks,filters}/updates?peer=...&prev=...&end=...` requests
//! with a dedicated HTTP client per peer. Clients are built lazily on
//! first use and cached; TLS material is loaded when the client is
//! built, so identities that appear after startup are picked up on the
//! next fetch rather than failing the process.

use crate::config::ClusterConfig;
use crate::document::{ChangeDocument, StreamKind};
use crate::error::{ClusterError, Result};
use crate::metrics;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Where and who a peer is, as needed to fetch from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEndpoint {
    pub id: Uuid,
    pub cn: String,
    pub addr: SocketAddr,
}

/// Trait defining how update windows are fetched from a peer.
///
/// Implementations must be safe to call concurrently for different
/// peers. The worker guarantees at most one call in flight per peer.
pub trait UpdatesTransport: Send + Sync + 'static {
    /// Fetch `(prev, end]` of `stream` from `endpoint`, identifying
    /// ourselves as `requester` and acknowledging `prev`.
    fn fetch_updates(
        &self,
        endpoint: PeerEndpoint,
        stream: StreamKind,
        requester: Uuid,
        prev: i64,
        end: i64,
    ) -> BoxFuture<'_, ChangeDocument>;
}

struct CachedClient {
    cn: String,
    addr: SocketAddr,
    client: reqwest::Client,
}

/// HTTP(S) implementation of [`UpdatesTransport`].
///
/// One cached `reqwest::Client` per peer, pinned to the peer's address
/// via DNS override so the URL can carry the certificate name the peer
/// must present. A peer whose cn or address changes gets a fresh client.
pub struct HttpTransport {
    config: ClusterConfig,
    clients: Mutex<HashMap<Uuid, CachedClient>>,
}

impl HttpTransport {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn scheme(&self) -> &'static str {
        if self.config.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }

    /// Get the cached client for a peer, building one if missing or if
    /// the peer's identity or address moved.
    fn client_for(&self, endpoint: &PeerEndpoint) -> Result<reqwest::Client> {
        {
            let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = clients.get(&endpoint.id) {
                if cached.cn == endpoint.cn && cached.addr == endpoint.addr {
                    return Ok(cached.client.clone());
                }
            }
        }

        let client = self.build_client(endpoint)?;
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.insert(
            endpoint.id,
            CachedClient {
                cn: endpoint.cn.clone(),
                addr: endpoint.addr,
                client: client.clone(),
            },
        );
        debug!(peer_id = %endpoint.id, cn = %endpoint.cn, addr = %endpoint.addr, "built updates client");
        Ok(client)
    }

    fn build_client(&self, endpoint: &PeerEndpoint) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout_duration())
            .timeout(self.config.request_timeout_duration())
            .gzip(true)
            .resolve(&endpoint.cn, endpoint.addr);

        if let Some(tls) = &self.config.tls {
            let ca = std::fs::read(&tls.ca_file)
                .map_err(|e| ClusterError::transport(&endpoint.cn, format!("read ca: {e}")))?;
            let ca = reqwest::Certificate::from_pem(&ca)
                .map_err(|e| ClusterError::transport(&endpoint.cn, format!("parse ca: {e}")))?;

            let mut identity_pem = std::fs::read(&tls.cert_file)
                .map_err(|e| ClusterError::transport(&endpoint.cn, format!("read cert: {e}")))?;
            let key = std::fs::read(&tls.key_file)
                .map_err(|e| ClusterError::transport(&endpoint.cn, format!("read key: {e}")))?;
            identity_pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| ClusterError::transport(&endpoint.cn, format!("parse identity: {e}")))?;

            builder = builder
                .add_root_certificate(ca)
                .identity(identity)
                .use_rustls_tls();
        }

        builder
            .build()
            .map_err(|e| ClusterError::transport(&endpoint.cn, format!("build client: {e}")))
    }
}

pub(crate) fn updates_url(
    scheme: &str,
    cn: &str,
    port: u16,
    stream: StreamKind,
    requester: Uuid,
    prev: i64,
    end: i64,
) -> String {
    format!(
        "{scheme}://{cn}:{port}/{}/updates?peer={requester}&prev={prev}&end={end}",
        stream.path()
    )
}

impl UpdatesTransport for HttpTransport {
    fn fetch_updates(
        &self,
        endpoint: PeerEndpoint,
        stream: StreamKind,
        requester: Uuid,
        prev: i64,
        end: i64,
    ) -> BoxFuture<'_, ChangeDocument> {
        Box::pin(async move {
            let client = self.client_for(&endpoint)?;
            let url = updates_url(
                self.scheme(),
                &endpoint.cn,
                endpoint.addr.port(),
                stream,
                requester,
                prev,
                end,
            );

            let started = Instant::now();
            let result = async {
                let resp = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| ClusterError::transport(&endpoint.cn, e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(ClusterError::transport(
                        &endpoint.cn,
                        format!("{} returned {}", stream.path(), status),
                    ));
                }
                resp.json::<ChangeDocument>()
                    .await
                    .map_err(|e| ClusterError::protocol(&endpoint.cn, e.to_string()))
            }
            .await;

            metrics::record_fetch(&endpoint.cn, stream.path(), result.is_ok());
            metrics::record_fetch_latency(&endpoint.cn, stream.path(), started.elapsed());
            result
        })
    }
}
