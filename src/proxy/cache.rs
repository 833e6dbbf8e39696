//! Per-origin reverse proxies for forward mode.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::Uri;

use super::reverse::{Pools, ReverseProxy};
use super::rewrite::Hook;
use super::stream::FlushPolicy;
use super::transport::UpstreamClient;
use crate::authz::Authorizer;
use crate::config::HookKind;

/// Builds one [`ReverseProxy`] per origin and keeps it.
///
/// Lookups share a read lock; a miss takes the write lock and checks
/// again before inserting.
pub struct ProxyCache {
    proxies: RwLock<HashMap<String, Arc<ReverseProxy>>>,
    hook: HookKind,
    client: UpstreamClient,
    authorizer: Arc<dyn Authorizer>,
    pools: Pools,
    flush: FlushPolicy,
}

impl ProxyCache {
    pub fn new(
        hook: HookKind,
        client: UpstreamClient,
        authorizer: Arc<dyn Authorizer>,
        pools: Pools,
        flush: FlushPolicy,
    ) -> Self {
        Self {
            proxies: RwLock::new(HashMap::new()),
            hook,
            client,
            authorizer,
            pools,
            flush,
        }
    }

    /// Proxy for `origin` (`scheme://authority`).
    pub fn get(&self, origin: &Uri) -> Arc<ReverseProxy> {
        let key = origin.to_string();
        if let Ok(proxies) = self.proxies.read() {
            if let Some(proxy) = proxies.get(&key) {
                return Arc::clone(proxy);
            }
        }

        let mut proxies = match self.proxies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(proxy) = proxies.get(&key) {
            return Arc::clone(proxy);
        }

        let hook = match self.hook {
            HookKind::Director => Hook::director(origin.clone()),
            HookKind::Rewrite => Hook::rewrite(origin.clone()),
        };
        let proxy = Arc::new(
            ReverseProxy::new(
                hook,
                self.client.clone(),
                Arc::clone(&self.authorizer),
                self.pools.clone(),
            )
            .with_flush(self.flush),
        );
        tracing::debug!(origin = %key, "Built proxy for origin");
        proxies.insert(key, Arc::clone(&proxy));
        proxy
    }

    pub fn len(&self) -> usize {
        self.proxies.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{ClientIdIssuer, RecordOnly};
    use crate::buffer::BufferPool;
    use crate::config::schema::TimeoutConfig;
    use crate::proxy::transport::build_client;
    use crate::record::sink::NullSink;
    use crate::record::RecordPool;
    use std::time::Duration;

    fn cache() -> ProxyCache {
        let pools = Pools {
            records: RecordPool::new(4, Arc::new(NullSink)),
            buffers: Arc::new(BufferPool::default()),
        };
        let authorizer = Arc::new(RecordOnly::new(ClientIdIssuer::new(
            "zc",
            Duration::from_secs(60),
            vec![],
        )));
        ProxyCache::new(
            HookKind::Director,
            build_client(false, &TimeoutConfig::default()).unwrap(),
            authorizer,
            pools,
            FlushPolicy::Buffered,
        )
    }

    #[tokio::test]
    async fn one_proxy_per_origin() {
        let cache = cache();
        let a: Uri = "https://dev1.com:443".parse().unwrap();
        let b: Uri = "http://dev2.com:80".parse().unwrap();

        let first = cache.get(&a);
        let again = cache.get(&a);
        assert!(Arc::ptr_eq(&first, &again));

        cache.get(&b);
        assert_eq!(cache.len(), 2);
    }
}
