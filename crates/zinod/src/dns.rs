//! Reverse DNS seam.
//!
//! BFD events carry the reverse name of the far end. The actual resolver is
//! an external collaborator; tasks depend only on this trait. The default
//! implementation resolves nothing, which degrades gracefully to events
//! without a `Neigh-rDNS` attribute.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;

/// Resolves an address to its PTR name, if any.
#[async_trait]
pub trait ReverseResolver: Send + Sync {
    async fn reverse_lookup(&self, address: IpAddr) -> Option<String>;
}

/// A resolver that never resolves. Used when no resolver backend is wired.
pub struct NullResolver;

#[async_trait]
impl ReverseResolver for NullResolver {
    async fn reverse_lookup(&self, _address: IpAddr) -> Option<String> {
        None
    }
}

/// Table-driven resolver for tests.
#[derive(Default)]
pub struct StaticResolver {
    names: HashMap<IpAddr, String>,
}

impl StaticResolver {
    pub fn with(mut self, address: IpAddr, name: &str) -> Self {
        self.names.insert(address, name.to_string());
        self
    }
}

#[async_trait]
impl ReverseResolver for StaticResolver {
    async fn reverse_lookup(&self, address: IpAddr) -> Option<String> {
        self.names.get(&address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::default().with("10.0.0.1".parse().unwrap(), "peer.example.org");
        assert_eq!(
            resolver.reverse_lookup("10.0.0.1".parse().unwrap()).await,
            Some("peer.example.org".to_string())
        );
        assert_eq!(resolver.reverse_lookup("10.0.0.2".parse().unwrap()).await, None);
    }
}
