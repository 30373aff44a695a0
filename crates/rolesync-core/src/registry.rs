//! Agent client registry
//!
//! Caches one API handle per agent id. Each id owns a slot; the map's shard
//! lock is held only while the slot is fetched, and construction runs under
//! the slot's own mutex. Concurrent first lookups for the same id build
//! exactly one handle, and unrelated ids never wait on each other.
//! `recycle_all` takes the outer write lock and swaps in a freshly built
//! map, so no caller ever sees a mix of old and new handles.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::api::{AgentClient, HttpAgentClient};
use crate::config::PortResolver;
use crate::domain::{AgentInstance, SyncResult};

/// Network location of a peer API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentEndpoint {
    pub host: String,
    pub port: u16,
}

impl AgentEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for AgentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Builds API handles for the registry.
pub trait ClientFactory: Send + Sync {
    fn create(&self, agent_id: &str, endpoint: &AgentEndpoint) -> SyncResult<AgentClient>;
}

/// Factory producing reqwest-backed clients.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    request_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self, agent_id: &str, endpoint: &AgentEndpoint) -> SyncResult<AgentClient> {
        let client =
            HttpAgentClient::new(agent_id, &endpoint.host, endpoint.port, self.request_timeout)?;
        Ok(Arc::new(client))
    }
}

#[derive(Clone)]
struct CachedClient {
    agent_id: String,
    endpoint: AgentEndpoint,
    client: AgentClient,
}

/// Per-agent cache slot. Empty while the first construction is in flight.
type Slot = Arc<Mutex<Option<CachedClient>>>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<CachedClient>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Populated slots, keyed by normalized id. Shard locks are released before
/// any slot is locked.
fn snapshot(entries: &DashMap<String, Slot>) -> Vec<(String, CachedClient)> {
    let slots: Vec<(String, Slot)> = entries
        .iter()
        .map(|e| (e.key().clone(), Arc::clone(e.value())))
        .collect();
    slots
        .into_iter()
        .filter_map(|(key, slot)| {
            let guard = lock_slot(&slot);
            guard.clone().map(|cached| (key, cached))
        })
        .collect()
}

/// Process-wide cache of peer API handles, keyed by case-insensitive agent id.
pub struct AgentClientRegistry {
    factory: Arc<dyn ClientFactory>,
    ports: PortResolver,
    entries: RwLock<DashMap<String, Slot>>,
}

impl AgentClientRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>, ports: PortResolver) -> Self {
        Self {
            factory,
            ports,
            entries: RwLock::new(DashMap::new()),
        }
    }

    /// Registry building reqwest clients with the given request timeout.
    pub fn http(ports: PortResolver, request_timeout: Duration) -> Self {
        Self::new(Arc::new(HttpClientFactory::new(request_timeout)), ports)
    }

    fn key(agent_id: &str) -> String {
        agent_id.trim().to_lowercase()
    }

    /// Return the cached handle for `agent_id`, building it from `endpoint`
    /// on first use.
    pub fn get_or_create_client(
        &self,
        agent_id: &str,
        endpoint: &AgentEndpoint,
    ) -> SyncResult<AgentClient> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(agent_id);
        let slot = Arc::clone(entries.entry(key.clone()).or_default().value());

        let mut guard = lock_slot(&slot);
        if let Some(cached) = guard.as_ref() {
            if cached.endpoint != *endpoint {
                debug!(
                    agent = agent_id,
                    cached = %cached.endpoint,
                    requested = %endpoint,
                    "returning cached client for a different endpoint; recycle to refresh"
                );
            }
            return Ok(Arc::clone(&cached.client));
        }

        match self.factory.create(agent_id, endpoint) {
            Ok(client) => {
                debug!(agent = agent_id, endpoint = %endpoint, "created agent client");
                *guard = Some(CachedClient {
                    agent_id: agent_id.to_string(),
                    endpoint: endpoint.clone(),
                    client: Arc::clone(&client),
                });
                Ok(client)
            }
            Err(err) => {
                drop(guard);
                // Leave no empty slot behind unless another caller is already retrying it.
                entries.remove_if(&key, |_, current| {
                    Arc::ptr_eq(current, &slot) && matches!(current.try_lock().as_deref(), Ok(None))
                });
                Err(err)
            }
        }
    }

    /// Handle for a topology entry, honoring port overrides.
    pub fn client_for(&self, agent: &AgentInstance) -> SyncResult<AgentClient> {
        let endpoint = AgentEndpoint::new(agent.ip_address.clone(), self.get_effective_port(agent));
        self.get_or_create_client(&agent.name, &endpoint)
    }

    /// Cached handle without creating one.
    pub fn get_client(&self, agent_id: &str) -> Option<AgentClient> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let slot = entries
            .get(&Self::key(agent_id))
            .map(|s| Arc::clone(s.value()))?;
        let guard = lock_slot(&slot);
        guard.as_ref().map(|cached| Arc::clone(&cached.client))
    }

    /// Snapshot of all cached handles, sorted by agent id.
    pub fn clients(&self) -> Vec<(String, AgentClient)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut clients: Vec<_> = snapshot(&entries)
            .into_iter()
            .map(|(_, cached)| (cached.agent_id, cached.client))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));
        clients
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        snapshot(&entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the cached handle. Returns whether one was present.
    pub fn delete_client(&self, agent_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let Some((_, slot)) = entries.remove(&Self::key(agent_id)) else {
            return false;
        };
        let was_cached = lock_slot(&slot).is_some();
        was_cached
    }

    /// Replace every cached handle with a fresh one for the same endpoint.
    ///
    /// All replacements are built before the swap. If any construction
    /// fails the old cache is left untouched.
    pub fn recycle_all(&self) -> SyncResult<usize> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let fresh: DashMap<String, Slot> = DashMap::new();
        for (key, cached) in snapshot(&entries) {
            let client = self.factory.create(&cached.agent_id, &cached.endpoint)?;
            let replacement = CachedClient { client, ..cached };
            fresh.insert(key, Arc::new(Mutex::new(Some(replacement))));
        }

        let count = fresh.len();
        *entries = fresh;
        info!(clients = count, "recycled agent clients");
        Ok(count)
    }

    /// Port used to reach `agent`.
    pub fn get_effective_port(&self, agent: &AgentInstance) -> u16 {
        self.ports.resolve(agent)
    }

    pub fn port_resolver(&self) -> &PortResolver {
        &self.ports
    }

    /// Endpoints of the cached handles, keyed by agent id.
    pub fn endpoints(&self) -> HashMap<String, AgentEndpoint> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        snapshot(&entries)
            .into_iter()
            .map(|(_, cached)| (cached.agent_id, cached.endpoint))
            .collect()
    }
}

impl fmt::Debug for AgentClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentClientRegistry")
            .field("clients", &self.len())
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentClientRegistry {
        AgentClientRegistry::http(PortResolver::new(4500), Duration::from_secs(5))
    }

    #[test]
    fn test_http_factory_builds_cached_client() {
        let registry = registry();
        let endpoint = AgentEndpoint::new("10.0.0.2", 4500);

        let first = registry.get_or_create_client("server-01", &endpoint).unwrap();
        let second = registry.get_or_create_client("SERVER-01", &endpoint).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.base_address(), "http://10.0.0.2:4500");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_client_for_uses_effective_port() {
        let registry = registry();
        let agent = AgentInstance::new("server-01", "Server", "10.0.0.2").with_port(4600);
        let client = registry.client_for(&agent).unwrap();
        assert_eq!(client.base_address(), "http://10.0.0.2:4600");
    }

    #[test]
    fn test_failed_construction_is_not_cached() {
        let registry = registry();
        let bad = AgentEndpoint::new("not a host", 4500);
        assert!(registry.get_or_create_client("bad", &bad).is_err());
        assert!(registry.get_client("bad").is_none());
        assert!(registry.entries.read().unwrap().is_empty());

        let good = AgentEndpoint::new("10.0.0.3", 4500);
        registry.get_or_create_client("bad", &good).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
