//! Per-node client cache.
//!
//! The registry is the only holder of strong references to clients. Callers
//! receive a [`ClientHandle`] with a weak reference; once the registry drops
//! an entry (turn-off, invalidation, or the node coming back in a new Up
//! period) every handle issued for it reports [`HarnessError::StaleHandle`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use farm_id::NodeRole;
use farm_poll::{PollOutcome, PollSettings, ReadinessPoller};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ClientFactory, ConnectError};
use crate::error::HarnessError;
use crate::node::NodeState;
use crate::view::ClusterView;

/// Weak binding to a node's client.
pub struct ClientHandle<C> {
    role: NodeRole,
    generation: u64,
    client: Weak<C>,
}

impl<C> ClientHandle<C> {
    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    /// Up period the client was built in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Borrow the client, unless the node left the Up period it was built in.
    pub fn client(&self) -> Result<Arc<C>, HarnessError> {
        self.client.upgrade().ok_or_else(|| HarnessError::StaleHandle {
            node: self.role.clone(),
            generation: self.generation,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.client.strong_count() > 0
    }
}

impl<C> Clone for ClientHandle<C> {
    fn clone(&self) -> Self {
        Self {
            role: self.role.clone(),
            generation: self.generation,
            client: self.client.clone(),
        }
    }
}

impl<C> fmt::Debug for ClientHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("role", &self.role)
            .field("generation", &self.generation)
            .field("valid", &self.is_valid())
            .finish()
    }
}

struct CachedClient<C> {
    generation: u64,
    client: Arc<C>,
}

/// Client built during one poll attempt.
struct Built<C> {
    generation: u64,
    client: C,
}

impl<C> fmt::Debug for Built<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client(generation {})", self.generation)
    }
}

/// Builds, caches and invalidates clients per node.
pub struct ClientRegistry<F: ClientFactory> {
    view: Arc<ClusterView>,
    factory: Arc<F>,
    poller: ReadinessPoller,
    settings: PollSettings,
    cache: Mutex<HashMap<NodeRole, CachedClient<F::Client>>>,
}

impl<F: ClientFactory> ClientRegistry<F> {
    pub fn new(
        view: Arc<ClusterView>,
        factory: Arc<F>,
        poller: ReadinessPoller,
        settings: PollSettings,
    ) -> Self {
        Self {
            view,
            factory,
            poller,
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Return a handle to a usable client, building one if needed.
    ///
    /// Construction is retried until the node is Up and the factory
    /// succeeds, or the client budget runs out.
    pub async fn get_client(&self, role: &NodeRole) -> Result<ClientHandle<F::Client>, HarnessError> {
        let node = Arc::clone(self.view.get(role)?);

        let snapshot = node.snapshot();
        if let Some(handle) = self.cached(role, snapshot.state, snapshot.up_generation) {
            return Ok(handle);
        }

        let started = Instant::now();
        let factory = &self.factory;
        let node_ref = &node;

        let built = self
            .poller
            .wait(
                move || async move {
                    let before = node_ref.snapshot();
                    if before.state != NodeState::Up {
                        return PollOutcome::TransientError(
                            ConnectError::NodeNotUp(before.state).to_string(),
                        );
                    }

                    match factory.connect(node_ref.spec()).await {
                        Ok(client) => {
                            let after = node_ref.snapshot();
                            if after.state != NodeState::Up
                                || after.up_generation != before.up_generation
                            {
                                return PollOutcome::TransientError(
                                    ConnectError::Superseded.to_string(),
                                );
                            }
                            PollOutcome::Ready(Built {
                                generation: before.up_generation,
                                client,
                            })
                        }
                        Err(e) => PollOutcome::TransientError(e.to_string()),
                    }
                },
                self.settings,
            )
            .await;

        match built {
            Ok(success) => {
                info!(
                    role = %role,
                    generation = success.value.generation,
                    attempts = success.attempts,
                    elapsed_ms = success.elapsed.as_millis() as u64,
                    "Client constructed"
                );
                Ok(self.store(role, success.value))
            }
            Err(timeout) => {
                let last_error = match timeout.last {
                    Some(PollOutcome::TransientError(reason)) => reason,
                    Some(other) => other.label().to_string(),
                    None => "no attempt completed".to_string(),
                };
                warn!(
                    role = %role,
                    attempts = timeout.attempts,
                    elapsed_ms = timeout.elapsed.as_millis() as u64,
                    last_error = %last_error,
                    "Client construction timed out"
                );
                Err(HarnessError::ClientConstructionTimeout {
                    node: role.clone(),
                    elapsed: started.elapsed(),
                    attempts: timeout.attempts,
                    last_error,
                })
            }
        }
    }

    /// Drop the cached client of `role`. Outstanding handles go stale.
    pub fn invalidate(&self, role: &NodeRole) {
        if self.lock_cache().remove(role).is_some() {
            debug!(role = %role, "Client invalidated");
        }
    }

    /// Drop every cached client.
    pub fn invalidate_all(&self) {
        let mut cache = self.lock_cache();
        let count = cache.len();
        cache.clear();
        debug!(count, "All clients invalidated");
    }

    /// Number of cached clients.
    pub fn cached_count(&self) -> usize {
        self.lock_cache().len()
    }

    fn cached(
        &self,
        role: &NodeRole,
        state: NodeState,
        generation: u64,
    ) -> Option<ClientHandle<F::Client>> {
        let mut cache = self.lock_cache();
        let entry = cache.get(role)?;

        if state == NodeState::Up && entry.generation == generation {
            return Some(ClientHandle {
                role: role.clone(),
                generation,
                client: Arc::downgrade(&entry.client),
            });
        }

        debug!(
            role = %role,
            cached_generation = entry.generation,
            generation,
            state = %state,
            "Discarding stale client"
        );
        cache.remove(role);
        None
    }

    fn store(&self, role: &NodeRole, built: Built<F::Client>) -> ClientHandle<F::Client> {
        let mut cache = self.lock_cache();

        // A concurrent caller may have cached a client for the same Up period.
        let keep_existing = matches!(
            cache.get(role),
            Some(existing) if existing.generation >= built.generation
        );
        if !keep_existing {
            cache.insert(
                role.clone(),
                CachedClient {
                    generation: built.generation,
                    client: Arc::new(built.client),
                },
            );
        }
        let entry = &cache[role];

        ClientHandle {
            role: role.clone(),
            generation: entry.generation,
            client: Arc::downgrade(&entry.client),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<NodeRole, CachedClient<F::Client>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
