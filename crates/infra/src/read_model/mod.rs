//! Disposable read-model storage.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use clinicore_core::OrganizationId;

/// Organization-isolated key/value store abstraction for disposable read models.
pub trait OrgStore<K, V>: Send + Sync {
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V>;
    fn upsert(&self, organization_id: OrganizationId, key: K, value: V);
    fn list(&self, organization_id: OrganizationId) -> Vec<V>;
    /// Clear all read-model records for an organization (rebuild support).
    fn clear_organization(&self, organization_id: OrganizationId);
}

impl<K, V, S> OrgStore<K, V> for Arc<S>
where
    S: OrgStore<K, V> + ?Sized,
{
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V> {
        (**self).get(organization_id, key)
    }

    fn upsert(&self, organization_id: OrganizationId, key: K, value: V) {
        (**self).upsert(organization_id, key, value)
    }

    fn list(&self, organization_id: OrganizationId) -> Vec<V> {
        (**self).list(organization_id)
    }

    fn clear_organization(&self, organization_id: OrganizationId) {
        (**self).clear_organization(organization_id)
    }
}

/// In-memory organization-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryOrgStore<K, V> {
    inner: RwLock<HashMap<(OrganizationId, K), V>>,
}

impl<K, V> InMemoryOrgStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryOrgStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OrgStore<K, V> for InMemoryOrgStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(organization_id, key.clone())).cloned()
    }

    fn upsert(&self, organization_id: OrganizationId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((organization_id, key), value);
        }
    }

    fn list(&self, organization_id: OrganizationId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((org, _k), v)| {
                if *org == organization_id {
                    Some(v.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn clear_organization(&self, organization_id: OrganizationId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(org, _k), _v| *org != organization_id);
        }
    }
}
