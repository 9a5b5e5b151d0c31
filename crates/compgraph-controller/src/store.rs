//! Object store: the persistence seam for intents and descriptor records.
//!
//! Writes are optimistic: every object carries a `resource_version` and an
//! update whose version no longer matches fails with [`Error::Conflict`].
//! Callers re-read and retry.

use async_trait::async_trait;
use compgraph_core::{
    ComponentDescriptorRecord, ComponentVersion, ComponentVersionStatus, DescriptorPayload, Error,
    ObjectKey, ObjectMeta, OwnerReference, Result,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const INTENT_KIND: &str = "ComponentVersion";
const DESCRIPTOR_KIND: &str = "ComponentDescriptor";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_intent(&self, key: &ObjectKey) -> Result<ComponentVersion>;

    /// Create or replace an intent's metadata and spec. The generation moves
    /// when `spec` changes; status is left as stored.
    async fn put_intent(&self, intent: ComponentVersion) -> Result<ComponentVersion>;

    /// Replace the status, guarded by `resource_version`.
    async fn update_intent_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: ComponentVersionStatus,
    ) -> Result<ComponentVersion>;

    /// Delete an intent and every descriptor it owns. Returns the number of
    /// descriptors removed.
    async fn delete_intent(&self, key: &ObjectKey) -> Result<usize>;

    async fn list_intents(&self) -> Result<Vec<ComponentVersion>>;

    async fn get_descriptor(&self, key: &ObjectKey) -> Result<ComponentDescriptorRecord>;

    /// Fails with a conflict if the key is taken.
    async fn create_descriptor(
        &self,
        key: &ObjectKey,
        owner: OwnerReference,
        spec: DescriptorPayload,
    ) -> Result<ComponentDescriptorRecord>;

    /// Replace the payload, guarded by `resource_version`. Ownership is kept.
    async fn update_descriptor(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        spec: DescriptorPayload,
    ) -> Result<ComponentDescriptorRecord>;

    async fn list_descriptors(&self, namespace: &str) -> Result<Vec<ComponentDescriptorRecord>>;
}

/// In-process store backed by concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    intents: DashMap<ObjectKey, ComponentVersion>,
    descriptors: DashMap<ObjectKey, ComponentDescriptorRecord>,
    revision: AtomicU64,
    descriptor_writes: AtomicUsize,
    /// Pending forced conflicts per key, consumed one per write.
    forced_conflicts: DashMap<ObjectKey, usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Creates and updates of descriptor records since the store was made.
    pub fn descriptor_writes(&self) -> usize {
        self.descriptor_writes.load(Ordering::SeqCst)
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Make the next `n` writes to `key` fail with a conflict, as if another
    /// writer got there first.
    pub fn inject_conflicts(&self, key: &ObjectKey, n: usize) {
        self.forced_conflicts.insert(key.clone(), n);
    }

    fn take_forced_conflict(&self, key: &ObjectKey) -> bool {
        match self.forced_conflicts.get_mut(key) {
            Some(mut pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_intent(&self, key: &ObjectKey) -> Result<ComponentVersion> {
        self.intents
            .get(key)
            .map(|cv| cv.value().clone())
            .ok_or_else(|| Error::not_found(INTENT_KIND, key))
    }

    async fn put_intent(&self, mut intent: ComponentVersion) -> Result<ComponentVersion> {
        let key = intent.key();
        let revision = self.next_revision();
        match self.intents.entry(key) {
            Entry::Occupied(mut existing) => {
                let current = existing.get_mut();
                if current.spec != intent.spec {
                    current.metadata.generation += 1;
                    current.spec = intent.spec;
                }
                current.metadata.resource_version = revision;
                Ok(current.clone())
            }
            Entry::Vacant(slot) => {
                if intent.metadata.uid.is_empty() {
                    intent.metadata.uid = uuid::Uuid::new_v4().to_string();
                }
                intent.metadata.generation = intent.metadata.generation.max(1);
                intent.metadata.resource_version = revision;
                Ok(slot.insert(intent).clone())
            }
        }
    }

    async fn update_intent_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: ComponentVersionStatus,
    ) -> Result<ComponentVersion> {
        if self.take_forced_conflict(key) {
            return Err(Error::conflict(key));
        }
        let mut entry = self
            .intents
            .get_mut(key)
            .ok_or_else(|| Error::not_found(INTENT_KIND, key))?;
        if entry.metadata.resource_version != resource_version {
            return Err(Error::conflict(key));
        }
        entry.status = status;
        entry.metadata.resource_version = self.next_revision();
        Ok(entry.clone())
    }

    async fn delete_intent(&self, key: &ObjectKey) -> Result<usize> {
        let (_, intent) = self
            .intents
            .remove(key)
            .ok_or_else(|| Error::not_found(INTENT_KIND, key))?;
        let uid = intent.metadata.uid;
        let before = self.descriptors.len();
        self.descriptors.retain(|_, record| {
            record
                .metadata
                .owner
                .as_ref()
                .map_or(true, |owner| owner.uid != uid)
        });
        Ok(before.saturating_sub(self.descriptors.len()))
    }

    async fn list_intents(&self) -> Result<Vec<ComponentVersion>> {
        let mut intents: Vec<ComponentVersion> =
            self.intents.iter().map(|e| e.value().clone()).collect();
        intents.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(intents)
    }

    async fn get_descriptor(&self, key: &ObjectKey) -> Result<ComponentDescriptorRecord> {
        self.descriptors
            .get(key)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found(DESCRIPTOR_KIND, key))
    }

    async fn create_descriptor(
        &self,
        key: &ObjectKey,
        owner: OwnerReference,
        spec: DescriptorPayload,
    ) -> Result<ComponentDescriptorRecord> {
        if self.take_forced_conflict(key) {
            return Err(Error::conflict(key));
        }
        match self.descriptors.entry(key.clone()) {
            Entry::Occupied(_) => Err(Error::conflict(key)),
            Entry::Vacant(slot) => {
                let mut metadata = ObjectMeta::new(key.namespace(), key.name());
                metadata.uid = uuid::Uuid::new_v4().to_string();
                metadata.generation = 1;
                metadata.resource_version = self.next_revision();
                metadata.owner = Some(owner);
                self.descriptor_writes.fetch_add(1, Ordering::SeqCst);
                Ok(slot
                    .insert(ComponentDescriptorRecord { metadata, spec })
                    .clone())
            }
        }
    }

    async fn update_descriptor(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        spec: DescriptorPayload,
    ) -> Result<ComponentDescriptorRecord> {
        if self.take_forced_conflict(key) {
            return Err(Error::conflict(key));
        }
        let mut record = self
            .descriptors
            .get_mut(key)
            .ok_or_else(|| Error::not_found(DESCRIPTOR_KIND, key))?;
        if record.metadata.resource_version != resource_version {
            return Err(Error::conflict(key));
        }
        record.spec = spec;
        record.metadata.generation += 1;
        record.metadata.resource_version = self.next_revision();
        self.descriptor_writes.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    async fn list_descriptors(&self, namespace: &str) -> Result<Vec<ComponentDescriptorRecord>> {
        let mut records: Vec<ComponentDescriptorRecord> = self
            .descriptors
            .iter()
            .filter(|e| e.key().namespace() == namespace)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compgraph_core::{ComponentSpec, ComponentVersionSpec, ConfigRef, Identity, SourceRef};
    use std::time::Duration;

    fn intent(name: &str) -> ComponentVersion {
        ComponentVersion::new(
            ObjectMeta::new("default", name),
            ComponentVersionSpec {
                interval: Duration::from_secs(60),
                source_ref: SourceRef {
                    url: "file:///tmp".into(),
                    secret_ref: None,
                },
                config_ref: ConfigRef {
                    component: "acme/root".into(),
                    version: "v1".into(),
                    extra_identity: Identity::new(),
                    reference_path: None,
                },
                expand: false,
                verify: vec![],
            },
        )
    }

    fn payload(version: &str) -> DescriptorPayload {
        DescriptorPayload::new(
            "acme/root",
            version,
            Identity::new(),
            ComponentSpec {
                name: "acme/root".into(),
                version: version.into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn put_intent_bumps_generation_on_spec_change() {
        let store = MemoryStore::new();
        let created = store.put_intent(intent("a")).await.unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert!(!created.metadata.uid.is_empty());

        let same = store.put_intent(intent("a")).await.unwrap();
        assert_eq!(same.metadata.generation, 1);
        assert_eq!(same.metadata.uid, created.metadata.uid);

        let mut changed = intent("a");
        changed.spec.config_ref.version = "v2".into();
        let changed = store.put_intent(changed).await.unwrap();
        assert_eq!(changed.metadata.generation, 2);
        assert_eq!(store.list_intents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_update_requires_current_version() {
        let store = MemoryStore::new();
        let cv = store.put_intent(intent("a")).await.unwrap();
        let stale = cv.metadata.resource_version;
        store
            .update_intent_status(&cv.key(), stale, ComponentVersionStatus::default())
            .await
            .unwrap();
        let err = store
            .update_intent_status(&cv.key(), stale, ComponentVersionStatus::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn create_on_taken_key_conflicts() {
        let store = MemoryStore::new();
        let owner = store.put_intent(intent("a")).await.unwrap().owner_reference();
        let key = ObjectKey::new("default", "root-v1");
        store
            .create_descriptor(&key, owner.clone(), payload("v1"))
            .await
            .unwrap();
        let err = store
            .create_descriptor(&key, owner, payload("v1"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.descriptor_writes(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_descriptors() {
        let store = MemoryStore::new();
        let a = store.put_intent(intent("a")).await.unwrap().owner_reference();
        let b = store.put_intent(intent("b")).await.unwrap().owner_reference();
        store
            .create_descriptor(&ObjectKey::new("default", "x"), a.clone(), payload("v1"))
            .await
            .unwrap();
        store
            .create_descriptor(&ObjectKey::new("default", "y"), a, payload("v2"))
            .await
            .unwrap();
        store
            .create_descriptor(&ObjectKey::new("default", "z"), b, payload("v3"))
            .await
            .unwrap();

        let removed = store
            .delete_intent(&ObjectKey::new("default", "a"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let left = store.list_descriptors("default").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].metadata.name, "z");
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = MemoryStore::new();
        let owner = store.put_intent(intent("a")).await.unwrap().owner_reference();
        let key = ObjectKey::new("default", "x");
        store.inject_conflicts(&key, 1);
        assert!(store
            .create_descriptor(&key, owner.clone(), payload("v1"))
            .await
            .is_err());
        assert!(store
            .create_descriptor(&key, owner, payload("v1"))
            .await
            .is_ok());
    }
}
