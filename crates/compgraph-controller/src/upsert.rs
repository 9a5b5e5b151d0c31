//! Create-or-update of descriptor records with conflict retry.

use crate::store::ObjectStore;
use compgraph_core::{DescriptorPayload, Error, ObjectKey, OwnerReference, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What an upsert did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOp {
    Created,
    Updated,
    Unchanged,
}

/// Make the record at `key` hold `payload`.
///
/// The owner is only set on create. A payload equal to what is stored is not
/// written again. Conflicts re-read the record and retry up to `retries` times.
pub async fn upsert_descriptor(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    owner: &OwnerReference,
    payload: &DescriptorPayload,
    retries: usize,
    cancel: &CancellationToken,
) -> Result<UpsertOp> {
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match try_upsert(store, key, owner, payload).await {
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                debug!(key = %key, attempt, "write conflict, retrying");
            }
            res => return res,
        }
    }
}

async fn try_upsert(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    owner: &OwnerReference,
    payload: &DescriptorPayload,
) -> Result<UpsertOp> {
    match store.get_descriptor(key).await {
        Ok(existing) if existing.spec == *payload => Ok(UpsertOp::Unchanged),
        Ok(existing) => {
            store
                .update_descriptor(key, existing.metadata.resource_version, payload.clone())
                .await?;
            Ok(UpsertOp::Updated)
        }
        Err(Error::NotFound { .. }) => {
            store
                .create_descriptor(key, owner.clone(), payload.clone())
                .await?;
            Ok(UpsertOp::Created)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use compgraph_core::{ComponentSpec, Identity};

    fn owner() -> OwnerReference {
        OwnerReference {
            kind: "ComponentVersion".into(),
            name: "root".into(),
            uid: "uid-1".into(),
        }
    }

    fn payload(provider: &str) -> DescriptorPayload {
        DescriptorPayload::new(
            "acme/leaf",
            "v1",
            Identity::new(),
            ComponentSpec {
                name: "acme/leaf".into(),
                version: "v1".into(),
                provider: Some(provider.into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn create_then_unchanged_then_update() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("default", "leaf");
        let cancel = CancellationToken::new();

        let op = upsert_descriptor(&store, &key, &owner(), &payload("acme"), 3, &cancel)
            .await
            .unwrap();
        assert_eq!(op, UpsertOp::Created);
        let op = upsert_descriptor(&store, &key, &owner(), &payload("acme"), 3, &cancel)
            .await
            .unwrap();
        assert_eq!(op, UpsertOp::Unchanged);
        let op = upsert_descriptor(&store, &key, &owner(), &payload("other"), 3, &cancel)
            .await
            .unwrap();
        assert_eq!(op, UpsertOp::Updated);
        assert_eq!(store.descriptor_writes(), 2);
    }

    #[tokio::test]
    async fn conflicts_are_retried_then_surface() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("default", "leaf");
        let cancel = CancellationToken::new();

        store.inject_conflicts(&key, 2);
        let op = upsert_descriptor(&store, &key, &owner(), &payload("acme"), 2, &cancel)
            .await
            .unwrap();
        assert_eq!(op, UpsertOp::Created);

        store.inject_conflicts(&key, 3);
        let err = upsert_descriptor(&store, &key, &owner(), &payload("other"), 2, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_keeps_first_owner() {
        let store = MemoryStore::new();
        let key = ObjectKey::new("default", "leaf");
        let cancel = CancellationToken::new();
        upsert_descriptor(&store, &key, &owner(), &payload("acme"), 1, &cancel)
            .await
            .unwrap();

        let mut other = owner();
        other.uid = "uid-2".into();
        upsert_descriptor(&store, &key, &other, &payload("other"), 1, &cancel)
            .await
            .unwrap();
        let record = store.get_descriptor(&key).await.unwrap();
        assert_eq!(record.metadata.owner.unwrap().uid, "uid-1");
    }
}
