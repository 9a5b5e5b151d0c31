//! Graph builder: persists the root descriptor and descends its references.
//!
//! Every reachable component version becomes one descriptor record keyed by
//! [`compute_key`]. All records of one pass are owned by the root intent.
//! A node reachable along several paths is written once per pass but appears
//! under each parent in the returned tree.

use crate::repository::{fetch_cancellable, ComponentRepository};
use crate::store::ObjectStore;
use crate::upsert::{upsert_descriptor, UpsertOp};
use compgraph_core::{
    compute_key, convert, ComponentDescriptor, ComponentReference, DescriptorPayload,
    DescriptorRef, Error, Identity, ObjectKey, OwnerReference, Reference, Result, ResultExt,
    SourceRef,
};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Write counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl BuildStats {
    fn record(&mut self, op: UpsertOp) {
        match op {
            UpsertOp::Created => self.created += 1,
            UpsertOp::Updated => self.updated += 1,
            UpsertOp::Unchanged => self.unchanged += 1,
        }
    }

    /// Distinct records touched.
    pub fn nodes(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Ancestor chain of the node being resolved: `(key, "name:version")`.
type Path = Vec<(String, String)>;

pub struct GraphBuilder<'a> {
    store: &'a dyn ObjectStore,
    repository: &'a dyn ComponentRepository,
    source: &'a SourceRef,
    owner: OwnerReference,
    namespace: String,
    max_depth: usize,
    retries: usize,
    cancel: &'a CancellationToken,
    written: HashSet<String>,
    stats: BuildStats,
}

impl<'a> GraphBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a dyn ObjectStore,
        repository: &'a dyn ComponentRepository,
        source: &'a SourceRef,
        owner: OwnerReference,
        namespace: impl Into<String>,
        max_depth: usize,
        retries: usize,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            repository,
            source,
            owner,
            namespace: namespace.into(),
            max_depth,
            retries,
            cancel,
            written: HashSet::new(),
            stats: BuildStats::default(),
        }
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Persist the root record and return its (childless) reference.
    pub async fn persist_root(
        &mut self,
        key: &str,
        descriptor: &ComponentDescriptor,
        identity: &Identity,
    ) -> Result<Reference> {
        let payload = DescriptorPayload::new(
            descriptor.name(),
            descriptor.version(),
            identity.clone(),
            descriptor.spec.clone(),
        );
        self.write(key, &payload).await?;
        Ok(Reference {
            name: descriptor.name().to_string(),
            component_name: descriptor.name().to_string(),
            version: descriptor.version().to_string(),
            extra_identity: identity.clone(),
            component_descriptor_ref: DescriptorRef::new(&self.namespace, key),
            references: Vec::new(),
        })
    }

    /// Resolve every reference below `root`, in declaration order.
    pub async fn expand(
        &mut self,
        root: &Reference,
        descriptor: &ComponentDescriptor,
    ) -> Result<Vec<Reference>> {
        let mut path: Path = vec![(
            root.component_descriptor_ref.name.clone(),
            label(&root.component_name, &root.version),
        )];
        let mut references = Vec::with_capacity(descriptor.references().len());
        for child in descriptor.references() {
            references.push(self.resolve(child, 1, &mut path).await?);
        }
        info!(
            root = %root.component_name,
            version = %root.version,
            references = references.len(),
            created = self.stats.created,
            updated = self.stats.updated,
            unchanged = self.stats.unchanged,
            "expanded reference graph"
        );
        Ok(references)
    }

    fn resolve<'b>(
        &'b mut self,
        reference: &'b ComponentReference,
        depth: usize,
        path: &'b mut Path,
    ) -> Pin<Box<dyn Future<Output = Result<Reference>> + Send + 'b>> {
        Box::pin(async move {
            let here = label(&reference.component_name, &reference.version);
            if depth > self.max_depth {
                return Err(Error::DepthExceeded {
                    depth,
                    limit: self.max_depth,
                }
                .context(format!("resolve {here}")));
            }

            let key = compute_key(
                &reference.component_name,
                &reference.version,
                &reference.extra_identity,
            )?;
            if path.iter().any(|(k, _)| *k == key) {
                let mut cycle: Vec<String> = path.iter().map(|(_, l)| l.clone()).collect();
                cycle.push(here);
                return Err(Error::CycleDetected { path: cycle });
            }

            let raw = fetch_cancellable(
                self.repository,
                self.source,
                &reference.component_name,
                &reference.version,
                self.cancel,
            )
            .await?;
            let descriptor = convert(&raw).with_context(|| format!("convert {here}"))?;

            let payload = DescriptorPayload::new(
                &reference.component_name,
                &reference.version,
                reference.extra_identity.clone(),
                descriptor.spec.clone(),
            );
            if self.written.contains(&key) {
                debug!(key = %key, "already written this pass");
            } else {
                self.write(&key, &payload).await?;
            }

            path.push((key.clone(), here.clone()));
            let mut children = Vec::with_capacity(descriptor.references().len());
            for child in descriptor.references() {
                children.push(self.resolve(child, depth + 1, path).await?);
            }
            path.pop();

            debug!(reference = %reference.name, component = %here, depth, "resolved reference");
            Ok(Reference {
                name: reference.name.clone(),
                component_name: reference.component_name.clone(),
                version: reference.version.clone(),
                extra_identity: reference.extra_identity.clone(),
                component_descriptor_ref: DescriptorRef::new(&self.namespace, &key),
                references: children,
            })
        })
    }

    async fn write(&mut self, key: &str, payload: &DescriptorPayload) -> Result<()> {
        let object_key = ObjectKey::new(&self.namespace, key);
        let op = upsert_descriptor(
            self.store,
            &object_key,
            &self.owner,
            payload,
            self.retries,
            self.cancel,
        )
        .await
        .with_context(|| format!("upsert descriptor {object_key}"))?;
        self.written.insert(key.to_string());
        self.stats.record(op);
        Ok(())
    }
}

fn label(name: &str, version: &str) -> String {
    format!("{name}:{version}")
}
