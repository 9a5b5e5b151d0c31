//! Component repository abstraction: where descriptors are fetched from.
//!
//! The resolver asks for a component by name and version. The repository decides
//! how to get it. Today: local filesystem and in-memory. The network client for
//! a real artifact registry plugs in behind the same trait.

use async_trait::async_trait;
use compgraph_core::{Error, RawDescriptor, Result, SourceRef};
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// File name of a descriptor inside `<component>/<version>/`.
pub const DESCRIPTOR_FILE: &str = "component-descriptor.yaml";

/// Pluggable repository client. Fetch errors are transient.
#[async_trait]
pub trait ComponentRepository: Send + Sync {
    async fn fetch_component_version(
        &self,
        source: &SourceRef,
        name: &str,
        version: &str,
    ) -> Result<RawDescriptor>;
}

/// Fetch, giving up as soon as `cancel` fires.
pub async fn fetch_cancellable(
    repository: &dyn ComponentRepository,
    source: &SourceRef,
    name: &str,
    version: &str,
    cancel: &CancellationToken,
) -> Result<RawDescriptor> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = repository.fetch_component_version(source, name, version) => res,
    }
}

/// Local filesystem repository. Reads `<root>/<component>/<version>/component-descriptor.yaml`.
///
/// A `file://` source URL overrides the configured root for that intent.
pub struct LocalFsRepository {
    root: PathBuf,
}

impl LocalFsRepository {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn root_for(&self, source: &SourceRef) -> PathBuf {
        match source.url.strip_prefix("file://") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.root.clone(),
        }
    }

    /// Every name segment and the version must be a plain path component, so
    /// a reference cannot reach outside the root.
    pub fn descriptor_path(&self, source: &SourceRef, name: &str, version: &str) -> Result<PathBuf> {
        // github.com/acme/web → github.com/acme/web/<version>/
        let mut path = self.root_for(source);
        for segment in name.split('/').chain(std::iter::once(version)) {
            if !is_plain_segment(segment) {
                return Err(Error::fetch(
                    name,
                    version,
                    format!("invalid path segment {segment:?}"),
                ));
            }
            path.push(segment);
        }
        Ok(path.join(DESCRIPTOR_FILE))
    }
}

fn is_plain_segment(segment: &str) -> bool {
    if segment.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl ComponentRepository for LocalFsRepository {
    async fn fetch_component_version(
        &self,
        source: &SourceRef,
        name: &str,
        version: &str,
    ) -> Result<RawDescriptor> {
        let path = self.descriptor_path(source, name, version)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::fetch(name, version, format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = content.len(), "read descriptor");
        RawDescriptor::from_yaml(&content)
    }
}

/// In-memory repository. Failures can be injected per component version.
#[derive(Default)]
pub struct MemoryRepository {
    components: DashMap<(String, String), RawDescriptor>,
    failures: DashMap<(String, String), String>,
    fetches: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, version: &str, raw: RawDescriptor) {
        self.components
            .insert((name.to_string(), version.to_string()), raw);
    }

    /// Make fetches of `name:version` fail until [`MemoryRepository::heal`].
    pub fn fail(&self, name: &str, version: &str, message: &str) {
        self.failures.insert(
            (name.to_string(), version.to_string()),
            message.to_string(),
        );
    }

    pub fn heal(&self, name: &str, version: &str) {
        self.failures
            .remove(&(name.to_string(), version.to_string()));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComponentRepository for MemoryRepository {
    async fn fetch_component_version(
        &self,
        _source: &SourceRef,
        name: &str,
        version: &str,
    ) -> Result<RawDescriptor> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = (name.to_string(), version.to_string());
        if let Some(message) = self.failures.get(&key) {
            return Err(Error::fetch(name, version, message.value().clone()));
        }
        self.components
            .get(&key)
            .map(|raw| raw.value().clone())
            .ok_or_else(|| Error::fetch(name, version, "component version not found"))
    }
}
