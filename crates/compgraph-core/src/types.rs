//! Object model: component version intents, descriptor records, references

use crate::descriptor::ComponentSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Extra identity attributes. Ordered, so equal maps always serialize equally.
pub type Identity = BTreeMap<String, String>;

pub const COMPONENT_VERSION_KIND: &str = "ComponentVersion";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Condition types written on a component version's status.
pub mod condition {
    pub const VERIFIED: &str = "Verified";
    pub const READY: &str = "Ready";
}

/// Condition reasons.
pub mod reason {
    pub const SUCCEEDED: &str = "Succeeded";
    pub const VERIFICATION_FAILED: &str = "VerificationFailed";
    pub const VERIFICATION_ERROR: &str = "VerificationError";
    pub const CONVERSION_FAILED: &str = "ConversionFailed";
    pub const REFERENCE_CYCLE: &str = "ReferenceCycle";
    pub const DEPTH_EXCEEDED: &str = "DepthExceeded";
    pub const NAMING_FAILED: &str = "NamingFailed";
}

/// Namespaced object key - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ObjectKey {
    namespace: Arc<str>,
    name: Arc<str>,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Arc::from(namespace.into()),
            name: Arc::from(name.into()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Owner link. Deleting the owner deletes the owned object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

// ---------------------------------------------------------------------------
// ComponentVersion: the root intent
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersion {
    pub metadata: ObjectMeta,
    pub spec: ComponentVersionSpec,
    #[serde(default)]
    pub status: ComponentVersionStatus,
}

impl ComponentVersion {
    pub fn new(metadata: ObjectMeta, spec: ComponentVersionSpec) -> Self {
        Self {
            metadata,
            spec,
            status: ComponentVersionStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Duration after which the component version must be reconciled again.
    pub fn requeue_after(&self) -> Duration {
        self.spec.interval
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: COMPONENT_VERSION_KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersionSpec {
    #[serde(with = "crate::duration")]
    pub interval: Duration,
    pub source_ref: SourceRef,
    pub config_ref: ConfigRef,
    #[serde(default)]
    pub expand: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify: Vec<Signature>,
}

/// Repository endpoint plus the credentials to reach it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRef {
    pub component: String,
    /// Exact version, never a range.
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: Identity,
    // Single level for now; a list of names once consumers need deeper paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_path: Option<ReferencePath>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePath {
    pub name: String,
}

/// Trusted signature: which descriptor signature to check and with which key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub name: String,
    pub public_key: PublicKeyRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRef {
    pub secret_ref: SecretRef,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersionStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_resolved_digest: Option<String>,
    /// Root of the resolved dependency graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_descriptor: Option<Reference>,
    #[serde(default)]
    pub verified: bool,
}

impl ComponentVersionStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_ready(&self) -> bool {
        self.condition(condition::READY)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Insert or update a condition by type. The transition time only moves
    /// when the status value flips.
    pub fn set_condition(&mut self, new: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == new.type_) {
            Some(existing) => {
                if existing.status != new.status {
                    existing.status = new.status;
                    existing.last_transition_time = new.last_transition_time;
                }
                existing.reason = new.reason;
                existing.message = new.message;
            }
            None => self.conditions.push(new),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph: references and descriptor records
// ---------------------------------------------------------------------------

/// Pointer to a persisted component descriptor record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRef {
    pub name: String,
    pub namespace: String,
}

impl DescriptorRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Edge in the resolved dependency tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Name the parent declared for this reference.
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: Identity,
    pub component_descriptor_ref: DescriptorRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

impl Reference {
    /// Direct child with the given declared name.
    pub fn find(&self, name: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Number of edges below this reference.
    pub fn descendant_count(&self) -> usize {
        self.references
            .iter()
            .map(|r| 1 + r.descendant_count())
            .sum()
    }

    /// Descriptor keys of this reference and everything beneath it, depth first.
    pub fn descriptor_keys(&self) -> Vec<ObjectKey> {
        let mut keys = vec![self.component_descriptor_ref.key()];
        for child in &self.references {
            keys.extend(child.descriptor_keys());
        }
        keys
    }
}

/// Persisted graph node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptorRecord {
    pub metadata: ObjectMeta,
    pub spec: DescriptorPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorPayload {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: Identity,
    pub component_spec: ComponentSpec,
}

impl DescriptorPayload {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        extra_identity: Identity,
        component_spec: ComponentSpec,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extra_identity,
            component_spec,
        }
    }

    /// Ordered names of the child references.
    pub fn reference_names(&self) -> Vec<&str> {
        self.component_spec
            .references
            .iter()
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// Result of the signature check on the root descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub digest: String,
}
