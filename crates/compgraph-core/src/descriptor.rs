//! Component descriptor conversion.
//!
//! Repositories serve descriptors in more than one historical schema. Everything
//! downstream works on the canonical [`ComponentDescriptor`]; `convert` is the
//! only place that knows about source shapes.

use crate::error::Result;
use crate::types::Identity;
use ring::digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HASH_ALGORITHM: &str = "SHA-256";
pub const NORMALISATION_ALGORITHM: &str = "canonicalJson/v1";

/// Descriptor as fetched, before conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDescriptor {
    /// Schema declared by the transport, if any. Detected from the payload otherwise.
    pub schema_version: Option<String>,
    pub payload: Value,
}

impl RawDescriptor {
    pub fn new(payload: Value) -> Self {
        Self {
            schema_version: None,
            payload,
        }
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = Some(version.into());
        self
    }

    /// Parse fetched content. Unreadable YAML is a conversion failure.
    pub fn from_yaml(s: &str) -> Result<Self> {
        let payload: Value =
            serde_yaml::from_str(s).map_err(|e| ConversionError::Malformed {
                schema: "yaml",
                message: e.to_string(),
            })?;
        Ok(Self::new(payload))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("unknown descriptor schema version {0:?}")]
    UnknownSchema(String),

    #[error("unexpected kind {0:?}, expected ComponentVersion")]
    UnexpectedKind(String),

    #[error("malformed {schema} descriptor: {message}")]
    Malformed {
        schema: &'static str,
        message: String,
    },

    #[error("missing required field {0}")]
    MissingField(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaVersion {
    V2,
    V3Alpha1,
}

impl SchemaVersion {
    pub fn parse(s: &str) -> std::result::Result<Self, ConversionError> {
        match s {
            "v2" | "ocm.software/v2" => Ok(Self::V2),
            "v3alpha1" | "ocm.software/v3alpha1" => Ok(Self::V3Alpha1),
            other => Err(ConversionError::UnknownSchema(other.to_string())),
        }
    }

    /// `meta.schemaVersion` (v2) or `apiVersion` (v3alpha1).
    pub fn detect(payload: &Value) -> std::result::Result<Self, ConversionError> {
        if let Some(v) = payload.pointer("/meta/schemaVersion").and_then(Value::as_str) {
            return Self::parse(v);
        }
        if let Some(v) = payload.get("apiVersion").and_then(Value::as_str) {
            return Self::parse(v);
        }
        Err(ConversionError::UnknownSchema(String::new()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3Alpha1 => "ocm.software/v3alpha1",
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical shape
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ComponentReference>,
}

/// A child reference as declared by its parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Identity::is_empty")]
    pub extra_identity: Identity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSpec {
    pub hash_algorithm: String,
    pub normalisation_algorithm: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSpec {
    pub algorithm: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSignature {
    pub name: String,
    pub digest: DigestSpec,
    pub signature: SignatureSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub spec: ComponentSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<DescriptorSignature>,
}

impl ComponentDescriptor {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn version(&self) -> &str {
        &self.spec.version
    }

    pub fn references(&self) -> &[ComponentReference] {
        &self.spec.references
    }

    pub fn signature(&self, name: &str) -> Option<&DescriptorSignature> {
        self.signatures.iter().find(|s| s.name == name)
    }

    /// Hex SHA-256 of the canonical JSON of `spec`. Signatures are excluded,
    /// so signing does not change the digest and both schemas agree.
    pub fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&self.spec)?;
        Ok(hex::encode(
            digest::digest(&digest::SHA256, &canonical).as_ref(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Source shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceReference {
    name: String,
    component_name: String,
    version: String,
    #[serde(default)]
    extra_identity: Identity,
}

impl From<SourceReference> for ComponentReference {
    fn from(r: SourceReference) -> Self {
        Self {
            name: r.name,
            component_name: r.component_name,
            version: r.version,
            extra_identity: r.extra_identity,
        }
    }
}

#[derive(Deserialize)]
struct V2Descriptor {
    component: V2Component,
    #[serde(default)]
    signatures: Vec<DescriptorSignature>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Component {
    name: String,
    version: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    sources: Vec<Value>,
    #[serde(default)]
    resources: Vec<Value>,
    #[serde(default)]
    component_references: Vec<SourceReference>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V3Descriptor {
    #[serde(default)]
    kind: Option<String>,
    metadata: V3Metadata,
    #[serde(default)]
    spec: V3Spec,
    #[serde(default)]
    signatures: Vec<DescriptorSignature>,
}

#[derive(Deserialize)]
struct V3Metadata {
    name: String,
    version: String,
    #[serde(default)]
    provider: Option<V3Provider>,
}

#[derive(Deserialize)]
struct V3Provider {
    name: String,
}

#[derive(Default, Deserialize)]
struct V3Spec {
    #[serde(default)]
    sources: Vec<Value>,
    #[serde(default)]
    resources: Vec<Value>,
    #[serde(default)]
    references: Vec<SourceReference>,
}

fn malformed(schema: SchemaVersion, e: serde_json::Error) -> ConversionError {
    ConversionError::Malformed {
        schema: schema.as_str(),
        message: e.to_string(),
    }
}

/// Map a fetched descriptor of any supported schema onto the canonical shape.
pub fn convert(raw: &RawDescriptor) -> std::result::Result<ComponentDescriptor, ConversionError> {
    let schema = match raw.schema_version.as_deref() {
        Some(v) => SchemaVersion::parse(v)?,
        None => SchemaVersion::detect(&raw.payload)?,
    };

    let descriptor = match schema {
        SchemaVersion::V2 => {
            let d: V2Descriptor =
                serde_json::from_value(raw.payload.clone()).map_err(|e| malformed(schema, e))?;
            ComponentDescriptor {
                spec: ComponentSpec {
                    name: d.component.name,
                    version: d.component.version,
                    provider: d.component.provider,
                    sources: d.component.sources,
                    resources: d.component.resources,
                    references: d
                        .component
                        .component_references
                        .into_iter()
                        .map(Into::into)
                        .collect(),
                },
                signatures: d.signatures,
            }
        }
        SchemaVersion::V3Alpha1 => {
            let d: V3Descriptor =
                serde_json::from_value(raw.payload.clone()).map_err(|e| malformed(schema, e))?;
            if let Some(kind) = d.kind.filter(|k| k != "ComponentVersion") {
                return Err(ConversionError::UnexpectedKind(kind));
            }
            ComponentDescriptor {
                spec: ComponentSpec {
                    name: d.metadata.name,
                    version: d.metadata.version,
                    provider: d.metadata.provider.map(|p| p.name),
                    sources: d.spec.sources,
                    resources: d.spec.resources,
                    references: d.spec.references.into_iter().map(Into::into).collect(),
                },
                signatures: d.signatures,
            }
        }
    };

    validate(&descriptor)?;
    Ok(descriptor)
}

fn validate(d: &ComponentDescriptor) -> std::result::Result<(), ConversionError> {
    if d.spec.name.is_empty() {
        return Err(ConversionError::MissingField("name"));
    }
    if d.spec.version.is_empty() {
        return Err(ConversionError::MissingField("version"));
    }
    for r in &d.spec.references {
        if r.component_name.is_empty() {
            return Err(ConversionError::MissingField("references[].componentName"));
        }
        if r.version.is_empty() {
            return Err(ConversionError::MissingField("references[].version"));
        }
    }
    Ok(())
}
