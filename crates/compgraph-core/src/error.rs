//! Error types for compgraph

use crate::descriptor::ConversionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to fetch component version {name}:{version}: {message}")]
    Fetch {
        name: String,
        version: String,
        message: String,
    },

    #[error("failed to convert component descriptor: {0}")]
    Conversion(#[from] ConversionError),

    #[error("signature verification failed for {component}:{version} (digest {digest})")]
    VerificationFailed {
        component: String,
        version: String,
        digest: String,
    },

    #[error("verification error: {0}")]
    Verification(String),

    #[error("write conflict on {key}")]
    Conflict { key: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("reference cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("reference depth {depth} exceeds limit of {limit}")]
    DepthExceeded { depth: usize, limit: usize },

    #[error("failed to generate name: {0}")]
    Naming(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{op}: {source}")]
    Context {
        op: String,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a reconcile reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry after the interval, leave status alone.
    Transient,
    /// Signature mismatch or verifier failure. Recorded on status, retried.
    Verification,
    /// Retrying with the same input cannot help. Recorded on status.
    Terminal,
    /// The caller stopped the reconcile.
    Cancelled,
}

impl Error {
    pub fn fetch(
        name: impl Into<String>,
        version: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            name: name.into(),
            version: version.into(),
            message: message.into(),
        }
    }

    pub fn conflict(key: impl ToString) -> Self {
        Self::Conflict {
            key: key.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Wrap with the operation that failed.
    pub fn context(self, op: impl Into<String>) -> Self {
        Self::Context {
            op: op.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::VerificationFailed { .. } | Self::Verification(_) => ErrorKind::Verification,
            Self::Conversion(_)
            | Self::CycleDetected { .. }
            | Self::DepthExceeded { .. }
            | Self::Naming(_)
            | Self::InvalidDuration(_)
            | Self::Config(_) => ErrorKind::Terminal,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Transient,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Conflict { .. })
    }

    /// Status condition reason for errors that are recorded on the intent.
    /// Transient and cancelled errors return `None`.
    pub fn condition_reason(&self) -> Option<&'static str> {
        match self.root() {
            Self::VerificationFailed { .. } => Some(crate::types::reason::VERIFICATION_FAILED),
            Self::Verification(_) => Some(crate::types::reason::VERIFICATION_ERROR),
            Self::Conversion(_) => Some(crate::types::reason::CONVERSION_FAILED),
            Self::CycleDetected { .. } => Some(crate::types::reason::REFERENCE_CYCLE),
            Self::DepthExceeded { .. } => Some(crate::types::reason::DEPTH_EXCEEDED),
            Self::Naming(_) => Some(crate::types::reason::NAMING_FAILED),
            _ => None,
        }
    }
}

/// Attach operation context to any error convertible into [`Error`].
pub trait ResultExt<T> {
    fn with_context<F, S>(self, op: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context<F, S>(self, op: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(op()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_root_kind() {
        let err = Error::conflict("default/podinfo").context("upsert podinfo");
        assert!(err.is_conflict());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.to_string(), "upsert podinfo: write conflict on default/podinfo");
    }

    #[test]
    fn nested_context_resolves_to_innermost() {
        let err = Error::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        }
        .context("expand b")
        .context("expand a");
        assert_eq!(err.kind(), ErrorKind::Terminal);
        assert_eq!(err.condition_reason(), Some("ReferenceCycle"));
    }

    #[test]
    fn with_context_wraps_foreign_errors() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.with_context(|| "read descriptor").unwrap_err();
        assert!(matches!(err.root(), Error::Io(_)));
        assert!(err.to_string().starts_with("read descriptor: "));
    }

    #[test]
    fn cancelled_and_transient_write_no_condition() {
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::fetch("a", "v1", "timeout").kind(), ErrorKind::Transient);
        assert_eq!(Error::Cancelled.condition_reason(), None);
        assert_eq!(Error::fetch("a", "v1", "timeout").condition_reason(), None);
    }
}
