//! Status patches for component version intents.
//!
//! A patch names only the fields it changes. [`commit`] applies it to a fresh
//! read of the intent, so concurrent writers of other fields are kept.

use crate::store::ObjectStore;
use compgraph_core::{
    ComponentVersionStatus, Condition, ConditionStatus, Error, ObjectKey, Reference, Result,
};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub observed_generation: Option<i64>,
    pub conditions: Vec<Condition>,
    pub latest_resolved_digest: Option<String>,
    pub component_descriptor: Option<Reference>,
    pub verified: Option<bool>,
}

impl StatusPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    pub fn condition(
        mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        self.conditions
            .push(Condition::new(type_, status, reason, message));
        self
    }

    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.latest_resolved_digest = Some(digest.into());
        self
    }

    pub fn graph(mut self, root: Reference) -> Self {
        self.component_descriptor = Some(root);
        self
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    pub fn apply(&self, status: &mut ComponentVersionStatus) {
        if let Some(generation) = self.observed_generation {
            status.observed_generation = generation;
        }
        for c in &self.conditions {
            status.set_condition(c.clone());
        }
        if let Some(digest) = &self.latest_resolved_digest {
            status.latest_resolved_digest = Some(digest.clone());
        }
        if let Some(root) = &self.component_descriptor {
            status.component_descriptor = Some(root.clone());
        }
        if let Some(verified) = self.verified {
            status.verified = verified;
        }
    }
}

/// Apply `patch` to the stored intent. Returns whether anything was written.
pub async fn commit(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    patch: &StatusPatch,
    retries: usize,
) -> Result<bool> {
    let mut attempt = 0;
    loop {
        let current = store.get_intent(key).await?;
        let mut status = current.status.clone();
        patch.apply(&mut status);
        if status == current.status {
            debug!(intent = %key, "status unchanged");
            return Ok(false);
        }
        match store
            .update_intent_status(key, current.metadata.resource_version, status)
            .await
        {
            Ok(_) => return Ok(true),
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                debug!(intent = %key, attempt, "status conflict, retrying");
            }
            Err(e) => return Err(e.context(format!("update status of {key}"))),
        }
    }
}

impl From<&Error> for StatusPatch {
    /// Failure patch for errors that are recorded on the intent.
    fn from(err: &Error) -> Self {
        let reason = err.condition_reason().unwrap_or("Failed");
        let message = err.to_string();
        let patch = StatusPatch::new()
            .condition(
                compgraph_core::condition::READY,
                ConditionStatus::False,
                reason,
                message.clone(),
            );
        match err.root() {
            Error::VerificationFailed { digest, .. } => patch
                .verified(false)
                .digest(digest.clone())
                .condition(
                    compgraph_core::condition::VERIFIED,
                    ConditionStatus::False,
                    reason,
                    message,
                ),
            Error::Verification(_) => patch.verified(false).condition(
                compgraph_core::condition::VERIFIED,
                ConditionStatus::False,
                reason,
                message,
            ),
            _ => patch,
        }
    }
}
