//! Reconciler: one level-triggered pass over a component version intent.
//!
//! fetch root → convert → verify → persist root → expand (optional) → status.
//!
//! Every pass starts from scratch. Records written by an earlier, interrupted
//! pass are found again by key and left alone when unchanged.

use crate::config::ControllerConfig;
use crate::graph::{BuildStats, GraphBuilder};
use crate::repository::{fetch_cancellable, ComponentRepository};
use crate::status::{commit, StatusPatch};
use crate::store::ObjectStore;
use crate::verify::{verify_component, SignatureVerifier};
use compgraph_core::{
    compute_key, condition, convert, reason, ComponentVersion, ConditionStatus, Error, ErrorKind,
    ObjectKey, Result, ResultExt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the queue should do after a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
    pub stats: BuildStats,
}

impl Action {
    /// Nothing left to do until the intent changes.
    pub fn await_change() -> Self {
        Self::default()
    }
}

/// A failed pass and when to try again. `None` means do not requeue.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ReconcileError {
    #[source]
    pub error: Error,
    pub requeue_after: Option<Duration>,
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    repository: Arc<dyn ComponentRepository>,
    verifier: Arc<dyn SignatureVerifier>,
    config: ControllerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: Arc<dyn ComponentRepository>,
        verifier: Arc<dyn SignatureVerifier>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            repository,
            verifier,
            config,
        }
    }

    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> std::result::Result<Action, ReconcileError> {
        let intent = match self.store.get_intent(key).await {
            Ok(intent) => intent,
            Err(Error::NotFound { .. }) => {
                debug!(intent = %key, "intent gone, nothing to do");
                return Ok(Action::await_change());
            }
            Err(e) => {
                return Err(ReconcileError {
                    error: e.context(format!("get intent {key}")),
                    requeue_after: Some(self.config.controller.default_interval),
                })
            }
        };

        info!(
            intent = %key,
            generation = intent.metadata.generation,
            component = %intent.spec.config_ref.component,
            version = %intent.spec.config_ref.version,
            "reconciling"
        );

        let interval = intent.requeue_after();
        match self.run(&intent, cancel).await {
            Ok(stats) => Ok(Action {
                requeue_after: Some(interval),
                stats,
            }),
            Err(e) => Err(self.fail(&intent, e).await),
        }
    }

    async fn run(&self, intent: &ComponentVersion, cancel: &CancellationToken) -> Result<BuildStats> {
        let key = intent.key();
        let config_ref = &intent.spec.config_ref;
        let here = format!("{}:{}", config_ref.component, config_ref.version);

        let raw = fetch_cancellable(
            &*self.repository,
            &intent.spec.source_ref,
            &config_ref.component,
            &config_ref.version,
            cancel,
        )
        .await?;
        let descriptor = convert(&raw).with_context(|| format!("convert {here}"))?;

        let outcome =
            verify_component(&*self.verifier, &descriptor, &intent.spec.verify, cancel).await?;
        if !outcome.verified {
            return Err(Error::VerificationFailed {
                component: config_ref.component.clone(),
                version: config_ref.version.clone(),
                digest: outcome.digest,
            });
        }

        let root_key = compute_key(
            descriptor.name(),
            descriptor.version(),
            &config_ref.extra_identity,
        )
        .with_context(|| format!("name {here}"))?;

        let mut builder = GraphBuilder::new(
            &*self.store,
            &*self.repository,
            &intent.spec.source_ref,
            intent.owner_reference(),
            &intent.metadata.namespace,
            self.config.resolver.max_depth,
            self.config.resolver.conflict_retries,
            cancel,
        );
        let mut root = builder
            .persist_root(&root_key, &descriptor, &config_ref.extra_identity)
            .await?;

        if intent.spec.expand {
            root.references = builder.expand(&root, &descriptor).await?;
            if let Some(path) = &config_ref.reference_path {
                if root.find(&path.name).is_none() {
                    warn!(intent = %key, reference = %path.name, "reference path not found in resolved graph");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let edges = root.descendant_count();
        let patch = StatusPatch::new()
            .observed_generation(intent.metadata.generation)
            .verified(true)
            .digest(outcome.digest.clone())
            .graph(root)
            .condition(
                condition::VERIFIED,
                ConditionStatus::True,
                reason::SUCCEEDED,
                format!("verified {here}"),
            )
            .condition(
                condition::READY,
                ConditionStatus::True,
                reason::SUCCEEDED,
                format!("resolved {here} with {edges} references"),
            );
        let written = commit(
            &*self.store,
            &key,
            &patch,
            self.config.resolver.conflict_retries,
        )
        .await?;

        let stats = builder.stats();
        info!(
            intent = %key,
            digest = %outcome.digest,
            nodes = stats.nodes(),
            created = stats.created,
            updated = stats.updated,
            status_written = written,
            "reconciled"
        );
        Ok(stats)
    }

    async fn fail(&self, intent: &ComponentVersion, err: Error) -> ReconcileError {
        let key = intent.key();
        let interval = intent.requeue_after();
        match err.kind() {
            ErrorKind::Cancelled => {
                info!(intent = %key, "reconcile cancelled");
                ReconcileError {
                    error: err,
                    requeue_after: None,
                }
            }
            ErrorKind::Transient => {
                warn!(intent = %key, error = %err, retry_in = ?interval, "reconcile failed");
                ReconcileError {
                    error: err,
                    requeue_after: Some(interval),
                }
            }
            ErrorKind::Verification | ErrorKind::Terminal => {
                error!(intent = %key, error = %err, retry_in = ?interval, "reconcile failed");
                let patch = StatusPatch::from(&err).observed_generation(intent.metadata.generation);
                if let Err(e) = commit(
                    &*self.store,
                    &key,
                    &patch,
                    self.config.resolver.conflict_retries,
                )
                .await
                {
                    warn!(intent = %key, error = %e, "failed to record failure on status");
                }
                ReconcileError {
                    error: err,
                    requeue_after: Some(interval),
                }
            }
        }
    }
}
