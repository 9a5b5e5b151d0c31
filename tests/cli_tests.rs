//! End-to-end: descriptors on disk, intents from YAML, rendered output.

use compgraph::render::{render_summary, render_tree};
use compgraph_controller::{
    load_intents, ControllerConfig, Ed25519Verifier, LocalFsRepository, MemoryStore, ObjectStore,
    Reconciler, StaticKeys,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn write_descriptor(root: &Path, name: &str, version: &str, body: &str) {
    let dir = root.join(name).join(version);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("component-descriptor.yaml"), body).unwrap();
}

fn fixture(root: &Path) {
    write_descriptor(
        root,
        "acme/shop",
        "v1",
        r#"
meta:
  schemaVersion: v2
component:
  name: acme/shop
  version: v1
  provider: acme
  componentReferences:
    - name: backend
      componentName: acme/backend
      version: v2
    - name: frontend
      componentName: acme/frontend
      version: v1
      extraIdentity:
        theme: dark
"#,
    );
    write_descriptor(
        root,
        "acme/backend",
        "v2",
        r#"
apiVersion: ocm.software/v3alpha1
kind: ComponentVersion
metadata:
  name: acme/backend
  version: v2
spec:
  references:
    - name: db
      componentName: acme/db
      version: v1
"#,
    );
    write_descriptor(
        root,
        "acme/db",
        "v1",
        "meta:\n  schemaVersion: v2\ncomponent:\n  name: acme/db\n  version: v1\n",
    );
    write_descriptor(
        root,
        "acme/frontend",
        "v1",
        "meta:\n  schemaVersion: v2\ncomponent:\n  name: acme/frontend\n  version: v1\n",
    );
}

// ===========================================================================
// resolve from disk
// ===========================================================================

#[tokio::test]
async fn resolves_and_renders_tree_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let components = tmp.path().join("components");
    fixture(&components);

    let intents_path = tmp.path().join("intents.yaml");
    std::fs::write(
        &intents_path,
        r#"
- metadata:
    name: shop
  spec:
    interval: 10m
    sourceRef:
      url: ""
    configRef:
      component: acme/shop
      version: v1
    expand: true
"#,
    )
    .unwrap();

    let mut config = ControllerConfig::default();
    config.repository.root = components.clone();
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(LocalFsRepository::new(&components)),
        Arc::new(Ed25519Verifier::new(StaticKeys::new())),
        config,
    );

    let intents = load_intents(&intents_path).unwrap();
    let key = store.put_intent(intents[0].clone()).await.unwrap().key();
    reconciler
        .reconcile(&key, &CancellationToken::new())
        .await
        .unwrap();

    let intent = store.get_intent(&key).await.unwrap();
    let summary = render_summary(&intent);
    assert!(summary.starts_with("default/shop acme/shop:v1 Ready verified=true"));

    let tree = render_tree(intent.status.component_descriptor.as_ref().unwrap());
    let lines: Vec<&str> = tree.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("acme/shop:v1 (acme-shop-v1-"));
    assert!(lines[1].starts_with("├── backend → acme/backend:v2 ("));
    assert!(lines[2].starts_with("│   └── db → acme/db:v1 ("));
    assert!(lines[3].starts_with("└── frontend → acme/frontend:v1 [theme=dark] ("));
}

#[tokio::test]
async fn missing_descriptor_renders_pending() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(LocalFsRepository::new(tmp.path())),
        Arc::new(Ed25519Verifier::new(StaticKeys::new())),
        ControllerConfig::default(),
    );

    let intent = compgraph_controller::parse_intents(
        "metadata:\n  name: ghost\nspec:\n  interval: 1m\n  sourceRef:\n    url: \"\"\n  configRef:\n    component: acme/ghost\n    version: v9\n",
    )
    .unwrap()
    .remove(0);
    let key = store.put_intent(intent).await.unwrap().key();
    let err = reconciler
        .reconcile(&key, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("acme/ghost:v9"));

    let intent = store.get_intent(&key).await.unwrap();
    assert_eq!(
        render_summary(&intent),
        "default/ghost acme/ghost:v9 Pending verified=false digest=-"
    );
}

#[tokio::test]
async fn unreadable_descriptor_records_conversion_failure() {
    let tmp = tempfile::tempdir().unwrap();
    write_descriptor(tmp.path(), "acme/root", "v1", "meta: [unclosed");
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(LocalFsRepository::new(tmp.path())),
        Arc::new(Ed25519Verifier::new(StaticKeys::new())),
        ControllerConfig::default(),
    );

    let intent = compgraph_controller::parse_intents(
        "metadata:\n  name: broken\nspec:\n  interval: 1m\n  sourceRef:\n    url: \"\"\n  configRef:\n    component: acme/root\n    version: v1\n",
    )
    .unwrap()
    .remove(0);
    let key = store.put_intent(intent).await.unwrap().key();
    let err = reconciler
        .reconcile(&key, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error.kind(), compgraph_core::ErrorKind::Terminal);

    let intent = store.get_intent(&key).await.unwrap();
    assert!(
        render_summary(&intent).starts_with("default/broken acme/root:v1 NotReady (ConversionFailed: "),
        "{}",
        render_summary(&intent)
    );
}

#[test]
fn summary_truncates_digest_by_character() {
    let mut intent = compgraph_controller::parse_intents(
        "metadata:\n  name: web\nspec:\n  interval: 1m\n  sourceRef:\n    url: \"\"\n  configRef:\n    component: acme/web\n    version: v1\n",
    )
    .unwrap()
    .remove(0);
    intent.status.latest_resolved_digest = Some("é".repeat(20));
    assert!(render_summary(&intent).ends_with(&format!("digest={}", "é".repeat(12))));

    intent.status.latest_resolved_digest = Some("abc".into());
    assert!(render_summary(&intent).ends_with("digest=abc"));
}
