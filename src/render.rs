//! Plain-text rendering of resolved graphs and intent status for the CLI.

use compgraph_core::{ComponentVersion, ConditionStatus, Reference};
use std::fmt::Write;

/// Draw a reference tree, one node per line.
///
/// ```text
/// acme/root:v1 (root-v1-0123456789abcdef)
/// ├── backend → acme/backend:v2 (backend-v2-…)
/// │   └── db → acme/db:v1 (db-v1-…)
/// └── frontend → acme/frontend:v1 (frontend-v1-…)
/// ```
pub fn render_tree(root: &Reference) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}:{} ({})",
        root.component_name, root.version, root.component_descriptor_ref.name
    );
    render_children(&root.references, "", &mut out);
    out
}

fn render_children(children: &[Reference], prefix: &str, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let _ = write!(
            out,
            "{prefix}{branch}{} → {}:{}",
            child.name, child.component_name, child.version
        );
        if !child.extra_identity.is_empty() {
            let identity: Vec<String> = child
                .extra_identity
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let _ = write!(out, " [{}]", identity.join(","));
        }
        let _ = writeln!(out, " ({})", child.component_descriptor_ref.name);
        render_children(&child.references, &format!("{prefix}{indent}"), out);
    }
}

/// One-line summary of an intent's status.
pub fn render_summary(intent: &ComponentVersion) -> String {
    let status = &intent.status;
    let ready = match status.condition(compgraph_core::condition::READY) {
        Some(c) if c.status == ConditionStatus::True => "Ready".to_string(),
        Some(c) => format!("NotReady ({}: {})", c.reason, c.message),
        None => "Pending".to_string(),
    };
    let digest: String = status
        .latest_resolved_digest
        .as_deref()
        .map(|d| d.chars().take(12).collect())
        .unwrap_or_else(|| "-".into());
    format!(
        "{} {}:{} {} verified={} digest={}",
        intent.key(),
        intent.spec.config_ref.component,
        intent.spec.config_ref.version,
        ready,
        status.verified,
        digest
    )
}
