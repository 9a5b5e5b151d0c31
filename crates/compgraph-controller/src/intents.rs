//! Intent files: a YAML list of component version intents, or a single one.

use compgraph_core::{ComponentVersion, Error, Result, ResultExt};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum IntentFile {
    Many(Vec<ComponentVersion>),
    One(Box<ComponentVersion>),
}

pub fn parse_intents(content: &str) -> Result<Vec<ComponentVersion>> {
    let intents = match serde_yaml::from_str::<IntentFile>(content)? {
        IntentFile::Many(intents) => intents,
        IntentFile::One(intent) => vec![*intent],
    };
    for intent in &intents {
        if intent.metadata.name.is_empty() {
            return Err(Error::Config("intent without metadata.name".into()));
        }
        if intent.spec.interval.is_zero() {
            return Err(Error::Config(format!(
                "intent {} has a zero interval",
                intent.key()
            )));
        }
    }
    Ok(intents)
}

pub fn load_intents(path: &Path) -> Result<Vec<ComponentVersion>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_intents(&content).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: &str = r#"
metadata:
  name: web
spec:
  interval: 5m
  sourceRef:
    url: file:///srv/components
  configRef:
    component: acme/web
    version: v1
"#;

    #[test]
    fn single_intent_document() {
        let intents = parse_intents(ONE).unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].spec.config_ref.component, "acme/web");
        assert!(!intents[0].spec.expand);
    }

    #[test]
    fn list_of_intents() {
        let list = format!(
            "- {}\n- {}",
            ONE.trim().replace('\n', "\n  "),
            ONE.trim().replace("name: web", "name: api").replace('\n', "\n  ")
        );
        let intents = parse_intents(&list).unwrap();
        let names: Vec<&str> = intents.iter().map(|i| i.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["web", "api"]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = parse_intents(&ONE.replace("5m", "0s")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_intents(&tmp.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }
}
