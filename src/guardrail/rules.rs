//! Guardrail rule file loading: one rule, or a list of rules, per `*.yaml`
//! file in a configured directory.

use std::collections::HashSet;
use std::path::Path;

use crate::domain::guardrail::Guardrail;
use crate::error::{Error, Result};

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RuleFile {
    One(Guardrail),
    Many(Vec<Guardrail>),
}

/// Parse every `*.yaml`/`*.yml` file in `dir`, validating that ids are
/// unique within the load batch. Returns rules sorted by id, so evaluation
/// order is deterministic.
pub fn load_dir(dir: &Path) -> Result<Vec<Guardrail>> {
    let mut rules = Vec::new();

    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Internal(format!("failed to read guardrails directory {dir:?}: {e}")))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::Internal(format!("failed to read directory entry: {e}")))?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Internal(format!("failed to read {path:?}: {e}")))?;
        let parsed: RuleFile = serde_yaml::from_str(&contents)
            .map_err(|e| Error::InvalidRequest(format!("malformed guardrail file {path:?}: {e}")))?;

        match parsed {
            RuleFile::One(rule) => rules.push(rule),
            RuleFile::Many(many) => rules.extend(many),
        }
    }

    validate_batch(&rules)?;
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(rules)
}

fn validate_batch(rules: &[Guardrail]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.id.clone()) {
            return Err(Error::InvalidRequest(format!("duplicate guardrail id: {}", rule.id)));
        }
        validate_compound_depth(rule)?;
    }
    Ok(())
}

fn validate_compound_depth(rule: &Guardrail) -> Result<()> {
    use crate::domain::guardrail::Condition;
    fn depth(condition: &Condition) -> usize {
        match condition {
            Condition::Compound { conditions, .. } => {
                1 + conditions.iter().map(depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }
    for condition in &rule.conditions {
        if depth(condition) > 8 {
            return Err(Error::InvalidRequest(format!(
                "guardrail {} has an excessively deep compound condition",
                rule.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn loads_single_and_list_files_sorted_by_id() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "id: zzz\ndescription: last\naction: warn\nmessage: low priority\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "- id: aaa\n  description: first\n  action: block\n  message: high priority\n",
        )
        .unwrap();

        let rules = load_dir(dir.path()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "aaa");
        assert_eq!(rules[1].id, "zzz");
    }

    #[test]
    fn duplicate_ids_within_batch_rejected() {
        let dir = tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("dup.yaml")).unwrap();
        writeln!(file, "- id: same\n  description: one\n  action: warn\n  message: a").unwrap();
        writeln!(file, "  id: same\n  description: two\n  action: warn\n  message: b").unwrap();
        drop(file);

        // The above is intentionally malformed YAML for a list; exercise a
        // cleanly duplicated pair instead via two single-rule files.
        std::fs::remove_file(dir.path().join("dup.yaml")).unwrap();
        std::fs::write(
            dir.path().join("one.yaml"),
            "id: same\ndescription: one\naction: warn\nmessage: a\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("two.yaml"),
            "id: same\ndescription: two\naction: warn\nmessage: b\n",
        )
        .unwrap();

        let result = load_dir(dir.path());
        assert!(result.is_err());
    }
}
