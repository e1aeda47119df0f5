//! Definition file loading
//!
//! Nodes, clusters, and programs are defined in per-entity JSON files
//! maintained by an external editor. A malformed file is reported but never
//! aborts the load of its siblings.

use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::LoadError;

/// Deserialize every `*.json` file in `dir`, collecting per-file failures
///
/// A missing directory yields an empty result, not an error; a deployment
/// may legitimately have no programs yet.
pub fn load_json_dir<T: DeserializeOwned>(dir: &Path) -> (Vec<T>, Vec<LoadError>) {
    let mut items = Vec::new();
    let mut failures = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                failures.push(LoadError::Read {
                    path: dir.to_path_buf(),
                    source: e,
                });
            }
            return (items, failures);
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                failures.push(LoadError::Read { path, source: e });
                continue;
            }
        };
        match serde_json::from_str(&content) {
            Ok(item) => items.push(item),
            Err(e) => failures.push(LoadError::Parse { path, source: e }),
        }
    }

    (items, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    #[test]
    fn test_partial_failure_keeps_valid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            r#"{ "id": "n1", "name": "Node 1", "address": "localhost", "port": 5000 }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not a definition").unwrap();

        let (nodes, failures): (Vec<Node>, _) = load_json_dir(dir.path());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id.as_str(), "n1");
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], LoadError::Parse { .. }));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let (nodes, failures): (Vec<Node>, _) =
            load_json_dir(Path::new("/nonexistent/definitions"));
        assert!(nodes.is_empty());
        assert!(failures.is_empty());
    }
}
