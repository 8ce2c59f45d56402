//! Release metadata recorded by exported modules in `scratch_string.release_metadata`.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{io_err, WorkspaceError};

pub const RELEASE_METADATA_FILE: &str = "release-metadata.json";

/// Collect every `release_metadata` object from a `show -json` document.
///
/// Only resources typed `scratch_string` and named `release_metadata` count; their
/// `in` attribute is a JSON string whose `release_metadata` is kept when
/// `generate_release_metadata` is `true`.
pub fn collect(state: &Value) -> Vec<Value> {
    let mut found = Vec::new();
    if let Some(root) = state.pointer("/values/root_module") {
        walk(root, &mut found);
    }
    found
}

fn walk(module: &Value, found: &mut Vec<Value>) {
    for resource in module["resources"].as_array().into_iter().flatten() {
        if resource["type"] != "scratch_string" || resource["name"] != "release_metadata" {
            continue;
        }
        let Some(raw) = resource.pointer("/values/in").and_then(Value::as_str) else {
            continue;
        };
        let parsed: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!("release metadata is not valid JSON: {err}");
                continue;
            }
        };
        if parsed["generate_release_metadata"] == Value::Bool(true) && parsed["release_metadata"].is_object() {
            found.push(parsed["release_metadata"].clone());
        }
    }
    for child in module["child_modules"].as_array().into_iter().flatten() {
        walk(child, found);
    }
}

/// Write `entries` as `<deployment_dir>/release-metadata.json`; `None` when empty.
pub fn write(deployment_dir: &Path, entries: &[Value]) -> Result<Option<PathBuf>, WorkspaceError> {
    if entries.is_empty() {
        return Ok(None);
    }
    let path = deployment_dir.join(RELEASE_METADATA_FILE);
    let body = serde_json::to_string_pretty(entries).map_err(|e| WorkspaceError::Json {
        path: path.clone(),
        source: e,
    })?;
    std::fs::write(&path, body).map_err(|e| io_err(&path, e))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_resource(generate: bool, id: &str) -> Value {
        let inner = json!({
            "generate_release_metadata": generate,
            "release_metadata": { "id": id },
        });
        json!({
            "type": "scratch_string",
            "name": "release_metadata",
            "values": { "in": inner.to_string() },
        })
    }

    #[test]
    fn walks_child_modules() {
        let state = json!({
            "values": { "root_module": {
                "resources": [metadata_resource(true, "root")],
                "child_modules": [{
                    "resources": [
                        metadata_resource(false, "skipped"),
                        { "type": "aws_s3_bucket", "name": "release_metadata", "values": {} },
                    ],
                    "child_modules": [{ "resources": [metadata_resource(true, "deep")] }],
                }],
            }}
        });
        let ids: Vec<Value> = collect(&state).into_iter().map(|m| m["id"].clone()).collect();
        assert_eq!(ids, vec![json!("root"), json!("deep")]);
    }

    #[test]
    fn empty_state_collects_nothing() {
        assert!(collect(&json!({ "format_version": "1.0" })).is_empty());
    }

    #[test]
    fn nothing_written_without_entries() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        assert_eq!(write(tmp.path(), &[]).unwrap(), None);
        let path = write(tmp.path(), &[json!({"id": 1})]).unwrap().unwrap();
        assert!(path.ends_with(RELEASE_METADATA_FILE));
    }
}
