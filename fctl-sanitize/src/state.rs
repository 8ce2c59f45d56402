//! JSON rewrites: the downloaded raw state and the generated per-module input files.

use serde_json::Value;

/// Synthetic resource types the platform uses to smuggle metadata through state.
const SCRATCH_TYPES: &[&str] = &["scratch_string", "scratch_number"];

const STATE_VERSION: u64 = 4;
const TERRAFORM_VERSION: &str = "1.5.7";

/// Metadata keys carried by every `locals.input_*` object.
const INPUT_METADATA: &[&str] = &["flavor", "version", "kind"];

/// Drop scratch resources and every dependency on them; make sure the state
/// carries a schema version. Returns whether anything changed.
pub fn scrub_state(state: &mut Value) -> bool {
    let Some(root) = state.as_object_mut() else {
        return false;
    };
    let mut changed = false;

    if !root.contains_key("version") {
        root.insert("version".to_string(), Value::from(STATE_VERSION));
        changed = true;
        if !root.contains_key("terraform_version") {
            root.insert("terraform_version".to_string(), Value::from(TERRAFORM_VERSION));
        }
    }

    let Some(resources) = root.get_mut("resources").and_then(Value::as_array_mut) else {
        return changed;
    };

    let before = resources.len();
    resources.retain(|r| {
        !r.get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| SCRATCH_TYPES.contains(&t))
    });
    changed |= resources.len() != before;

    let instances = resources
        .iter_mut()
        .filter_map(|r| r.get_mut("instances").and_then(Value::as_array_mut))
        .flatten();
    for instance in instances {
        let Some(deps) = instance.get_mut("dependencies").and_then(Value::as_array_mut) else {
            continue;
        };
        let before = deps.len();
        deps.retain(|d| {
            !d.as_str()
                .is_some_and(|d| SCRATCH_TYPES.iter().any(|t| d.contains(t)))
        });
        changed |= deps.len() != before;
    }
    changed
}

/// Remove `flavor`, `version` and `kind` from each `locals.input_*` object.
pub fn strip_input_metadata(doc: &mut Value) -> bool {
    let Some(locals) = doc.get_mut("locals").and_then(Value::as_object_mut) else {
        return false;
    };
    let mut changed = false;
    for (name, value) in locals.iter_mut() {
        if !name.starts_with("input_") {
            continue;
        }
        if let Some(input) = value.as_object_mut() {
            for key in INPUT_METADATA {
                changed |= input.remove(*key).is_some();
            }
        }
    }
    changed
}
