//! File roles and the ordered transformations applied to each role.
//!
//! Every transformation is a plain function over a parsed [`Body`] that reports
//! whether it changed anything. Adding a new platform construct means adding a
//! function and listing it under the roles it applies to.

use std::path::{Component, Path};

use crate::hcl::{references_word, Block, Body};

// ---------------------------------------------------------------------------
// 1. Roles
// ---------------------------------------------------------------------------

/// Which `variables.tf` declarations are platform-internal depends on where the file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Module,
    Level2,
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    RootMain,
    Level2Main,
    Variables(Scope),
    Outputs,
    /// `cc_metadata.tf`
    InternalMetadata,
    /// Any other `.tf` file; only the generic pass applies.
    OtherConfig,
    /// `downloaded-terraform.tfstate`
    RawState,
    /// `level2/input_*.tf.json`
    ModuleInputs,
    Discard,
    PassThrough,
}

/// Directories never walked: provider caches and local workspace state.
pub fn is_skipped_dir(name: &str) -> bool {
    matches!(name, ".terraform" | "terraform.tfstate.d")
}

/// Directories deleted wholesale (`rel` is `/`-separated, `tfexport/` already stripped).
pub fn is_discarded_dir(rel: &str) -> bool {
    rel == "terraform.d"
}

/// Path relative to the tree root with `/` separators and a leading `tfexport/` removed.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let joined = parts.join("/");
    match joined.strip_prefix("tfexport/") {
        Some(rest) => rest.to_string(),
        None if joined == "tfexport" => String::new(),
        None => joined,
    }
}

pub fn classify(rel: &str) -> FileRole {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    let depth = rel.matches('/').count();
    let in_modules = rel.starts_with("modules/");

    if in_modules && matches!(name, "facets.yaml" | "resources_gen.tf" | "_variables.tf") {
        return FileRole::Discard;
    }
    if rel == "outputs.tf" {
        return FileRole::Discard;
    }
    if name == "cc_metadata.tf" {
        return FileRole::InternalMetadata;
    }
    if rel == "downloaded-terraform.tfstate" {
        return FileRole::RawState;
    }
    if depth == 1
        && rel.starts_with("level2/")
        && name.starts_with("input_")
        && name.ends_with(".tf.json")
    {
        return FileRole::ModuleInputs;
    }
    if !name.ends_with(".tf") {
        return FileRole::PassThrough;
    }
    match (rel, name) {
        ("main.tf", _) => FileRole::RootMain,
        ("level2/main.tf", _) => FileRole::Level2Main,
        (_, "variables.tf") if in_modules => FileRole::Variables(Scope::Module),
        (_, "variables.tf") if rel.starts_with("level2/") => FileRole::Variables(Scope::Level2),
        (_, "variables.tf") => FileRole::Variables(Scope::Project),
        (_, "outputs.tf") => FileRole::Outputs,
        _ => FileRole::OtherConfig,
    }
}

// ---------------------------------------------------------------------------
// 2. Rule table
// ---------------------------------------------------------------------------

/// Where the file being rewritten lives.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    pub rel: &'a str,
}

impl FileContext<'_> {
    /// Some directory above the file is named `dir`.
    fn under(&self, dir: &str) -> bool {
        let mut parts: Vec<&str> = self.rel.split('/').collect();
        parts.pop();
        parts.contains(&dir)
    }
}

pub type Transform = fn(&mut Body, &FileContext<'_>) -> bool;

pub fn transforms(role: FileRole) -> &'static [Transform] {
    match role {
        FileRole::RootMain => &[clean_root_export_module, remove_root_variables, generic],
        FileRole::Level2Main => &[clean_level2_modules, generic],
        FileRole::Variables(Scope::Module) => {
            &[remove_module_variables, add_required_module_variables, generic]
        }
        FileRole::Variables(Scope::Level2) => &[remove_level2_variables, generic],
        FileRole::Variables(Scope::Project) => &[remove_project_variables, generic],
        FileRole::Outputs => &[rewrite_preserved_outputs, remove_internal_outputs, generic],
        FileRole::InternalMetadata => &[clear],
        FileRole::OtherConfig => &[generic],
        FileRole::RawState | FileRole::ModuleInputs | FileRole::Discard | FileRole::PassThrough => {
            &[]
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Symbol lists
// ---------------------------------------------------------------------------

const EXPORT_MODULE: &str = "level2";
const PROTECTED_MODULES: &[&str] = &["blueprint_self", "environment"];

const ROOT_VARIABLES: &[&str] = &["deployment_id", "dev_mode", "releaseType"];

const LEVEL2_STRIP: &[&str] = &[
    "instance_type",
    "iac_version",
    "release_metadata",
    "generate_release_metadata",
    "baseinfra",
    "settings",
];

/// Attributes every level-2 module call must carry, with the value injected when absent.
const LEVEL2_REQUIRED: &[(&str, &str)] = &[
    ("inputs", "{}"),
    ("instance", "{}"),
    ("instance_name", "\"\""),
    ("cluster", "var.cluster"),
    ("environment", "var.environment"),
];

const MODULE_VARIABLES: &[&str] = &[
    "release_metadata",
    "instance_type",
    "iac_version",
    "generate_release_metadata",
    "settings",
    "baseinfra",
    "cc_metadata",
];

const LEVEL2_VARIABLES: &[&str] = &["infra_output", "settings", "state", "cc_metadata", "deployment_id"];

const PROJECT_VARIABLES: &[&str] = &[
    "deployment_id",
    "dev_mode",
    "releaseType",
    "CUSTOMER_ARTIFACT_BUCKET",
    "USE_MINIO",
];

const OUTPUT_SYMBOLS: &[&str] = &[
    "cc_metadata",
    "deployment_id",
    "release_metadata",
    "generate_release_metadata",
    "baseinfra",
    "settings",
    "infra_output",
    "state",
];

const GENERIC_MODULE_STRIP: &[&str] = &[
    "settings",
    "state",
    "infra_output",
    "deployment_id",
    "release_metadata",
    "instance_type",
    "iac_version",
    "generate_release_metadata",
    "baseinfra",
    "cc_metadata",
];

const METADATA_ATTR: &str = "cc_metadata";

const REQUIRED_MODULE_VARIABLES: &[(&str, &str)] = &[
    (
        "instance",
        "variable \"instance\" {\n  type        = object({})\n  description = \"Instance configuration\"\n  default     = {}\n}\n",
    ),
    (
        "instance_name",
        "variable \"instance_name\" {\n  type        = string\n  description = \"Name of the instance\"\n  default     = \"\"\n}\n",
    ),
    (
        "cluster",
        "variable \"cluster\" {\n  type        = object({})\n  description = \"Cluster identifier\"\n  default     = {}\n}\n",
    ),
    (
        "environment",
        "variable \"environment\" {\n  type        = object({})\n  description = \"Environment name\"\n  default     = {}\n}\n",
    ),
    (
        "inputs",
        "variable \"inputs\" {\n  type        = object({})\n  description = \"Inputs\"\n  default     = {}\n}\n",
    ),
];

const CLOUD_TAGS: &str = "merge(lookup(local.spec, \"enable_cloud_tags\", true) ? {\n    cluster           = var.cluster.name\n    facetsclustername = var.cluster.name\n    facetsclusterid   = var.cluster.id\n  } : {}, lookup(local.spec, \"cloud_tags\", {}))";

const COMMON_ENVIRONMENT_VARIABLES: &str = "var.cluster.commonEnvironmentVariables";

// ---------------------------------------------------------------------------
// 4. Transformations
// ---------------------------------------------------------------------------

fn is_module(block: &Block, name: &str) -> bool {
    block.kind() == "module" && block.label(0) == Some(name)
}

fn is_protected_module(block: &Block) -> bool {
    block.kind() == "module" && block.label(0).is_some_and(|l| PROTECTED_MODULES.contains(&l))
}

fn is_variable_in(block: &Block, names: &[&str]) -> bool {
    block.kind() == "variable" && block.label(0).is_some_and(|l| names.contains(&l))
}

/// `{}` or `[]` once whitespace is ignored.
fn is_empty_collection(expr: &str) -> bool {
    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    compact == "{}" || compact == "[]"
}

fn remove_all(block: &mut Block, names: &[&str]) -> bool {
    let mut changed = false;
    for name in names {
        changed |= block.remove_attribute(name);
    }
    changed
}

fn remove_if_empty(block: &mut Block, name: &str) -> bool {
    let empty = block
        .attribute(name)
        .is_some_and(|a| is_empty_collection(a.expr()));
    empty && block.remove_attribute(name)
}

fn clean_root_export_module(body: &mut Body, _: &FileContext<'_>) -> bool {
    let mut changed = false;
    for block in body.blocks_mut().filter(|b| is_module(b, EXPORT_MODULE)) {
        changed |= remove_all(block, &[METADATA_ATTR, "deployment_id"]);
        changed |= remove_if_empty(block, "providers");
        changed |= remove_if_empty(block, "state");
    }
    changed
}

fn remove_root_variables(body: &mut Body, _: &FileContext<'_>) -> bool {
    body.remove_blocks(|b| is_variable_in(b, ROOT_VARIABLES)) > 0
}

fn clean_level2_modules(body: &mut Body, _: &FileContext<'_>) -> bool {
    let mut changed = false;
    let calls = body
        .blocks_mut()
        .filter(|b| b.kind() == "module" && !is_protected_module(b));
    for block in calls {
        changed |= remove_all(block, LEVEL2_STRIP);
        changed |= remove_if_empty(block, "providers");
        let internal_inputs = block
            .attribute("inputs")
            .is_some_and(|a| references_word(a.expr(), "deployment_id"));
        if internal_inputs {
            changed |= block.set_attribute("inputs", "{}");
        }
        for (name, default) in LEVEL2_REQUIRED {
            if block.attribute(name).is_none() {
                changed |= block.set_attribute(name, default);
            }
        }
    }
    changed
}

fn remove_module_variables(body: &mut Body, _: &FileContext<'_>) -> bool {
    body.remove_blocks(|b| is_variable_in(b, MODULE_VARIABLES)) > 0
}

fn remove_level2_variables(body: &mut Body, _: &FileContext<'_>) -> bool {
    body.remove_blocks(|b| is_variable_in(b, LEVEL2_VARIABLES)) > 0
}

fn remove_project_variables(body: &mut Body, _: &FileContext<'_>) -> bool {
    body.remove_blocks(|b| {
        is_variable_in(b, PROJECT_VARIABLES)
            || (b.kind() == "variable" && b.label(0).is_some_and(|l| l.starts_with("cc_")))
    }) > 0
}

fn add_required_module_variables(body: &mut Body, ctx: &FileContext<'_>) -> bool {
    let mut changed = false;
    for (name, snippet) in REQUIRED_MODULE_VARIABLES {
        let declared = body
            .blocks()
            .any(|b| b.kind() == "variable" && b.label(0) == Some(*name));
        if declared {
            continue;
        }
        match body.append_source(snippet) {
            Ok(()) => changed = true,
            Err(err) => tracing::warn!("{}: cannot add variable {name}: {err}", ctx.rel),
        }
    }
    changed
}

/// Output kept despite referencing internal symbols, and the expression it gets instead.
fn preserved_output(block: &Block, ctx: &FileContext<'_>) -> Option<(&'static str, &'static str)> {
    if block.kind() != "output" {
        return None;
    }
    match block.label(0) {
        Some("cloud_tags") if ctx.under("environment") => Some((METADATA_ATTR, CLOUD_TAGS)),
        Some("variables") if ctx.under("blueprint_self") => {
            Some(("FACETS_", COMMON_ENVIRONMENT_VARIABLES))
        }
        _ => None,
    }
}

fn rewrite_preserved_outputs(body: &mut Body, ctx: &FileContext<'_>) -> bool {
    let mut changed = false;
    for block in body.blocks_mut() {
        let Some((marker, replacement)) = preserved_output(block, ctx) else {
            continue;
        };
        let internal = block
            .attribute("value")
            .is_some_and(|a| a.expr().contains(marker));
        if internal {
            changed |= block.set_attribute("value", replacement);
        }
    }
    changed
}

/// Symbols count as referenced through `var.<name>`; the metadata object counts anywhere.
fn references_internal_symbol(expr: &str) -> bool {
    references_word(expr, METADATA_ATTR)
        || OUTPUT_SYMBOLS
            .iter()
            .any(|sym| references_word(expr, &format!("var.{sym}")))
}

fn remove_internal_outputs(body: &mut Body, ctx: &FileContext<'_>) -> bool {
    body.remove_blocks(|b| {
        b.kind() == "output"
            && preserved_output(b, ctx).is_none()
            && b.attribute("value")
                .is_some_and(|a| references_internal_symbol(a.expr()))
    }) > 0
}

fn clear(body: &mut Body, _: &FileContext<'_>) -> bool {
    let had_items = !body.items().is_empty();
    body.clear();
    had_items
}

/// Applied to every configuration file after its role-specific rules.
/// Protected module calls in `level2/main.tf` are left as exported.
fn generic(body: &mut Body, ctx: &FileContext<'_>) -> bool {
    let level2 = ctx.rel == "level2/main.tf";
    let mut changed = false;
    for block in body.blocks_mut() {
        if level2 && is_protected_module(block) {
            continue;
        }
        changed |= block.remove_attribute(METADATA_ATTR);
        if block.kind() == "module" {
            changed |= remove_all(block, GENERIC_MODULE_STRIP);
        }
    }
    changed
}
