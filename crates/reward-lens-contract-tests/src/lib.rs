//! Loaders for the frozen JSON contracts under the workspace `contracts/`
//! directory.

use std::path::PathBuf;

use jsonschema::JSONSchema;
use serde_json::Value;

/// Absolute path of a file under `contracts/`.
pub fn contract_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../contracts")
        .join(relative)
}

/// Reads and parses one contract file.
pub fn load_contract(relative: &str) -> Result<Value, String> {
    let path = contract_path(relative);
    let raw = std::fs::read_to_string(&path)
        .map_err(|error| format!("{}: {error}", path.display()))?;
    serde_json::from_str(&raw).map_err(|error| format!("{}: {error}", path.display()))
}

/// Compiles the schema stored at `relative`.
pub fn compile_schema(relative: &str) -> Result<JSONSchema, String> {
    let schema = load_contract(relative)?;
    JSONSchema::compile(&schema).map_err(|error| format!("{relative}: {error}"))
}
