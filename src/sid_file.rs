//! SID file loader
//!
//! Parses one `.sid` file (RFC 9254-compatible JSON) into a partial
//! [`SidTree`]. Items live either under `ietf-sid-file:sid-file` or at the
//! top level as a plain `{"items": [...]}` object; both spellings occur in
//! the wild, as does `"item"` for the array key.
//!
//! Parent relations are NOT computed here: augmentation lets a child's true
//! parent come from a different file, so the schema builder derives
//! `NodeInfo` only after all files are merged.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::SidTree;

/// One allocation record from a SID file.
#[derive(Debug, Clone, Deserialize)]
pub struct SidItem {
    pub sid: u64,
    pub namespace: String,
    pub identifier: String,
}

/// Load and parse a single SID file.
pub fn load_sid_file(path: impl AsRef<Path>) -> Result<SidTree> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    parse_sid_file(&text, &path.display().to_string())
}

/// Parse SID file JSON text into a partial tree.
pub fn parse_sid_file(text: &str, file: &str) -> Result<SidTree> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| Error::schema(file, e.to_string()))?;

    let items = extract_items(&root)
        .ok_or_else(|| Error::schema(file, "no 'items' array found"))?;

    let mut tree = SidTree::default();
    for (index, item) in items.iter().enumerate() {
        let item: SidItem = match serde_json::from_value(item.clone()) {
            Ok(item) => item,
            Err(e) => {
                log::warn!("{}: skipping malformed item {}: {}", file, index, e);
                continue;
            }
        };
        insert_item(&mut tree, &item);
    }

    Ok(tree)
}

/// Locate the items array in either the RFC form or the simplified form.
fn extract_items(root: &Value) -> Option<&Vec<Value>> {
    let container = root.get("ietf-sid-file:sid-file").unwrap_or(root);
    container
        .get("items")
        .or_else(|| container.get("item"))
        .and_then(Value::as_array)
}

fn insert_item(tree: &mut SidTree, item: &SidItem) {
    match item.namespace.as_str() {
        "data" => insert_data_item(tree, item),
        "identity" => insert_named_item(tree, item, "identity"),
        "feature" => insert_named_item(tree, item, "feature"),
        "module" => {
            tree.modules.insert(item.identifier.clone(), item.sid);
        }
        other => {
            log::debug!("ignoring SID item in namespace '{}': {}", other, item.identifier);
        }
    }
}

/// Derive both path forms from a data identifier like
/// `/ietf-interfaces:interfaces/interface/ietf-ip:enabled`.
fn insert_data_item(tree: &mut SidTree, item: &SidItem) {
    let prefixed = item.identifier.trim_start_matches('/');
    if prefixed.is_empty() {
        return;
    }
    let stripped = strip_prefixes(prefixed);
    tree.insert_data(&stripped, prefixed, item.sid);
}

/// Identities and features produce synthetic `<ns>:` paths plus, for
/// identities, both sides of the identity bijection.
fn insert_named_item(tree: &mut SidTree, item: &SidItem, ns: &str) {
    let qualified = item.identifier.trim_start_matches('/');
    let bare = match qualified.split_once(':') {
        Some((_, name)) => name,
        None => qualified,
    };
    if bare.is_empty() {
        return;
    }

    let stripped_key = format!("{}:{}", ns, bare);
    let prefixed_key = format!("{}:{}", ns, qualified);
    tree.insert_synthetic(&stripped_key, &prefixed_key, item.sid);

    if ns == "identity" {
        match qualified.split_once(':') {
            Some((module, name)) => tree.insert_identity(module, name, item.sid),
            None => {
                tree.identity_to_sid.insert(bare.to_string(), item.sid);
                tree.sid_to_identity.insert(item.sid, bare.to_string());
            }
        }
    }
}

/// Remove any `module:` prefix from each segment of a prefixed path.
pub fn strip_prefixes(prefixed: &str) -> String {
    prefixed
        .split('/')
        .map(|seg| match seg.split_once(':') {
            Some((_, name)) => name,
            None => seg,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID_FILE: &str = r#"{
        "ietf-sid-file:sid-file": {
            "module-name": "ietf-interfaces",
            "items": [
                {"sid": 1533, "namespace": "module", "identifier": "ietf-interfaces"},
                {"sid": 2033, "namespace": "data", "identifier": "/ietf-interfaces:interfaces"},
                {"sid": 2034, "namespace": "data", "identifier": "/ietf-interfaces:interfaces/interface"},
                {"sid": 2036, "namespace": "data", "identifier": "/ietf-interfaces:interfaces/interface/enabled"},
                {"sid": 1880, "namespace": "identity", "identifier": "iana-if-type:ethernetCsmacd"},
                {"sid": 1901, "namespace": "feature", "identifier": "ietf-interfaces:arbitrary-names"}
            ]
        }
    }"#;

    #[test]
    fn test_parse_rfc_form() {
        let tree = parse_sid_file(SID_FILE, "test.sid").unwrap();

        assert_eq!(tree.modules["ietf-interfaces"], 1533);
        assert_eq!(tree.path_to_sid["interfaces/interface/enabled"], 2036);
        assert_eq!(
            tree.prefixed_path_to_sid["ietf-interfaces:interfaces/interface"],
            2034
        );
        assert_eq!(tree.sid_to_path[&2036], "interfaces/interface/enabled");
    }

    #[test]
    fn test_parse_simplified_form() {
        let json = r#"{"items": [
            {"sid": 100, "namespace": "data", "identifier": "/m:a"},
            {"sid": 103, "namespace": "data", "identifier": "/m:a/b"}
        ]}"#;
        let tree = parse_sid_file(json, "plain.sid").unwrap();
        assert_eq!(tree.path_to_sid["a/b"], 103);
    }

    #[test]
    fn test_identity_and_feature_namespaces() {
        let tree = parse_sid_file(SID_FILE, "test.sid").unwrap();

        assert_eq!(tree.identity_sid("ethernetCsmacd"), Some(1880));
        assert_eq!(tree.identity_sid("iana-if-type:ethernetCsmacd"), Some(1880));
        assert_eq!(tree.path_to_sid["identity:ethernetCsmacd"], 1880);
        assert_eq!(tree.path_to_sid["feature:arbitrary-names"], 1901);
        // features do not enter the identity bijection
        assert_eq!(tree.identity_sid("arbitrary-names"), None);
    }

    #[test]
    fn test_leaf_index_covers_data_only() {
        let tree = parse_sid_file(SID_FILE, "test.sid").unwrap();

        assert_eq!(
            tree.leaf_to_paths["enabled"],
            vec!["interfaces/interface/enabled".to_string()]
        );
        assert!(!tree.leaf_to_paths.contains_key("identity:ethernetCsmacd"));
    }

    #[test]
    fn test_missing_items_is_schema_parse() {
        let err = parse_sid_file(r#"{"module-name": "x"}"#, "bad.sid").unwrap_err();
        assert!(matches!(err, Error::SchemaParse { .. }));
    }
}
