//! Top-level YAML ↔ CBOR codec surface
//!
//! This is the API the CLI and transport collaborators consume. Encoding
//! accepts two YAML shapes:
//!
//! ```yaml
//! # instance-identifier form
//! - /ietf-interfaces:interfaces/interface[name='sw0']/enabled: true
//! # hierarchical (RFC 7951 style) form
//! ietf-interfaces:interfaces:
//!   interface:
//!     - name: sw0
//!       enabled: true
//! ```
//!
//! Both flatten to the same `(instance-id, value)` entries before the
//! Delta-SID encoder runs. Decoding reverses the pipeline over the same
//! schema tables.

use serde_yaml::{Mapping, Value as YamlValue};

use crate::decoder::{decode_bytes, OutputFormat};
use crate::encoder::{encode_to_bytes, sid_queries, Entry, SidQuery, SortMode};
use crate::error::{Error, Result};
use crate::instance_id::{parse_instance_id, Segment};
use crate::resolver::resolve_to_path;
use crate::schema::SchemaTables;

/// Options for [`encode_yaml_to_cbor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    pub sort_mode: SortMode,
}

/// Options for [`decode_cbor_to_yaml`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub output_format: OutputFormat,
}

/// Encode a YAML document to Delta-SID CBOR bytes.
pub fn encode_yaml_to_cbor(
    yaml: &str,
    tables: &SchemaTables,
    opts: &EncodeOptions,
) -> Result<Vec<u8>> {
    let doc: YamlValue = serde_yaml::from_str(yaml)?;
    let entries = document_entries(&doc, tables)?;
    encode_to_bytes(&entries, tables, opts.sort_mode)
}

/// Decode Delta-SID CBOR bytes to a YAML document string.
pub fn decode_cbor_to_yaml(
    bytes: &[u8],
    tables: &SchemaTables,
    opts: &DecodeOptions,
) -> Result<String> {
    let doc = decode_bytes(bytes, tables, opts.output_format)?;
    Ok(serde_yaml::to_string(&doc)?)
}

/// Build the SID-array query form for the device's fetch verb from a YAML
/// document of instance-identifiers.
pub fn extract_sid_queries(yaml: &str, tables: &SchemaTables) -> Result<Vec<SidQuery>> {
    let doc: YamlValue = serde_yaml::from_str(yaml)?;
    let entries = document_entries(&doc, tables)?;
    let paths: Vec<Vec<Segment>> = entries.into_iter().map(|(segments, _)| segments).collect();
    sid_queries(&paths, tables)
}

// =============================================================================
// Document → entry flattening
// =============================================================================

/// Turn either input shape into `(instance-id, value)` entries.
fn document_entries(doc: &YamlValue, tables: &SchemaTables) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    match doc {
        YamlValue::Sequence(items) => {
            for item in items {
                match item {
                    // `- /path` without a trailing colon parses as a string
                    YamlValue::String(path) if path.starts_with('/') => {
                        entries.push((parse_instance_id(path)?, YamlValue::Null));
                    }
                    YamlValue::Mapping(map) => push_mapping_entries(map, tables, &mut entries)?,
                    other => {
                        return Err(Error::instance_id(
                            display_yaml(other),
                            "expected an instance-identifier entry",
                        ));
                    }
                }
            }
        }
        YamlValue::Mapping(map) => {
            if is_instance_id_mapping(map) {
                push_mapping_entries(map, tables, &mut entries)?;
            } else {
                for (key, value) in map {
                    let key = mapping_key(key)?;
                    flatten_hierarchical(&[segment_from_name(&key)], value, tables, &mut entries)?;
                }
            }
        }
        YamlValue::Null => {}
        other => {
            return Err(Error::instance_id(
                display_yaml(other),
                "expected a sequence or mapping document",
            ));
        }
    }
    Ok(entries)
}

fn is_instance_id_mapping(map: &Mapping) -> bool {
    map.iter()
        .all(|(key, _)| matches!(key, YamlValue::String(s) if s.starts_with('/')))
}

fn push_mapping_entries(
    map: &Mapping,
    tables: &SchemaTables,
    entries: &mut Vec<Entry>,
) -> Result<()> {
    for (key, value) in map {
        let key = mapping_key(key)?;
        if key.starts_with('/') {
            entries.push((parse_instance_id(&key)?, value.clone()));
        } else {
            flatten_hierarchical(&[segment_from_name(&key)], value, tables, entries)?;
        }
    }
    Ok(())
}

/// Walk a hierarchical mapping, accumulating segments until a scalar (or a
/// list boundary) produces an entry.
fn flatten_hierarchical(
    segments: &[Segment],
    value: &YamlValue,
    tables: &SchemaTables,
    entries: &mut Vec<Entry>,
) -> Result<()> {
    match value {
        YamlValue::Mapping(map) => {
            for (key, child) in map {
                let key = mapping_key(key)?;
                let mut next = segments.to_vec();
                next.push(segment_from_name(&key));
                flatten_hierarchical(&next, child, tables, entries)?;
            }
            if map.is_empty() {
                entries.push((segments.to_vec(), YamlValue::Null));
            }
            Ok(())
        }
        YamlValue::Sequence(items) => {
            let (_, canonical) = resolve_to_path(tables, segments, None)?;
            let canonical = canonical.to_string();
            if tables.types.is_list(&canonical) {
                flatten_list(segments, &canonical, items, tables, entries)
            } else {
                // leaf-list
                entries.push((segments.to_vec(), value.clone()));
                Ok(())
            }
        }
        scalar => {
            entries.push((segments.to_vec(), scalar.clone()));
            Ok(())
        }
    }
}

/// Each list element becomes a predicated segment built from its key
/// leaves; the remaining fields recurse below it.
fn flatten_list(
    segments: &[Segment],
    canonical: &str,
    items: &[YamlValue],
    tables: &SchemaTables,
    entries: &mut Vec<Entry>,
) -> Result<()> {
    let key_names = tables
        .types
        .list_keys
        .get(canonical)
        .cloned()
        .unwrap_or_default();

    if items.is_empty() {
        entries.push((segments.to_vec(), YamlValue::Null));
        return Ok(());
    }

    for item in items {
        let YamlValue::Mapping(fields) = item else {
            return Err(Error::instance_id(
                display_yaml(item),
                format!("list '{}' entries must be mappings", canonical),
            ));
        };

        let mut predicates = Vec::new();
        for key in &key_names {
            if let Some(value) = mapping_lookup(fields, key) {
                if let Some(text) = scalar_text(value) {
                    predicates.push((key.clone(), text));
                }
            }
        }

        let mut entry_segments = segments.to_vec();
        if let Some(last) = entry_segments.last_mut() {
            last.predicates = predicates;
        }

        let mut wrote_field = false;
        for (key, child) in fields {
            let key = mapping_key(key)?;
            let bare = key.split_once(':').map(|(_, n)| n).unwrap_or(&key);
            if key_names.iter().any(|k| k == bare) {
                continue;
            }
            let mut next = entry_segments.clone();
            next.push(segment_from_name(&key));
            flatten_hierarchical(&next, child, tables, entries)?;
            wrote_field = true;
        }
        if !wrote_field {
            // keys-only entry still materializes the element
            entries.push((entry_segments, YamlValue::Null));
        }
    }
    Ok(())
}

fn segment_from_name(name: &str) -> Segment {
    let (prefix, bare) = match name.split_once(':') {
        Some((prefix, bare)) => (Some(prefix.to_string()), bare.to_string()),
        None => (None, name.to_string()),
    };
    Segment {
        prefix,
        name: bare,
        predicates: Vec::new(),
    }
}

fn mapping_key(key: &YamlValue) -> Result<String> {
    match key {
        YamlValue::String(s) => Ok(s.clone()),
        other => Err(Error::instance_id(
            display_yaml(other),
            "mapping keys must be strings",
        )),
    }
}

fn mapping_lookup<'a>(map: &'a Mapping, bare_key: &str) -> Option<&'a YamlValue> {
    map.iter()
        .find(|(key, _)| {
            matches!(key, YamlValue::String(s)
                if s == bare_key
                    || s.split_once(':').map(|(_, n)| n) == Some(bare_key))
        })
        .map(|(_, value)| value)
}

fn scalar_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn display_yaml(value: &YamlValue) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{:?}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NodeInfo, TypeInfo, YangType};

    fn tables() -> SchemaTables {
        let mut tables = SchemaTables::default();
        let nodes = [
            ("interfaces", "ietf-interfaces:interfaces", 2033u64, None),
            (
                "interfaces/interface",
                "ietf-interfaces:interfaces/interface",
                2034,
                Some(2033),
            ),
            (
                "interfaces/interface/name",
                "ietf-interfaces:interfaces/interface/name",
                2035,
                Some(2034),
            ),
            (
                "interfaces/interface/enabled",
                "ietf-interfaces:interfaces/interface/enabled",
                2036,
                Some(2034),
            ),
        ];
        for (stripped, prefixed, sid, parent) in nodes {
            tables.sid.insert_data(stripped, prefixed, sid);
            tables.sid.node_info.insert(
                stripped.to_string(),
                NodeInfo {
                    sid,
                    parent,
                    delta_sid: parent
                        .map(|p| sid as i64 - p as i64)
                        .unwrap_or(sid as i64),
                    depth: stripped.split('/').count(),
                    prefixed_path: prefixed.to_string(),
                },
            );
        }
        tables.types.lists.insert("interfaces/interface".into());
        tables
            .types
            .list_keys
            .insert("interfaces/interface".into(), vec!["name".into()]);
        tables.types.types.insert(
            "interfaces/interface/name".into(),
            TypeInfo::new(YangType::String),
        );
        tables.types.types.insert(
            "interfaces/interface/enabled".into(),
            TypeInfo::new(YangType::Boolean),
        );
        for (name, order) in [("name", 0usize), ("enabled", 1)] {
            tables.types.node_orders.insert(name.into(), order);
        }
        tables
    }

    const INSTANCE_FORM: &str =
        "- /ietf-interfaces:interfaces/interface[name='sw0']/enabled: true\n";

    const HIERARCHICAL_FORM: &str = "\
ietf-interfaces:interfaces:
  interface:
    - name: sw0
      enabled: true
";

    #[test]
    fn test_both_input_forms_agree() {
        let tables = tables();
        let opts = EncodeOptions::default();

        let a = encode_yaml_to_cbor(INSTANCE_FORM, &tables, &opts).unwrap();
        let b = encode_yaml_to_cbor(HIERARCHICAL_FORM, &tables, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let tables = tables();

        let bytes =
            encode_yaml_to_cbor(INSTANCE_FORM, &tables, &EncodeOptions::default()).unwrap();
        let yaml =
            decode_cbor_to_yaml(&bytes, &tables, &DecodeOptions::default()).unwrap();

        let doc: YamlValue = serde_yaml::from_str(&yaml).unwrap();
        let interfaces = doc.get("ietf-interfaces:interfaces").unwrap();
        let list = interfaces.get("interface").unwrap();
        let entry = &list.as_sequence().unwrap()[0];
        assert_eq!(entry.get("name"), Some(&YamlValue::String("sw0".into())));
        assert_eq!(entry.get("enabled"), Some(&YamlValue::Bool(true)));
    }

    #[test]
    fn test_decoded_yaml_reencodes_byte_identical() {
        let tables = tables();
        let opts = EncodeOptions::default();

        let bytes = encode_yaml_to_cbor(INSTANCE_FORM, &tables, &opts).unwrap();
        let yaml = decode_cbor_to_yaml(&bytes, &tables, &DecodeOptions::default()).unwrap();
        let bytes_again = encode_yaml_to_cbor(&yaml, &tables, &opts).unwrap();
        assert_eq!(bytes, bytes_again);
    }

    #[test]
    fn test_bare_path_string_item() {
        let tables = tables();
        let queries =
            extract_sid_queries("- /ietf-interfaces:interfaces\n", &tables).unwrap();
        assert_eq!(queries, vec![SidQuery::Node(2033)]);
    }

    #[test]
    fn test_fetch_query_for_list_entry() {
        let tables = tables();
        let queries = extract_sid_queries(
            "- /ietf-interfaces:interfaces/interface[name='sw0']:\n",
            &tables,
        )
        .unwrap();
        assert_eq!(
            queries,
            vec![SidQuery::ListEntry(
                2034,
                vec![ciborium::Value::Text("sw0".into())]
            )]
        );
    }

    #[test]
    fn test_empty_document() {
        let tables = tables();
        let bytes = encode_yaml_to_cbor("", &tables, &EncodeOptions::default()).unwrap();
        // an empty document is an empty CBOR map
        assert_eq!(bytes, vec![0xa0]);
    }

    #[test]
    fn test_end_to_end_from_schema_files() {
        use crate::builder::{build_schema_tables, BuildOptions};

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("test-bridge.sid"),
            r#"{"ietf-sid-file:sid-file": {"module-name": "test-bridge", "items": [
                {"sid": 1000, "namespace": "module", "identifier": "test-bridge"},
                {"sid": 3000, "namespace": "data", "identifier": "/test-bridge:bridge"},
                {"sid": 3001, "namespace": "data", "identifier": "/test-bridge:bridge/vlan"},
                {"sid": 3002, "namespace": "data", "identifier": "/test-bridge:bridge/vlan/vid"},
                {"sid": 3003, "namespace": "data", "identifier": "/test-bridge:bridge/vlan/state"},
                {"sid": 3900, "namespace": "identity", "identifier": "test-bridge:vlan-aware"}
            ]}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("test-bridge.yang"),
            r#"
            module test-bridge {
                namespace "urn:example:test-bridge";
                prefix tb;
                identity vlan-aware { }
                container bridge {
                    list vlan {
                        key "vid";
                        leaf vid { type uint16; }
                        leaf state {
                            type enumeration {
                                enum disabled { value 0; }
                                enum forwarding { value 3; }
                            }
                        }
                    }
                }
            }
            "#,
        )
        .unwrap();

        let opts = BuildOptions {
            no_cache: true,
            ..BuildOptions::default()
        };
        let tables = build_schema_tables(dir.path(), &opts).unwrap();

        let yaml = "- /test-bridge:bridge/vlan[vid='20']/state: forwarding\n";
        let bytes = encode_yaml_to_cbor(yaml, &tables, &EncodeOptions::default()).unwrap();

        // {3000: {1: [{1: 20, 2: 3}]}}: numeric key, enum as integer
        let value: ciborium::Value = ciborium::from_reader(bytes.as_slice()).unwrap();
        let ciborium::Value::Map(root) = &value else {
            panic!("expected map");
        };
        assert_eq!(root[0].0, ciborium::Value::Integer(3000.into()));

        let decoded = decode_cbor_to_yaml(&bytes, &tables, &DecodeOptions::default()).unwrap();
        let doc: YamlValue = serde_yaml::from_str(&decoded).unwrap();
        let vlan = &doc["test-bridge:bridge"]["vlan"][0];
        assert_eq!(vlan["vid"], YamlValue::Number(20u64.into()));
        assert_eq!(vlan["state"], YamlValue::String("forwarding".into()));

        // and the decoded document re-encodes to the same bytes
        let again = encode_yaml_to_cbor(&decoded, &tables, &EncodeOptions::default()).unwrap();
        assert_eq!(bytes, again);
    }
}
