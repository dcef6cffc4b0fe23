//! Delta-SID encoder
//!
//! Turns a list of `(instance-id, value)` entries into the nested CBOR map
//! the device accepts. Each segment is resolved to an absolute SID with the
//! walk's context pushed as it descends; at emission time a child key is
//! written as `child - parent` only when the schema says the child's true
//! parent is that node, otherwise the absolute SID is kept. That preserves
//! round-tripping under augmentation, where a child's real parent lives in
//! a different module.
//!
//! The encoder is deterministic: identical input yields identical bytes.

use std::collections::BTreeMap;

use ciborium::Value as CborValue;
use serde_yaml::Value as YamlValue;

use crate::error::{Error, Result};
use crate::instance_id::Segment;
use crate::resolver::resolve_to_path;
use crate::schema::{SchemaTables, Sid, TypeInfo, YangType};
use crate::value_codec::encode_value;

/// Map key ordering of the emitted CBOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Declared child order from the YANG modules, the order the device
    /// firmware emits itself; unknown names fall back to ascending SID.
    #[default]
    Velocity,
    /// RFC 8949 canonical order (length-first bytewise on encoded keys).
    Rfc8949,
}

/// One encode input: parsed instance-identifier plus its scalar value.
pub type Entry = (Vec<Segment>, YamlValue);

// =============================================================================
// Tree construction
// =============================================================================

#[derive(Debug)]
enum Slot {
    Interior { children: BTreeMap<Sid, Slot> },
    List { entries: Vec<ListEntry> },
    Leaf(CborValue),
}

#[derive(Debug)]
struct ListEntry {
    predicates: Vec<(String, String)>,
    children: BTreeMap<Sid, Slot>,
}

/// Encode entries into a single CBOR value (a nested map).
pub fn encode_entries(
    entries: &[Entry],
    tables: &SchemaTables,
    sort_mode: SortMode,
) -> Result<CborValue> {
    let mut root: BTreeMap<Sid, Slot> = BTreeMap::new();
    for (segments, value) in entries {
        insert_entry(&mut root, segments, value, tables)?;
    }
    Ok(emit_children(&root, None, tables, sort_mode))
}

/// Encode entries straight to bytes.
pub fn encode_to_bytes(
    entries: &[Entry],
    tables: &SchemaTables,
    sort_mode: SortMode,
) -> Result<Vec<u8>> {
    let value = encode_entries(entries, tables, sort_mode)?;
    cbor_to_bytes(&value)
}

fn insert_entry(
    root: &mut BTreeMap<Sid, Slot>,
    segments: &[Segment],
    value: &YamlValue,
    tables: &SchemaTables,
) -> Result<()> {
    let mut current = root;
    let mut context: Option<String> = None;

    for (index, segment) in segments.iter().enumerate() {
        let (sid, canonical) =
            resolve_to_path(tables, std::slice::from_ref(segment), context.as_deref())?;
        let canonical = canonical.to_string();
        let last = index + 1 == segments.len();

        if tables.types.is_list(&canonical) {
            let slot = current
                .entry(sid)
                .or_insert_with(|| Slot::List { entries: Vec::new() });
            let Slot::List { entries } = slot else {
                return Err(structure_error(&canonical));
            };

            if segment.predicates.is_empty() {
                if last {
                    // a bare list path: an empty list is emitted as an
                    // empty sequence, never omitted
                    if value.is_null() {
                        return Ok(());
                    }
                    return Err(structure_error(&canonical));
                }
                return Err(Error::instance_id(
                    display(segments),
                    format!("list '{}' requires key predicates", segment.name),
                ));
            }

            let position = entries
                .iter()
                .position(|entry| entry.predicates == segment.predicates);
            let position = match position {
                Some(position) => position,
                None => {
                    entries.push(new_list_entry(segment, &canonical, tables)?);
                    entries.len() - 1
                }
            };

            if last {
                if value.is_null() {
                    return Ok(());
                }
                return Err(structure_error(&canonical));
            }
            current = &mut entries[position].children;
        } else if last {
            let slot = build_leaf_slot(value, &canonical, tables)?;
            current.insert(sid, slot);
            return Ok(());
        } else {
            let slot = current.entry(sid).or_insert_with(|| Slot::Interior {
                children: BTreeMap::new(),
            });
            let Slot::Interior { children } = slot else {
                return Err(structure_error(&canonical));
            };
            current = children;
        }

        context = Some(canonical);
    }

    Ok(())
}

/// Create a list entry, materializing each key predicate as its own leaf so
/// keys appear as Delta-SID entries inside the element map.
fn new_list_entry(
    segment: &Segment,
    list_path: &str,
    tables: &SchemaTables,
) -> Result<ListEntry> {
    let mut children = BTreeMap::new();

    let declared = tables.types.list_keys.get(list_path);
    let key_order: Vec<&str> = match declared {
        Some(keys) => keys.iter().map(String::as_str).collect(),
        None => segment.predicates.iter().map(|(k, _)| k.as_str()).collect(),
    };

    for key in key_order {
        let Some(raw) = segment.predicate(key) else {
            continue;
        };
        let key_path = format!("{}/{}", list_path, key);
        let Some(key_sid) = tables.sid.path_to_sid.get(&key_path) else {
            return Err(Error::PathUnresolved(key_path));
        };
        let encoded = encode_key_value(raw, &key_path, tables)?;
        children.insert(*key_sid, Slot::Leaf(encoded));
    }

    Ok(ListEntry {
        predicates: segment.predicates.clone(),
        children,
    })
}

fn build_leaf_slot(value: &YamlValue, canonical: &str, tables: &SchemaTables) -> Result<Slot> {
    match tables.type_of(canonical) {
        // leaf-list: a sequence of scalars under one typed path
        Some(info) => {
            if let YamlValue::Sequence(items) = value {
                if !matches!(info.base, YangType::Bits { .. }) {
                    let encoded: Result<Vec<CborValue>> = items
                        .iter()
                        .map(|item| encode_value(item, info, tables, canonical))
                        .collect();
                    return Ok(Slot::Leaf(CborValue::Array(encoded?)));
                }
            }
            Ok(Slot::Leaf(encode_value(value, info, tables, canonical)?))
        }
        None if value.is_null() => Ok(Slot::Interior {
            children: BTreeMap::new(),
        }),
        None => {
            let info = TypeInfo::new(YangType::Unknown);
            Ok(Slot::Leaf(encode_value(value, &info, tables, canonical)?))
        }
    }
}

/// Key predicate values arrive as quoted strings; encode them under the key
/// leaf's declared type so e.g. a numeric key becomes a CBOR integer.
fn encode_key_value(raw: &str, key_path: &str, tables: &SchemaTables) -> Result<CborValue> {
    let info = tables
        .type_of(key_path)
        .cloned()
        .unwrap_or_else(|| TypeInfo::new(YangType::String));
    let yaml = match &info.base {
        YangType::String | YangType::Unknown => YamlValue::String(raw.to_string()),
        _ => serde_yaml::from_str(raw).unwrap_or_else(|_| YamlValue::String(raw.to_string())),
    };
    encode_value(&yaml, &info, tables, key_path)
}

// =============================================================================
// Emission
// =============================================================================

fn emit_children(
    children: &BTreeMap<Sid, Slot>,
    parent: Option<Sid>,
    tables: &SchemaTables,
    sort_mode: SortMode,
) -> CborValue {
    let mut pairs: Vec<(Sid, CborValue, CborValue)> = children
        .iter()
        .map(|(sid, slot)| {
            let key = delta_key(*sid, parent, tables);
            let value = match slot {
                Slot::Leaf(value) => value.clone(),
                Slot::Interior { children } => {
                    emit_children(children, Some(*sid), tables, sort_mode)
                }
                Slot::List { entries } => CborValue::Array(
                    entries
                        .iter()
                        .map(|entry| {
                            emit_children(&entry.children, Some(*sid), tables, sort_mode)
                        })
                        .collect(),
                ),
            };
            (*sid, key, value)
        })
        .collect();

    match sort_mode {
        SortMode::Velocity => {
            pairs.sort_by_key(|(sid, _, _)| (declared_order(*sid, tables), *sid));
        }
        SortMode::Rfc8949 => {
            pairs.sort_by_cached_key(|(_, key, _)| {
                let bytes = cbor_to_bytes(key).unwrap_or_default();
                (bytes.len(), bytes)
            });
        }
    }

    CborValue::Map(
        pairs
            .into_iter()
            .map(|(_, key, value)| (key, value))
            .collect(),
    )
}

/// Delta-SID key iff the schema parent of this node is `parent`; the
/// absolute SID otherwise (augmented children keep their absolute form).
fn delta_key(sid: Sid, parent: Option<Sid>, tables: &SchemaTables) -> CborValue {
    if let Some(parent) = parent {
        if let Some(info) = tables.node_by_sid(sid) {
            if info.parent == Some(parent) {
                return CborValue::Integer((sid as i64 - parent as i64).into());
            }
        }
    }
    CborValue::Integer(sid.into())
}

fn declared_order(sid: Sid, tables: &SchemaTables) -> usize {
    tables
        .sid
        .sid_to_path
        .get(&sid)
        .and_then(|path| path.rsplit('/').next())
        .and_then(|name| tables.types.node_orders.get(name))
        .copied()
        .unwrap_or(usize::MAX)
}

pub(crate) fn cbor_to_bytes(value: &CborValue) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| Error::Cbor(e.to_string()))?;
    Ok(bytes)
}

fn structure_error(path: &str) -> Error {
    Error::ValueType {
        path: path.to_string(),
        expected: "structural node".to_string(),
        value: "scalar".to_string(),
    }
}

fn display(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| format!("/{}", s.prefixed()))
        .collect()
}

// =============================================================================
// SID-array query form
// =============================================================================

/// One query for the device's fetch verb: a plain SID for a leaf or
/// container, or `[listSid, key1, key2, ...]` selecting one list entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SidQuery {
    Node(Sid),
    ListEntry(Sid, Vec<CborValue>),
}

impl SidQuery {
    pub fn to_cbor(&self) -> CborValue {
        match self {
            SidQuery::Node(sid) => CborValue::Integer((*sid).into()),
            SidQuery::ListEntry(sid, keys) => {
                let mut items = vec![CborValue::Integer((*sid).into())];
                items.extend(keys.iter().cloned());
                CborValue::Array(items)
            }
        }
    }
}

/// Build the query for each instance-id.
pub fn sid_queries(entries: &[Vec<Segment>], tables: &SchemaTables) -> Result<Vec<SidQuery>> {
    entries
        .iter()
        .map(|segments| sid_query(segments, tables))
        .collect()
}

fn sid_query(segments: &[Segment], tables: &SchemaTables) -> Result<SidQuery> {
    let mut context: Option<String> = None;
    let mut resolved: Option<(Sid, String)> = None;

    for segment in segments {
        let (sid, canonical) =
            resolve_to_path(tables, std::slice::from_ref(segment), context.as_deref())?;
        let canonical = canonical.to_string();
        context = Some(canonical.clone());
        resolved = Some((sid, canonical));
    }

    let (sid, canonical) = resolved.ok_or_else(|| Error::PathUnresolved(String::new()))?;
    let last = segments.last().expect("non-empty path");

    if last.predicates.is_empty() {
        return Ok(SidQuery::Node(sid));
    }

    // list entry selection: key values in declared order
    let key_order = tables
        .types
        .list_keys
        .get(&canonical)
        .cloned()
        .unwrap_or_else(|| last.predicates.iter().map(|(k, _)| k.clone()).collect());

    let mut keys = Vec::new();
    for key in &key_order {
        let Some(raw) = last.predicate(key) else {
            continue;
        };
        let key_path = format!("{}/{}", canonical, key);
        keys.push(encode_key_value(raw, &key_path, tables)?);
    }
    Ok(SidQuery::ListEntry(sid, keys))
}

/// Serialize queries as the device expects: one bare item, or a CBOR
/// sequence (back-to-back encoded items) when several are present.
pub fn queries_to_bytes(queries: &[SidQuery]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for query in queries {
        bytes.extend(cbor_to_bytes(&query.to_cbor())?);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_id::parse_instance_id;
    use crate::schema::{NodeInfo, TypeInfo, YangType};

    /// ietf-interfaces-like fixture matching the wire examples in the tests.
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
            ("a", "m:a", 100, None),
            ("a/b", "m:a/b", 103, Some(100)),
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
        tables
            .types
            .types
            .insert("a/b".into(), TypeInfo::new(YangType::Empty));
        for (name, order) in [("name", 0usize), ("enabled", 2)] {
            tables.types.node_orders.insert(name.into(), order);
        }
        tables
    }

    fn entry(path: &str, value: YamlValue) -> Entry {
        (parse_instance_id(path).unwrap(), value)
    }

    fn map_get<'a>(map: &'a CborValue, key: i64) -> &'a CborValue {
        let CborValue::Map(pairs) = map else {
            panic!("expected map, got {:?}", map);
        };
        pairs
            .iter()
            .find(|(k, _)| *k == CborValue::Integer(key.into()))
            .map(|(_, v)| v)
            .unwrap_or_else(|| panic!("key {} missing in {:?}", key, map))
    }

    #[test]
    fn test_list_entry_with_delta_keys() {
        let tables = tables();
        let entries = vec![entry(
            "/ietf-interfaces:interfaces/interface[name='1']/enabled",
            YamlValue::Bool(true),
        )];

        let encoded = encode_entries(&entries, &tables, SortMode::Velocity).unwrap();

        // {2033: {1: [{1: "1", 2: true}]}}
        let interfaces = map_get(&encoded, 2033);
        let CborValue::Array(list) = map_get(interfaces, 1) else {
            panic!("expected list array");
        };
        assert_eq!(list.len(), 1);
        assert_eq!(map_get(&list[0], 1), &CborValue::Text("1".into()));
        assert_eq!(map_get(&list[0], 2), &CborValue::Bool(true));
    }

    #[test]
    fn test_null_leaf_under_container() {
        let tables = tables();
        let entries = vec![entry("/m:a/m:b", YamlValue::Null)];

        let encoded = encode_entries(&entries, &tables, SortMode::Velocity).unwrap();

        // {100: {3: null}}
        let a = map_get(&encoded, 100);
        assert_eq!(map_get(a, 3), &CborValue::Null);
    }

    #[test]
    fn test_empty_list_is_emitted() {
        let tables = tables();
        let entries = vec![entry(
            "/ietf-interfaces:interfaces/interface",
            YamlValue::Null,
        )];

        let encoded = encode_entries(&entries, &tables, SortMode::Velocity).unwrap();
        let interfaces = map_get(&encoded, 2033);
        assert_eq!(map_get(interfaces, 1), &CborValue::Array(Vec::new()));
    }

    #[test]
    fn test_shared_list_entry_merges() {
        let tables = tables();
        let entries = vec![
            entry(
                "/interfaces/interface[name='1']/enabled",
                YamlValue::Bool(false),
            ),
            entry(
                "/interfaces/interface[name='2']/enabled",
                YamlValue::Bool(true),
            ),
        ];

        let encoded = encode_entries(&entries, &tables, SortMode::Velocity).unwrap();
        let interfaces = map_get(&encoded, 2033);
        let CborValue::Array(list) = map_get(interfaces, 1) else {
            panic!("expected array");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(map_get(&list[0], 1), &CborValue::Text("1".into()));
        assert_eq!(map_get(&list[1], 1), &CborValue::Text("2".into()));
    }

    #[test]
    fn test_encoder_is_deterministic() {
        let tables = tables();
        let entries = vec![
            entry(
                "/interfaces/interface[name='1']/enabled",
                YamlValue::Bool(true),
            ),
            entry("/m:a/m:b", YamlValue::Null),
        ];

        let a = encode_to_bytes(&entries, &tables, SortMode::Velocity).unwrap();
        let b = encode_to_bytes(&entries, &tables, SortMode::Velocity).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rfc8949_sort_orders_by_encoded_key() {
        let tables = tables();
        let entries = vec![
            entry("/m:a/m:b", YamlValue::Null),
            entry(
                "/interfaces/interface[name='1']/enabled",
                YamlValue::Bool(true),
            ),
        ];

        let encoded = encode_entries(&entries, &tables, SortMode::Rfc8949).unwrap();
        let CborValue::Map(pairs) = &encoded else {
            panic!("expected map");
        };
        // 100 encodes shorter than 2033, so it sorts first
        assert_eq!(pairs[0].0, CborValue::Integer(100.into()));
        assert_eq!(pairs[1].0, CborValue::Integer(2033.into()));
    }

    #[test]
    fn test_missing_predicates_on_interior_list() {
        let tables = tables();
        let entries = vec![entry(
            "/interfaces/interface/enabled",
            YamlValue::Bool(true),
        )];

        let err = encode_entries(&entries, &tables, SortMode::Velocity).unwrap_err();
        assert!(matches!(err, Error::InstanceIdParse { .. }));
    }

    #[test]
    fn test_sid_queries_leaf_and_list() {
        let tables = tables();

        let leaf = parse_instance_id("/m:a/m:b").unwrap();
        let list = parse_instance_id("/interfaces/interface[name='sw0']").unwrap();
        let queries = sid_queries(&[leaf, list], &tables).unwrap();

        assert_eq!(queries[0], SidQuery::Node(103));
        assert_eq!(
            queries[1],
            SidQuery::ListEntry(2034, vec![CborValue::Text("sw0".into())])
        );

        // two queries → a CBOR sequence of two items
        let bytes = queries_to_bytes(&queries).unwrap();
        let leaf_alone = queries_to_bytes(&queries[..1]).unwrap();
        assert!(bytes.len() > leaf_alone.len());
    }
}
