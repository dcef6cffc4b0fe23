//! Schema tables driving the Delta-SID codec
//!
//! Two cross-referenced tables are built once at startup and shared read-only
//! by every encode/decode operation:
//!
//! - [`SidTree`]: path ↔ SID bijections (stripped and prefixed forms),
//!   identity and feature bijections, and per-node parent/delta records
//! - [`TypeTable`]: per-leaf YANG type info, typedefs, identities,
//!   choice/case names and declared child orders
//!
//! Both tables serialize to the versioned schema cache.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Schema Item Identifier (RFC 9254). Values fit in 32 bits in practice.
pub type Sid = u64;

/// Per data-node record derived from the merged SID tree.
///
/// `delta_sid` is `sid - parent` when a parent exists, else `sid` itself.
/// The parent of a path is the longest proper-prefix path present in the
/// tree, which may live in a different module under augmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub sid: Sid,
    pub parent: Option<Sid>,
    pub delta_sid: i64,
    pub depth: usize,
    pub prefixed_path: String,
}

/// The merged SID tree: one global instance per run, immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SidTree {
    /// Stripped path (`interfaces/interface/enabled`) → SID
    pub path_to_sid: HashMap<String, Sid>,
    /// SID → stripped path
    pub sid_to_path: HashMap<Sid, String>,
    /// Prefixed path (`ietf-interfaces:interfaces/interface`) → SID
    pub prefixed_path_to_sid: HashMap<String, Sid>,
    /// SID → prefixed path
    pub sid_to_prefixed_path: HashMap<Sid, String>,
    /// Stripped path → prefixed path
    pub path_to_prefixed: HashMap<String, String>,
    /// Identity name → SID, keyed by both `name` and `module:name`
    pub identity_to_sid: HashMap<String, Sid>,
    /// SID → `module:name` identity form
    pub sid_to_identity: HashMap<Sid, String>,
    /// Stripped path → node record (data nodes only)
    pub node_info: HashMap<String, NodeInfo>,
    /// Last path segment → all stripped paths ending in it, in insertion
    /// order. Drives fuzzy resolution when choice/case segments are omitted.
    pub leaf_to_paths: HashMap<String, Vec<String>>,
    /// Module name → module SID
    pub modules: HashMap<String, Sid>,
    /// Set once alias augmentation has run, so it is applied exactly once
    pub aliases_built: bool,
}

impl SidTree {
    /// Insert a data node under both path forms. A remapped path evicts its
    /// old SID's reverse entries to keep the data-node bijection intact.
    pub fn insert_data(&mut self, stripped: &str, prefixed: &str, sid: Sid) {
        if let Some(old) = self.path_to_sid.get(stripped).copied() {
            if old != sid {
                log::debug!(
                    "SID collision on '{}': {} replaced by {}",
                    stripped,
                    old,
                    sid
                );
                if self.sid_to_path.get(&old).map(String::as_str) == Some(stripped) {
                    self.sid_to_path.remove(&old);
                    self.sid_to_prefixed_path.remove(&old);
                }
            }
        }
        self.path_to_sid.insert(stripped.to_string(), sid);
        self.sid_to_path.insert(sid, stripped.to_string());
        self.prefixed_path_to_sid.insert(prefixed.to_string(), sid);
        self.sid_to_prefixed_path.insert(sid, prefixed.to_string());
        self.path_to_prefixed
            .insert(stripped.to_string(), prefixed.to_string());

        if let Some(leaf) = stripped.rsplit('/').next() {
            let paths = self.leaf_to_paths.entry(leaf.to_string()).or_default();
            if !paths.iter().any(|p| p == stripped) {
                paths.push(stripped.to_string());
            }
        }
    }

    /// Insert a synthetic (`identity:` / `feature:`) path. Forward maps only:
    /// the reverse maps and the leaf index stay bijective on data nodes.
    pub fn insert_synthetic(&mut self, stripped: &str, prefixed: &str, sid: Sid) {
        self.path_to_sid.insert(stripped.to_string(), sid);
        self.prefixed_path_to_sid.insert(prefixed.to_string(), sid);
        self.path_to_prefixed
            .insert(stripped.to_string(), prefixed.to_string());
    }

    /// Insert a choice/case-free alias for an existing data node. Forward
    /// maps only, so the canonical path keeps the reverse mapping.
    pub fn insert_alias(&mut self, stripped: &str, prefixed: &str, sid: Sid) {
        self.path_to_sid.insert(stripped.to_string(), sid);
        self.prefixed_path_to_sid.insert(prefixed.to_string(), sid);
        self.path_to_prefixed
            .insert(stripped.to_string(), prefixed.to_string());
    }

    /// Insert an identity under both bare and `module:name` keys.
    pub fn insert_identity(&mut self, module: &str, name: &str, sid: Sid) {
        let qualified = format!("{}:{}", module, name);
        self.identity_to_sid.insert(name.to_string(), sid);
        self.identity_to_sid.insert(qualified.clone(), sid);
        self.sid_to_identity.insert(sid, qualified);
    }

    /// Look up an identity SID by bare or `module:name` form.
    pub fn identity_sid(&self, name: &str) -> Option<Sid> {
        self.identity_to_sid.get(name).copied()
    }

    /// Merge `other` into `self`; entries from `other` win on collision.
    ///
    /// Data nodes (present in `other.sid_to_path`) go through
    /// [`SidTree::insert_data`] so the leaf index stays consistent; synthetic
    /// `identity:`/`feature:` entries are copied forward-only.
    pub fn merge(&mut self, other: SidTree) {
        // sorted so the leaf index (and with it fuzzy candidate order) is
        // identical on every build
        let mut data: Vec<(&String, &Sid)> = other
            .sid_to_path
            .iter()
            .map(|(sid, path)| (path, sid))
            .collect();
        data.sort();
        for (stripped, sid) in data {
            let prefixed = other
                .path_to_prefixed
                .get(stripped)
                .cloned()
                .unwrap_or_else(|| stripped.clone());
            self.insert_data(stripped, &prefixed, *sid);
        }
        for (stripped, sid) in &other.path_to_sid {
            if other.sid_to_path.get(sid).map(String::as_str) == Some(stripped.as_str()) {
                continue;
            }
            let prefixed = other
                .path_to_prefixed
                .get(stripped)
                .cloned()
                .unwrap_or_else(|| stripped.clone());
            self.insert_synthetic(stripped, &prefixed, *sid);
        }
        for (sid, qualified) in other.sid_to_identity {
            match qualified.split_once(':') {
                Some((module, name)) => self.insert_identity(module, name, sid),
                None => {
                    self.identity_to_sid.insert(qualified.clone(), sid);
                    self.sid_to_identity.insert(sid, qualified);
                }
            }
        }
        self.modules.extend(other.modules);
    }
}

/// Resolved YANG type of a leaf, after typedef chains are flattened.
///
/// Externally tagged on purpose: internal tagging buffers content during
/// deserialization, which cannot restore the integer-keyed enum bijection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum YangType {
    Boolean,
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Enumeration {
        name_to_value: HashMap<String, i64>,
        value_to_name: HashMap<i64, String>,
    },
    Identityref {
        /// Base identity, fully qualified as `module:identity`
        base: String,
    },
    Decimal64 {
        fraction_digits: u32,
    },
    Union {
        members: Vec<TypeInfo>,
    },
    Bits {
        /// Bit name → declared position
        positions: HashMap<String, u32>,
    },
    Binary,
    Empty,
    Leafref {
        target: String,
    },
    /// Unrecognized type statement; codec falls back to string encoding
    Unknown,
}

/// Type record attached to a leaf path or typedef.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub base: YangType,
    /// Name of the typedef this type was resolved through, if any. Used by
    /// the builder to rewrite leaves after vendor-prefix typedef merging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

impl TypeInfo {
    pub fn new(base: YangType) -> Self {
        Self {
            base,
            original: None,
        }
    }

    pub fn with_original(base: YangType, original: impl Into<String>) -> Self {
        Self {
            base,
            original: Some(original.into()),
        }
    }
}

/// Identity record: the set of (qualified) base identities it derives from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub module: String,
    pub bases: HashSet<String>,
}

/// Merged per-leaf type information and schema-shape metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeTable {
    /// Stripped leaf path → type info
    pub types: HashMap<String, TypeInfo>,
    /// Identity name (`module:name`) → identity record
    pub identities: HashMap<String, IdentityInfo>,
    /// Typedef name → resolved type info
    pub typedefs: HashMap<String, TypeInfo>,
    /// Names declared via `choice`
    pub choice_names: HashSet<String>,
    /// Names declared via `case`
    pub case_names: HashSet<String>,
    /// Node name → declared child ordering index, for deterministic emission
    pub node_orders: HashMap<String, usize>,
    /// Stripped paths of `list` nodes
    pub lists: HashSet<String>,
    /// Stripped list path → declared key leaf names, in order
    pub list_keys: HashMap<String, Vec<String>>,
    /// Typedefs whose enum bijections were unioned with a vendor variant
    pub merged_typedefs: HashSet<String>,
}

impl TypeTable {
    /// Merge `other` into `self`; entries from `other` win on collision.
    pub fn merge(&mut self, other: TypeTable) {
        self.types.extend(other.types);
        self.identities.extend(other.identities);
        self.typedefs.extend(other.typedefs);
        self.choice_names.extend(other.choice_names);
        self.case_names.extend(other.case_names);
        self.lists.extend(other.lists);
        self.list_keys.extend(other.list_keys);
        self.merged_typedefs.extend(other.merged_typedefs);
        for (name, order) in other.node_orders {
            self.node_orders.entry(name).or_insert(order);
        }
    }

    /// Whether the node at `stripped` path is a YANG list.
    pub fn is_list(&self, stripped: &str) -> bool {
        self.lists.contains(stripped)
    }
}

/// The immutable pair every codec operation runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaTables {
    pub sid: SidTree,
    pub types: TypeTable,
}

impl SchemaTables {
    /// Type info for a stripped path, if the leaf is typed.
    pub fn type_of(&self, stripped: &str) -> Option<&TypeInfo> {
        self.types.types.get(stripped)
    }

    /// Node record for a stripped path.
    pub fn node(&self, stripped: &str) -> Option<&NodeInfo> {
        self.sid.node_info.get(stripped)
    }

    /// Node record by SID.
    pub fn node_by_sid(&self, sid: Sid) -> Option<&NodeInfo> {
        self.sid
            .sid_to_path
            .get(&sid)
            .and_then(|p| self.sid.node_info.get(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_data_populates_all_maps() {
        let mut tree = SidTree::default();
        tree.insert_data(
            "interfaces/interface",
            "ietf-interfaces:interfaces/interface",
            2034,
        );

        assert_eq!(tree.path_to_sid["interfaces/interface"], 2034);
        assert_eq!(tree.sid_to_path[&2034], "interfaces/interface");
        assert_eq!(
            tree.prefixed_path_to_sid["ietf-interfaces:interfaces/interface"],
            2034
        );
        assert_eq!(
            tree.leaf_to_paths["interface"],
            vec!["interfaces/interface".to_string()]
        );
    }

    #[test]
    fn test_identity_keyed_both_ways() {
        let mut tree = SidTree::default();
        tree.insert_identity("iana-if-type", "ethernetCsmacd", 1880);

        assert_eq!(tree.identity_sid("ethernetCsmacd"), Some(1880));
        assert_eq!(tree.identity_sid("iana-if-type:ethernetCsmacd"), Some(1880));
        assert_eq!(tree.sid_to_identity[&1880], "iana-if-type:ethernetCsmacd");
    }

    #[test]
    fn test_merge_later_wins() {
        let mut a = SidTree::default();
        a.insert_data("system/hostname", "sys:system/hostname", 100);

        let mut b = SidTree::default();
        b.insert_data("system/hostname", "sys:system/hostname", 200);

        a.merge(b);
        assert_eq!(a.path_to_sid["system/hostname"], 200);
        // leaf index not duplicated
        assert_eq!(a.leaf_to_paths["hostname"].len(), 1);
    }

    #[test]
    fn test_tables_roundtrip_through_json() {
        let mut tables = SchemaTables::default();
        tables
            .sid
            .insert_data("a/b", "m:a/b", 103);
        tables.types.types.insert(
            "a/b".into(),
            TypeInfo::new(YangType::Decimal64 { fraction_digits: 2 }),
        );

        let json = serde_json::to_string(&tables).unwrap();
        let back: SchemaTables = serde_json::from_str(&json).unwrap();
        assert_eq!(tables, back);
    }
}
