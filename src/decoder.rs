//! Delta-SID decoder
//!
//! Expands a nested CBOR map from the device back into a hierarchical YAML
//! document. Map keys are tried as Delta-SIDs first: `key + parent` is
//! accepted when the schema confirms that node's parent really is `parent`;
//! otherwise the key must be an absolute SID of a known node (the
//! augmentation case). A key that resolves both ways is taken as a delta.
//!
//! The decoder is stateless across calls and total for well-formed input.

use ciborium::Value as CborValue;
use serde_yaml::{Mapping, Value as YamlValue};

use crate::error::{Error, Result};
use crate::schema::{SchemaTables, Sid, TypeInfo, YangType};
use crate::value_codec::{cbor_i128, decode_value, display_cbor};

/// Module prefix placement in the reconstructed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// RFC 7951 style: `module:node` only where the module changes.
    #[default]
    Rfc7951,
    /// Every node name carries its module prefix.
    FullyPrefixed,
}

/// Decode CBOR bytes into a YAML document value.
pub fn decode_bytes(
    bytes: &[u8],
    tables: &SchemaTables,
    format: OutputFormat,
) -> Result<YamlValue> {
    let value: CborValue =
        ciborium::from_reader(bytes).map_err(|e| Error::Cbor(e.to_string()))?;
    decode_tree(&value, tables, format)
}

/// Decode a parsed CBOR value. The root map's keys must be absolute SIDs.
pub fn decode_tree(
    value: &CborValue,
    tables: &SchemaTables,
    format: OutputFormat,
) -> Result<YamlValue> {
    let CborValue::Map(pairs) = value else {
        return Err(Error::Cbor("payload root is not a map".to_string()));
    };

    let mut out = Mapping::new();
    for (key, child) in pairs {
        let raw = cbor_i128(key).ok_or_else(|| Error::Cbor("non-integer map key".to_string()))?;
        let sid = resolve_key(raw, None, tables)?;
        insert_node(&mut out, sid, child, None, tables, format)?;
    }
    Ok(YamlValue::Mapping(out))
}

/// Resolve a map key below `parent` to an absolute SID.
fn resolve_key(key: i128, parent: Option<Sid>, tables: &SchemaTables) -> Result<Sid> {
    if let Some(parent) = parent {
        // delta interpretation wins when both readings are possible
        let candidate = parent as i128 + key;
        if candidate >= 0 {
            let candidate = candidate as u64;
            if tables
                .node_by_sid(candidate)
                .is_some_and(|info| info.parent == Some(parent))
            {
                return Ok(candidate);
            }
        }
    }

    if key >= 0 {
        let absolute = key as u64;
        if tables.sid.sid_to_path.contains_key(&absolute) {
            return Ok(absolute);
        }
    }

    Err(Error::DeltaResolve {
        key: key as i64,
        parent: parent.unwrap_or(0),
    })
}

fn insert_node(
    out: &mut Mapping,
    sid: Sid,
    value: &CborValue,
    parent_module: Option<&str>,
    tables: &SchemaTables,
    format: OutputFormat,
) -> Result<()> {
    let path = tables
        .sid
        .sid_to_path
        .get(&sid)
        .ok_or(Error::DeltaResolve {
            key: sid as i64,
            parent: 0,
        })?
        .clone();
    let prefixed = tables
        .sid
        .sid_to_prefixed_path
        .get(&sid)
        .map(String::as_str)
        .unwrap_or(path.as_str());
    let (module, name) = module_and_name(prefixed);

    let label = match format {
        OutputFormat::FullyPrefixed => match module {
            Some(module) => format!("{}:{}", module, name),
            None => name.to_string(),
        },
        OutputFormat::Rfc7951 => {
            if module.is_some() && module != parent_module {
                format!("{}:{}", module.unwrap_or_default(), name)
            } else {
                name.to_string()
            }
        }
    };

    let decoded = decode_node_value(sid, &path, value, module, tables, format)?;
    out.insert(YamlValue::String(label), decoded);
    Ok(())
}

fn decode_node_value(
    sid: Sid,
    path: &str,
    value: &CborValue,
    module: Option<&str>,
    tables: &SchemaTables,
    format: OutputFormat,
) -> Result<YamlValue> {
    // leaf-list: a typed node carrying an array of scalars
    if let Some(info) = tables.type_of(path) {
        if let CborValue::Array(items) = value {
            let decoded: Result<Vec<YamlValue>> = items
                .iter()
                .map(|item| decode_value(item, info, tables, path))
                .collect();
            return Ok(YamlValue::Sequence(decoded?));
        }
        if !matches!(value, CborValue::Map(_)) {
            return decode_value(value, info, tables, path);
        }
    }

    match value {
        CborValue::Array(items) if tables.types.is_list(path) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let CborValue::Map(pairs) = item else {
                    return Err(Error::Cbor(format!(
                        "list entry under '{}' is not a map",
                        path
                    )));
                };
                entries.push(decode_entry_map(pairs, sid, module, tables, format)?);
            }
            Ok(YamlValue::Sequence(entries))
        }
        CborValue::Map(pairs) => decode_entry_map(pairs, sid, module, tables, format),
        other => {
            log::warn!(
                "untyped scalar {} at '{}'; passing through",
                display_cbor(other),
                path
            );
            let info = TypeInfo::new(YangType::Unknown);
            decode_value(other, &info, tables, path)
        }
    }
}

fn decode_entry_map(
    pairs: &[(CborValue, CborValue)],
    parent: Sid,
    parent_module: Option<&str>,
    tables: &SchemaTables,
    format: OutputFormat,
) -> Result<YamlValue> {
    let mut out = Mapping::new();
    for (key, child) in pairs {
        let raw = cbor_i128(key).ok_or_else(|| Error::Cbor("non-integer map key".to_string()))?;
        let sid = resolve_key(raw, Some(parent), tables)?;
        insert_node(&mut out, sid, child, parent_module, tables, format)?;
    }
    Ok(YamlValue::Mapping(out))
}

/// Module and bare name of the last segment of a prefixed path. The module
/// in effect is the last prefix seen walking left to right, mirroring how
/// SID files spell identifiers (prefix only at module boundaries).
fn module_and_name(prefixed: &str) -> (Option<&str>, &str) {
    let mut module = None;
    let mut name = prefixed;
    for segment in prefixed.split('/') {
        match segment.split_once(':') {
            Some((prefix, bare)) => {
                module = Some(prefix);
                name = bare;
            }
            None => name = segment,
        }
    }
    (module, name)
}
