//! Scalar value codec
//!
//! Encodes and decodes one scalar according to its resolved YANG type,
//! following RFC 9254: enumerations become their integer values,
//! identityrefs become identity SIDs, decimal64 becomes a tag-4 decimal
//! fraction, unions carry tag 44 (identityref) or tag 45 (enumeration) for
//! member disambiguation, `binary` is a byte string carried as base64 text
//! on the YAML side, and `empty` is the CBOR null marker.
//!
//! Unknown types fall back to string encoding with a warning; that is the
//! only recovery the codec performs.

use base64::Engine;
use ciborium::Value as CborValue;
use serde_yaml::Value as YamlValue;

use crate::error::{Error, Result};
use crate::schema::{SchemaTables, TypeInfo, YangType};

/// CBOR tag for a decimal fraction (RFC 8949 §3.4.4).
pub const TAG_DECIMAL_FRACTION: u64 = 4;
/// CBOR tag marking an identityref SID inside a union (RFC 9254).
pub const TAG_UNION_IDENTITYREF: u64 = 44;
/// CBOR tag marking an enumeration value inside a union (RFC 9254).
pub const TAG_UNION_ENUM: u64 = 45;

// =============================================================================
// Encoding
// =============================================================================

/// Encode one scalar for the leaf at `path` according to `info`.
pub fn encode_value(
    value: &YamlValue,
    info: &TypeInfo,
    tables: &SchemaTables,
    path: &str,
) -> Result<CborValue> {
    match &info.base {
        YangType::Boolean => match value {
            YamlValue::Bool(b) => Ok(CborValue::Bool(*b)),
            _ => Err(type_error(path, "boolean", value)),
        },
        YangType::String => match scalar_to_string(value) {
            Some(s) => Ok(CborValue::Text(s)),
            None => Err(type_error(path, "string", value)),
        },
        YangType::Int8 | YangType::Int16 | YangType::Int32 | YangType::Int64 => {
            match yaml_i64(value) {
                Some(n) => Ok(CborValue::Integer(n.into())),
                None => Err(type_error(path, "integer", value)),
            }
        }
        YangType::Uint8 | YangType::Uint16 | YangType::Uint32 | YangType::Uint64 => {
            match yaml_u64(value) {
                Some(n) => Ok(CborValue::Integer(n.into())),
                None => Err(type_error(path, "unsigned integer", value)),
            }
        }
        YangType::Enumeration {
            name_to_value,
            value_to_name,
        } => {
            if let Some(name) = value.as_str() {
                return match name_to_value.get(name) {
                    Some(n) => Ok(CborValue::Integer((*n).into())),
                    None => Err(Error::EnumUnknown {
                        path: path.to_string(),
                        value: name.to_string(),
                    }),
                };
            }
            // already-numeric spellings pass through when they are members
            if let Some(n) = yaml_i64(value) {
                if value_to_name.contains_key(&n) {
                    return Ok(CborValue::Integer(n.into()));
                }
            }
            Err(Error::EnumUnknown {
                path: path.to_string(),
                value: display_yaml(value),
            })
        }
        YangType::Identityref { .. } => match value.as_str() {
            Some(name) => match tables.sid.identity_sid(name) {
                Some(sid) => Ok(CborValue::Integer(sid.into())),
                None => Err(Error::IdentityUnknown(name.to_string())),
            },
            None => Err(type_error(path, "identityref", value)),
        },
        YangType::Decimal64 { fraction_digits } => {
            encode_decimal64(value, *fraction_digits, path)
        }
        YangType::Union { members } => encode_union(value, members, tables, path),
        YangType::Bits { positions } => encode_bits(value, positions, path),
        YangType::Binary => match value.as_str() {
            Some(b64) => base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map(CborValue::Bytes)
                .map_err(|_| type_error(path, "base64 binary", value)),
            None => Err(type_error(path, "base64 binary", value)),
        },
        YangType::Empty => match value {
            YamlValue::Null => Ok(CborValue::Null),
            _ => Err(type_error(path, "empty", value)),
        },
        // leafref targets share the referenced leaf's lexical space; the
        // scalar shape already tells us how to carry it
        YangType::Leafref { .. } => Ok(passthrough_encode(value)),
        YangType::Unknown => {
            log::warn!("unknown type for '{}'; encoding as string", path);
            match scalar_to_string(value) {
                Some(s) => Ok(CborValue::Text(s)),
                None => Err(type_error(path, "scalar", value)),
            }
        }
    }
}

fn encode_decimal64(value: &YamlValue, fraction_digits: u32, path: &str) -> Result<CborValue> {
    let float = match value {
        YamlValue::Number(n) => n.as_f64(),
        YamlValue::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| type_error(path, "decimal64", value))?;

    let scale = 10f64.powi(fraction_digits as i32);
    let mantissa = (float * scale).round() as i64;
    Ok(CborValue::Tag(
        TAG_DECIMAL_FRACTION,
        Box::new(CborValue::Array(vec![
            CborValue::Integer((-(fraction_digits as i64)).into()),
            CborValue::Integer(mantissa.into()),
        ])),
    ))
}

/// Try each member in declared order; the first that accepts the value
/// wins. Enumeration and identityref members are tagged so the peer can
/// decode without re-running the cascade.
fn encode_union(
    value: &YamlValue,
    members: &[TypeInfo],
    tables: &SchemaTables,
    path: &str,
) -> Result<CborValue> {
    for member in members {
        match encode_value(value, member, tables, path) {
            Ok(encoded) => {
                return Ok(match member.base {
                    YangType::Enumeration { .. } => {
                        CborValue::Tag(TAG_UNION_ENUM, Box::new(encoded))
                    }
                    YangType::Identityref { .. } => {
                        CborValue::Tag(TAG_UNION_IDENTITYREF, Box::new(encoded))
                    }
                    _ => encoded,
                });
            }
            Err(_) => continue,
        }
    }
    Err(type_error(path, "union", value))
}

fn encode_bits(
    value: &YamlValue,
    positions: &std::collections::HashMap<String, u32>,
    path: &str,
) -> Result<CborValue> {
    let names: Vec<String> = match value {
        YamlValue::Sequence(seq) => seq
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| type_error(path, "bit name", v))
            })
            .collect::<Result<_>>()?,
        YamlValue::String(s) => s.split_whitespace().map(str::to_string).collect(),
        _ => return Err(type_error(path, "bits", value)),
    };

    let mut bytes = Vec::new();
    for name in &names {
        let Some(position) = positions.get(name) else {
            return Err(type_error(path, "declared bit", &YamlValue::String(name.clone())));
        };
        let byte = (*position / 8) as usize;
        if bytes.len() <= byte {
            bytes.resize(byte + 1, 0u8);
        }
        bytes[byte] |= 1 << (position % 8);
    }
    Ok(CborValue::Bytes(bytes))
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one scalar for the leaf at `path` according to `info`.
pub fn decode_value(
    value: &CborValue,
    info: &TypeInfo,
    tables: &SchemaTables,
    path: &str,
) -> Result<YamlValue> {
    match &info.base {
        YangType::Boolean => match value {
            CborValue::Bool(b) => Ok(YamlValue::Bool(*b)),
            _ => Err(cbor_type_error(path, "boolean", value)),
        },
        YangType::String => match value {
            CborValue::Text(s) => Ok(YamlValue::String(s.clone())),
            _ => Err(cbor_type_error(path, "text", value)),
        },
        YangType::Int8 | YangType::Int16 | YangType::Int32 | YangType::Int64 => {
            match cbor_i128(value) {
                Some(n) => Ok(yaml_number_i64(n as i64)),
                None => Err(cbor_type_error(path, "integer", value)),
            }
        }
        YangType::Uint8 | YangType::Uint16 | YangType::Uint32 | YangType::Uint64 => {
            match cbor_i128(value) {
                Some(n) if n >= 0 => Ok(YamlValue::Number((n as u64).into())),
                _ => Err(cbor_type_error(path, "unsigned integer", value)),
            }
        }
        YangType::Enumeration { value_to_name, .. } => match cbor_i128(value) {
            Some(n) => match value_to_name.get(&(n as i64)) {
                Some(name) => Ok(YamlValue::String(name.clone())),
                None => Err(Error::EnumUnknown {
                    path: path.to_string(),
                    value: n.to_string(),
                }),
            },
            None => Err(cbor_type_error(path, "enum value", value)),
        },
        YangType::Identityref { .. } => match cbor_i128(value) {
            Some(n) if n >= 0 => match tables.sid.sid_to_identity.get(&(n as u64)) {
                Some(name) => Ok(YamlValue::String(name.clone())),
                None => Err(Error::IdentityUnknown(n.to_string())),
            },
            _ => Err(cbor_type_error(path, "identity SID", value)),
        },
        YangType::Decimal64 { .. } => decode_decimal64(value, path),
        YangType::Union { members } => decode_union(value, members, tables, path),
        YangType::Bits { positions } => decode_bits(value, positions, path),
        YangType::Binary => match value {
            CborValue::Bytes(bytes) => Ok(YamlValue::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            )),
            _ => Err(cbor_type_error(path, "byte string", value)),
        },
        YangType::Empty => match value {
            CborValue::Null => Ok(YamlValue::Null),
            _ => Err(cbor_type_error(path, "null", value)),
        },
        YangType::Leafref { .. } => Ok(passthrough_decode(value)),
        YangType::Unknown => Ok(passthrough_decode(value)),
    }
}

fn decode_decimal64(value: &CborValue, path: &str) -> Result<YamlValue> {
    match value {
        CborValue::Tag(TAG_DECIMAL_FRACTION, inner) => {
            let CborValue::Array(parts) = inner.as_ref() else {
                return Err(cbor_type_error(path, "decimal fraction array", value));
            };
            let (Some(exponent), Some(mantissa)) = (
                parts.first().and_then(cbor_i128),
                parts.get(1).and_then(cbor_i128),
            ) else {
                return Err(cbor_type_error(path, "decimal fraction pair", value));
            };
            if exponent >= 0 {
                let scaled = (mantissa as i64).saturating_mul(10i64.saturating_pow(exponent as u32));
                return Ok(yaml_number_i64(scaled));
            }
            let float = mantissa as f64 * 10f64.powi(exponent as i32);
            Ok(YamlValue::Number(serde_yaml::Number::from(float)))
        }
        // tolerate an untagged integer from lax encoders
        CborValue::Integer(_) => match cbor_i128(value) {
            Some(n) => Ok(yaml_number_i64(n as i64)),
            None => Err(cbor_type_error(path, "decimal64", value)),
        },
        _ => Err(cbor_type_error(path, "decimal64", value)),
    }
}

fn decode_union(
    value: &CborValue,
    members: &[TypeInfo],
    tables: &SchemaTables,
    path: &str,
) -> Result<YamlValue> {
    match value {
        CborValue::Tag(TAG_UNION_ENUM, inner) => {
            for member in members {
                if matches!(member.base, YangType::Enumeration { .. }) {
                    return decode_value(inner, member, tables, path);
                }
            }
            Err(cbor_type_error(path, "enum union member", value))
        }
        CborValue::Tag(TAG_UNION_IDENTITYREF, inner) => {
            for member in members {
                if matches!(member.base, YangType::Identityref { .. }) {
                    return decode_value(inner, member, tables, path);
                }
            }
            Err(cbor_type_error(path, "identityref union member", value))
        }
        _ => {
            for member in members {
                if let Ok(decoded) = decode_value(value, member, tables, path) {
                    return Ok(decoded);
                }
            }
            Err(cbor_type_error(path, "union", value))
        }
    }
}

fn decode_bits(
    value: &CborValue,
    positions: &std::collections::HashMap<String, u32>,
    path: &str,
) -> Result<YamlValue> {
    let CborValue::Bytes(bytes) = value else {
        return Err(cbor_type_error(path, "bits byte string", value));
    };

    let mut set: Vec<(&u32, &String)> = positions
        .iter()
        .filter(|(_, position)| {
            let byte = (**position / 8) as usize;
            bytes
                .get(byte)
                .is_some_and(|b| b & (1 << (**position % 8)) != 0)
        })
        .map(|(name, position)| (position, name))
        .collect();
    set.sort();

    Ok(YamlValue::Sequence(
        set.into_iter()
            .map(|(_, name)| YamlValue::String(name.clone()))
            .collect(),
    ))
}

// =============================================================================
// Scalar helpers
// =============================================================================

fn passthrough_encode(value: &YamlValue) -> CborValue {
    match value {
        YamlValue::Bool(b) => CborValue::Bool(*b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CborValue::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                CborValue::Integer(u.into())
            } else {
                CborValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        YamlValue::String(s) => CborValue::Text(s.clone()),
        YamlValue::Null => CborValue::Null,
        other => CborValue::Text(display_yaml(other)),
    }
}

fn passthrough_decode(value: &CborValue) -> YamlValue {
    match value {
        CborValue::Bool(b) => YamlValue::Bool(*b),
        CborValue::Integer(_) => match cbor_i128(value) {
            Some(n) => yaml_number_i64(n as i64),
            None => YamlValue::Null,
        },
        CborValue::Text(s) => YamlValue::String(s.clone()),
        CborValue::Bytes(bytes) => {
            YamlValue::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        CborValue::Float(f) => YamlValue::Number(serde_yaml::Number::from(*f)),
        CborValue::Null => YamlValue::Null,
        other => YamlValue::String(format!("{:?}", other)),
    }
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_i64(value: &YamlValue) -> Option<i64> {
    match value {
        YamlValue::Number(n) => n.as_i64(),
        YamlValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn yaml_u64(value: &YamlValue) -> Option<u64> {
    match value {
        YamlValue::Number(n) => n.as_u64(),
        YamlValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn yaml_number_i64(n: i64) -> YamlValue {
    YamlValue::Number(n.into())
}

pub(crate) fn cbor_i128(value: &CborValue) -> Option<i128> {
    match value {
        CborValue::Integer(i) => Some(i128::from(*i)),
        _ => None,
    }
}

fn type_error(path: &str, expected: &str, value: &YamlValue) -> Error {
    Error::ValueType {
        path: path.to_string(),
        expected: expected.to_string(),
        value: display_yaml(value),
    }
}

fn cbor_type_error(path: &str, expected: &str, value: &CborValue) -> Error {
    Error::ValueType {
        path: path.to_string(),
        expected: expected.to_string(),
        value: display_cbor(value),
    }
}

/// Render a CBOR value for diagnostics, byte strings in the `h'..'`
/// notation of RFC 8949 §8.
pub(crate) fn display_cbor(value: &CborValue) -> String {
    match value {
        CborValue::Bytes(bytes) => format!("h'{}'", hex::encode(bytes)),
        CborValue::Tag(tag, inner) => format!("{}({})", tag, display_cbor(inner)),
        other => format!("{:?}", other),
    }
}

fn display_yaml(value: &YamlValue) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{:?}", value))
}
