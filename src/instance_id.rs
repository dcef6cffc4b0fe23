//! Instance-identifier parser
//!
//! Tokenizes RFC 7951 §6.11 instance-identifiers (the subset the device
//! management plane uses) into segment lists:
//!
//! ```text
//! /ietf-interfaces:interfaces/interface[name='eth0']/ietf-ip:enabled
//! ```
//!
//! Each segment carries an optional module prefix, a node name, and its
//! list-key predicates in declaration order.

use crate::error::{Error, Result};

/// One path segment with its list-key predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub prefix: Option<String>,
    pub name: String,
    /// Key name → quoted value, in declaration order. Empty for bare paths.
    pub predicates: Vec<(String, String)>,
}

impl Segment {
    /// The `prefix:name` spelling, or just `name` when unprefixed.
    pub fn prefixed(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        }
    }

    /// Value of the predicate with the given key.
    pub fn predicate(&self, key: &str) -> Option<&str> {
        self.predicates
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse an instance-identifier into its segments.
pub fn parse_instance_id(input: &str) -> Result<Vec<Segment>> {
    let mut chars = input.char_indices().peekable();
    let mut segments = Vec::new();

    match chars.next() {
        Some((_, '/')) => {}
        _ => return Err(Error::instance_id(input, "must start with '/'")),
    }

    loop {
        let segment = parse_segment(input, &mut chars)?;
        segments.push(segment);
        match chars.next() {
            None => break,
            Some((_, '/')) => continue,
            Some((at, c)) => {
                return Err(Error::instance_id(
                    input,
                    format!("unexpected '{}' at offset {}", c, at),
                ));
            }
        }
    }

    Ok(segments)
}

fn parse_segment(
    input: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<Segment> {
    let mut name = String::new();
    let mut prefix = None;

    while let Some((_, c)) = chars.peek().copied() {
        match c {
            '/' | '[' => break,
            ':' => {
                if name.is_empty() {
                    return Err(Error::instance_id(input, "empty module prefix"));
                }
                prefix = Some(std::mem::take(&mut name));
                chars.next();
            }
            _ => {
                name.push(c);
                chars.next();
            }
        }
    }

    if name.is_empty() {
        return Err(Error::instance_id(input, "empty node name"));
    }

    let mut predicates = Vec::new();
    while matches!(chars.peek(), Some((_, '['))) {
        chars.next();
        predicates.push(parse_predicate(input, chars)?);
    }

    Ok(Segment {
        prefix,
        name,
        predicates,
    })
}

/// `key '=' quoted-value ']'`, with `'` or `"` quoting.
fn parse_predicate(
    input: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Result<(String, String)> {
    let mut key = String::new();
    loop {
        match chars.next() {
            Some((_, '=')) => break,
            Some((_, ']')) | None => {
                return Err(Error::instance_id(input, "predicate without '='"));
            }
            Some((_, c)) => key.push(c),
        }
    }
    // keys may carry a module prefix; lists are keyed by bare leaf name
    let key = match key.split_once(':') {
        Some((_, bare)) => bare.to_string(),
        None => key,
    };
    if key.is_empty() {
        return Err(Error::instance_id(input, "empty predicate key"));
    }

    let quote = match chars.next() {
        Some((_, q @ ('\'' | '"'))) => q,
        _ => return Err(Error::instance_id(input, "predicate value must be quoted")),
    };
    let mut value = String::new();
    loop {
        match chars.next() {
            Some((_, c)) if c == quote => break,
            Some((_, c)) => value.push(c),
            None => return Err(Error::instance_id(input, "unterminated predicate value")),
        }
    }

    match chars.next() {
        Some((_, ']')) => Ok((key, value)),
        _ => Err(Error::instance_id(input, "unmatched '[' in predicate")),
    }
}
