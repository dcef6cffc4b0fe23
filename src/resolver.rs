//! Path → SID resolution
//!
//! Maps parsed instance-identifier segments to an absolute SID through a
//! three-step cascade: exact prefixed lookup, exact stripped lookup, then a
//! fuzzy lookup over the leaf index for clients that omit intermediate
//! choice/case segments the alias table does not cover. Resolution is
//! deterministic: identical inputs always yield the same SID.

use crate::error::{Error, Result};
use crate::instance_id::Segment;
use crate::schema::{SchemaTables, Sid};

/// Resolve `segments` to an absolute SID, optionally under a stripped
/// parent context path (pushed by the encoder as its walk descends).
pub fn resolve_segments(
    tables: &SchemaTables,
    segments: &[Segment],
    context: Option<&str>,
) -> Result<Sid> {
    if segments.is_empty() {
        return Err(Error::PathUnresolved(String::new()));
    }

    // 1. direct prefixed lookup
    let prefixed = join_with_context(
        tables,
        context,
        &segments.iter().map(Segment::prefixed).collect::<Vec<_>>(),
        true,
    );
    if let Some(sid) = tables.sid.prefixed_path_to_sid.get(&prefixed) {
        return Ok(*sid);
    }

    // 2. direct stripped lookup
    let stripped = join_with_context(
        tables,
        context,
        &segments
            .iter()
            .map(|s| s.name.clone())
            .collect::<Vec<_>>(),
        false,
    );
    if let Some(sid) = tables.sid.path_to_sid.get(&stripped) {
        return Ok(*sid);
    }

    // 3. fuzzy lookup via the leaf index
    let last = segments.last().expect("checked non-empty").name.as_str();
    if let Some(candidates) = tables.sid.leaf_to_paths.get(last) {
        if let Some(path) = pick_candidate(candidates, context, segments) {
            if let Some(sid) = tables.sid.path_to_sid.get(path) {
                return Ok(*sid);
            }
        }
    }

    Err(Error::PathUnresolved(display_path(segments)))
}

/// Resolve and return the canonical stripped path along with the SID.
pub fn resolve_to_path<'t>(
    tables: &'t SchemaTables,
    segments: &[Segment],
    context: Option<&str>,
) -> Result<(Sid, &'t str)> {
    let sid = resolve_segments(tables, segments, context)?;
    let path = tables
        .sid
        .sid_to_path
        .get(&sid)
        .map(String::as_str)
        .ok_or_else(|| Error::PathUnresolved(display_path(segments)))?;
    Ok((sid, path))
}

fn join_with_context(
    tables: &SchemaTables,
    context: Option<&str>,
    parts: &[String],
    prefixed: bool,
) -> String {
    let joined = parts.join("/");
    match context {
        Some(ctx) if !ctx.is_empty() => {
            let ctx = if prefixed {
                tables
                    .sid
                    .path_to_prefixed
                    .get(ctx)
                    .map(String::as_str)
                    .unwrap_or(ctx)
            } else {
                ctx
            };
            format!("{}/{}", ctx, joined)
        }
        _ => joined,
    }
}

/// Score candidates by the count of matching leading segments against the
/// stripped context; ties break by candidate order. Without any context the
/// first candidate wins.
fn pick_candidate<'a>(
    candidates: &'a [String],
    context: Option<&str>,
    segments: &[Segment],
) -> Option<&'a String> {
    if candidates.len() == 1 {
        return candidates.first();
    }

    let mut context_segments: Vec<&str> = context
        .into_iter()
        .flat_map(|c| c.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        context_segments.push(segment.name.as_str());
    }

    if context_segments.is_empty() {
        return candidates.first();
    }

    let mut best: Option<(&'a String, usize)> = None;
    for candidate in candidates {
        let score = candidate
            .split('/')
            .zip(&context_segments)
            .take_while(|(a, b)| a == *b)
            .count();
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn display_path(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&segment.prefixed());
    }
    out
}
