//! Schema table builder
//!
//! Merges per-file SID trees and type tables into the global pair the codec
//! runs against. Files are parsed in parallel (their outputs are disjoint)
//! and merged sequentially in sorted-filename order, so "later wins" is
//! reproducible run to run.
//!
//! The merged result is cached as a versioned JSON file next to the sources.
//! The cache is only trusted when its version matches and it is newer than
//! every source file; anything else falls back to a rebuild.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{NodeInfo, SchemaTables, SidTree, TypeInfo, TypeTable, YangType};
use crate::sid_file::load_sid_file;
use crate::yang::load_yang_module;

/// Schema cache format version. Bump on any change to the table layout.
pub const CACHE_VERSION: i64 = 1;

/// Cache file name, stored inside the schema directory.
const CACHE_FILE: &str = ".schema-cache.json";

/// Options for [`build_schema_tables`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Skip both reading and writing the schema cache.
    pub no_cache: bool,
    /// Typedef name prefixes subject to vendor typedef merging.
    pub vendor_prefixes: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            no_cache: false,
            vendor_prefixes: vec!["velocitysp-".to_string(), "mchp-".to_string()],
        }
    }
}

/// Load and merge all `.sid` and `.yang` files under `schema_dir`.
pub fn build_schema_tables(schema_dir: impl AsRef<Path>, opts: &BuildOptions) -> Result<SchemaTables> {
    let schema_dir = schema_dir.as_ref();
    let (sid_files, yang_files) = schema_sources(schema_dir)?;

    if !opts.no_cache {
        match load_cache(schema_dir, &sid_files, &yang_files) {
            Ok(tables) => return Ok(tables),
            Err(e) => log::debug!("schema cache unusable ({}); rebuilding", e),
        }
    }

    let mut tables = build_from_sources(&sid_files, &yang_files, opts)?;
    apply_aliases(&mut tables);

    if !opts.no_cache {
        if let Err(e) = save_cache(schema_dir, &tables) {
            log::warn!("failed to save schema cache: {}", e);
        }
    }

    Ok(tables)
}

/// Enumerate schema sources, sorted by file name for a deterministic merge.
fn schema_sources(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut sid_files = Vec::new();
    let mut yang_files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("sid") => sid_files.push(path),
            Some("yang") => yang_files.push(path),
            _ => {}
        }
    }
    sid_files.sort();
    yang_files.sort();
    Ok((sid_files, yang_files))
}

fn build_from_sources(
    sid_files: &[PathBuf],
    yang_files: &[PathBuf],
    opts: &BuildOptions,
) -> Result<SchemaTables> {
    // Parallel parse; collect() preserves input order, so the sequential
    // merge below sees files in sorted order.
    let sid_trees: Vec<Result<SidTree>> =
        sid_files.par_iter().map(|p| load_sid_file(p)).collect();
    let type_tables: Vec<Result<TypeTable>> =
        yang_files.par_iter().map(|p| load_yang_module(p)).collect();

    let mut sid = SidTree::default();
    for tree in sid_trees {
        sid.merge(tree?);
    }
    compute_node_info(&mut sid);

    let mut types = TypeTable::default();
    for table in type_tables {
        types.merge(table?);
    }
    resolve_deferred_typedefs(&mut types);
    merge_vendor_typedefs(&mut types, &opts.vendor_prefixes);
    rewrite_merged_leaf_types(&mut types);

    Ok(SchemaTables { sid, types })
}

/// Recompute `node_info` for every data path: the parent is the longest
/// proper-prefix path that also exists in the tree.
fn compute_node_info(sid: &mut SidTree) {
    let mut info = HashMap::with_capacity(sid.sid_to_path.len());

    for (node_sid, path) in &sid.sid_to_path {
        let parent = longest_prefix_sid(sid, path);
        let delta_sid = match parent {
            Some(parent_sid) => *node_sid as i64 - parent_sid as i64,
            None => *node_sid as i64,
        };
        let prefixed_path = sid
            .path_to_prefixed
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.clone());

        info.insert(
            path.clone(),
            NodeInfo {
                sid: *node_sid,
                parent,
                delta_sid,
                depth: path.split('/').count(),
                prefixed_path,
            },
        );
    }

    sid.node_info = info;
}

fn longest_prefix_sid(sid: &SidTree, path: &str) -> Option<u64> {
    let mut prefix = path;
    while let Some(cut) = prefix.rfind('/') {
        prefix = &prefix[..cut];
        if let Some(parent_sid) = sid.path_to_sid.get(prefix) {
            return Some(*parent_sid);
        }
    }
    None
}

/// Resolve leaf and typedef records left `Unknown` by the per-module pass
/// because they referenced a typedef from another file.
fn resolve_deferred_typedefs(types: &mut TypeTable) {
    // typedef → typedef chains first, until fixpoint
    loop {
        let mut updates = Vec::new();
        for (name, info) in &types.typedefs {
            if !matches!(info.base, YangType::Unknown) {
                continue;
            }
            let Some(target) = info.original.as_deref() else {
                continue;
            };
            if target == name {
                continue;
            }
            if let Some(resolved) = types.typedefs.get(target) {
                if !matches!(resolved.base, YangType::Unknown) {
                    updates.push((name.clone(), resolved.base.clone()));
                }
            }
        }
        if updates.is_empty() {
            break;
        }
        for (name, base) in updates {
            if let Some(info) = types.typedefs.get_mut(&name) {
                info.base = base;
            }
        }
    }

    // then the leaves
    let mut updates = Vec::new();
    for (path, info) in &types.types {
        if !matches!(info.base, YangType::Unknown) {
            continue;
        }
        let Some(target) = info.original.as_deref() else {
            continue;
        };
        if let Some(resolved) = types.typedefs.get(target) {
            if !matches!(resolved.base, YangType::Unknown) {
                updates.push((path.clone(), resolved.base.clone()));
            }
        }
    }
    for (path, base) in updates {
        if let Some(info) = types.types.get_mut(&path) {
            info.base = base;
        }
    }
}

/// Vendor-prefix typedef merging: `velocitysp-foo` refines `foo` by adding
/// enum members; union both bijections into the base typedef.
fn merge_vendor_typedefs(types: &mut TypeTable, vendor_prefixes: &[String]) {
    let mut vendor_names: Vec<String> = types
        .typedefs
        .keys()
        .filter(|name| vendor_prefixes.iter().any(|p| name.starts_with(p.as_str())))
        .cloned()
        .collect();
    vendor_names.sort();

    for vendor_name in vendor_names {
        let prefix = vendor_prefixes
            .iter()
            .find(|p| vendor_name.starts_with(p.as_str()))
            .expect("name was selected by prefix");
        let base_name = vendor_name[prefix.len()..].to_string();

        let Some(vendor_info) = types.typedefs.get(&vendor_name).cloned() else {
            continue;
        };
        let YangType::Enumeration {
            name_to_value: vendor_names_map,
            value_to_name: vendor_values_map,
        } = vendor_info.base
        else {
            continue;
        };

        let Some(base_info) = types.typedefs.get(&base_name) else {
            continue;
        };
        let YangType::Enumeration {
            name_to_value,
            value_to_name,
        } = &base_info.base
        else {
            continue;
        };

        let mut merged_names = name_to_value.clone();
        let mut merged_values = value_to_name.clone();
        merged_names.extend(vendor_names_map);
        merged_values.extend(vendor_values_map);
        let merged_base = YangType::Enumeration {
            name_to_value: merged_names,
            value_to_name: merged_values,
        };

        let base_original = base_info.original.clone();
        types.typedefs.insert(
            base_name.clone(),
            TypeInfo {
                base: merged_base.clone(),
                original: base_original,
            },
        );
        types.typedefs.insert(
            vendor_name.clone(),
            TypeInfo {
                base: merged_base,
                original: Some(vendor_name.clone()),
            },
        );
        types.merged_typedefs.insert(base_name);
        types.merged_typedefs.insert(vendor_name);
    }
}

/// Rewrite leaf types whose `original` names a merged typedef so both the
/// base and the vendor spelling see the unioned bijection.
fn rewrite_merged_leaf_types(types: &mut TypeTable) {
    let merged: Vec<(String, YangType)> = types
        .merged_typedefs
        .iter()
        .filter_map(|name| {
            types
                .typedefs
                .get(name)
                .map(|info| (name.clone(), info.base.clone()))
        })
        .collect();
    let merged: HashMap<String, YangType> = merged.into_iter().collect();

    for info in types.types.values_mut() {
        if let Some(original) = info.original.as_deref() {
            if let Some(base) = merged.get(original) {
                info.base = base.clone();
            }
        }
    }
}

/// Alias augmentation: register choice/case-free spellings of every data
/// path so clients may omit those segments. Guarded by a sentinel so a
/// reloaded cache is not aliased twice.
fn apply_aliases(tables: &mut SchemaTables) {
    if tables.sid.aliases_built {
        return;
    }

    let mut snapshot: Vec<(String, u64)> = tables
        .sid
        .prefixed_path_to_sid
        .iter()
        .filter(|(path, _)| !path.starts_with("identity:") && !path.starts_with("feature:"))
        .map(|(path, sid)| (path.clone(), *sid))
        .collect();
    // map iteration order is arbitrary; sort so colliding aliases resolve
    // the same way on every build
    snapshot.sort();

    for (prefixed, sid) in snapshot {
        let mut kept: Vec<&str> = Vec::new();
        for segment in prefixed.split('/') {
            let bare = segment.split_once(':').map(|(_, n)| n).unwrap_or(segment);
            if tables.types.choice_names.contains(bare) || tables.types.case_names.contains(bare) {
                continue;
            }
            // collapse consecutive duplicates left by the drop
            if let Some(last) = kept.last() {
                let last_bare = last.split_once(':').map(|(_, n)| n).unwrap_or(last);
                if last_bare == bare {
                    continue;
                }
            }
            kept.push(segment);
        }

        if kept.is_empty() {
            continue;
        }
        let alias_prefixed = kept.join("/");
        if alias_prefixed == prefixed {
            continue;
        }
        let alias_stripped = crate::sid_file::strip_prefixes(&alias_prefixed);
        if tables.sid.prefixed_path_to_sid.contains_key(&alias_prefixed)
            || tables.sid.path_to_sid.contains_key(&alias_stripped)
        {
            continue;
        }
        tables.sid.insert_alias(&alias_stripped, &alias_prefixed, sid);
    }

    tables.sid.aliases_built = true;
}

// =============================================================================
// Schema cache
// =============================================================================

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: i64,
    tables: SchemaTables,
}

fn load_cache(dir: &Path, sid_files: &[PathBuf], yang_files: &[PathBuf]) -> Result<SchemaTables> {
    let cache_path = dir.join(CACHE_FILE);
    let cache_mtime = fs::metadata(&cache_path)?.modified()?;

    for source in sid_files.iter().chain(yang_files) {
        if mtime(source)? >= cache_mtime {
            return Err(Error::schema(
                cache_path.display().to_string(),
                format!("stale: {} is newer", source.display()),
            ));
        }
    }

    let text = fs::read_to_string(&cache_path)?;
    let envelope: serde_json::Value = serde_json::from_str(&text)?;
    let version = envelope
        .get("version")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    if version != CACHE_VERSION {
        return Err(Error::CacheVersion {
            found: version,
            expected: CACHE_VERSION,
        });
    }

    let envelope: CacheEnvelope = serde_json::from_value(envelope)?;
    Ok(envelope.tables)
}

/// Write the cache atomically: temp file in the same directory, then rename,
/// so a concurrent reader never sees a half-written cache.
fn save_cache(dir: &Path, tables: &SchemaTables) -> Result<()> {
    let envelope = CacheEnvelope {
        version: CACHE_VERSION,
        tables: tables.clone(),
    };
    let text = serde_json::to_string(&envelope)?;

    let cache_path = dir.join(CACHE_FILE);
    let temp_path = cache_path.with_extension("json.tmp");
    fs::write(&temp_path, text)?;
    fs::rename(&temp_path, &cache_path)?;
    Ok(())
}

fn mtime(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}
