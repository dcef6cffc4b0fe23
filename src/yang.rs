//! YANG module type extractor
//!
//! Parses one YANG module (RFC 7950 text grammar) and extracts everything
//! the codec needs to pick a wire encoding: per-leaf types, typedefs,
//! identities, enumeration bijections, choice/case names, list keys, and
//! declared child orders. Statements that do not influence encoding
//! (`must`, `when`, `description`, ranges, patterns, ...) are parsed
//! generically and skipped.
//!
//! Leaf types are keyed by their absolute stripped path within the module,
//! including choice/case segments, so they line up with the identifiers in
//! the companion SID file. `uses` of module-local groupings are expanded in
//! place; `augment` targets are stripped of prefixes and spliced into the
//! path space, which is what lets a leaf augmented into a foreign module
//! land on the path the foreign SID file declares.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::schema::{IdentityInfo, TypeInfo, TypeTable, YangType};

// =============================================================================
// Statement parser
// =============================================================================

/// One YANG statement: `keyword [argument] (";" | "{" substatements "}")`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub keyword: String,
    pub arg: Option<String>,
    pub children: Vec<Statement>,
}

impl Statement {
    /// First child with the given keyword.
    pub fn child(&self, keyword: &str) -> Option<&Statement> {
        self.children.iter().find(|c| c.keyword == keyword)
    }

    /// Argument of the first child with the given keyword.
    pub fn child_arg(&self, keyword: &str) -> Option<&str> {
        self.child(keyword).and_then(|c| c.arg.as_deref())
    }

    /// All children with the given keyword.
    pub fn all<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a Statement> {
        self.children.iter().filter(move |c| c.keyword == keyword)
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    file: &'a str,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, file: &'a str) -> Self {
        Self {
            src: text.as_bytes(),
            pos: 0,
            file,
        }
    }

    fn err(&self, reason: impl Into<String>) -> Error {
        Error::schema(self.file, format!("{} (at byte {})", reason.into(), self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Skip whitespace and `//` / `/* */` comments.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                self.pos += 1;
            }
            match (self.peek(), self.src.get(self.pos + 1).copied()) {
                (Some(b'/'), Some(b'/')) => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    self.pos += 2;
                    loop {
                        match (self.peek(), self.src.get(self.pos + 1).copied()) {
                            (Some(b'*'), Some(b'/')) => {
                                self.pos += 2;
                                break;
                            }
                            (None, _) => return Err(self.err("unterminated block comment")),
                            _ => self.pos += 1,
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Parse a full statement, including its substatement block.
    fn parse_statement(&mut self) -> Result<Statement> {
        let keyword = self.parse_bare_token()?;
        if keyword.is_empty() {
            return Err(self.err("expected statement keyword"));
        }

        self.skip_trivia()?;
        let arg = match self.peek() {
            Some(b';' | b'{') => None,
            Some(_) => Some(self.parse_argument()?),
            None => return Err(self.err("unexpected end of module")),
        };

        self.skip_trivia()?;
        let mut children = Vec::new();
        match self.bump() {
            Some(b';') => {}
            Some(b'{') => loop {
                self.skip_trivia()?;
                match self.peek() {
                    Some(b'}') => {
                        self.pos += 1;
                        break;
                    }
                    Some(_) => children.push(self.parse_statement()?),
                    None => return Err(self.err("unterminated statement block")),
                }
            },
            _ => return Err(self.err(format!("expected ';' or '{{' after '{}'", keyword))),
        }

        Ok(Statement {
            keyword,
            arg,
            children,
        })
    }

    /// Quoted (with `+` concatenation) or unquoted argument.
    fn parse_argument(&mut self) -> Result<String> {
        if matches!(self.peek(), Some(b'"' | b'\'')) {
            let mut arg = self.parse_quoted()?;
            loop {
                let mark = self.pos;
                self.skip_trivia()?;
                if self.peek() == Some(b'+') {
                    self.pos += 1;
                    self.skip_trivia()?;
                    if matches!(self.peek(), Some(b'"' | b'\'')) {
                        arg.push_str(&self.parse_quoted()?);
                        continue;
                    }
                    return Err(self.err("expected quoted string after '+'"));
                }
                self.pos = mark;
                break;
            }
            Ok(arg)
        } else {
            let tok = self.parse_bare_token()?;
            if tok.is_empty() {
                Err(self.err("expected argument"))
            } else {
                Ok(tok)
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String> {
        let quote = self.bump().expect("caller checked quote");
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b) if b == quote => break,
                // escapes are recognized in double-quoted strings only
                Some(b'\\') if quote == b'"' => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'"') => out.push(b'"'),
                    Some(b'\\') => out.push(b'\\'),
                    Some(other) => {
                        out.push(b'\\');
                        out.push(other);
                    }
                    None => return Err(self.err("unterminated escape")),
                },
                Some(b) => out.push(b),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn parse_bare_token(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || matches!(b, b';' | b'{' | b'}' | b'"' | b'\'') {
                break;
            }
            // a comment terminates an unquoted token
            if b == b'/' && matches!(self.src.get(self.pos + 1), Some(b'/' | b'*')) {
                break;
            }
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }
}

/// Parse YANG text into its single root statement (`module` / `submodule`).
pub fn parse_statements(text: &str, file: &str) -> Result<Statement> {
    let mut parser = Parser::new(text, file);
    parser.skip_trivia()?;
    let root = parser.parse_statement()?;
    parser.skip_trivia()?;
    if parser.peek().is_some() {
        return Err(parser.err("trailing content after module statement"));
    }
    Ok(root)
}

// =============================================================================
// Type extraction
// =============================================================================

struct ModuleCtx {
    module: String,
    /// import prefix → module name, plus the module's own prefix
    prefixes: HashMap<String, String>,
    /// resolved module-local typedefs
    typedefs: HashMap<String, TypeInfo>,
    /// module-local groupings by name
    groupings: HashMap<String, Statement>,
}

impl ModuleCtx {
    /// Qualify `p:name` (or bare `name`) to `module:name`.
    fn qualify(&self, name: &str) -> String {
        match name.split_once(':') {
            Some((prefix, bare)) => {
                let module = self
                    .prefixes
                    .get(prefix)
                    .map(String::as_str)
                    .unwrap_or(prefix);
                format!("{}:{}", module, bare)
            }
            None => format!("{}:{}", self.module, name),
        }
    }
}

/// Load and extract one YANG module file.
pub fn load_yang_module(path: impl AsRef<Path>) -> Result<TypeTable> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    parse_yang_module(&text, &path.display().to_string())
}

/// Extract the partial type table from YANG module text.
pub fn parse_yang_module(text: &str, file: &str) -> Result<TypeTable> {
    let root = parse_statements(text, file)?;
    if root.keyword != "module" && root.keyword != "submodule" {
        return Err(Error::schema(
            file,
            format!("expected module statement, found '{}'", root.keyword),
        ));
    }
    let module = root
        .arg
        .clone()
        .ok_or_else(|| Error::schema(file, "module statement without a name"))?;

    let mut ctx = ModuleCtx {
        module,
        prefixes: HashMap::new(),
        typedefs: HashMap::new(),
        groupings: HashMap::new(),
    };

    if let Some(prefix) = root.child_arg("prefix") {
        ctx.prefixes.insert(prefix.to_string(), ctx.module.clone());
    }
    for import in root.all("import") {
        if let (Some(module), Some(prefix)) = (import.arg.as_deref(), import.child_arg("prefix")) {
            ctx.prefixes.insert(prefix.to_string(), module.to_string());
        }
    }

    collect_groupings(&root, &mut ctx.groupings);

    let mut table = TypeTable::default();
    resolve_typedefs(&root, &mut ctx, &mut table);

    for identity in root.all("identity") {
        let Some(name) = identity.arg.as_deref() else {
            continue;
        };
        let bases = identity
            .all("base")
            .filter_map(|b| b.arg.as_deref())
            .map(|b| ctx.qualify(b))
            .collect();
        table.identities.insert(
            ctx.qualify(name),
            IdentityInfo {
                module: ctx.module.clone(),
                bases,
            },
        );
    }

    let mut path = Vec::new();
    walk_data(&root, &mut path, &mut table, &ctx, 0);

    Ok(table)
}

/// Groupings can nest; collect all of them by name in one pre-pass.
fn collect_groupings(stmt: &Statement, out: &mut HashMap<String, Statement>) {
    for child in &stmt.children {
        if child.keyword == "grouping" {
            if let Some(name) = child.arg.as_deref() {
                out.insert(name.to_string(), child.clone());
            }
        }
        collect_groupings(child, out);
    }
}

/// Resolve typedef chains to concrete bases, iterating until fixpoint so
/// declaration order does not matter.
fn resolve_typedefs(root: &Statement, ctx: &mut ModuleCtx, table: &mut TypeTable) {
    let mut stmts = Vec::new();
    collect_typedefs(root, &mut stmts);

    for _ in 0..=stmts.len() {
        let mut progress = false;
        for stmt in &stmts {
            let Some(name) = stmt.arg.as_deref() else {
                continue;
            };
            if ctx.typedefs.contains_key(name) {
                continue;
            }
            let Some(type_stmt) = stmt.child("type") else {
                continue;
            };
            let info = resolve_type(type_stmt, ctx);
            if !matches!(info.base, YangType::Unknown) {
                ctx.typedefs
                    .insert(name.to_string(), TypeInfo::with_original(info.base, name));
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }

    // Typedefs still unresolved here reference another file's typedefs; the
    // schema builder re-resolves them once every module is merged.
    for stmt in &stmts {
        let Some(name) = stmt.arg.as_deref() else {
            continue;
        };
        if !ctx.typedefs.contains_key(name) {
            let info = stmt
                .child("type")
                .map(|t| resolve_type(t, ctx))
                .unwrap_or_else(|| TypeInfo::new(YangType::Unknown));
            ctx.typedefs.insert(name.to_string(), info);
        }
    }

    table.typedefs = ctx.typedefs.clone();
}

fn collect_typedefs<'a>(stmt: &'a Statement, out: &mut Vec<&'a Statement>) {
    for child in &stmt.children {
        if child.keyword == "typedef" {
            out.push(child);
        }
        collect_typedefs(child, out);
    }
}

/// Resolve a `type` statement to concrete type info, chasing local typedefs.
fn resolve_type(type_stmt: &Statement, ctx: &ModuleCtx) -> TypeInfo {
    let Some(name) = type_stmt.arg.as_deref() else {
        return TypeInfo::new(YangType::Unknown);
    };

    let base = match name {
        "boolean" => YangType::Boolean,
        "string" => YangType::String,
        "int8" => YangType::Int8,
        "int16" => YangType::Int16,
        "int32" => YangType::Int32,
        "int64" => YangType::Int64,
        "uint8" => YangType::Uint8,
        "uint16" => YangType::Uint16,
        "uint32" => YangType::Uint32,
        "uint64" => YangType::Uint64,
        "binary" => YangType::Binary,
        "empty" => YangType::Empty,
        "enumeration" => resolve_enumeration(type_stmt),
        "bits" => resolve_bits(type_stmt),
        "union" => YangType::Union {
            members: type_stmt
                .all("type")
                .map(|member| resolve_type(member, ctx))
                .collect(),
        },
        "identityref" => match type_stmt.child_arg("base") {
            Some(base) => YangType::Identityref {
                base: ctx.qualify(base),
            },
            None => YangType::Unknown,
        },
        "decimal64" => match type_stmt
            .child_arg("fraction-digits")
            .and_then(|d| d.parse::<u32>().ok())
        {
            Some(fraction_digits) => YangType::Decimal64 { fraction_digits },
            None => YangType::Unknown,
        },
        "leafref" => YangType::Leafref {
            target: type_stmt.child_arg("path").unwrap_or_default().to_string(),
        },
        other => {
            // typedef reference, possibly prefixed
            let bare = other.split_once(':').map(|(_, n)| n).unwrap_or(other);
            return match ctx.typedefs.get(bare) {
                Some(info) => TypeInfo::with_original(info.base.clone(), bare),
                // unresolvable here: keep the name so the builder can
                // rewrite once all modules are merged
                None => TypeInfo::with_original(YangType::Unknown, bare),
            };
        }
    };

    TypeInfo::new(base)
}

/// Build the enum name ↔ value bijection. Explicit `value` statements
/// override positional assignment; the next implicit value continues from
/// the highest assigned so far, per RFC 7950 §9.6.4.2.
fn resolve_enumeration(type_stmt: &Statement) -> YangType {
    let mut name_to_value = HashMap::new();
    let mut value_to_name = HashMap::new();
    let mut next = 0i64;

    for member in type_stmt.all("enum") {
        let Some(name) = member.arg.as_deref() else {
            continue;
        };
        let value = member
            .child_arg("value")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(next);
        next = next.max(value + 1);
        name_to_value.insert(name.to_string(), value);
        value_to_name.insert(value, name.to_string());
    }

    YangType::Enumeration {
        name_to_value,
        value_to_name,
    }
}

fn resolve_bits(type_stmt: &Statement) -> YangType {
    let mut positions = HashMap::new();
    let mut next = 0u32;

    for bit in type_stmt.all("bit") {
        let Some(name) = bit.arg.as_deref() else {
            continue;
        };
        let position = bit
            .child_arg("position")
            .and_then(|p| p.parse::<u32>().ok())
            .unwrap_or(next);
        next = next.max(position + 1);
        positions.insert(name.to_string(), position);
    }

    YangType::Bits { positions }
}

// =============================================================================
// Schema tree walk
// =============================================================================

const MAX_USES_DEPTH: usize = 16;

/// Walk the data tree below `stmt`, recording leaf types and schema shape.
fn walk_data(
    stmt: &Statement,
    path: &mut Vec<String>,
    table: &mut TypeTable,
    ctx: &ModuleCtx,
    uses_depth: usize,
) {
    let mut order = 0usize;
    walk_children(stmt, path, table, ctx, uses_depth, &mut order);
}

/// Child loop, split out so `uses` expansion continues the enclosing
/// container's order counter instead of restarting it.
fn walk_children(
    stmt: &Statement,
    path: &mut Vec<String>,
    table: &mut TypeTable,
    ctx: &ModuleCtx,
    uses_depth: usize,
    order: &mut usize,
) {
    for child in &stmt.children {
        match child.keyword.as_str() {
            "container" | "list" => {
                let Some(name) = child.arg.as_deref() else {
                    continue;
                };
                record_order(table, name, order);
                path.push(name.to_string());
                let joined = path.join("/");
                if child.keyword == "list" {
                    table.lists.insert(joined.clone());
                    if let Some(keys) = child.child_arg("key") {
                        table.list_keys.insert(
                            joined,
                            keys.split_whitespace().map(str::to_string).collect(),
                        );
                    }
                }
                walk_data(child, path, table, ctx, uses_depth);
                path.pop();
            }
            "leaf" | "leaf-list" => {
                let Some(name) = child.arg.as_deref() else {
                    continue;
                };
                record_order(table, name, order);
                path.push(name.to_string());
                let info = match child.child("type") {
                    Some(type_stmt) => resolve_type(type_stmt, ctx),
                    None => TypeInfo::new(YangType::Unknown),
                };
                table.types.insert(path.join("/"), info);
                path.pop();
            }
            "choice" => {
                let Some(name) = child.arg.as_deref() else {
                    continue;
                };
                record_order(table, name, order);
                table.choice_names.insert(name.to_string());
                path.push(name.to_string());
                walk_data(child, path, table, ctx, uses_depth);
                path.pop();
            }
            "case" => {
                let Some(name) = child.arg.as_deref() else {
                    continue;
                };
                table.case_names.insert(name.to_string());
                path.push(name.to_string());
                walk_data(child, path, table, ctx, uses_depth);
                path.pop();
            }
            "uses" => {
                let Some(name) = child.arg.as_deref() else {
                    continue;
                };
                let bare = name.split_once(':').map(|(_, n)| n).unwrap_or(name);
                match ctx.groupings.get(bare) {
                    Some(grouping) if uses_depth < MAX_USES_DEPTH => {
                        let grouping = grouping.clone();
                        walk_children(&grouping, path, table, ctx, uses_depth + 1, order);
                    }
                    Some(_) => {
                        log::warn!("grouping '{}' exceeds uses nesting limit", bare);
                    }
                    None => {
                        log::debug!("skipping uses of non-local grouping '{}'", name);
                    }
                }
            }
            "augment" => {
                let Some(target) = child.arg.as_deref() else {
                    continue;
                };
                let mut target_path: Vec<String> = target
                    .trim_start_matches('/')
                    .split('/')
                    .map(|seg| {
                        seg.split_once(':')
                            .map(|(_, n)| n)
                            .unwrap_or(seg)
                            .to_string()
                    })
                    .filter(|seg| !seg.is_empty())
                    .collect();
                walk_data(child, &mut target_path, table, ctx, uses_depth);
            }
            "rpc" | "action" | "notification" => {
                let Some(name) = child.arg.as_deref() else {
                    continue;
                };
                path.push(name.to_string());
                walk_data(child, path, table, ctx, uses_depth);
                path.pop();
            }
            "input" | "output" => {
                path.push(child.keyword.clone());
                walk_data(child, path, table, ctx, uses_depth);
                path.pop();
            }
            _ => {}
        }
    }
}

fn record_order(table: &mut TypeTable, name: &str, order: &mut usize) {
    table.node_orders.entry(name.to_string()).or_insert(*order);
    *order += 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"
    module test-port {
        yang-version 1.1;
        namespace "urn:example:test-port";
        prefix tp;

        import ietf-interfaces { prefix if; }

        typedef port-speed {
            type enumeration {
                enum "10M" { value 0; }
                enum "100M";
                enum "1G" { value 10; }
                enum "10G";
            }
        }

        typedef admin-speed { type port-speed; }

        identity port-role { }
        identity uplink { base port-role; }

        grouping counters {
            leaf rx-frames { type uint64; }
            leaf tx-frames { type uint64; }
        }

        container ports {
            list port {
                key "name";
                leaf name { type string; }
                leaf speed { type admin-speed; }
                leaf role { type identityref { base port-role; } }
                leaf offset { type decimal64 { fraction-digits 2; } }
                leaf weight {
                    type union {
                        type uint8;
                        type enumeration { enum auto; }
                    }
                }
                uses counters;
                choice mode {
                    case trunk {
                        leaf allowed-vlans { type string; }
                    }
                    case access {
                        leaf access-vlan { type uint16; }
                    }
                }
            }
        }

        augment "/if:interfaces/if:interface" {
            leaf frame-preemption { type boolean; }
        }
    }
    "#;

    #[test]
    fn test_statement_parser_quotes_and_comments() {
        let text = r#"
        module m {
            // line comment
            namespace "urn:a" + ":b"; /* block
                comment */
            prefix 'm';
        }
        "#;
        let root = parse_statements(text, "m.yang").unwrap();
        assert_eq!(root.keyword, "module");
        assert_eq!(root.child_arg("namespace"), Some("urn:a:b"));
        assert_eq!(root.child_arg("prefix"), Some("m"));
    }

    #[test]
    fn test_enum_values_explicit_and_positional() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();
        let speed = &table.typedefs["port-speed"];
        let YangType::Enumeration { name_to_value, value_to_name } = &speed.base else {
            panic!("expected enumeration, got {:?}", speed.base);
        };

        assert_eq!(name_to_value["10M"], 0);
        assert_eq!(name_to_value["100M"], 1);
        assert_eq!(name_to_value["1G"], 10);
        assert_eq!(name_to_value["10G"], 11);
        assert_eq!(value_to_name[&11], "10G");
    }

    #[test]
    fn test_typedef_chain_keeps_original() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        let speed = &table.types["ports/port/speed"];
        assert_eq!(speed.original.as_deref(), Some("admin-speed"));
        assert!(matches!(speed.base, YangType::Enumeration { .. }));
    }

    #[test]
    fn test_leaf_paths_include_choice_and_case() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        assert!(table
            .types
            .contains_key("ports/port/mode/trunk/allowed-vlans"));
        assert!(table.choice_names.contains("mode"));
        assert!(table.case_names.contains("trunk"));
        assert!(table.case_names.contains("access"));
    }

    #[test]
    fn test_grouping_expansion_and_list_keys() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        assert!(matches!(
            table.types["ports/port/rx-frames"].base,
            YangType::Uint64
        ));
        assert!(table.lists.contains("ports/port"));
        assert_eq!(table.list_keys["ports/port"], vec!["name".to_string()]);
    }

    #[test]
    fn test_augment_lands_on_foreign_path() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        assert!(matches!(
            table.types["interfaces/interface/frame-preemption"].base,
            YangType::Boolean
        ));
    }

    #[test]
    fn test_identityref_and_decimal64() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        assert_eq!(
            table.types["ports/port/role"].base,
            YangType::Identityref {
                base: "test-port:port-role".into()
            }
        );
        assert_eq!(
            table.types["ports/port/offset"].base,
            YangType::Decimal64 { fraction_digits: 2 }
        );
        assert_eq!(
            table.identities["test-port:uplink"].bases,
            ["test-port:port-role".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_union_member_order_preserved() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        let YangType::Union { members } = &table.types["ports/port/weight"].base else {
            panic!("expected union");
        };
        assert_eq!(members.len(), 2);
        assert!(matches!(members[0].base, YangType::Uint8));
        assert!(matches!(members[1].base, YangType::Enumeration { .. }));
    }

    #[test]
    fn test_malformed_module_is_schema_parse() {
        let err = parse_yang_module("module broken {", "broken.yang").unwrap_err();
        assert!(matches!(err, Error::SchemaParse { .. }));
    }

    #[test]
    fn test_node_orders_follow_declaration() {
        let table = parse_yang_module(MODULE, "test-port.yang").unwrap();

        assert!(table.node_orders["name"] < table.node_orders["speed"]);
        assert!(table.node_orders["speed"] < table.node_orders["role"]);
    }
}
