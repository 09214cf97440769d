use std::path::Path;

use crate::ast::{Node, NodeKind};
use crate::debug_log;
use crate::parser::{parse_file, ParseContext};
use crate::scanner::FileEntry;
use crate::tags::{Tag, TagKind, TagRegistry};

/// Unwrap a name-bearing node to its plain text and export status.
///
/// An empty name means "no tag here"; callers discard it rather than
/// treating it as an error.
pub fn resolve_name(node: &Node) -> (String, bool) {
    match node.kind {
        NodeKind::Exported => match node.children.first() {
            Some(inner) => (resolve_name(inner).0, true),
            None => (String::new(), false),
        },
        NodeKind::PragmaWrapped => match node.children.first() {
            Some(inner) => resolve_name(inner),
            None => (String::new(), false),
        },
        NodeKind::AccentQuoted => {
            let mut name = String::new();
            for part in &node.children {
                name.push_str(&resolve_name(part).0);
            }
            (name, false)
        }
        NodeKind::Ident | NodeKind::Sym => (node.text.to_string(), false),
        NodeKind::SymChoice => match node.children.first() {
            Some(first) => resolve_name(first),
            None => (String::new(), false),
        },
        _ => (String::new(), false),
    }
}

/// Synthesize a one-line signature for a routine definition:
/// `[G1, G2](p1: T1 = d1, p2: T2): R {. A1, A2 .}`.
///
/// The generic, return-type, and pragma segments appear only when
/// present; the parameter segment is always emitted, even as `()`.
pub fn routine_signature(routine: &Node) -> String {
    let mut sig = String::new();

    if let Some(generics) = routine.children.get(1) {
        if !generics.children.is_empty() {
            sig.push('[');
            for (i, entry) in generics.children.iter().enumerate() {
                if i > 0 {
                    sig.push_str(", ");
                }
                sig.push_str(&entry.text);
            }
            sig.push(']');
        }
    }

    sig.push('(');
    let formal = routine.children.get(2);
    let mut first = true;
    if let Some(formal) = formal {
        for group in formal.children.iter().skip(1) {
            if group.kind != NodeKind::IdentDefs || group.children.len() < 2 {
                continue;
            }
            let n = group.children.len();
            let typ = &group.children[n - 2];
            let default = &group.children[n - 1];
            for name in &group.children[..n - 2] {
                if !first {
                    sig.push_str(", ");
                }
                first = false;
                sig.push_str(&resolve_name(name).0);
                if !typ.is_empty() {
                    sig.push_str(": ");
                    sig.push_str(&typ.text);
                }
                if !default.is_empty() {
                    sig.push_str(" = ");
                    sig.push_str(&default.text);
                }
            }
        }
    }
    sig.push(')');

    if let Some(ret) = formal.and_then(|f| f.children.first()) {
        if !ret.is_empty() && !ret.text.is_empty() {
            sig.push_str(": ");
            sig.push_str(&ret.text);
        }
    }

    if let Some(pragmas) = routine.children.get(3) {
        if !pragmas.children.is_empty() {
            sig.push_str(" {. ");
            for (i, entry) in pragmas.children.iter().enumerate() {
                if i > 0 {
                    sig.push_str(", ");
                }
                sig.push_str(&entry.text);
            }
            sig.push_str(" .}");
        }
    }

    sig
}

/// Walk one file's tree and collect its declaration tags in source
/// order. `include_private` bypasses the export check entirely.
pub fn collect_tags(root: &Node, file: &Path, include_private: bool) -> Vec<Tag> {
    let mut tags = Vec::new();
    visit(root, file, include_private, &mut tags);
    tags
}

fn visit(node: &Node, file: &Path, include_private: bool, tags: &mut Vec<Tag>) {
    match node.kind {
        NodeKind::Comment => {}

        NodeKind::ProcDef
        | NodeKind::FuncDef
        | NodeKind::MethodDef
        | NodeKind::IteratorDef
        | NodeKind::ConverterDef
        | NodeKind::MacroDef
        | NodeKind::TemplateDef => {
            let Some(kind) = TagKind::for_routine(node.kind) else {
                return;
            };
            let Some(name_node) = node.children.first() else {
                return;
            };
            let (name, exported) = resolve_name(name_node);
            if name.is_empty() {
                return;
            }
            if exported || include_private {
                tags.push(Tag {
                    name,
                    file: file.to_path_buf(),
                    line: node.line,
                    kind,
                    signature: routine_signature(node),
                });
            }
        }

        NodeKind::TypeSection
        | NodeKind::VarSection
        | NodeKind::LetSection
        | NodeKind::ConstSection => {
            let Some(kind) = TagKind::for_section(node.kind) else {
                return;
            };
            for member in &node.children {
                if member.kind == NodeKind::Comment {
                    continue;
                }
                let (name, exported) = resolve_name(member);
                if name.is_empty() {
                    continue;
                }
                if exported || include_private {
                    tags.push(Tag {
                        name,
                        file: file.to_path_buf(),
                        line: member.line,
                        kind,
                        signature: String::new(),
                    });
                }
            }
        }

        NodeKind::StmtList => {
            for child in &node.children {
                visit(child, file, include_private, tags);
            }
        }

        // Only the first branch is followed; declarations reachable only
        // through later branches are intentionally not indexed.
        NodeKind::WhenStmt => {
            if let Some(first) = node.children.first() {
                if let Some(body) = first.children.last() {
                    visit(body, file, include_private, tags);
                }
            }
        }

        _ => {}
    }
}

/// Index a batch of scanned files into a registry. A file whose parse
/// yields no tree contributes zero tags; it never aborts the run or
/// touches tags already collected from other files.
pub fn index_files(
    entries: &[FileEntry],
    include_private: bool,
    ctx: &mut ParseContext,
) -> TagRegistry {
    let mut registry = TagRegistry::new();
    for entry in entries {
        let Some(root) = parse_file(&entry.abs_path, ctx) else {
            debug_log!("nimtags: no tree for {}", entry.abs_path.display());
            continue;
        };
        registry.extend(collect_tags(&root, &entry.abs_path, include_private));
    }
    registry
}
