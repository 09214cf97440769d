use std::rc::Rc;

/// Shape tag for one syntax-tree node.
///
/// Only the shapes that matter for declaration extraction are
/// distinguished; every other statement the recognizer encounters is
/// collapsed into `Other` with no children. The four section kinds must
/// stay contiguous and in type/var/let/const order: section members map
/// onto their tag kind by positional offset (see `TagKind::for_section`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    Empty,
    Ident,
    /// Identifier already bound to a declaration.
    Sym,
    Comment,
    Other,
    /// Literal source-text fragment (types, defaults, pragma entries).
    Verbatim,

    /// `name*` public marker; one child, the wrapped name.
    Exported,
    /// `name {.pragma.}`; first child is the inner name.
    PragmaWrapped,
    /// Backtick-quoted identifier; children are its parts in order.
    AccentQuoted,
    /// Ambiguous overload set; children are the candidate bindings.
    SymChoice,

    ProcDef,
    FuncDef,
    MethodDef,
    IteratorDef,
    ConverterDef,
    MacroDef,
    TemplateDef,

    TypeSection,
    VarSection,
    LetSection,
    ConstSection,

    StmtList,
    WhenStmt,
    ElifBranch,
    ElseBranch,
    /// One parameter group: name leaves, then type leaf, then default leaf.
    IdentDefs,
    GenericParams,
    FormalParams,
    PragmaList,
}

/// One node of the parsed tree.
///
/// Child layouts the extractor relies on:
/// - routine defs: `[name, GenericParams, FormalParams, PragmaList]`
///   (bodies are never materialized)
/// - `FormalParams`: child 0 is the return-type leaf (`Empty` when
///   absent), the rest are `IdentDefs` groups in declared order
/// - `IdentDefs`: name leaves, then a type leaf and a default leaf,
///   each `Empty` when the group does not declare one
/// - sections: children are the member name nodes (or `Comment`) in
///   declared order
/// - `WhenStmt`: children are branches; a branch's last child is its
///   body `StmtList`
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// 1-based source line.
    pub line: u32,
    /// Leaf text; empty for inner nodes.
    pub text: Rc<str>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn leaf(kind: NodeKind, line: u32, text: Rc<str>) -> Self {
        Node {
            kind,
            line,
            text,
            children: Vec::new(),
        }
    }

    pub fn inner(kind: NodeKind, line: u32, children: Vec<Node>) -> Self {
        Node {
            kind,
            line,
            text: Rc::from(""),
            children,
        }
    }

    pub fn empty(line: u32) -> Self {
        Node::leaf(NodeKind::Empty, line, Rc::from(""))
    }

    pub fn is_empty(&self) -> bool {
        self.kind == NodeKind::Empty
    }
}
