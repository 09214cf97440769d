use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::ast::{Node, NodeKind};
use crate::debug_log;

/// Shared parsing state for one indexing run: the keyword table and an
/// identifier cache so repeated names share a single allocation across
/// every file of the run. Created once and passed explicitly into each
/// parse call.
pub struct ParseContext {
    keywords: HashMap<&'static str, Kw>,
    idents: HashMap<String, Rc<str>>,
    max_file_bytes: u64,
}

impl ParseContext {
    pub fn new(max_file_bytes: u64) -> Self {
        let keywords = HashMap::from([
            ("proc", Kw::Proc),
            ("func", Kw::Func),
            ("method", Kw::Method),
            ("iterator", Kw::Iterator),
            ("converter", Kw::Converter),
            ("macro", Kw::Macro),
            ("template", Kw::Template),
            ("type", Kw::Type),
            ("var", Kw::Var),
            ("let", Kw::Let),
            ("const", Kw::Const),
            ("when", Kw::When),
            ("elif", Kw::Elif),
            ("else", Kw::Else),
        ]);
        ParseContext {
            keywords,
            idents: HashMap::new(),
            max_file_bytes,
        }
    }

    fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(v) = self.idents.get(s) {
            return v.clone();
        }
        let v: Rc<str> = Rc::from(s);
        self.idents.insert(s.to_string(), v.clone());
        v
    }

    fn keyword(&self, s: &str) -> Option<Kw> {
        self.keywords.get(s).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kw {
    Proc,
    Func,
    Method,
    Iterator,
    Converter,
    Macro,
    Template,
    Type,
    Var,
    Let,
    Const,
    When,
    Elif,
    Else,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Ident,
    Keyword(Kw),
    Literal,
    Colon,
    Eq,
    Star,
    Op,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    PragmaOpen,
    PragmaClose,
    Comma,
    Semi,
    Backtick,
    Comment,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    text: Rc<str>,
    line: u32,
    col: u32,
    start: usize,
    end: usize,
    /// First token on its source line.
    line_start: bool,
}

/// Parse one file into a syntax tree. `None` means "no tree": the file
/// could not be read, looks binary, or exceeds the size guard. Callers
/// treat that as zero declarations, never as an error.
pub fn parse_file(path: &Path, ctx: &mut ParseContext) -> Option<Node> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > ctx.max_file_bytes {
        debug_log!("nimtags: skipping oversized file {}", path.display());
        return None;
    }
    let raw = std::fs::read(path).ok()?;
    if raw.contains(&0u8) {
        debug_log!("nimtags: skipping binary file {}", path.display());
        return None;
    }
    let text = String::from_utf8_lossy(&raw);
    Some(parse_source(&text, ctx))
}

/// Recognize declaration shapes in source text. Total over its input:
/// malformed code degrades to `Other` statements, never to a failure.
pub fn parse_source(src: &str, ctx: &mut ParseContext) -> Node {
    let toks = lex(src, ctx);
    let mut parser = Parser {
        src,
        toks: &toks,
        i: 0,
    };
    parser.parse_stmts(0)
}

// ───────────────────────────────────────────────────────────────────────
// Lexer
// ───────────────────────────────────────────────────────────────────────

const OP_CHARS: &[u8] = b"=+-*/<>@$~&%|!?^.:\\";

fn is_op_char(b: u8) -> bool {
    OP_CHARS.contains(&b)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    i: usize,
    line: u32,
    line_begin: usize,
    at_line_start: bool,
    depth: i32,
    toks: Vec<Token>,
}

fn lex(src: &str, ctx: &mut ParseContext) -> Vec<Token> {
    let mut lx = Lexer {
        src,
        bytes: src.as_bytes(),
        i: 0,
        line: 1,
        line_begin: 0,
        at_line_start: true,
        depth: 0,
        toks: Vec::new(),
    };
    lx.run(ctx);
    lx.toks
}

impl<'a> Lexer<'a> {
    fn run(&mut self, ctx: &mut ParseContext) {
        while self.i < self.bytes.len() {
            let b = self.bytes[self.i];
            match b {
                b'\n' => {
                    self.i += 1;
                    self.line += 1;
                    self.line_begin = self.i;
                    self.at_line_start = true;
                }
                b' ' | b'\t' | b'\r' => self.i += 1,
                b'#' => self.comment(),
                b'"' => {
                    let start = self.i;
                    self.string_lit(false);
                    self.push(TokKind::Literal, start, self.i, Rc::from(""));
                }
                b'\'' => self.char_lit(),
                b'`' => {
                    let start = self.i;
                    self.i += 1;
                    self.push(TokKind::Backtick, start, self.i, Rc::from("`"));
                }
                b'(' => self.delim(TokKind::LParen, 1),
                b')' => self.delim(TokKind::RParen, -1),
                b'[' => self.delim(TokKind::LBracket, 1),
                b']' => self.delim(TokKind::RBracket, -1),
                b'{' => {
                    if self.bytes.get(self.i + 1) == Some(&b'.') {
                        let start = self.i;
                        self.i += 2;
                        self.depth += 1;
                        self.push(TokKind::PragmaOpen, start, self.i, Rc::from("{."));
                    } else {
                        self.delim(TokKind::LBrace, 1);
                    }
                }
                b'}' => self.delim(TokKind::RBrace, -1),
                b',' => self.delim(TokKind::Comma, 0),
                b';' => self.delim(TokKind::Semi, 0),
                _ if is_ident_start(b) => self.ident(ctx),
                _ if b.is_ascii_digit() => self.number(),
                _ if is_op_char(b) => self.operator(),
                _ => self.i += 1,
            }
        }
    }

    fn push(&mut self, kind: TokKind, start: usize, end: usize, text: Rc<str>) {
        self.toks.push(Token {
            kind,
            text,
            line: self.line,
            col: (start.saturating_sub(self.line_begin)) as u32,
            start,
            end,
            line_start: self.at_line_start,
        });
        self.at_line_start = false;
    }

    fn delim(&mut self, kind: TokKind, delta: i32) {
        let start = self.i;
        self.i += 1;
        self.depth = (self.depth + delta).max(0);
        let text: Rc<str> = Rc::from(&self.src[start..self.i]);
        self.push(kind, start, start + 1, text);
    }

    fn comment(&mut self) {
        let start = self.i;
        let emit = self.at_line_start && self.depth == 0;
        let rest = &self.bytes[self.i..];
        let block = rest.starts_with(b"#[") || rest.starts_with(b"##[");
        if block {
            // Nested block comment; newlines inside still advance lines.
            self.i += if rest.starts_with(b"##[") { 3 } else { 2 };
            let mut nest = 1;
            while self.i < self.bytes.len() && nest > 0 {
                let b = self.bytes[self.i];
                if self.bytes[self.i..].starts_with(b"#[") {
                    nest += 1;
                    self.i += 2;
                } else if self.bytes[self.i..].starts_with(b"]#") {
                    nest -= 1;
                    self.i += 2;
                } else {
                    if b == b'\n' {
                        self.line += 1;
                        self.line_begin = self.i + 1;
                    }
                    self.i += 1;
                }
            }
        } else {
            while self.i < self.bytes.len() && self.bytes[self.i] != b'\n' {
                self.i += 1;
            }
        }
        if emit {
            self.push(TokKind::Comment, start, self.i, Rc::from(""));
            // A comment line does not make following code mid-line.
            self.at_line_start = true;
        }
    }

    /// Consume a string literal starting at `self.i`. `raw` disables
    /// backslash escapes (identifier-prefixed literals).
    fn string_lit(&mut self, raw: bool) {
        if self.bytes[self.i..].starts_with(b"\"\"\"") {
            self.i += 3;
            loop {
                if self.i >= self.bytes.len() {
                    return;
                }
                if self.bytes[self.i..].starts_with(b"\"\"\"") {
                    self.i += 3;
                    while self.bytes.get(self.i) == Some(&b'"') {
                        self.i += 1;
                    }
                    return;
                }
                if self.bytes[self.i] == b'\n' {
                    self.line += 1;
                    self.line_begin = self.i + 1;
                }
                self.i += 1;
            }
        }
        self.i += 1;
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b'"' => {
                    if raw && self.bytes.get(self.i + 1) == Some(&b'"') {
                        self.i += 2;
                        continue;
                    }
                    self.i += 1;
                    return;
                }
                b'\\' if !raw => self.i += 2,
                b'\n' => return,
                _ => self.i += 1,
            }
        }
    }

    fn char_lit(&mut self) {
        let start = self.i;
        let mut j = self.i + 1;
        if self.bytes.get(j) == Some(&b'\\') {
            j += 2;
            while j < self.bytes.len()
                && self.bytes[j] != b'\''
                && self.bytes[j] != b'\n'
                && j - start < 8
            {
                j += 1;
            }
        } else {
            // One (possibly multibyte) character.
            j += 1;
            while j < self.bytes.len() && (self.bytes[j] & 0xC0) == 0x80 {
                j += 1;
            }
        }
        if self.bytes.get(j) == Some(&b'\'') {
            self.i = j + 1;
            self.push(TokKind::Literal, start, self.i, Rc::from(""));
        } else {
            self.i += 1;
            self.push(TokKind::Op, start, start + 1, Rc::from("'"));
        }
    }

    fn ident(&mut self, ctx: &mut ParseContext) {
        let start = self.i;
        while self.i < self.bytes.len() && is_ident_char(self.bytes[self.i]) {
            self.i += 1;
        }
        // Identifier glued to a quote is a generalized raw string literal.
        if self.bytes.get(self.i) == Some(&b'"') {
            self.string_lit(true);
            self.push(TokKind::Literal, start, self.i, Rc::from(""));
            return;
        }
        let text = &self.src[start..self.i];
        match ctx.keyword(text) {
            Some(kw) => {
                let t: Rc<str> = Rc::from(text);
                self.push(TokKind::Keyword(kw), start, self.i, t);
            }
            None => {
                let t = ctx.intern(text);
                self.push(TokKind::Ident, start, self.i, t);
            }
        }
    }

    fn number(&mut self) {
        let start = self.i;
        while self.i < self.bytes.len() && (is_ident_char(self.bytes[self.i])) {
            self.i += 1;
        }
        // Decimal point, but not the `..` range operator.
        if self.bytes.get(self.i) == Some(&b'.')
            && self.bytes.get(self.i + 1).map(|b| b.is_ascii_digit()) == Some(true)
        {
            self.i += 1;
            while self.i < self.bytes.len() && is_ident_char(self.bytes[self.i]) {
                self.i += 1;
            }
        }
        // Type suffix: 0'i32
        if self.bytes.get(self.i) == Some(&b'\'')
            && self
                .bytes
                .get(self.i + 1)
                .map(|&b| is_ident_start(b))
                == Some(true)
        {
            self.i += 1;
            while self.i < self.bytes.len() && is_ident_char(self.bytes[self.i]) {
                self.i += 1;
            }
        }
        self.push(TokKind::Literal, start, self.i, Rc::from(""));
    }

    fn operator(&mut self) {
        let start = self.i;
        while self.i < self.bytes.len() && is_op_char(self.bytes[self.i]) {
            // Leave `.}` for the pragma-close token.
            if self.bytes[self.i] == b'.' && self.bytes.get(self.i + 1) == Some(&b'}') {
                if self.i == start {
                    self.i += 2;
                    self.depth = (self.depth - 1).max(0);
                    self.push(TokKind::PragmaClose, start, self.i, Rc::from(".}"));
                    return;
                }
                break;
            }
            self.i += 1;
        }
        let text = &self.src[start..self.i];
        match text {
            ":" => self.push(TokKind::Colon, start, self.i, Rc::from(":")),
            "=" => self.push(TokKind::Eq, start, self.i, Rc::from("=")),
            "*" => self.push(TokKind::Star, start, self.i, Rc::from("*")),
            // An export marker glued to a colon, as in `globalVar*: int`.
            "*:" => {
                self.push(TokKind::Star, start, start + 1, Rc::from("*"));
                self.push(TokKind::Colon, start + 1, start + 2, Rc::from(":"));
            }
            _ => {
                let t: Rc<str> = Rc::from(text);
                self.push(TokKind::Op, start, self.i, t);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────────
// Declaration recognizer
// ───────────────────────────────────────────────────────────────────────

fn bracket_delta(kind: TokKind) -> i32 {
    match kind {
        TokKind::LParen | TokKind::LBracket | TokKind::LBrace | TokKind::PragmaOpen => 1,
        TokKind::RParen | TokKind::RBracket | TokKind::RBrace | TokKind::PragmaClose => -1,
        _ => 0,
    }
}

fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, part) in s.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(part);
    }
    out
}

struct Parser<'t> {
    src: &'t str,
    toks: &'t [Token],
    i: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.toks.get(self.i)
    }

    fn peek_kind(&self) -> Option<TokKind> {
        self.peek().map(|t| t.kind)
    }

    fn bump(&mut self) {
        self.i += 1;
    }

    fn parse_stmts(&mut self, min_col: u32) -> Node {
        let line = self.peek().map(|t| t.line).unwrap_or(1);
        let mut stmts = Vec::new();
        while let Some(tok) = self.peek() {
            if tok.col < min_col {
                break;
            }
            stmts.push(self.parse_stmt());
        }
        Node::inner(NodeKind::StmtList, line, stmts)
    }

    fn parse_stmt(&mut self) -> Node {
        let Some(tok) = self.peek() else {
            return Node::empty(0);
        };
        let (col, line) = (tok.col, tok.line);
        match tok.kind {
            TokKind::Comment => {
                self.bump();
                Node::leaf(NodeKind::Comment, line, Rc::from(""))
            }
            TokKind::Keyword(kw) => match kw {
                Kw::Proc => self.parse_routine(NodeKind::ProcDef, col),
                Kw::Func => self.parse_routine(NodeKind::FuncDef, col),
                Kw::Method => self.parse_routine(NodeKind::MethodDef, col),
                Kw::Iterator => self.parse_routine(NodeKind::IteratorDef, col),
                Kw::Converter => self.parse_routine(NodeKind::ConverterDef, col),
                Kw::Macro => self.parse_routine(NodeKind::MacroDef, col),
                Kw::Template => self.parse_routine(NodeKind::TemplateDef, col),
                Kw::Type => self.parse_section(NodeKind::TypeSection, col),
                Kw::Var => self.parse_section(NodeKind::VarSection, col),
                Kw::Let => self.parse_section(NodeKind::LetSection, col),
                Kw::Const => self.parse_section(NodeKind::ConstSection, col),
                Kw::When => self.parse_when(col),
                // Stray branch keywords belong to constructs we do not model.
                Kw::Elif | Kw::Else => {
                    self.skip_statement(col);
                    Node::leaf(NodeKind::Other, line, Rc::from(""))
                }
            },
            _ => {
                self.skip_statement(col);
                Node::leaf(NodeKind::Other, line, Rc::from(""))
            }
        }
    }

    /// Consume the rest of the current statement: everything up to the
    /// next line-start token at or left of `col`, tracking bracket depth
    /// so multi-line argument lists stay inside the statement.
    fn skip_rest_of_statement(&mut self, col: u32) {
        let mut depth: i32 = 0;
        while let Some(tok) = self.peek() {
            if depth <= 0 && tok.line_start && tok.col <= col {
                break;
            }
            depth = (depth + bracket_delta(tok.kind)).max(0);
            self.bump();
        }
    }

    /// Like `skip_rest_of_statement`, but always consumes at least the
    /// token under the cursor; used for statements we do not model.
    fn skip_statement(&mut self, col: u32) {
        if self.peek().is_some() {
            self.bump();
        }
        self.skip_rest_of_statement(col);
    }

    /// A bare name: identifier or backtick-quoted token run. Does not
    /// consume anything it cannot use.
    fn parse_name(&mut self) -> Node {
        match self.peek() {
            Some(t) if t.kind == TokKind::Backtick => {
                let line = t.line;
                self.bump();
                let mut parts = Vec::new();
                while let Some(t) = self.peek() {
                    if t.kind == TokKind::Backtick {
                        self.bump();
                        break;
                    }
                    if t.line != line {
                        break;
                    }
                    parts.push(Node::leaf(NodeKind::Ident, t.line, t.text.clone()));
                    self.bump();
                }
                Node::inner(NodeKind::AccentQuoted, line, parts)
            }
            Some(t) if t.kind == TokKind::Ident => {
                let node = Node::leaf(NodeKind::Ident, t.line, t.text.clone());
                self.bump();
                node
            }
            Some(t) => Node::empty(t.line),
            None => Node::empty(0),
        }
    }

    /// A declaration name with its optional `*` export marker and, for
    /// section members, an optional trailing pragma block.
    fn parse_name_marked(&mut self, allow_pragma: bool) -> Node {
        let mut node = self.parse_name();
        if node.is_empty() {
            return node;
        }
        if self.peek_kind() == Some(TokKind::Star) {
            self.bump();
            let line = node.line;
            node = Node::inner(NodeKind::Exported, line, vec![node]);
        }
        if allow_pragma && self.peek_kind() == Some(TokKind::PragmaOpen) {
            self.bump();
            let line = node.line;
            let mut children = vec![node];
            children.extend(self.parse_pragma_entries());
            node = Node::inner(NodeKind::PragmaWrapped, line, children);
        }
        node
    }

    /// Literal-text capture until a stop token at bracket depth zero, or
    /// until the statement visibly continues on a fresh line.
    fn capture_text(&mut self, stop: impl Fn(TokKind) -> bool) -> Node {
        let mut depth: i32 = 0;
        let mut first: Option<usize> = None;
        let mut last = 0usize;
        while let Some(tok) = self.peek() {
            if depth <= 0 {
                if stop(tok.kind) {
                    break;
                }
                if tok.line_start {
                    break;
                }
            }
            depth = (depth + bracket_delta(tok.kind)).max(0);
            if first.is_none() {
                first = Some(self.i);
            }
            last = self.i;
            self.bump();
        }
        match first {
            Some(f) => {
                let span = &self.src[self.toks[f].start..self.toks[last].end];
                let text = collapse_ws(span);
                if text.is_empty() {
                    Node::empty(self.toks[f].line)
                } else {
                    Node::leaf(NodeKind::Verbatim, self.toks[f].line, Rc::from(text.as_str()))
                }
            }
            None => Node::empty(self.peek().map(|t| t.line).unwrap_or(0)),
        }
    }

    /// Pragma entries after a consumed `{.`, split on top-level commas.
    fn parse_pragma_entries(&mut self) -> Vec<Node> {
        let mut entries = Vec::new();
        loop {
            let entry = self.capture_text(|k| matches!(k, TokKind::Comma | TokKind::PragmaClose));
            if !entry.is_empty() {
                entries.push(entry);
            }
            match self.peek_kind() {
                Some(TokKind::Comma) => self.bump(),
                Some(TokKind::PragmaClose) => {
                    self.bump();
                    break;
                }
                _ => break,
            }
        }
        entries
    }

    fn parse_routine(&mut self, kind: NodeKind, col: u32) -> Node {
        let line = self.peek().map(|t| t.line).unwrap_or(0);
        self.bump(); // defining keyword

        let name = self.parse_name_marked(false);

        let mut generics = Vec::new();
        if self.peek_kind() == Some(TokKind::LBracket) {
            self.bump();
            loop {
                let entry = self.capture_text(|k| matches!(k, TokKind::Comma | TokKind::RBracket));
                if !entry.is_empty() {
                    generics.push(entry);
                }
                match self.peek_kind() {
                    Some(TokKind::Comma) => self.bump(),
                    Some(TokKind::RBracket) => {
                        self.bump();
                        break;
                    }
                    _ => break,
                }
            }
        }

        let mut formal = vec![Node::empty(line)];
        if self.peek_kind() == Some(TokKind::LParen) {
            self.bump();
            formal.extend(self.parse_param_groups());
        }
        if self.peek_kind() == Some(TokKind::Colon) {
            self.bump();
            formal[0] = self.capture_text(|k| matches!(k, TokKind::Eq | TokKind::PragmaOpen));
        }

        let mut pragmas = Vec::new();
        if self.peek_kind() == Some(TokKind::PragmaOpen) {
            self.bump();
            pragmas = self.parse_pragma_entries();
        }

        // Body and any forward-declaration tail; bodies are not modeled.
        self.skip_rest_of_statement(col);

        Node::inner(
            kind,
            line,
            vec![
                name,
                Node::inner(NodeKind::GenericParams, line, generics),
                Node::inner(NodeKind::FormalParams, line, formal),
                Node::inner(NodeKind::PragmaList, line, pragmas),
            ],
        )
    }

    /// Parameter groups after a consumed `(`. A group binds one or more
    /// names to a shared optional type and default.
    fn parse_param_groups(&mut self) -> Vec<Node> {
        let mut groups = Vec::new();
        let mut names: Vec<Node> = Vec::new();
        loop {
            let Some(tok) = self.peek() else { break };
            let line = tok.line;
            match tok.kind {
                TokKind::RParen => {
                    self.bump();
                    if !names.is_empty() {
                        groups.push(make_group(std::mem::take(&mut names), Node::empty(line), Node::empty(line)));
                    }
                    break;
                }
                TokKind::Comma | TokKind::Semi => self.bump(),
                TokKind::Ident | TokKind::Backtick => {
                    let name = self.parse_name();
                    if !name.is_empty() {
                        names.push(name);
                    }
                }
                TokKind::Colon => {
                    self.bump();
                    let typ = self.capture_text(|k| {
                        matches!(k, TokKind::Comma | TokKind::Semi | TokKind::Eq | TokKind::RParen)
                    });
                    let mut default = Node::empty(line);
                    if self.peek_kind() == Some(TokKind::Eq) {
                        self.bump();
                        default = self.capture_text(|k| {
                            matches!(k, TokKind::Comma | TokKind::Semi | TokKind::RParen)
                        });
                    }
                    groups.push(make_group(std::mem::take(&mut names), typ, default));
                }
                TokKind::Eq => {
                    self.bump();
                    let default = self.capture_text(|k| {
                        matches!(k, TokKind::Comma | TokKind::Semi | TokKind::RParen)
                    });
                    groups.push(make_group(std::mem::take(&mut names), Node::empty(line), default));
                }
                TokKind::PragmaOpen => {
                    // Parameter pragmas carry nothing we index.
                    self.bump();
                    self.parse_pragma_entries();
                }
                _ => self.bump(),
            }
        }
        groups
    }

    fn parse_section(&mut self, kind: NodeKind, col: u32) -> Node {
        let line = self.peek().map(|t| t.line).unwrap_or(0);
        self.bump(); // section keyword

        let mut members = Vec::new();
        match self.peek() {
            // Single-line form: `let x* = 5`.
            Some(t) if !t.line_start => self.parse_member_into(&mut members, col),
            // Block form: members indented under the section keyword.
            Some(t) if t.col > col => {
                while let Some(t) = self.peek() {
                    if !t.line_start || t.col <= col {
                        break;
                    }
                    if t.kind == TokKind::Comment {
                        members.push(Node::leaf(NodeKind::Comment, t.line, Rc::from("")));
                        self.bump();
                        continue;
                    }
                    let mcol = t.col;
                    self.parse_member_into(&mut members, mcol);
                }
            }
            _ => {}
        }
        Node::inner(kind, line, members)
    }

    /// One section member line. Multi-name declarations (`a, b*: int`)
    /// contribute one member node per name, in declared order. The
    /// member's type, value, and any indented body are skipped.
    fn parse_member_into(&mut self, members: &mut Vec<Node>, mcol: u32) {
        let start = self.i;
        loop {
            match self.peek_kind() {
                Some(TokKind::Ident) | Some(TokKind::Backtick) => {
                    let name = self.parse_name_marked(true);
                    if !name.is_empty() {
                        members.push(name);
                    }
                }
                Some(TokKind::Comma) => self.bump(),
                _ => break,
            }
        }
        if self.i == start {
            // Unrecognized member shape; swallow the line to keep moving.
            self.skip_statement(mcol);
        } else {
            self.skip_rest_of_statement(mcol);
        }
    }

    fn parse_when(&mut self, col: u32) -> Node {
        let line = self.peek().map(|t| t.line).unwrap_or(0);
        self.bump(); // when
        let mut branches = Vec::new();

        let cond = self.capture_text(|k| matches!(k, TokKind::Colon));
        if self.peek_kind() == Some(TokKind::Colon) {
            self.bump();
        }
        let body = self.parse_branch_body(col);
        branches.push(Node::inner(NodeKind::ElifBranch, line, vec![cond, body]));

        while let Some(tok) = self.peek() {
            if !tok.line_start || tok.col != col {
                break;
            }
            match tok.kind {
                TokKind::Keyword(Kw::Elif) => {
                    let bline = tok.line;
                    self.bump();
                    let cond = self.capture_text(|k| matches!(k, TokKind::Colon));
                    if self.peek_kind() == Some(TokKind::Colon) {
                        self.bump();
                    }
                    let body = self.parse_branch_body(col);
                    branches.push(Node::inner(NodeKind::ElifBranch, bline, vec![cond, body]));
                }
                TokKind::Keyword(Kw::Else) => {
                    let bline = tok.line;
                    self.bump();
                    if self.peek_kind() == Some(TokKind::Colon) {
                        self.bump();
                    }
                    let body = self.parse_branch_body(col);
                    branches.push(Node::inner(NodeKind::ElseBranch, bline, vec![body]));
                    break;
                }
                _ => break,
            }
        }
        Node::inner(NodeKind::WhenStmt, line, branches)
    }

    fn parse_branch_body(&mut self, branch_col: u32) -> Node {
        match self.peek() {
            Some(t) if !t.line_start => {
                let line = t.line;
                let stmt = self.parse_stmt();
                Node::inner(NodeKind::StmtList, line, vec![stmt])
            }
            Some(t) if t.col > branch_col => {
                let body_col = t.col;
                self.parse_stmts(body_col)
            }
            _ => Node::inner(NodeKind::StmtList, 0, Vec::new()),
        }
    }
}

fn make_group(mut names: Vec<Node>, typ: Node, default: Node) -> Node {
    let line = names.first().map(|n| n.line).unwrap_or(typ.line);
    names.push(typ);
    names.push(default);
    Node::inner(NodeKind::IdentDefs, line, names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Node {
        let mut ctx = ParseContext::new(1024 * 1024);
        parse_source(src, &mut ctx)
    }

    fn kinds(node: &Node) -> Vec<NodeKind> {
        node.children.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn empty_source_yields_empty_stmt_list() {
        let root = parse("");
        assert_eq!(root.kind, NodeKind::StmtList);
        assert!(root.children.is_empty());
    }

    #[test]
    fn proc_definition_shape() {
        let root = parse("proc publicProc*(x: int): int = x + 1\n");
        assert_eq!(kinds(&root), vec![NodeKind::ProcDef]);

        let def = &root.children[0];
        assert_eq!(def.line, 1);
        let name = &def.children[0];
        assert_eq!(name.kind, NodeKind::Exported);
        assert_eq!(name.children[0].text.as_ref(), "publicProc");

        let formal = &def.children[2];
        assert_eq!(formal.kind, NodeKind::FormalParams);
        assert_eq!(formal.children[0].text.as_ref(), "int"); // return type

        let group = &formal.children[1];
        assert_eq!(group.kind, NodeKind::IdentDefs);
        assert_eq!(group.children[0].text.as_ref(), "x");
        assert_eq!(group.children[1].text.as_ref(), "int");
        assert!(group.children[2].is_empty()); // no default
    }

    #[test]
    fn private_proc_has_plain_ident_name() {
        let root = parse("proc helper(x: int) = discard\n");
        let name = &root.children[0].children[0];
        assert_eq!(name.kind, NodeKind::Ident);
        assert_eq!(name.text.as_ref(), "helper");
    }

    #[test]
    fn routine_generics_defaults_and_pragmas() {
        let root = parse("proc g*[T, U: SomeInteger](a, b: T; c = 10) {.inline, raises: [].} = discard\n");
        let def = &root.children[0];

        let generics = &def.children[1];
        let texts: Vec<&str> = generics.children.iter().map(|n| n.text.as_ref()).collect();
        assert_eq!(texts, vec!["T", "U: SomeInteger"]);

        let formal = &def.children[2];
        assert!(formal.children[0].is_empty()); // no return type
        let g1 = &formal.children[1];
        assert_eq!(g1.children.len(), 4); // a, b, type, default
        assert_eq!(g1.children[2].text.as_ref(), "T");
        let g2 = &formal.children[2];
        assert_eq!(g2.children[0].text.as_ref(), "c");
        assert!(g2.children[1].is_empty());
        assert_eq!(g2.children[2].text.as_ref(), "10");

        let pragmas = &def.children[3];
        let texts: Vec<&str> = pragmas.children.iter().map(|n| n.text.as_ref()).collect();
        assert_eq!(texts, vec!["inline", "raises: []"]);
    }

    #[test]
    fn parenless_routine_with_return_type() {
        let root = parse("proc answer*: int = 42\n");
        let def = &root.children[0];
        let formal = &def.children[2];
        assert_eq!(formal.children.len(), 1); // return type only
        assert_eq!(formal.children[0].text.as_ref(), "int");
    }

    #[test]
    fn accent_quoted_routine_name() {
        let root = parse("proc `+`*(a, b: Money): Money = discard\n");
        let name = &root.children[0].children[0];
        assert_eq!(name.kind, NodeKind::Exported);
        let quoted = &name.children[0];
        assert_eq!(quoted.kind, NodeKind::AccentQuoted);
        assert_eq!(quoted.children[0].text.as_ref(), "+");
    }

    #[test]
    fn type_section_members_and_bodies() {
        let src = "type\n  Foo* = object\n    x: int\n  # internal\n  Bar = enum\n    beOne, beTwo\n";
        let root = parse(src);
        assert_eq!(kinds(&root), vec![NodeKind::TypeSection]);

        let section = &root.children[0];
        assert_eq!(
            kinds(section),
            vec![NodeKind::Exported, NodeKind::Comment, NodeKind::Ident]
        );
        assert_eq!(section.children[0].children[0].text.as_ref(), "Foo");
        assert_eq!(section.children[0].line, 2);
        assert_eq!(section.children[2].text.as_ref(), "Bar");
        assert_eq!(section.children[2].line, 5);
    }

    #[test]
    fn pragma_wrapped_member_name() {
        let root = parse("type\n  Legacy* {.deprecated.} = object\n");
        let member = &root.children[0].children[0];
        // Export marker binds tighter than the pragma wrapper here.
        assert_eq!(member.kind, NodeKind::PragmaWrapped);
        assert_eq!(member.children[0].kind, NodeKind::Exported);
        assert_eq!(member.children[0].children[0].text.as_ref(), "Legacy");
    }

    #[test]
    fn single_line_sections() {
        let root = parse("var globalVar*: int\nlet two = 2\nconst Answer* = 42\n");
        assert_eq!(
            kinds(&root),
            vec![NodeKind::VarSection, NodeKind::LetSection, NodeKind::ConstSection]
        );
        let var = &root.children[0];
        assert_eq!(var.children.len(), 1);
        assert_eq!(var.children[0].kind, NodeKind::Exported);
        let letsec = &root.children[1];
        assert_eq!(letsec.children[0].kind, NodeKind::Ident);
        assert_eq!(letsec.children[0].text.as_ref(), "two");
    }

    #[test]
    fn multi_name_member_splits() {
        let root = parse("var\n  a, b*: int\n");
        let section = &root.children[0];
        assert_eq!(section.children.len(), 2);
        assert_eq!(section.children[0].kind, NodeKind::Ident);
        assert_eq!(section.children[0].text.as_ref(), "a");
        assert_eq!(section.children[1].kind, NodeKind::Exported);
        assert_eq!(section.children[1].children[0].text.as_ref(), "b");
    }

    #[test]
    fn when_chain_structure() {
        let src = "when defined(windows):\n  proc osName*(): string = \"win\"\nelif defined(linux):\n  proc osName*(): string = \"linux\"\nelse:\n  proc osName*(): string = \"other\"\n";
        let root = parse(src);
        assert_eq!(kinds(&root), vec![NodeKind::WhenStmt]);

        let when = &root.children[0];
        assert_eq!(
            kinds(when),
            vec![NodeKind::ElifBranch, NodeKind::ElifBranch, NodeKind::ElseBranch]
        );
        let first = &when.children[0];
        assert_eq!(first.children[0].text.as_ref(), "defined(windows)");
        let body = first.children.last().unwrap();
        assert_eq!(body.kind, NodeKind::StmtList);
        assert_eq!(body.children[0].kind, NodeKind::ProcDef);
    }

    #[test]
    fn unmodeled_statements_are_inert() {
        let src = "import os\n\nif true:\n  proc hidden*() = discard\necho \"done\"\n";
        let root = parse(src);
        // The proc under `if` is swallowed with its enclosing statement.
        assert!(root.children.iter().all(|n| n.kind == NodeKind::Other));
    }

    #[test]
    fn comment_statements_are_marked() {
        let root = parse("# a file comment\nproc p*() = discard\n");
        assert_eq!(kinds(&root), vec![NodeKind::Comment, NodeKind::ProcDef]);
    }

    #[test]
    fn strings_do_not_confuse_the_lexer() {
        let src = "const greeting* = \"when proc # not code\"\nproc after*() = discard\n";
        let root = parse(src);
        assert_eq!(kinds(&root), vec![NodeKind::ConstSection, NodeKind::ProcDef]);
    }

    #[test]
    fn oversized_and_binary_files_yield_no_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ParseContext::new(8);

        let big = dir.path().join("big.nim");
        std::fs::write(&big, "proc p*() = discard\n").unwrap();
        assert!(parse_file(&big, &mut ctx).is_none());

        let mut ctx = ParseContext::new(1024);
        let binary = dir.path().join("blob.nim");
        std::fs::write(&binary, b"\x00\x01\x02").unwrap();
        assert!(parse_file(&binary, &mut ctx).is_none());

        let missing = dir.path().join("missing.nim");
        assert!(parse_file(&missing, &mut ctx).is_none());
    }
}
