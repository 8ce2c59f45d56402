//! Structural editor for HCL configuration files.
//!
//! Parsing keeps every byte: rendering an unmodified [`Body`] reproduces the input
//! exactly, so untouched blocks stay byte-identical after an edit elsewhere in the
//! file. Expressions are kept as raw text; the parser only understands their extent
//! (brackets, quoted strings with `${}`/`%{}` templates, heredocs, comments).

use std::fmt;

/// A file (or part of one) the editor could not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// 1. Tree
// ---------------------------------------------------------------------------

/// Sequence of attributes, blocks and the text between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// Blank lines and comments between items.
    Trivia(String),
    Attribute(Attribute),
    Block(Block),
}

/// `name = expr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    prefix: String,
    name: String,
    eq: String,
    expr: String,
    trail: String,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw expression text.
    pub fn expr(&self) -> &str {
        &self.expr
    }
}

/// `kind "label" ... { body }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    prefix: String,
    kind: String,
    header: String,
    labels: Vec<String>,
    open: String,
    body: Body,
    close: String,
}

impl Body {
    pub fn parse(src: &str) -> Result<Body, ParseError> {
        let mut parser = Parser::new(src);
        parser.body(false)
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    /// No attributes and no blocks remain (comments and blank lines don't count).
    pub fn is_empty(&self) -> bool {
        !self
            .items
            .iter()
            .any(|i| matches!(i, Item::Attribute(_) | Item::Block(_)))
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.items.iter().find_map(|i| match i {
            Item::Attribute(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.items.len();
        self.items
            .retain(|i| !matches!(i, Item::Attribute(a) if a.name == name));
        self.items.len() != before
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.items.iter().filter_map(|i| match i {
            Item::Block(b) => Some(b),
            _ => None,
        })
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.items.iter_mut().filter_map(|i| match i {
            Item::Block(b) => Some(b),
            _ => None,
        })
    }

    /// Remove every block matching `pred`; returns how many were removed.
    pub fn remove_blocks<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&Block) -> bool,
    {
        let before = self.items.len();
        self.items
            .retain(|i| !matches!(i, Item::Block(b) if pred(b)));
        before - self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Append the items of `src` after a blank line.
    pub fn append_source(&mut self, src: &str) -> Result<(), ParseError> {
        let parsed = Body::parse(src)?;
        let rendered = self.render();
        if !rendered.is_empty() && !rendered.ends_with('\n') {
            self.items.push(Item::Trivia("\n".to_string()));
        }
        if !rendered.trim().is_empty() && !rendered.ends_with("\n\n") {
            self.items.push(Item::Trivia("\n".to_string()));
        }
        self.items.extend(parsed.items);
        Ok(())
    }

    /// Collapse runs of blank lines left behind by removals; drop leading and trailing ones.
    pub fn tidy(&mut self) {
        let mut out: Vec<Item> = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            let blank = is_blank(&item);
            let prev_blank = out.last().map(is_blank).unwrap_or(true);
            if blank && prev_blank {
                continue;
            }
            out.push(item);
        }
        while out.last().is_some_and(is_blank) {
            out.pop();
        }
        self.items = out;
    }

    /// Index after the last attribute or block (trailing blank lines stay last).
    fn insertion_index(&self) -> usize {
        self.items
            .iter()
            .rposition(|i| !matches!(i, Item::Trivia(_)))
            .map(|i| i + 1)
            .unwrap_or(self.items.len())
    }
}

fn is_blank(item: &Item) -> bool {
    matches!(item, Item::Trivia(t) if t.trim().is_empty())
}

impl Block {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.body.attribute(name)
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.body.remove_attribute(name)
    }

    /// Set `name = expr`, keeping the attribute's position and spacing when it exists.
    /// Returns whether the text changed.
    pub fn set_attribute(&mut self, name: &str, expr: &str) -> bool {
        let existing = self.body.items.iter_mut().find_map(|i| match i {
            Item::Attribute(a) if a.name == name => Some(a),
            _ => None,
        });
        if let Some(attr) = existing {
            if attr.expr == expr {
                return false;
            }
            attr.expr = expr.to_string();
            return true;
        }

        self.expand();
        let attr = Attribute {
            prefix: self.child_indent(),
            name: name.to_string(),
            eq: " = ".to_string(),
            expr: expr.to_string(),
            trail: "\n".to_string(),
        };
        let at = self.body.insertion_index();
        self.body.items.insert(at, Item::Attribute(attr));
        true
    }

    /// Append a nested block given as source text (indented to match the body).
    pub fn append_block_source(&mut self, src: &str) -> Result<(), ParseError> {
        self.expand();
        let indent = self.child_indent();
        let indented: String = src
            .lines()
            .map(|line| {
                if line.trim().is_empty() {
                    "\n".to_string()
                } else {
                    format!("{indent}{line}\n")
                }
            })
            .collect();
        let parsed = Body::parse(&indented)?;
        let at = self.body.insertion_index();
        self.body.items.splice(at..at, parsed.items);
        Ok(())
    }

    /// Indentation used by the block's children.
    fn child_indent(&self) -> String {
        self.body
            .items
            .iter()
            .find_map(|i| match i {
                Item::Attribute(a) => Some(a.prefix.clone()),
                Item::Block(b) => Some(b.prefix.clone()),
                Item::Trivia(_) => None,
            })
            .filter(|p| !p.is_empty() && !self.is_single_line())
            .unwrap_or_else(|| format!("{}  ", self.prefix))
    }

    fn is_single_line(&self) -> bool {
        !self.open.ends_with('\n')
    }

    /// Turn `x { a = 1 }` into a multi-line block so children can be added.
    fn expand(&mut self) {
        if !self.is_single_line() {
            return;
        }
        let indent = format!("{}  ", self.prefix);
        self.open = "{\n".to_string();
        for item in &mut self.body.items {
            match item {
                Item::Attribute(a) => {
                    a.prefix = indent.clone();
                    a.trail = format!("{}\n", a.trail.trim_end());
                }
                Item::Block(b) => {
                    b.prefix = indent.clone();
                    if !b.close.ends_with('\n') {
                        b.close = format!("{}\n", b.close.trim_end());
                    }
                }
                Item::Trivia(_) => {}
            }
        }
        self.close = format!("{}{}", self.prefix, self.close.trim_start());
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            item.fmt(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Trivia(text) => f.write_str(text),
            Item::Attribute(a) => a.fmt(f),
            Item::Block(b) => b.fmt(f),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}{}", self.prefix, self.name, self.eq, self.expr, self.trail)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}", self.prefix, self.kind, self.header, self.open)?;
        self.body.fmt(f)?;
        f.write_str(&self.close)
    }
}

/// `word` occurs in `text` delimited by non-identifier characters.
pub fn references_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    text.match_indices(word).any(|(at, _)| {
        let before = at.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(at + word.len()).copied();
        !before.is_some_and(is_word_byte) && !after.is_some_and(is_word_byte)
    })
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// ---------------------------------------------------------------------------
// 2. Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn err(&self, at: usize, message: impl Into<String>) -> ParseError {
        let line = self.bytes[..at.min(self.bytes.len())]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1;
        ParseError {
            line,
            message: message.into(),
        }
    }

    fn text(&self, from: usize) -> String {
        self.src[from..self.pos].to_string()
    }

    fn body(&mut self, nested: bool) -> Result<Body, ParseError> {
        let mut items = Vec::new();
        loop {
            let start = self.pos;
            self.skip_inline_space();
            let Some(c) = self.peek(0) else {
                if nested {
                    return Err(self.err(start, "unclosed block"));
                }
                if self.pos > start {
                    items.push(Item::Trivia(self.text(start)));
                }
                return Ok(Body { items });
            };
            match c {
                b'\n' => {
                    self.pos += 1;
                    items.push(Item::Trivia(self.text(start)));
                }
                b'\r' if self.peek(1) == Some(b'\n') => {
                    self.pos += 2;
                    items.push(Item::Trivia(self.text(start)));
                }
                b'#' => {
                    self.skip_trail()?;
                    items.push(Item::Trivia(self.text(start)));
                }
                b'/' if matches!(self.peek(1), Some(b'/') | Some(b'*')) => {
                    self.skip_trail()?;
                    items.push(Item::Trivia(self.text(start)));
                }
                b'}' if nested => {
                    self.pos = start;
                    return Ok(Body { items });
                }
                c if is_ident_start(c) => items.push(self.item(start)?),
                _ => {
                    let found = self.src[self.pos..].chars().next().unwrap_or('?');
                    return Err(self.err(self.pos, format!("unexpected character '{found}'")));
                }
            }
        }
    }

    fn item(&mut self, start: usize) -> Result<Item, ParseError> {
        let name_start = self.pos;
        self.skip_ident();
        let name = self.text(name_start);
        let after_name = self.pos;
        self.skip_inline_space();

        match self.peek(0) {
            Some(b'=') if self.peek(1) != Some(b'=') => {
                self.pos += 1;
                self.skip_inline_space();
                let eq = self.text(after_name);
                let expr_start = self.pos;
                self.scan_line_expr()?;
                let expr = self.src[expr_start..self.pos].trim_end().to_string();
                if expr.is_empty() {
                    return Err(self.err(expr_start, format!("missing value for '{name}'")));
                }
                self.pos = expr_start + expr.len();
                let trail_start = self.pos;
                self.skip_trail()?;
                Ok(Item::Attribute(Attribute {
                    prefix: self.src[start..name_start].to_string(),
                    name,
                    eq,
                    expr,
                    trail: self.text(trail_start),
                }))
            }
            Some(c) if c == b'"' || c == b'{' || is_ident_start(c) => {
                let mut labels = Vec::new();
                loop {
                    self.skip_inline_space();
                    match self.peek(0) {
                        Some(b'{') => break,
                        Some(b'"') => {
                            let label_start = self.pos;
                            self.skip_string()?;
                            labels.push(self.src[label_start + 1..self.pos - 1].to_string());
                        }
                        Some(c) if is_ident_start(c) => {
                            let label_start = self.pos;
                            self.skip_ident();
                            labels.push(self.text(label_start));
                        }
                        _ => return Err(self.err(self.pos, format!("expected '{{' after '{name}'"))),
                    }
                }
                let header = self.text(after_name);
                let open_start = self.pos;
                self.pos += 1;
                self.skip_trail()?;
                let open = self.text(open_start);
                let body = self.body(true)?;
                let close = self.closer()?;
                Ok(Item::Block(Block {
                    prefix: self.src[start..name_start].to_string(),
                    kind: name,
                    header,
                    labels,
                    open,
                    body,
                    close,
                }))
            }
            _ => Err(self.err(self.pos, format!("expected '=' or a block after '{name}'"))),
        }
    }

    fn closer(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.skip_inline_space();
        if self.peek(0) != Some(b'}') {
            return Err(self.err(self.pos, "expected '}'"));
        }
        self.pos += 1;
        self.skip_trail()?;
        Ok(self.text(start))
    }

    /// Spaces and comments up to and including the end of the line. Stops before any
    /// other character (single-line blocks continue on the same line).
    fn skip_trail(&mut self) -> Result<(), ParseError> {
        loop {
            self.skip_inline_space();
            match (self.peek(0), self.peek(1)) {
                (Some(b'\n'), _) => {
                    self.pos += 1;
                    return Ok(());
                }
                (Some(b'\r'), Some(b'\n')) => {
                    self.pos += 2;
                    return Ok(());
                }
                (Some(b'#'), _) | (Some(b'/'), Some(b'/')) => self.skip_line_comment(),
                (Some(b'/'), Some(b'*')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    /// Advance to the end of an expression: a newline, comment or unmatched closing
    /// bracket at nesting depth zero.
    fn scan_line_expr(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            let Some(c) = self.peek(0) else {
                return if depth == 0 {
                    Ok(())
                } else {
                    Err(self.err(self.pos, "unclosed bracket"))
                };
            };
            match c {
                b'\n' | b'\r' if depth == 0 => return Ok(()),
                b'#' if depth == 0 => return Ok(()),
                b'/' if depth == 0 && matches!(self.peek(1), Some(b'/') | Some(b'*')) => {
                    return Ok(())
                }
                b'#' => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment()?,
                b'"' => self.skip_string()?,
                b'<' if self.at_heredoc() => self.skip_heredoc()?,
                b'(' | b'[' | b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' | b']' | b'}' => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Inside a template interpolation: advance past the matching `}`.
    fn scan_template(&mut self) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            let Some(c) = self.peek(0) else {
                return Err(self.err(self.pos, "unterminated template interpolation"));
            };
            match c {
                b'"' => self.skip_string()?,
                b'<' if self.at_heredoc() => self.skip_heredoc()?,
                b'#' => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment()?,
                b'(' | b'[' | b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' | b']' | b'}' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_string(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match (self.peek(0), self.peek(1), self.peek(2)) {
                (None, _, _) | (Some(b'\n'), _, _) => {
                    return Err(self.err(start, "unterminated string"))
                }
                (Some(b'\\'), _, _) => self.pos += 2,
                (Some(b'"'), _, _) => {
                    self.pos += 1;
                    return Ok(());
                }
                (Some(b'$'), Some(b'$'), Some(b'{')) | (Some(b'%'), Some(b'%'), Some(b'{')) => {
                    self.pos += 3
                }
                (Some(b'$'), Some(b'{'), _) | (Some(b'%'), Some(b'{'), _) => {
                    self.pos += 2;
                    self.scan_template()?;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn at_heredoc(&self) -> bool {
        if self.peek(1) != Some(b'<') {
            return false;
        }
        let marker = if self.peek(2) == Some(b'-') {
            self.peek(3)
        } else {
            self.peek(2)
        };
        marker.is_some_and(is_ident_start)
    }

    fn skip_heredoc(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 2;
        if self.peek(0) == Some(b'-') {
            self.pos += 1;
        }
        let marker_start = self.pos;
        self.skip_ident();
        let marker = self.text(marker_start);
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
        loop {
            if self.pos >= self.bytes.len() {
                return Err(self.err(start, format!("unterminated heredoc '{marker}'")));
            }
            let line_start = self.pos;
            let line_end = self.src[line_start..]
                .find('\n')
                .map(|i| line_start + i)
                .unwrap_or(self.bytes.len());
            if self.src[line_start..line_end].trim() == marker {
                self.pos = line_end;
                return Ok(());
            }
            self.pos = (line_end + 1).min(self.bytes.len());
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == b'\n' {
                return;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        match self.src[self.pos + 2..].find("*/") {
            Some(i) => {
                self.pos += 2 + i + 2;
                Ok(())
            }
            None => Err(self.err(start, "unterminated comment")),
        }
    }

    fn skip_inline_space(&mut self) {
        while matches!(self.peek(0), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn skip_ident(&mut self) {
        while self.peek(0).is_some_and(is_ident_char) {
            self.pos += 1;
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# header comment
terraform {
  required_version = ">= 1.0"
}

module "db" {
  source   = "../../modules/db" // trailing
  inputs   = { deployment_id = var.deployment_id }
  tags = merge(var.tags, {
    name = "db-${var.cluster.name}"
  })
  script = <<-EOT
    echo "{ not a block"
  EOT
  /* block
     comment */
}

locals { a = 1 }
"#;

    #[test]
    fn unmodified_tree_renders_identically() {
        let body = Body::parse(SAMPLE).unwrap();
        assert_eq!(body.render(), SAMPLE);
    }

    #[test]
    fn reads_structure() {
        let body = Body::parse(SAMPLE).unwrap();
        let kinds: Vec<&str> = body.blocks().map(Block::kind).collect();
        assert_eq!(kinds, vec!["terraform", "module", "locals"]);

        let db = body.blocks().nth(1).unwrap();
        assert_eq!(db.labels(), ["db".to_string()]);
        assert_eq!(db.attribute("source").unwrap().expr(), "\"../../modules/db\"");
        assert!(db.attribute("tags").unwrap().expr().ends_with("})"));
        assert!(db.attribute("script").unwrap().expr().ends_with("EOT"));
    }

    #[test]
    fn set_and_remove_attributes() {
        let mut body = Body::parse(SAMPLE).unwrap();
        let db = body.blocks_mut().nth(1).unwrap();
        assert!(db.set_attribute("inputs", "{}"));
        assert!(!db.set_attribute("inputs", "{}"));
        assert!(db.set_attribute("cluster", "var.cluster"));
        assert!(db.remove_attribute("tags"));

        let out = body.render();
        assert!(out.contains("  inputs   = {}\n"));
        assert!(out.contains("  cluster = var.cluster\n}\n"));
        assert!(!out.contains("merge("));
        assert!(out.contains("locals { a = 1 }\n"));
    }

    #[test]
    fn single_line_block_expands_on_insert() {
        let mut body = Body::parse("locals { a = 1 }\n").unwrap();
        body.blocks_mut().next().unwrap().set_attribute("b", "2");
        assert_eq!(body.render(), "locals {\n  a = 1\n  b = 2\n}\n");
    }

    #[test]
    fn nested_block_is_appended_with_indentation() {
        let mut body = Body::parse("resource \"x\" \"y\" {\n  name = \"n\"\n}\n").unwrap();
        body.blocks_mut()
            .next()
            .unwrap()
            .append_block_source("lifecycle {\n  prevent_destroy = false\n}\n")
            .unwrap();
        assert_eq!(
            body.render(),
            "resource \"x\" \"y\" {\n  name = \"n\"\n  lifecycle {\n    prevent_destroy = false\n  }\n}\n"
        );
    }

    #[test]
    fn removing_blocks_and_tidying_blank_lines() {
        let src = "variable \"a\" {}\n\nvariable \"b\" {}\n\nvariable \"c\" {}\n";
        let mut body = Body::parse(src).unwrap();
        assert_eq!(body.remove_blocks(|b| b.label(0) == Some("b")), 1);
        body.tidy();
        assert_eq!(body.render(), "variable \"a\" {}\n\nvariable \"c\" {}\n");
    }

    #[test]
    fn append_source_separates_with_blank_line() {
        let mut body = Body::parse("variable \"a\" {}").unwrap();
        body.append_source("variable \"b\" {}\n").unwrap();
        assert_eq!(body.render(), "variable \"a\" {}\n\nvariable \"b\" {}\n");
    }

    #[test]
    fn comments_only_file_is_empty() {
        let body = Body::parse("# nothing here\n\n/* still nothing */\n").unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn template_braces_do_not_close_blocks() {
        let src = "output \"x\" {\n  value = \"%{ if var.a }}{${var.b}%{ endif }\"\n}\n";
        let body = Body::parse(src).unwrap();
        assert_eq!(body.blocks().count(), 1);
        assert_eq!(body.render(), src);
    }

    #[test]
    fn malformed_input_reports_line() {
        let err = Body::parse("a = 1\nmodule \"x\" {\n  b = (\n").unwrap_err();
        assert!(err.line >= 3, "got {err}");
        assert!(Body::parse("= 3\n").is_err());
    }

    #[test]
    fn heredoc_bodies_are_opaque() {
        let src = "resource \"aws_instance\" \"web\" {\n  user_data = <<EOT\n}\nmodule \"fake\" {\nEOT\n  settings = var.settings\n  name     = \"web\"\n}\n";
        let mut body = Body::parse(src).unwrap();
        assert_eq!(body.render(), src);

        let web = body.blocks_mut().next().unwrap();
        assert_eq!(
            web.attribute("user_data").unwrap().expr(),
            "<<EOT\n}\nmodule \"fake\" {\nEOT"
        );
        assert!(web.remove_attribute("settings"));
        assert_eq!(
            body.render(),
            "resource \"aws_instance\" \"web\" {\n  user_data = <<EOT\n}\nmodule \"fake\" {\nEOT\n  name     = \"web\"\n}\n"
        );
    }

    #[test]
    fn nested_templates_keep_their_braces() {
        let src = "locals {\n  name = \"a-${lookup(var.m, \"k-${var.env}\", \"}\")}-z\"\n  next = 1\n}\n";
        let body = Body::parse(src).unwrap();
        let locals = body.blocks().next().unwrap();
        assert_eq!(
            locals.attribute("name").unwrap().expr(),
            "\"a-${lookup(var.m, \"k-${var.env}\", \"}\")}-z\""
        );
        assert_eq!(locals.attribute("next").unwrap().expr(), "1");
        assert_eq!(body.render(), src);
    }

    #[test]
    fn block_comments_inside_and_between_items() {
        let src = "/* leading\n   { not a block\n*/\nmodule \"m\" {\n  a = [1, /* inline } */ 2]\n  b = 2 /* trailing */\n}\n";
        let mut body = Body::parse(src).unwrap();
        assert_eq!(body.render(), src);
        assert_eq!(body.blocks().count(), 1);

        let m = body.blocks_mut().next().unwrap();
        assert_eq!(m.attribute("a").unwrap().expr(), "[1, /* inline } */ 2]");
        assert_eq!(m.attribute("b").unwrap().expr(), "2");
        assert!(m.remove_attribute("b"));
        assert_eq!(
            body.render(),
            "/* leading\n   { not a block\n*/\nmodule \"m\" {\n  a = [1, /* inline } */ 2]\n}\n"
        );
    }

    #[test]
    fn word_references() {
        assert!(references_word("var.deployment_id", "deployment_id"));
        assert!(references_word("merge(var.cc_metadata.tags)", "cc_metadata"));
        assert!(!references_word("var.deployment_identifier", "deployment_id"));
        assert!(!references_word("local.tfstate", "state"));
    }
}
