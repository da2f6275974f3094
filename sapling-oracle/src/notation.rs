//! Bracket notation for fixture trees.
//!
//! ```text
//! Block[IfStmt[Cond:"x>0"], Return["x"]]
//! ```
//!
//! A node is a kind, optionally followed by `:"value"` and by a bracketed,
//! comma-separated child list. A bare string literal is shorthand for a leaf
//! of kind `token`. Inside strings `\"` and `\\` are the only escapes.
//! Whitespace, newlines included, is insignificant between tokens.

use sapling::indextree::NodeId;
use sapling::{Span, SyntaxNode, Tree};

use crate::error::OracleError;
use crate::trace;

/// Kind given to bare string literals.
pub const TOKEN_KIND: &str = "token";

const MAX_DEPTH: usize = 256;

/// Turns source text into a syntax tree.
///
/// The harness only needs trees; anything that can produce a [`SyntaxNode`]
/// with spans can feed it.
pub trait FrontEnd {
    /// Parse one document.
    fn parse(&self, text: &str) -> Result<SyntaxNode, OracleError>;
}

/// The bracket notation front end.
#[derive(Debug, Clone, Copy, Default)]
pub struct Notation;

impl FrontEnd for Notation {
    fn parse(&self, text: &str) -> Result<SyntaxNode, OracleError> {
        parse(text)
    }
}

/// Parse a single tree written in bracket notation.
pub fn parse(text: &str) -> Result<SyntaxNode, OracleError> {
    let mut parser = Parser::new(text);
    parser.skip_whitespace();
    let root = parser.node(0)?;
    parser.skip_whitespace();
    if parser.pos < text.len() {
        return Err(OracleError::notation(
            parser.pos,
            "trailing input after the root node",
        ));
    }
    trace!(bytes = text.len(), "parsed notation");
    Ok(root)
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    /// Byte offset at which each line starts
    line_starts: Vec<usize>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let line_starts = core::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            text,
            pos: 0,
            line_starts,
        }
    }

    fn line_at(&self, offset: usize) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset) as u32
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Skip whitespace if it leads to `c`, and consume `c`.
    fn eat(&mut self, c: char) -> bool {
        let before = self.pos;
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.bump(c);
            true
        } else {
            self.pos = before;
            false
        }
    }

    fn node(&mut self, depth: usize) -> Result<SyntaxNode, OracleError> {
        if depth > MAX_DEPTH {
            return Err(OracleError::notation(
                self.pos,
                format!("nesting deeper than {MAX_DEPTH}"),
            ));
        }

        let start = self.pos;
        let mut node = match self.peek() {
            Some('"') => SyntaxNode::leaf(TOKEN_KIND, self.string()?),
            Some(c) if is_kind_char(c) => {
                let mut node = SyntaxNode::new(self.kind());
                if self.eat(':') {
                    self.skip_whitespace();
                    if self.peek() != Some('"') {
                        return Err(OracleError::notation(
                            self.pos,
                            "expected a string literal after `:`",
                        ));
                    }
                    node = node.with_value(self.string()?);
                }
                if self.eat('[') {
                    node.children = self.children(depth)?;
                }
                node
            }
            Some(c) => {
                return Err(OracleError::notation(
                    self.pos,
                    format!("unexpected `{c}`, expected a node"),
                ));
            }
            None => {
                return Err(OracleError::notation(
                    self.pos,
                    "unexpected end of input, expected a node",
                ));
            }
        };

        let last = self.pos.saturating_sub(1).max(start);
        node.span = Span::new(start, self.pos).with_lines(self.line_at(start), self.line_at(last));
        Ok(node)
    }

    /// Children after an opening `[`, through the closing `]`.
    fn children(&mut self, depth: usize) -> Result<Vec<SyntaxNode>, OracleError> {
        let mut children = Vec::new();
        if self.eat(']') {
            return Ok(children);
        }
        loop {
            self.skip_whitespace();
            children.push(self.node(depth + 1)?);
            if self.eat(']') {
                return Ok(children);
            }
            if !self.eat(',') {
                self.skip_whitespace();
                return Err(OracleError::notation(self.pos, "expected `,` or `]`"));
            }
            // trailing comma
            if self.eat(']') {
                return Ok(children);
            }
        }
    }

    fn kind(&mut self) -> &'a str {
        let start = self.pos;
        let len = self.text[start..]
            .find(|c: char| !is_kind_char(c))
            .unwrap_or(self.text.len() - start);
        self.pos += len;
        &self.text[start..self.pos]
    }

    /// A string literal starting at the opening quote.
    fn string(&mut self) -> Result<String, OracleError> {
        let open = self.pos;
        self.bump('"');
        let mut value = String::new();
        let mut chars = self.text[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, escaped @ ('"' | '\\'))) => value.push(escaped),
                    Some((j, other)) => {
                        return Err(OracleError::notation(
                            self.pos + j - 1,
                            format!("unknown escape `\\{other}`"),
                        ));
                    }
                    None => break,
                },
                c => value.push(c),
            }
        }
        Err(OracleError::notation(open, "unterminated string literal"))
    }
}

fn is_kind_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '"' | ':' | '[' | ']' | ',')
}

/// Write `tree` back in bracket notation, on one line.
pub fn render(tree: &Tree) -> String {
    enum Step {
        Node(NodeId),
        Text(&'static str),
    }

    let mut out = String::new();
    let mut stack = vec![Step::Node(tree.root())];
    while let Some(step) = stack.pop() {
        let id = match step {
            Step::Node(id) => id,
            Step::Text(text) => {
                out.push_str(text);
                continue;
            }
        };

        let kind = tree.kind(id).as_str();
        let value = tree.value(id);
        if kind == TOKEN_KIND
            && tree.is_leaf(id)
            && let Some(value) = value
        {
            render_string(value, &mut out);
            continue;
        }

        out.push_str(kind);
        if let Some(value) = value {
            out.push(':');
            render_string(value, &mut out);
        }
        if !tree.is_leaf(id) {
            out.push('[');
            stack.push(Step::Text("]"));
            let children: Vec<NodeId> = tree.children(id).collect();
            for (index, &child) in children.iter().enumerate().rev() {
                stack.push(Step::Node(child));
                if index > 0 {
                    stack.push(Step::Text(", "));
                }
            }
        }
    }
    out
}

fn render_string(value: &str, out: &mut String) {
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}
