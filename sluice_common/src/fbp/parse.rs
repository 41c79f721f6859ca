//! FBP text to [`Graph`].
//!
//! Line oriented: a line is a comment, an export (`INPORT=` /
//! `OUTPORT=` / `OPTION=`), a declaration (`DECLARE=`) or a sequence of
//! comma separated connection statements. Export lines may name nodes
//! declared later; they are resolved once the whole text is read.

use std::collections::HashMap;

use sluice_core::FlowError;

use super::ast::{
    Graph, GraphConnection, GraphDeclaration, GraphExport, GraphNode, GraphOptionExport, PortRef,
    Position,
};

struct LineCursor<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    filename: &'a str,
}

impl<'a> LineCursor<'a> {
    fn new(text: &str, line: u32, filename: &'a str) -> Self {
        LineCursor {
            chars: text.chars().collect(),
            pos: 0,
            line,
            filename,
        }
    }

    fn col(&self) -> u32 {
        self.pos as u32 + 1
    }

    fn err(&self, message: impl Into<String>) -> FlowError {
        FlowError::Parse {
            filename: self.filename.to_string(),
            line: self.line,
            column: self.col(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
    }

    /// A `#` outside a quoted value comments out the rest of the line.
    fn at_eol(&self) -> bool {
        matches!(self.peek(), None | Some('#'))
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), FlowError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err(format!("expected {c:?}")))
        }
    }

    fn ident(&mut self, extra: &str) -> Result<String, FlowError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || extra.contains(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.err("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn number(&mut self) -> Result<u16, FlowError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("expected a number"));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<u16>()
            .map_err(|_| self.err(format!("index {text} is out of range")))
    }

    /// Consume a quoted value including quotes and escapes, unexpanded;
    /// the options layer does the unescaping.
    fn quoted_raw(&mut self) -> Result<String, FlowError> {
        let mut out = String::new();
        if self.peek() != Some('"') {
            return Err(self.err("expected '\"'"));
        }
        self.bump();
        out.push('"');
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some('\\') => {
                    out.push('\\');
                    match self.bump() {
                        Some(c) => out.push(c),
                        None => return Err(self.err("unterminated escape")),
                    }
                }
                Some('"') => {
                    out.push('"');
                    return Ok(out);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn rest(&mut self) -> String {
        let text: String = self.chars[self.pos..].iter().collect();
        self.pos = self.chars.len();
        text.trim().to_string()
    }
}

struct PendingExport {
    input: bool,
    node: String,
    port: PortRef,
    exported: String,
    position: Position,
}

struct PendingOption {
    node: String,
    member: String,
    exported: String,
    position: Position,
}

#[derive(Default)]
struct State {
    graph: Graph,
    names: HashMap<String, usize>,
    anonymous: usize,
    pending_exports: Vec<PendingExport>,
    pending_options: Vec<PendingOption>,
}

impl State {
    fn define_node(
        &mut self,
        name: String,
        component: String,
        meta: Vec<(String, String)>,
        position: Position,
        cur: &LineCursor,
    ) -> Result<usize, FlowError> {
        let name = if name == "_" {
            let synthesised = format!("#{}", self.anonymous);
            self.anonymous += 1;
            synthesised
        } else {
            name
        };
        if self.names.contains_key(&name) {
            return Err(cur.err(format!("node {name:?} is declared twice")));
        }
        let index = self.graph.nodes.len();
        self.names.insert(name.clone(), index);
        self.graph.nodes.push(GraphNode {
            name,
            component,
            meta,
            position,
        });
        Ok(index)
    }

    fn parse_portref(&mut self, cur: &mut LineCursor) -> Result<PortRef, FlowError> {
        let name = cur.ident("")?;
        if cur.eat('[') {
            let index = cur.number()?;
            cur.expect(']')?;
            Ok(PortRef::indexed(name, index))
        } else {
            Ok(PortRef::new(name))
        }
    }

    fn parse_meta_value(&mut self, cur: &mut LineCursor) -> Result<String, FlowError> {
        if cur.peek() == Some('"') {
            return cur.quoted_raw();
        }
        let mut out = String::new();
        while let Some(c) = cur.peek() {
            if c == ',' || c == ')' {
                break;
            }
            out.push(c);
            cur.bump();
        }
        let out = out.trim().to_string();
        if out.is_empty() {
            return Err(cur.err("empty option value"));
        }
        Ok(out)
    }

    fn parse_nodespec(&mut self, cur: &mut LineCursor) -> Result<usize, FlowError> {
        cur.skip_ws();
        let position = Position {
            line: cur.line,
            column: cur.col(),
        };
        let name = cur.ident("")?;
        if cur.eat('(') {
            let component = cur.ident("/-.")?;
            let mut meta = Vec::new();
            if cur.eat(':') {
                loop {
                    let key = cur.ident("-")?;
                    cur.expect('=')?;
                    let value = self.parse_meta_value(cur)?;
                    meta.push((key, value));
                    if !cur.eat(',') {
                        break;
                    }
                }
            }
            cur.expect(')')?;
            self.define_node(name, component, meta, position, cur)
        } else if name == "_" {
            Err(cur.err("anonymous node requires a component"))
        } else {
            self.names
                .get(&name)
                .copied()
                .ok_or_else(|| cur.err(format!("unknown node {name:?}")))
        }
    }

    fn parse_statement(&mut self, cur: &mut LineCursor) -> Result<(), FlowError> {
        let mut current = self.parse_nodespec(cur)?;
        loop {
            cur.skip_ws();
            if cur.at_eol() || cur.peek() == Some(',') {
                return Ok(());
            }
            let src_port = self.parse_portref(cur)?;
            cur.skip_ws();
            cur.expect('-')?;
            cur.expect('>')?;
            cur.skip_ws();
            let dst_port = self.parse_portref(cur)?;
            let next = self.parse_nodespec(cur)?;
            self.graph.connections.push(GraphConnection {
                src: current,
                src_port,
                dst: next,
                dst_port,
            });
            current = next;
        }
    }

    fn parse_statements(&mut self, cur: &mut LineCursor) -> Result<(), FlowError> {
        loop {
            self.parse_statement(cur)?;
            cur.skip_ws();
            if cur.eat(',') {
                continue;
            }
            if cur.at_eol() {
                return Ok(());
            }
            return Err(cur.err("expected ',' or end of line"));
        }
    }

    fn parse_port_export(&mut self, cur: &mut LineCursor, input: bool) -> Result<(), FlowError> {
        let position = Position {
            line: cur.line,
            column: cur.col(),
        };
        let node = cur.ident("")?;
        cur.expect('.')?;
        let port = self.parse_portref(cur)?;
        cur.expect(':')?;
        let exported = cur.ident("")?;
        cur.skip_ws();
        if !cur.at_eol() {
            return Err(cur.err("trailing characters after export"));
        }
        self.pending_exports.push(PendingExport {
            input,
            node,
            port,
            exported,
            position,
        });
        Ok(())
    }

    fn parse_option_export(&mut self, cur: &mut LineCursor) -> Result<(), FlowError> {
        let position = Position {
            line: cur.line,
            column: cur.col(),
        };
        let node = cur.ident("")?;
        cur.expect('.')?;
        let member = cur.ident("")?;
        cur.expect(':')?;
        let exported = cur.ident("")?;
        cur.skip_ws();
        if !cur.at_eol() {
            return Err(cur.err("trailing characters after export"));
        }
        self.pending_options.push(PendingOption {
            node,
            member,
            exported,
            position,
        });
        Ok(())
    }

    fn parse_declare(&mut self, cur: &mut LineCursor) -> Result<(), FlowError> {
        let name = cur.ident("-")?;
        cur.expect(':')?;
        let metatype = cur.ident("-")?;
        cur.expect(':')?;
        let contents = cur.rest();
        if contents.is_empty() {
            return Err(cur.err("declaration without contents"));
        }
        if self.graph.declarations.iter().any(|d| d.name == name) {
            return Err(cur.err(format!("declaration {name:?} appears twice")));
        }
        self.graph.declarations.push(GraphDeclaration {
            name,
            metatype,
            contents,
        });
        Ok(())
    }

    fn finish(mut self, filename: &str) -> Result<Graph, FlowError> {
        let resolve = |names: &HashMap<String, usize>, name: &str, position: Position| {
            names.get(name).copied().ok_or_else(|| FlowError::Parse {
                filename: filename.to_string(),
                line: position.line,
                column: position.column,
                message: format!("unknown node {name:?} in export"),
            })
        };
        for pending in self.pending_exports.drain(..) {
            let node = resolve(&self.names, &pending.node, pending.position)?;
            let export = GraphExport {
                node,
                port: pending.port,
                exported: pending.exported,
            };
            if pending.input {
                self.graph.exported_in.push(export);
            } else {
                self.graph.exported_out.push(export);
            }
        }
        for pending in self.pending_options.drain(..) {
            let node = resolve(&self.names, &pending.node, pending.position)?;
            self.graph.exported_options.push(GraphOptionExport {
                node,
                member: pending.member,
                exported: pending.exported,
            });
        }
        Ok(self.graph)
    }
}

/// Parse FBP text into a [`Graph`]. `filename` only decorates
/// diagnostics.
pub fn parse_graph(input: &str, filename: &str) -> Result<Graph, FlowError> {
    let mut state = State::default();
    for (index, raw) in input.lines().enumerate() {
        let mut cur = LineCursor::new(raw, index as u32 + 1, filename);
        cur.skip_ws();
        if cur.at_eol() {
            continue;
        }
        let save = cur.pos;
        let keyword = cur.ident("").ok();
        if let Some(word) = keyword {
            if cur.peek() == Some('=')
                && matches!(word.as_str(), "INPORT" | "OUTPORT" | "OPTION" | "DECLARE")
            {
                cur.bump();
                match word.as_str() {
                    "DECLARE" => state.parse_declare(&mut cur)?,
                    "OPTION" => state.parse_option_export(&mut cur)?,
                    other => state.parse_port_export(&mut cur, other == "INPORT")?,
                }
                continue;
            }
        }
        cur.pos = save;
        state.parse_statements(&mut cur)?;
    }
    state.finish(filename)
}
