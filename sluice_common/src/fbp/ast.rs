//! The parser's intermediate tree.
//!
//! Nodes are referenced by index in declaration order; connections,
//! exports and declarations keep the order they appeared in. `Display`
//! writes the graph back out as FBP text, so a graph survives a
//! parse/unparse round trip up to the naming of anonymous nodes.

use serde::{Deserialize, Serialize};

/// Source location, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A declared node: its graph-unique name, the component identifier it
/// resolves through, and the raw inline `key=value` metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub component: String,
    #[serde(default)]
    pub meta: Vec<(String, String)>,
    pub position: Position,
}

impl GraphNode {
    /// Anonymous nodes get synthesised names that no identifier can
    /// collide with.
    pub fn is_anonymous(&self) -> bool {
        self.name.starts_with('#')
    }
}

/// A port reference: name plus the sub-port index for array ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub name: String,
    pub index: Option<u16>,
}

impl PortRef {
    pub fn new(name: impl Into<String>) -> Self {
        PortRef {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<String>, index: u16) -> Self {
        PortRef {
            name: name.into(),
            index: Some(index),
        }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self.index {
            Some(index) => write!(fmt, "{}[{}]", self.name, index),
            None => write!(fmt, "{}", self.name),
        }
    }
}

/// One edge: source node/port to destination node/port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConnection {
    pub src: usize,
    pub src_port: PortRef,
    pub dst: usize,
    pub dst_port: PortRef,
}

/// An `INPORT=` / `OUTPORT=` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub node: usize,
    pub port: PortRef,
    pub exported: String,
}

/// An `OPTION=` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphOptionExport {
    pub node: usize,
    pub member: String,
    pub exported: String,
}

/// A `DECLARE=` line: name, metatype and the raw contents handed to
/// the metatype creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDeclaration {
    pub name: String,
    pub metatype: String,
    pub contents: String,
}

/// A parsed FBP program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub connections: Vec<GraphConnection>,
    pub exported_in: Vec<GraphExport>,
    pub exported_out: Vec<GraphExport>,
    pub exported_options: Vec<GraphOptionExport>,
    pub declarations: Vec<GraphDeclaration>,
}

impl Graph {
    /// Indices of nodes that appear in no connection.
    fn standalone_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| {
                !self
                    .connections
                    .iter()
                    .any(|c| c.src == i || c.dst == i)
            })
            .collect()
    }

    fn write_nodespec(
        &self,
        fmt: &mut std::fmt::Formatter<'_>,
        index: usize,
        emitted: &mut Vec<bool>,
    ) -> Result<(), std::fmt::Error> {
        let node = &self.nodes[index];
        if emitted[index] {
            write!(fmt, "{}", node.name)?;
            return Ok(());
        }
        emitted[index] = true;
        if node.is_anonymous() {
            write!(fmt, "_")?;
        } else {
            write!(fmt, "{}", node.name)?;
        }
        write!(fmt, "({}", node.component)?;
        for (i, (key, value)) in node.meta.iter().enumerate() {
            write!(fmt, "{}{key}={value}", if i == 0 { ":" } else { "," })?;
        }
        write!(fmt, ")")
    }
}

impl std::fmt::Display for Graph {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        for decl in &self.declarations {
            writeln!(
                fmt,
                "DECLARE={}:{}:{}",
                decl.name, decl.metatype, decl.contents
            )?;
        }
        let mut emitted = vec![false; self.nodes.len()];
        for index in self.standalone_nodes() {
            self.write_nodespec(fmt, index, &mut emitted)?;
            writeln!(fmt)?;
        }
        // greedy chaining: while the next connection starts where this
        // one ended, extend the statement
        let mut i = 0;
        while i < self.connections.len() {
            self.write_nodespec(fmt, self.connections[i].src, &mut emitted)?;
            loop {
                let conn = &self.connections[i];
                write!(fmt, " {} -> {} ", conn.src_port, conn.dst_port)?;
                self.write_nodespec(fmt, conn.dst, &mut emitted)?;
                if i + 1 < self.connections.len() && self.connections[i + 1].src == conn.dst {
                    i += 1;
                } else {
                    break;
                }
            }
            writeln!(fmt)?;
            i += 1;
        }
        for export in &self.exported_in {
            writeln!(
                fmt,
                "INPORT={}.{}:{}",
                self.nodes[export.node].name, export.port, export.exported
            )?;
        }
        for export in &self.exported_out {
            writeln!(
                fmt,
                "OUTPORT={}.{}:{}",
                self.nodes[export.node].name, export.port, export.exported
            )?;
        }
        for export in &self.exported_options {
            writeln!(
                fmt,
                "OPTION={}.{}:{}",
                self.nodes[export.node].name, export.member, export.exported
            )?;
        }
        Ok(())
    }
}
