//! Accumulates nodes, connections and exports, then emits an immutable
//! composite node type.

use std::rc::Rc;

use crate::flow::{ChildSpec, Connection, ExportedPort, FlowRecord, OptionLink, StaticFlow};
use crate::options::{NamedOptions, Options, OptionSpec, OptionsLayout};
use crate::packet::PacketType;
use crate::{
    FlowError, NodeType, NodeTypeFlags, PortIndex, PortSpec, Resolver, TypeDescription, ERROR_PORT,
};

#[derive(Debug)]
struct BuilderNode {
    name: String,
    node_type: Rc<NodeType>,
    options: Options,
}

#[derive(Debug)]
struct ExportEntry {
    /// The composite-facing port.
    spec: PortSpec,
    /// One target per running index the port covers.
    targets: Vec<ExportedPort>,
}

/// Stateful accumulator for a composite node type.
///
/// After [`FlowBuilder::get_node_type`] the builder is finalised: every
/// mutating call fails with [`FlowError::AlreadyFinalised`] and repeated
/// calls return the same type.
#[derive(Debug, Default)]
pub struct FlowBuilder {
    nodes: Vec<BuilderNode>,
    connections: Vec<Connection>,
    exported_in: Vec<ExportEntry>,
    exported_out: Vec<ExportEntry>,
    exported_members: Vec<OptionSpec>,
    option_links: Vec<OptionLink>,
    desc: TypeDescription,
    built: Option<Rc<NodeType>>,
}

/// Resolve an optional array index against a port descriptor into the
/// final running index.
fn resolve_port_index(
    base: PortIndex,
    spec: &PortSpec,
    index: Option<u16>,
) -> Result<PortIndex, FlowError> {
    match (spec.array_size, index) {
        (0, None) => Ok(base),
        (0, Some(_)) => Err(FlowError::NotArrayPort(spec.name.clone())),
        (_, None) => Err(FlowError::MissingIndex(spec.name.clone())),
        (size, Some(i)) if i < size => Ok(base + i),
        (size, Some(i)) => Err(FlowError::PortIndexOutOfRange {
            port: spec.name.clone(),
            index: i,
            size,
        }),
    }
}

impl FlowBuilder {
    pub fn new() -> Self {
        FlowBuilder::default()
    }

    fn check_open(&self) -> Result<(), FlowError> {
        if self.built.is_some() {
            return Err(FlowError::AlreadyFinalised);
        }
        Ok(())
    }

    fn node_index(&self, name: &str) -> Result<usize, FlowError> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .ok_or_else(|| FlowError::NotFound(format!("node {name:?}")))
    }

    /// Record a child node. Names must be unique and non-empty.
    pub fn add_node(
        &mut self,
        name: &str,
        node_type: Rc<NodeType>,
        options: Options,
    ) -> Result<(), FlowError> {
        self.check_open()?;
        if name.is_empty() {
            return Err(FlowError::InvalidArgument("empty node name".into()));
        }
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(FlowError::DuplicateName(name.to_string()));
        }
        self.nodes.push(BuilderNode {
            name: name.to_string(),
            node_type,
            options,
        });
        Ok(())
    }

    /// Resolve `type_name`, parse `option_strings` against the resolved
    /// type's layout (they win over resolver defaults) and record the
    /// node.
    pub fn add_node_by_type<S: AsRef<str>>(
        &mut self,
        name: &str,
        type_name: &str,
        resolver: &dyn Resolver,
        option_strings: &[S],
    ) -> Result<(), FlowError> {
        self.check_open()?;
        let resolved = resolver
            .resolve(type_name)
            .ok_or_else(|| FlowError::NotFound(format!("node type {type_name:?}")))?;
        let mut named = resolved.options;
        named.merge_from(NamedOptions::from_strv(
            option_strings,
            resolved.node_type.options_layout(),
        )?);
        let options = resolved.node_type.resolve_options(&named)?;
        self.add_node(name, resolved.node_type, options)
    }

    /// Connect an output port to an input port, by name. `src_index` /
    /// `dst_index` select the sub-port of an array port and must be
    /// absent for scalar ports.
    pub fn connect(
        &mut self,
        src: &str,
        src_port: &str,
        src_index: Option<u16>,
        dst: &str,
        dst_port: &str,
        dst_index: Option<u16>,
    ) -> Result<(), FlowError> {
        self.check_open()?;
        let src_node = self.node_index(src)?;
        let dst_node = self.node_index(dst)?;
        let (src_base, src_spec) = self.nodes[src_node]
            .node_type
            .find_port_out(src_port)
            .ok_or_else(|| FlowError::NotFound(format!("output port {src}.{src_port}")))?;
        let (dst_base, dst_spec) = self.nodes[dst_node]
            .node_type
            .find_port_in(dst_port)
            .ok_or_else(|| FlowError::NotFound(format!("input port {dst}.{dst_port}")))?;
        if !dst_spec.packet_type.accepts(&src_spec.packet_type)
            && src_spec.packet_type != PacketType::Any
        {
            return Err(FlowError::WrongType {
                expected: dst_spec.packet_type.to_string(),
                actual: src_spec.packet_type.to_string(),
            });
        }
        let src_port = resolve_port_index(src_base, &src_spec, src_index)?;
        let dst_port = resolve_port_index(dst_base, &dst_spec, dst_index)?;
        self.connections.push(Connection {
            src: src_node,
            src_port,
            dst: dst_node,
            dst_port,
            id: 0,
        });
        Ok(())
    }

    /// Connect by running port indices, bounds-checked against the port
    /// counts only.
    pub fn connect_by_index(
        &mut self,
        src: &str,
        src_port: PortIndex,
        dst: &str,
        dst_port: PortIndex,
    ) -> Result<(), FlowError> {
        self.check_open()?;
        let src_node = self.node_index(src)?;
        let dst_node = self.node_index(dst)?;
        let out_count = self.nodes[src_node].node_type.port_out_count();
        if src_port >= out_count && src_port != ERROR_PORT {
            return Err(FlowError::PortIndexOutOfRange {
                port: src.to_string(),
                index: src_port,
                size: out_count,
            });
        }
        let in_count = self.nodes[dst_node].node_type.port_in_count();
        if dst_port >= in_count {
            return Err(FlowError::PortIndexOutOfRange {
                port: dst.to_string(),
                index: dst_port,
                size: in_count,
            });
        }
        self.connections.push(Connection {
            src: src_node,
            src_port,
            dst: dst_node,
            dst_port,
            id: 0,
        });
        Ok(())
    }

    fn export_port(
        &mut self,
        direction_in: bool,
        node: &str,
        port: &str,
        index: Option<u16>,
        exported: &str,
    ) -> Result<(), FlowError> {
        self.check_open()?;
        if exported.is_empty() {
            return Err(FlowError::InvalidArgument("empty exported port name".into()));
        }
        let node_index = self.node_index(node)?;
        let node_type = &self.nodes[node_index].node_type;
        let found = if direction_in {
            node_type.find_port_in(port)
        } else {
            node_type.find_port_out(port)
        };
        let (base, spec) =
            found.ok_or_else(|| FlowError::NotFound(format!("port {node}.{port}")))?;
        let table = if direction_in {
            &self.exported_in
        } else {
            &self.exported_out
        };
        if table.iter().any(|e| e.spec.name == exported) {
            return Err(FlowError::DuplicatePort(exported.to_string()));
        }
        let entry = match (spec.array_size, index) {
            (0, None) => ExportEntry {
                spec: PortSpec::new(exported, spec.packet_type.clone()),
                targets: vec![ExportedPort {
                    child: node_index,
                    port: base,
                }],
            },
            (0, Some(_)) => return Err(FlowError::NotArrayPort(spec.name.clone())),
            // exporting a whole array keeps it an array on the composite
            (size, None) => ExportEntry {
                spec: PortSpec::array(exported, spec.packet_type.clone(), size),
                targets: (0..size)
                    .map(|i| ExportedPort {
                        child: node_index,
                        port: base + i,
                    })
                    .collect(),
            },
            (size, Some(i)) if i < size => ExportEntry {
                spec: PortSpec::new(exported, spec.packet_type.clone()),
                targets: vec![ExportedPort {
                    child: node_index,
                    port: base + i,
                }],
            },
            (size, Some(i)) => {
                return Err(FlowError::PortIndexOutOfRange {
                    port: spec.name.clone(),
                    index: i,
                    size,
                })
            }
        };
        if direction_in {
            self.exported_in.push(entry);
        } else {
            self.exported_out.push(entry);
        }
        Ok(())
    }

    /// Lift a child input port onto the composite. Omitting the index on
    /// an array port exports every sub-port contiguously.
    pub fn export_in_port(
        &mut self,
        node: &str,
        port: &str,
        index: Option<u16>,
        exported: &str,
    ) -> Result<(), FlowError> {
        self.export_port(true, node, port, index, exported)
    }

    /// Lift a child output port onto the composite.
    pub fn export_out_port(
        &mut self,
        node: &str,
        port: &str,
        index: Option<u16>,
        exported: &str,
    ) -> Result<(), FlowError> {
        self.export_port(false, node, port, index, exported)
    }

    /// Lift a child option member onto the composite options. The
    /// composite default is the child's configured value if present,
    /// the member's own default otherwise.
    pub fn export_option(
        &mut self,
        node: &str,
        member: &str,
        exported: &str,
    ) -> Result<(), FlowError> {
        self.check_open()?;
        let node_index = self.node_index(node)?;
        let builder_node = &self.nodes[node_index];
        let member_spec = builder_node
            .node_type
            .options_layout()
            .member(member)
            .ok_or_else(|| FlowError::NotFound(format!("option {node}.{member}")))?;
        if self.exported_members.iter().any(|m| m.name == exported) {
            return Err(FlowError::DuplicateName(exported.to_string()));
        }
        let default = builder_node
            .options
            .get(member)
            .cloned()
            .or_else(|| member_spec.default.clone());
        self.exported_members.push(OptionSpec {
            name: exported.to_string(),
            data_type: member_spec.data_type,
            required: false,
            default,
            description: member_spec.description.clone(),
        });
        self.option_links.push(OptionLink {
            child: node_index,
            member: member.to_string(),
            exported: exported.to_string(),
        });
        Ok(())
    }

    /// Set the composite's metadata. `name` must not contain
    /// whitespace; the tooling symbols are derived from it.
    #[allow(clippy::too_many_arguments)]
    pub fn set_type_description(
        &mut self,
        name: &str,
        category: &str,
        description: &str,
        author: &str,
        url: &str,
        license: &str,
        version: &str,
    ) -> Result<(), FlowError> {
        self.check_open()?;
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(FlowError::InvalidArgument(format!(
                "type name {name:?} must be non-empty without whitespace"
            )));
        }
        self.desc = TypeDescription {
            name: name.to_string(),
            category: Some(category.to_string()),
            description: Some(description.to_string()),
            author: Some(author.to_string()),
            url: Some(url.to_string()),
            license: Some(license.to_string()),
            version: Some(version.to_string()),
            symbol: Some(format!(
                "SLUICE_FLOW_NODE_TYPE_BUILDER_{}",
                name.to_uppercase()
            )),
            options_symbol: Some(format!(
                "sluice_flow_node_type_builder_{}_options",
                name.to_lowercase()
            )),
        };
        Ok(())
    }

    /// Finalise: sort the connection table, reject exact duplicates,
    /// assign connection ids and emit the composite type. The builder
    /// keeps the type; further calls return the same value.
    pub fn get_node_type(&mut self) -> Result<Rc<NodeType>, FlowError> {
        if let Some(built) = &self.built {
            return Ok(built.clone());
        }

        self.connections
            .sort_by_key(|c| (c.src, c.src_port, c.dst, c.dst_port));
        for pair in self.connections.windows(2) {
            if (pair[0].src, pair[0].src_port, pair[0].dst, pair[0].dst_port)
                == (pair[1].src, pair[1].src_port, pair[1].dst, pair[1].dst_port)
            {
                return Err(FlowError::DuplicateConnection(format!(
                    "{}[{}] -> [{}]{}",
                    self.nodes[pair[0].src].name,
                    pair[0].src_port,
                    pair[0].dst_port,
                    self.nodes[pair[0].dst].name,
                )));
            }
        }
        let mut previous: Option<(usize, PortIndex)> = None;
        let mut next_id = 0;
        for conn in &mut self.connections {
            let key = (conn.src, conn.src_port);
            if previous == Some(key) {
                next_id += 1;
            } else {
                next_id = 0;
                previous = Some(key);
            }
            conn.id = next_id;
        }

        let mut desc = std::mem::take(&mut self.desc);
        if desc.name.is_empty() {
            desc.name = "flow".to_string();
        }
        if desc.description.is_none() {
            let names: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
            desc.description = Some(format!("flow: {}", names.join(", ")));
        }

        let ports_in: Vec<PortSpec> = self.exported_in.iter().map(|e| e.spec.clone()).collect();
        let ports_out: Vec<PortSpec> = self.exported_out.iter().map(|e| e.spec.clone()).collect();
        let layout = OptionsLayout::new(std::mem::take(&mut self.exported_members))?;

        let record = Rc::new(FlowRecord {
            children: std::mem::take(&mut self.nodes)
                .into_iter()
                .map(|n| ChildSpec {
                    name: n.name,
                    node_type: n.node_type,
                    options: n.options,
                })
                .collect(),
            connections: std::mem::take(&mut self.connections),
            exported_in: std::mem::take(&mut self.exported_in)
                .into_iter()
                .flat_map(|e| e.targets)
                .collect(),
            exported_out: std::mem::take(&mut self.exported_out)
                .into_iter()
                .flat_map(|e| e.targets)
                .collect(),
            option_links: std::mem::take(&mut self.option_links),
        });

        let build_record = record.clone();
        let node_type = NodeType::new(
            desc,
            ports_in,
            ports_out,
            layout,
            NodeTypeFlags::CONTAINER,
            Box::new(move |ctx, options| {
                Ok(Box::new(StaticFlow::open(build_record.clone(), ctx, options)?))
            }),
        )?;
        self.built = Some(node_type.clone());
        Ok(node_type)
    }
}
