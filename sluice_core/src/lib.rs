/*
    All flow execution is single threaded.

    A program is a directed graph of nodes exchanging typed packets over
    named ports. Node types describe ports and options, live nodes hold
    state, containers own their children and route packets between them.

    Delivery is synchronous and depth first: a node that sends from
    inside its process handler recurses straight into the downstream
    handlers. The callstack only ever re-enters a node that is not
    currently processing; re-entry into a busy node is reported as an
    error and the remaining deliveries continue.
*/

pub mod builder;
pub mod flow;
pub mod mainloop;
pub mod options;
pub mod packet;
pub mod single;

pub mod prelude {
    pub use crate::{
        options::{NamedOptions, Options, OptionsLayout},
        packet::{Packet, PacketType},
        FlowError, Node, NodeContext, NodeHandle, NodeType, Resolver,
    };
}

/// The imports a node implementation usually needs.
pub mod node_prelude {
    pub use crate::{
        options::{OptionSpec, OptionType, OptionValue, Options, OptionsLayout},
        packet::{FloatRange, IntRange, Packet, PacketType},
        ConnId, FlowError, Node, NodeContext, NodeType, NodeTypeFlags, PortDirection, PortIndex,
        PortSpec, TimerToken, TypeDescription, ERROR_PORT, ERROR_PORT_NAME,
    };
}

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use options::{NamedOptions, Options, OptionsLayout};
use packet::{Packet, PacketType};

/// Running index of a port within a node type.
pub type PortIndex = u16;

/// Identifier of one connection within the fan-out of a source port.
pub type ConnId = u16;

/// Every node implicitly exposes an error output port at this index.
/// It never collides with declared ports.
pub const ERROR_PORT: PortIndex = u16::MAX - 1;

/// Reserved name of the implicit error output port.
pub const ERROR_PORT_NAME: &str = "ERROR";

/// The error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{filename}:{line}:{column}: {message}")]
    Parse {
        filename: String,
        line: u32,
        column: u32,
        message: String,
    },
    #[error("duplicate node name {0:?}")]
    DuplicateName(String),
    #[error("duplicate port name {0:?}")]
    DuplicatePort(String),
    #[error("duplicate connection {0}")]
    DuplicateConnection(String),
    #[error("index {index} out of range for port {port:?} of size {size}")]
    PortIndexOutOfRange { port: String, index: u16, size: u16 },
    #[error("port {0:?} is not an array port")]
    NotArrayPort(String),
    #[error("array port {0:?} requires an index")]
    MissingIndex(String),
    #[error("required option {0:?} is missing")]
    MissingOption(String),
    #[error("invalid option {name:?}: {reason}")]
    InvalidOption { name: String, reason: String },
    #[error("wrong type: expected {expected}, got {actual}")]
    WrongType { expected: String, actual: String },
    #[error("already finalised")]
    AlreadyFinalised,
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("node error: {0}")]
    Node(String),
}

impl FlowError {
    /// A node-raised runtime failure.
    pub fn node(message: impl Into<String>) -> Self {
        FlowError::Node(message.into())
    }
}

/// Direction of a port, seen from the node that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    In,
    Out,
}

/// A typed, named endpoint on a node type.
///
/// An array port covers `array_size` consecutive running indices
/// starting at its base index; `array_size == 0` means scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub packet_type: PacketType,
    pub array_size: u16,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, packet_type: PacketType) -> Self {
        PortSpec {
            name: name.into(),
            packet_type,
            array_size: 0,
        }
    }

    pub fn array(name: impl Into<String>, packet_type: PacketType, size: u16) -> Self {
        PortSpec {
            name: name.into(),
            packet_type,
            array_size: size,
        }
    }

    /// Number of running indices this port occupies.
    pub fn width(&self) -> u16 {
        if self.array_size == 0 {
            1
        } else {
            self.array_size
        }
    }
}

fn error_port_spec() -> &'static PortSpec {
    static SPEC: std::sync::OnceLock<PortSpec> = std::sync::OnceLock::new();
    SPEC.get_or_init(|| PortSpec::new(ERROR_PORT_NAME, PacketType::Error))
}

/// Token identifying a timer a node registered through its context.
///
/// Tokens are allocated at the root of the node tree and are unique per
/// root, so containers only keep token-to-child maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// The seam between a node and whatever hosts it.
///
/// Handlers receive a context so they can emit packets and manage
/// timers; the context routes within the surrounding flow or, at the
/// root, into the host's callback.
pub trait NodeContext {
    /// Send a packet on one of the node's output ports. The packet must
    /// match the port's packet type.
    fn send(&mut self, port: PortIndex, packet: Packet) -> Result<(), FlowError>;

    /// Register a repeating timer. The node's [`Node::timeout`] runs on
    /// every fire until the token is removed.
    fn add_timeout(&mut self, interval: Duration) -> Result<TimerToken, FlowError>;

    /// Remove a timer. No further [`Node::timeout`] for this token runs
    /// after this returns.
    fn remove_timeout(&mut self, token: TimerToken) -> Result<(), FlowError>;

    /// Send an error packet on the implicit error output port.
    fn send_error(&mut self, code: i32, message: &str) -> Result<(), FlowError> {
        self.send(ERROR_PORT, Packet::error(code, message))
    }
}

/// Trait that nodes must implement.
pub trait Node: std::fmt::Debug {
    /// Handle a packet arriving on input port `port`. Errors returned
    /// from inside a flow are logged per delivery and do not stop the
    /// remaining deliveries of the same packet.
    fn process(
        &mut self,
        ctx: &mut dyn NodeContext,
        port: PortIndex,
        conn_id: ConnId,
        packet: &Packet,
    ) -> Result<(), FlowError>;

    /// A connection was established on `port`.
    fn port_connected(
        &mut self,
        ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        conn_id: ConnId,
    ) -> Result<(), FlowError> {
        let _ = (ctx, direction, port, conn_id);
        Ok(())
    }

    /// A connection on `port` went away.
    fn port_disconnected(
        &mut self,
        ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        conn_id: ConnId,
    ) -> Result<(), FlowError> {
        let _ = (ctx, direction, port, conn_id);
        Ok(())
    }

    /// A timer registered through [`NodeContext::add_timeout`] fired.
    fn timeout(&mut self, ctx: &mut dyn NodeContext, token: TimerToken) -> Result<(), FlowError> {
        let _ = (ctx, token);
        Ok(())
    }

    /// Called once during destruction, before the node is dropped.
    fn close(&mut self, ctx: &mut dyn NodeContext) {
        let _ = ctx;
    }
}

bitflags::bitflags! {
    /// Flags of a node type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeTypeFlags: u32 {
        /// The type owns child nodes and routes their packets.
        const CONTAINER = 1 << 0;
    }
}

/// Human readable metadata of a node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    pub version: Option<String>,
    /// Uppercase identifier for tooling that generates bindings.
    pub symbol: Option<String>,
    /// Lowercase identifier of the type's options for the same tooling.
    pub options_symbol: Option<String>,
}

impl TypeDescription {
    pub fn named(name: impl Into<String>) -> Self {
        TypeDescription {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Constructor of a node type: the `open` of an instance. It may send
/// initial packets through the context before returning.
pub type Constructor =
    Box<dyn Fn(&mut dyn NodeContext, &Options) -> Result<Box<dyn Node>, FlowError>>;

/// A description of a node class: port tables, options layout, flags
/// and the constructor. Shared values; containers and parsers keep
/// types alive at least as long as any instance.
pub struct NodeType {
    desc: TypeDescription,
    ports_in: Vec<PortSpec>,
    ports_out: Vec<PortSpec>,
    options: OptionsLayout,
    flags: NodeTypeFlags,
    build: Constructor,
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        fmt.debug_struct("NodeType")
            .field("name", &self.desc.name)
            .field("ports_in", &self.ports_in)
            .field("ports_out", &self.ports_out)
            .field("flags", &self.flags)
            .finish()
    }
}

fn check_port_table(ports: &[PortSpec]) -> Result<(), FlowError> {
    for (i, port) in ports.iter().enumerate() {
        if port.name.is_empty() {
            return Err(FlowError::InvalidArgument("empty port name".into()));
        }
        if port.name == ERROR_PORT_NAME {
            return Err(FlowError::DuplicatePort(ERROR_PORT_NAME.into()));
        }
        if ports[..i].iter().any(|p| p.name == port.name) {
            return Err(FlowError::DuplicatePort(port.name.clone()));
        }
    }
    Ok(())
}

fn table_lookup(ports: &[PortSpec], index: PortIndex) -> Option<&PortSpec> {
    let mut base = 0u16;
    for port in ports {
        let width = port.width();
        if index < base + width {
            return Some(port);
        }
        base += width;
    }
    None
}

fn table_find(ports: &[PortSpec], name: &str) -> Option<(PortIndex, PortSpec)> {
    let mut base = 0u16;
    for port in ports {
        if port.name == name {
            return Some((base, port.clone()));
        }
        base += port.width();
    }
    None
}

impl NodeType {
    pub fn new(
        desc: TypeDescription,
        ports_in: Vec<PortSpec>,
        ports_out: Vec<PortSpec>,
        options: OptionsLayout,
        flags: NodeTypeFlags,
        build: Constructor,
    ) -> Result<Rc<NodeType>, FlowError> {
        check_port_table(&ports_in)?;
        check_port_table(&ports_out)?;
        Ok(Rc::new(NodeType {
            desc,
            ports_in,
            ports_out,
            options,
            flags,
            build,
        }))
    }

    pub fn description(&self) -> &TypeDescription {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn flags(&self) -> NodeTypeFlags {
        self.flags
    }

    pub fn options_layout(&self) -> &OptionsLayout {
        &self.options
    }

    pub fn ports_in(&self) -> &[PortSpec] {
        &self.ports_in
    }

    pub fn ports_out(&self) -> &[PortSpec] {
        &self.ports_out
    }

    /// Number of running input port indices.
    pub fn port_in_count(&self) -> u16 {
        self.ports_in.iter().map(|p| p.width()).sum()
    }

    /// Number of running output port indices, not counting the implicit
    /// error port.
    pub fn port_out_count(&self) -> u16 {
        self.ports_out.iter().map(|p| p.width()).sum()
    }

    /// Descriptor of input port `index`.
    pub fn port_in(&self, index: PortIndex) -> Option<&PortSpec> {
        table_lookup(&self.ports_in, index)
    }

    /// Descriptor of output port `index`. [`ERROR_PORT`] resolves to the
    /// implicit error port every type carries.
    pub fn port_out(&self, index: PortIndex) -> Option<&PortSpec> {
        if index == ERROR_PORT {
            return Some(error_port_spec());
        }
        table_lookup(&self.ports_out, index)
    }

    /// Base index and descriptor of the input port called `name`.
    pub fn find_port_in(&self, name: &str) -> Option<(PortIndex, PortSpec)> {
        table_find(&self.ports_in, name)
    }

    /// Base index and descriptor of the output port called `name`.
    pub fn find_port_out(&self, name: &str) -> Option<(PortIndex, PortSpec)> {
        if name == ERROR_PORT_NAME {
            return Some((ERROR_PORT, error_port_spec().clone()));
        }
        table_find(&self.ports_out, name)
    }

    /// Run the constructor, producing the boxed node state.
    pub fn build_node(
        &self,
        ctx: &mut dyn NodeContext,
        options: &Options,
    ) -> Result<Box<dyn Node>, FlowError> {
        (self.build)(ctx, options)
    }

    /// Open a live instance of this type.
    pub fn instantiate(
        self: &Rc<Self>,
        id: impl Into<String>,
        ctx: &mut dyn NodeContext,
        options: &Options,
    ) -> Result<NodeHandle, FlowError> {
        let node = self.build_node(ctx, options)?;
        Ok(NodeHandle {
            node_type: self.clone(),
            id: id.into(),
            node: RefCell::new(node),
        })
    }

    /// Resolve named options against this type's layout.
    pub fn resolve_options(&self, named: &NamedOptions) -> Result<Options, FlowError> {
        self.options.resolve(named)
    }
}

/// A live instance of a node type: the type reference, an identifier
/// and the node state. Owned by a container, a wrapper or a test.
#[derive(Debug)]
pub struct NodeHandle {
    node_type: Rc<NodeType>,
    id: String,
    node: RefCell<Box<dyn Node>>,
}

impl NodeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> &Rc<NodeType> {
        &self.node_type
    }

    pub fn node(&self) -> &RefCell<Box<dyn Node>> {
        &self.node
    }

    /// Run the close handler. Failure to borrow means close was invoked
    /// from inside one of the node's own handlers, which is reported
    /// rather than honoured.
    pub fn close(&self, ctx: &mut dyn NodeContext) {
        match self.node.try_borrow_mut() {
            Ok(mut node) => node.close(ctx),
            Err(_) => {
                tracing::error!(node = %self.id, "close while the node is processing, skipped")
            }
        }
    }
}

/// Maps a textual component identifier to a node type plus the default
/// named options the identifier implies.
pub struct ResolvedType {
    pub node_type: Rc<NodeType>,
    pub options: NamedOptions,
}

/// One step of the resolution chain. Implementations must not mutate
/// state on a miss.
pub trait Resolver {
    fn resolve(&self, id: &str) -> Option<ResolvedType>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsLayout;

    fn leaf_type(name: &str, ports_in: Vec<PortSpec>, ports_out: Vec<PortSpec>) -> Rc<NodeType> {
        #[derive(Debug)]
        struct Inert;
        impl Node for Inert {
            fn process(
                &mut self,
                _ctx: &mut dyn NodeContext,
                _port: PortIndex,
                _conn_id: ConnId,
                _packet: &Packet,
            ) -> Result<(), FlowError> {
                Ok(())
            }
        }
        NodeType::new(
            TypeDescription::named(name),
            ports_in,
            ports_out,
            OptionsLayout::default(),
            NodeTypeFlags::empty(),
            Box::new(|_, _| Ok(Box::new(Inert))),
        )
        .expect("valid test type")
    }

    #[test]
    fn port_lookup_with_arrays() {
        let t = leaf_type(
            "test/array",
            vec![
                PortSpec::new("ENABLED", PacketType::Boolean),
                PortSpec::array("IN", PacketType::Boolean, 4),
                PortSpec::new("RESET", PacketType::Empty),
            ],
            vec![PortSpec::new("OUT", PacketType::Boolean)],
        );
        assert_eq!(t.port_in_count(), 6);
        assert_eq!(t.port_out_count(), 1);
        assert_eq!(t.port_in(0).map(|p| p.name.as_str()), Some("ENABLED"));
        assert_eq!(t.port_in(1).map(|p| p.name.as_str()), Some("IN"));
        assert_eq!(t.port_in(4).map(|p| p.name.as_str()), Some("IN"));
        assert_eq!(t.port_in(5).map(|p| p.name.as_str()), Some("RESET"));
        assert!(t.port_in(6).is_none());
        let (base, spec) = t.find_port_in("IN").expect("IN exists");
        assert_eq!(base, 1);
        assert_eq!(spec.array_size, 4);
    }

    #[test]
    fn implicit_error_port() {
        let t = leaf_type("test/leaf", vec![], vec![PortSpec::new("OUT", PacketType::Empty)]);
        let (index, spec) = t.find_port_out("ERROR").expect("implicit port");
        assert_eq!(index, ERROR_PORT);
        assert_eq!(spec.packet_type, PacketType::Error);
        assert_eq!(t.port_out(ERROR_PORT).map(|p| p.name.as_str()), Some("ERROR"));
    }

    #[test]
    fn reserved_and_duplicate_port_names_rejected() {
        #[derive(Debug)]
        struct Inert;
        impl Node for Inert {
            fn process(
                &mut self,
                _ctx: &mut dyn NodeContext,
                _port: PortIndex,
                _conn_id: ConnId,
                _packet: &Packet,
            ) -> Result<(), FlowError> {
                Ok(())
            }
        }
        let dup = NodeType::new(
            TypeDescription::named("test/dup"),
            vec![
                PortSpec::new("IN", PacketType::Boolean),
                PortSpec::new("IN", PacketType::Boolean),
            ],
            vec![],
            OptionsLayout::default(),
            NodeTypeFlags::empty(),
            Box::new(|_, _| Ok(Box::new(Inert))),
        );
        assert_eq!(dup.err(), Some(FlowError::DuplicatePort("IN".into())));

        let reserved = NodeType::new(
            TypeDescription::named("test/reserved"),
            vec![],
            vec![PortSpec::new("ERROR", PacketType::Error)],
            OptionsLayout::default(),
            NodeTypeFlags::empty(),
            Box::new(|_, _| Ok(Box::new(Inert))),
        );
        assert_eq!(reserved.err(), Some(FlowError::DuplicatePort("ERROR".into())));
    }
}
