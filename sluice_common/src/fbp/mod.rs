//! The FBP parser: textual flow descriptions to composite node types.
//!
//! Parsing is two passes. The grammar pass ([`parse_graph`]) produces
//! the [`ast::Graph`]; the lowering pass runs declarations
//! through their metatype creators, resolves components, converts
//! inline metadata into options and drives a [`FlowBuilder`] to the
//! finished type. The parser owns every type it produced; instances
//! keep their own references.

pub mod ast;
mod parse;

pub use ast::Graph;
pub use parse::parse_graph;

use std::collections::HashMap;
use std::rc::Rc;

use sluice_core::builder::FlowBuilder;
use sluice_core::options::{NamedOptions, OptionValue};
use sluice_core::{FlowError, NodeType, ResolvedType, Resolver};

/// File access for `DECLARE=name:fbp:file` and similar metatypes.
pub trait ParserClient {
    fn read_file(&self, name: &str) -> Result<String, FlowError>;
}

/// The data half of what a metatype creator receives: the declared
/// name and the raw contents after the second `:`. The capability
/// half, file access and type ownership, lives on the [`Parser`] the
/// creator is handed alongside ([`Parser::read_file`] and
/// [`Parser::store_type`]).
#[derive(Debug, Clone)]
pub struct MetatypeContext {
    pub name: String,
    pub contents: String,
}

/// Creator invoked for a `DECLARE` of its metatype. It may call back
/// into the parser, including recursively parsing (the built-in `fbp`
/// creator does both). The returned type is stored in the parser and
/// shadows the external resolver for the rest of the parse; a creator
/// producing additional helper types registers them itself with
/// [`Parser::store_type`].
pub type MetatypeCreator =
    Rc<dyn Fn(&mut Parser, &MetatypeContext) -> Result<Rc<NodeType>, FlowError>>;

pub struct Parser {
    resolver: Rc<dyn Resolver>,
    client: Option<Box<dyn ParserClient>>,
    metatypes: HashMap<String, MetatypeCreator>,
    types: Vec<Rc<NodeType>>,
}

impl Parser {
    pub fn new(resolver: Rc<dyn Resolver>, client: Option<Box<dyn ParserClient>>) -> Self {
        let mut parser = Parser {
            resolver,
            client,
            metatypes: HashMap::new(),
            types: Vec::new(),
        };
        parser.add_metatype(
            "fbp",
            Rc::new(|parser: &mut Parser, ctx: &MetatypeContext| {
                let filename = ctx.contents.trim().to_string();
                let contents = parser.read_file(&filename)?;
                parser.parse(&contents, &filename)
            }),
        );
        parser
    }

    pub fn add_metatype(&mut self, name: &str, creator: MetatypeCreator) {
        self.metatypes.insert(name.to_string(), creator);
    }

    /// Read a file through the parser client.
    pub fn read_file(&self, name: &str) -> Result<String, FlowError> {
        match &self.client {
            Some(client) => client.read_file(name),
            None => Err(FlowError::NotSupported(
                "no parser client to read files with".into(),
            )),
        }
    }

    /// Take ownership of a type produced during parsing, keeping it
    /// alive for the parser's lifetime.
    pub fn store_type(&mut self, node_type: Rc<NodeType>) {
        self.types.push(node_type);
    }

    /// Every type this parser produced, in creation order.
    pub fn types(&self) -> &[Rc<NodeType>] {
        &self.types
    }

    /// Parse an FBP program into a composite node type.
    pub fn parse(&mut self, input: &str, filename: &str) -> Result<Rc<NodeType>, FlowError> {
        let graph = parse::parse_graph(input, filename)?;
        self.lower(&graph)
    }

    /// Lower an already parsed graph.
    pub fn lower(&mut self, graph: &Graph) -> Result<Rc<NodeType>, FlowError> {
        // declarations first; declared names shadow the resolver below
        let mut declared: HashMap<String, Rc<NodeType>> = HashMap::new();
        for decl in &graph.declarations {
            let creator = self
                .metatypes
                .get(&decl.metatype)
                .cloned()
                .ok_or_else(|| FlowError::NotFound(format!("metatype {:?}", decl.metatype)))?;
            let ctx = MetatypeContext {
                name: decl.name.clone(),
                contents: decl.contents.clone(),
            };
            let node_type = creator(self, &ctx)?;
            declared.insert(decl.name.clone(), node_type);
        }

        let mut builder = FlowBuilder::new();
        for node in &graph.nodes {
            let resolved = declared
                .get(&node.component)
                .map(|node_type| ResolvedType {
                    node_type: node_type.clone(),
                    options: NamedOptions::new(),
                })
                .or_else(|| self.resolver.resolve(&node.component))
                .ok_or_else(|| FlowError::NotFound(format!("component {:?}", node.component)))?;
            let mut named = resolved.options;
            named.merge_from(Self::meta_options(&resolved.node_type, &node.meta)?);
            let options = resolved.node_type.resolve_options(&named)?;
            builder.add_node(&node.name, resolved.node_type, options)?;
        }
        for conn in &graph.connections {
            builder.connect(
                &graph.nodes[conn.src].name,
                &conn.src_port.name,
                conn.src_port.index,
                &graph.nodes[conn.dst].name,
                &conn.dst_port.name,
                conn.dst_port.index,
            )?;
        }
        for export in &graph.exported_in {
            builder.export_in_port(
                &graph.nodes[export.node].name,
                &export.port.name,
                export.port.index,
                &export.exported,
            )?;
        }
        for export in &graph.exported_out {
            builder.export_out_port(
                &graph.nodes[export.node].name,
                &export.port.name,
                export.port.index,
                &export.exported,
            )?;
        }
        for export in &graph.exported_options {
            builder.export_option(
                &graph.nodes[export.node].name,
                &export.member,
                &export.exported,
            )?;
        }
        let node_type = builder.get_node_type()?;
        self.store_type(node_type.clone());
        Ok(node_type)
    }

    /// Inline metadata to named options: each value is parsed per the
    /// member's data type, quoted values unescaped by the string rule.
    fn meta_options(
        node_type: &Rc<NodeType>,
        meta: &[(String, String)],
    ) -> Result<NamedOptions, FlowError> {
        let layout = node_type.options_layout();
        let mut named = NamedOptions::new();
        for (key, raw) in meta {
            let member = layout
                .member(key)
                .ok_or_else(|| FlowError::NotFound(format!("option {key:?}")))?;
            named.push(key.clone(), OptionValue::parse(member.data_type, key, raw)?);
        }
        Ok(named)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TypeRegistry;
    use sluice_core::node_prelude::*;
    use sluice_core::{Node, NodeContext, TimerToken};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct TestContext {
        sent: Vec<(PortIndex, Packet)>,
        next_token: u64,
    }

    impl NodeContext for TestContext {
        fn send(&mut self, port: PortIndex, packet: Packet) -> Result<(), FlowError> {
            self.sent.push((port, packet));
            Ok(())
        }
        fn add_timeout(&mut self, _interval: Duration) -> Result<TimerToken, FlowError> {
            self.next_token += 1;
            Ok(TimerToken(self.next_token))
        }
        fn remove_timeout(&mut self, _token: TimerToken) -> Result<(), FlowError> {
            Ok(())
        }
    }

    fn not_type() -> Rc<NodeType> {
        #[derive(Debug)]
        struct Invert;
        impl Node for Invert {
            fn process(
                &mut self,
                ctx: &mut dyn NodeContext,
                _port: PortIndex,
                _conn_id: ConnId,
                packet: &Packet,
            ) -> Result<(), FlowError> {
                ctx.send(0, Packet::Boolean(!packet.as_boolean()?))
            }
        }
        NodeType::new(
            TypeDescription::named("test/not"),
            vec![PortSpec::new("IN", PacketType::Boolean)],
            vec![PortSpec::new("OUT", PacketType::Boolean)],
            OptionsLayout::default(),
            NodeTypeFlags::empty(),
            Box::new(|_, _| Ok(Box::new(Invert))),
        )
        .expect("valid type")
    }

    fn greeter_type(log: Rc<RefCell<Vec<String>>>) -> Rc<NodeType> {
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
            TypeDescription::named("test/greeter"),
            vec![],
            vec![],
            OptionsLayout::new(vec![
                OptionSpec::new("greeting", OptionType::String)
                    .with_default(OptionValue::String("hello".into())),
                OptionSpec::new("times", OptionType::Int).with_default(OptionValue::Int(1)),
            ])
            .expect("layout"),
            NodeTypeFlags::empty(),
            Box::new(move |_, options| {
                log.borrow_mut().push(format!(
                    "{}x{}",
                    options.string("greeting")?,
                    options.int("times")?
                ));
                Ok(Box::new(Inert))
            }),
        )
        .expect("valid type")
    }

    fn registry() -> Rc<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        registry.add(not_type()).expect("adds");
        Rc::new(registry)
    }

    struct MapClient(HashMap<String, String>);
    impl ParserClient for MapClient {
        fn read_file(&self, name: &str) -> Result<String, FlowError> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| FlowError::NotFound(format!("file {name:?}")))
        }
    }

    #[test]
    fn parse_and_run_a_chain() -> Result<(), FlowError> {
        let mut parser = Parser::new(registry(), None);
        let t = parser.parse(
            "a(test/not) OUT -> IN b(test/not)\nINPORT=a.IN:IN\nOUTPORT=b.OUT:OUT\n",
            "chain.fbp",
        )?;
        assert_eq!(parser.types().len(), 1);

        let mut ctx = TestContext::default();
        let options = t.resolve_options(&NamedOptions::new())?;
        let handle = t.instantiate("chain", &mut ctx, &options)?;
        handle
            .node()
            .borrow_mut()
            .process(&mut ctx, 0, 0, &Packet::Boolean(true))?;
        assert_eq!(ctx.sent, vec![(0, Packet::Boolean(true))]);
        Ok(())
    }

    #[test]
    fn inline_options_win_over_resolver_defaults() -> Result<(), FlowError> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = TypeRegistry::new();
        registry.add(greeter_type(log.clone())).expect("adds");
        let mut parser = Parser::new(Rc::new(registry), None);
        let t = parser.parse(
            "g(test/greeter:times=3,greeting=\"hi \\\"you\\\"\")\n",
            "greet.fbp",
        )?;
        let mut ctx = TestContext::default();
        let options = t.resolve_options(&NamedOptions::new())?;
        let _handle = t.instantiate("greet", &mut ctx, &options)?;
        assert_eq!(*log.borrow(), vec!["hi \"you\"x3"]);
        Ok(())
    }

    #[test]
    fn unknown_component_and_option_surface() {
        let mut parser = Parser::new(registry(), None);
        assert!(matches!(
            parser.parse("a(no/such/thing)\n", "x.fbp"),
            Err(FlowError::NotFound(_))
        ));
        assert!(matches!(
            parser.parse("a(test/not:bogus=1)\n", "x.fbp"),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn declare_fbp_reads_through_the_client() -> Result<(), FlowError> {
        let mut files = HashMap::new();
        files.insert(
            "invert.fbp".to_string(),
            "n(test/not)\nINPORT=n.IN:IN\nOUTPORT=n.OUT:OUT\n".to_string(),
        );
        let mut parser = Parser::new(registry(), Some(Box::new(MapClient(files))));
        let t = parser.parse(
            "DECLARE=Invert:fbp:invert.fbp\na(Invert) OUT -> IN b(Invert)\nINPORT=a.IN:IN\nOUTPORT=b.OUT:OUT\n",
            "main.fbp",
        )?;
        // the declared type and the outer composite are both owned here
        assert_eq!(parser.types().len(), 2);

        let mut ctx = TestContext::default();
        let options = t.resolve_options(&NamedOptions::new())?;
        let handle = t.instantiate("main", &mut ctx, &options)?;
        handle
            .node()
            .borrow_mut()
            .process(&mut ctx, 0, 0, &Packet::Boolean(false))?;
        assert_eq!(ctx.sent, vec![(0, Packet::Boolean(false))]);
        Ok(())
    }

    #[test]
    fn declare_without_client_is_not_supported() {
        let mut parser = Parser::new(registry(), None);
        assert!(matches!(
            parser.parse("DECLARE=Invert:fbp:invert.fbp\n", "x.fbp"),
            Err(FlowError::NotSupported(_))
        ));
    }

    #[test]
    fn unknown_metatype_is_reported() {
        let mut parser = Parser::new(registry(), None);
        assert!(matches!(
            parser.parse("DECLARE=X:javascript:whatever\n", "x.fbp"),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn custom_metatypes_can_be_registered() -> Result<(), FlowError> {
        let mut parser = Parser::new(registry(), None);
        parser.add_metatype(
            "mirror",
            Rc::new(|parser: &mut Parser, ctx: &MetatypeContext| {
                // contents name an existing component to mirror
                let resolved = parser
                    .resolver
                    .resolve(ctx.contents.trim())
                    .ok_or_else(|| FlowError::NotFound(format!("component {:?}", ctx.contents)))?;
                parser.store_type(resolved.node_type.clone());
                Ok(resolved.node_type)
            }),
        );
        let t = parser.parse(
            "DECLARE=Mirror:mirror:test/not\nm(Mirror)\nINPORT=m.IN:IN\nOUTPORT=m.OUT:OUT\n",
            "m.fbp",
        )?;
        let mut ctx = TestContext::default();
        let options = t.resolve_options(&NamedOptions::new())?;
        let handle = t.instantiate("m", &mut ctx, &options)?;
        handle
            .node()
            .borrow_mut()
            .process(&mut ctx, 0, 0, &Packet::Boolean(true))?;
        assert_eq!(ctx.sent, vec![(0, Packet::Boolean(false))]);
        Ok(())
    }
}
