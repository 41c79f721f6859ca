use sluice_core::node_prelude::*;
use std::rc::Rc;

/// Constants emit their configured value once while opening and stay
/// silent afterwards.
#[derive(Debug)]
struct ConstantNode;

impl Node for ConstantNode {
    fn process(
        &mut self,
        _ctx: &mut dyn NodeContext,
        _port: PortIndex,
        _conn_id: ConnId,
        _packet: &Packet,
    ) -> Result<(), FlowError> {
        Err(FlowError::node("constant nodes have no input ports"))
    }
}

pub fn constant_boolean_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("constant/boolean")
            .with_description("Emits a boolean once on open"),
        vec![],
        vec![PortSpec::new("OUT", PacketType::Boolean)],
        OptionsLayout::new(vec![OptionSpec::new("value", OptionType::Boolean).required()])
            .expect("constant/boolean layout is valid"),
        NodeTypeFlags::empty(),
        Box::new(|ctx, options| {
            ctx.send(0, Packet::Boolean(options.boolean("value")?))?;
            Ok(Box::new(ConstantNode))
        }),
    )
    .expect("constant/boolean port table is valid")
}

pub fn constant_int_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("constant/int").with_description("Emits an integer once on open"),
        vec![],
        vec![PortSpec::new("OUT", PacketType::IntRange)],
        OptionsLayout::new(vec![OptionSpec::new("value", OptionType::IntRange).required()])
            .expect("constant/int layout is valid"),
        NodeTypeFlags::empty(),
        Box::new(|ctx, options| {
            ctx.send(0, Packet::IntRange(options.int_range("value")?))?;
            Ok(Box::new(ConstantNode))
        }),
    )
    .expect("constant/int port table is valid")
}
