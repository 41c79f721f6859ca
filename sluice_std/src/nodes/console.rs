use sluice_core::node_prelude::*;
use std::rc::Rc;

/// Prints every packet to stdout, one line each.
#[derive(Debug)]
pub struct ConsoleNode {
    prefix: String,
}

impl Node for ConsoleNode {
    fn process(
        &mut self,
        _ctx: &mut dyn NodeContext,
        _port: PortIndex,
        _conn_id: ConnId,
        packet: &Packet,
    ) -> Result<(), FlowError> {
        println!("{}{:?}", self.prefix, packet);
        Ok(())
    }
}

pub fn console_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("console").with_description("Prints packets to stdout"),
        vec![PortSpec::new("IN", PacketType::Any)],
        vec![],
        OptionsLayout::new(vec![OptionSpec::new("prefix", OptionType::String)
            .with_default(OptionValue::String(String::new()))])
        .expect("console layout is valid"),
        NodeTypeFlags::empty(),
        Box::new(|_, options| {
            Ok(Box::new(ConsoleNode {
                prefix: options.string("prefix")?.to_string(),
            }))
        }),
    )
    .expect("console port table is valid")
}
