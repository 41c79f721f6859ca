use sluice_core::node_prelude::*;
use std::rc::Rc;

/// Width of the `IN` array port of the multi-input gates.
pub const GATE_PORTS: u16 = 32;

/// Inverts every boolean arriving on `IN`.
#[derive(Debug, Default)]
pub struct NotNode;

impl Node for NotNode {
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

pub fn not_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("boolean/not").with_description("Inverts boolean packets"),
        vec![PortSpec::new("IN", PacketType::Boolean)],
        vec![PortSpec::new("OUT", PacketType::Boolean)],
        OptionsLayout::default(),
        NodeTypeFlags::empty(),
        Box::new(|_, _| Ok(Box::new(NotNode))),
    )
    .expect("boolean/not port table is valid")
}

/// Combines the booleans on the connected `IN` sub-ports.
///
/// Emits on every update once each connected sub-port has seen at
/// least one value; sub-ports that received a value without a tracked
/// connection participate as well.
#[derive(Debug)]
pub struct GateNode {
    values: Vec<Option<bool>>,
    connected: Vec<u16>,
    combine: fn(&[bool]) -> bool,
}

impl GateNode {
    fn new(combine: fn(&[bool]) -> bool) -> Self {
        GateNode {
            values: vec![None; GATE_PORTS as usize],
            connected: vec![0; GATE_PORTS as usize],
            combine,
        }
    }

    fn ready(&self) -> Option<Vec<bool>> {
        let mut out = Vec::new();
        for (value, connected) in self.values.iter().zip(&self.connected) {
            if *connected > 0 {
                match value {
                    Some(v) => out.push(*v),
                    None => return None,
                }
            } else if let Some(v) = value {
                out.push(*v);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

impl Node for GateNode {
    fn process(
        &mut self,
        ctx: &mut dyn NodeContext,
        port: PortIndex,
        _conn_id: ConnId,
        packet: &Packet,
    ) -> Result<(), FlowError> {
        let slot = self
            .values
            .get_mut(port as usize)
            .ok_or_else(|| FlowError::node(format!("no gate sub-port {port}")))?;
        *slot = Some(packet.as_boolean()?);
        if let Some(values) = self.ready() {
            ctx.send(0, Packet::Boolean((self.combine)(&values)))?;
        }
        Ok(())
    }

    fn port_connected(
        &mut self,
        _ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        _conn_id: ConnId,
    ) -> Result<(), FlowError> {
        if direction == PortDirection::In {
            if let Some(count) = self.connected.get_mut(port as usize) {
                *count += 1;
            }
        }
        Ok(())
    }

    fn port_disconnected(
        &mut self,
        _ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        _conn_id: ConnId,
    ) -> Result<(), FlowError> {
        if direction == PortDirection::In {
            if let Some(count) = self.connected.get_mut(port as usize) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.values[port as usize] = None;
                }
            }
        }
        Ok(())
    }
}

fn gate_type(name: &str, description: &str, combine: fn(&[bool]) -> bool) -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named(name).with_description(description),
        vec![PortSpec::array("IN", PacketType::Boolean, GATE_PORTS)],
        vec![PortSpec::new("OUT", PacketType::Boolean)],
        OptionsLayout::default(),
        NodeTypeFlags::empty(),
        Box::new(move |_, _| Ok(Box::new(GateNode::new(combine)))),
    )
    .expect("gate port table is valid")
}

pub fn and_type() -> Rc<NodeType> {
    gate_type("boolean/and", "True while every connected input is true", |v| {
        v.iter().all(|b| *b)
    })
}

pub fn or_type() -> Rc<NodeType> {
    gate_type("boolean/or", "True while any connected input is true", |v| {
        v.iter().any(|b| *b)
    })
}

/// Flips its state on every packet and emits the new state.
#[derive(Debug, Default)]
pub struct ToggleNode {
    state: bool,
}

impl Node for ToggleNode {
    fn process(
        &mut self,
        ctx: &mut dyn NodeContext,
        _port: PortIndex,
        _conn_id: ConnId,
        _packet: &Packet,
    ) -> Result<(), FlowError> {
        self.state = !self.state;
        ctx.send(0, Packet::Boolean(self.state))
    }
}

pub fn toggle_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("boolean/toggle")
            .with_description("Alternates its output on every incoming packet"),
        vec![PortSpec::new("IN", PacketType::Any)],
        vec![PortSpec::new("OUT", PacketType::Boolean)],
        OptionsLayout::default(),
        NodeTypeFlags::empty(),
        Box::new(|_, _| Ok(Box::new(ToggleNode::default()))),
    )
    .expect("boolean/toggle port table is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::mainloop::BasicMainloop;
    use sluice_core::options::{NamedOptions, Options};
    use sluice_core::single::SingleNode;
    use sluice_core::builder::FlowBuilder;
    use sluice_common::{Parser, TypeRegistry};
    use std::cell::RefCell;

    fn received() -> (Rc<RefCell<Vec<Packet>>>, sluice_core::single::PacketCallback) {
        let log: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, Box::new(move |_, p| sink.borrow_mut().push(p.clone())))
    }

    #[test]
    fn two_inversions_cancel_out() -> Result<(), FlowError> {
        // not1 -> not2 -> console, fed through the parser
        let mut registry = TypeRegistry::new();
        crate::add_std_types(&mut registry)?;
        let mut parser = Parser::new(Rc::new(registry), None);
        let t = parser.parse(
            "not1(boolean/not) OUT -> IN not2(boolean/not) OUT -> IN c(console)\n\
             INPORT=not1.IN:IN\nOUTPORT=not2.OUT:OUT\n",
            "chain.fbp",
        )?;
        let (log, callback) = received();
        let mut single = SingleNode::new(
            BasicMainloop::new(),
            t.clone(),
            "chain",
            &t.resolve_options(&NamedOptions::new())?,
            &[0],
            &[0],
            callback,
        )?;
        single.send(0, Packet::Boolean(true))?;
        assert_eq!(*log.borrow(), vec![Packet::Boolean(true)]);
        Ok(())
    }

    #[test]
    fn and_gate_fans_in_four_sources() -> Result<(), FlowError> {
        // three trues and one false reach a 4-wide AND
        let mut builder = FlowBuilder::new();
        builder.add_node("and", and_type(), Options::empty())?;
        for (i, value) in ["true", "true", "false", "true"].iter().enumerate() {
            let name = format!("c{i}");
            let constant = crate::nodes::constant_boolean_type();
            let named = NamedOptions::from_strv(
                &[format!("value={value}")],
                constant.options_layout(),
            )?;
            builder.add_node(&name, constant.clone(), constant.resolve_options(&named)?)?;
            builder.connect(&name, "OUT", None, "and", "IN", Some(i as u16))?;
        }
        builder.export_out_port("and", "OUT", None, "OUT")?;
        let t = builder.get_node_type()?;

        let (log, callback) = received();
        let _single = SingleNode::new(
            BasicMainloop::new(),
            t.clone(),
            "fan-in",
            &t.resolve_options(&NamedOptions::new())?,
            &[],
            &[0],
            callback,
        )?;
        // the gate waits for all four constants, then fires once
        assert_eq!(*log.borrow(), vec![Packet::Boolean(false)]);
        Ok(())
    }

    #[test]
    fn or_gate_and_toggle() -> Result<(), FlowError> {
        let mut or = GateNode::new(|v| v.iter().any(|b| *b));
        let mut ctx = TestContext::default();
        or.port_connected(&mut ctx, PortDirection::In, 0, 0)?;
        or.port_connected(&mut ctx, PortDirection::In, 1, 0)?;
        or.process(&mut ctx, 0, 0, &Packet::Boolean(false))?;
        assert!(ctx.sent.is_empty());
        or.process(&mut ctx, 1, 0, &Packet::Boolean(true))?;
        assert_eq!(ctx.sent, vec![(0, Packet::Boolean(true))]);

        let mut toggle = ToggleNode::default();
        let mut ctx = TestContext::default();
        toggle.process(&mut ctx, 0, 0, &Packet::Empty)?;
        toggle.process(&mut ctx, 0, 0, &Packet::Empty)?;
        assert_eq!(
            ctx.sent,
            vec![(0, Packet::Boolean(true)), (0, Packet::Boolean(false))]
        );
        Ok(())
    }

    #[derive(Debug, Default)]
    struct TestContext {
        sent: Vec<(PortIndex, Packet)>,
    }

    impl NodeContext for TestContext {
        fn send(&mut self, port: PortIndex, packet: Packet) -> Result<(), FlowError> {
            self.sent.push((port, packet));
            Ok(())
        }
        fn add_timeout(
            &mut self,
            _interval: std::time::Duration,
        ) -> Result<sluice_core::TimerToken, FlowError> {
            Ok(sluice_core::TimerToken(0))
        }
        fn remove_timeout(&mut self, _token: sluice_core::TimerToken) -> Result<(), FlowError> {
            Ok(())
        }
    }
}
