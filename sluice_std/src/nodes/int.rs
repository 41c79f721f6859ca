use sluice_core::node_prelude::*;
use std::rc::Rc;

/// Width of the `OPERAND` array port of `int/addition`.
pub const OPERAND_PORTS: u16 = 32;

/// Sums the integers arriving on the connected `OPERAND` sub-ports.
///
/// Recomputes and emits on every update once each connected sub-port
/// has seen at least one value.
#[derive(Debug)]
pub struct AdditionNode {
    values: Vec<Option<i32>>,
    connected: Vec<u16>,
}

impl AdditionNode {
    fn new() -> Self {
        AdditionNode {
            values: vec![None; OPERAND_PORTS as usize],
            connected: vec![0; OPERAND_PORTS as usize],
        }
    }

    fn sum(&self) -> Option<i32> {
        let mut total = 0i32;
        let mut any = false;
        for (value, connected) in self.values.iter().zip(&self.connected) {
            if *connected > 0 {
                match value {
                    Some(v) => {
                        total = total.wrapping_add(*v);
                        any = true;
                    }
                    None => return None,
                }
            } else if let Some(v) = value {
                total = total.wrapping_add(*v);
                any = true;
            }
        }
        any.then_some(total)
    }
}

impl Node for AdditionNode {
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
            .ok_or_else(|| FlowError::node(format!("no operand sub-port {port}")))?;
        *slot = Some(packet.as_int()?);
        if let Some(total) = self.sum() {
            ctx.send(0, Packet::int_value(total))?;
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

pub fn addition_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("int/addition")
            .with_description("Sum of the connected OPERAND sub-ports"),
        vec![PortSpec::array("OPERAND", PacketType::IntRange, OPERAND_PORTS)],
        vec![PortSpec::new("OUT", PacketType::IntRange)],
        OptionsLayout::default(),
        NodeTypeFlags::empty(),
        Box::new(|_, _| Ok(Box::new(AdditionNode::new()))),
    )
    .expect("int/addition port table is valid")
}
