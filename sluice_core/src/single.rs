//! Host a single node type without a surrounding graph.
//!
//! The wrapper owns the root node, feeds it inbound packets, hands
//! outbound packets to a user callback while the port is connected, and
//! dispatches mainloop timers back into the tree. Connection refcounts
//! per port drive the inner connect/disconnect callbacks on the 0 to 1
//! and 1 to 0 edges.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::mainloop::{Mainloop, Repeat, TimeoutHandle};
use crate::options::Options;
use crate::packet::Packet;
use crate::{
    FlowError, Node, NodeContext, NodeHandle, NodeType, PortDirection, PortIndex, TimerToken,
    TypeDescription,
};

/// Callback receiving the packets the hosted node emits on connected
/// output ports.
pub type PacketCallback = Box<dyn FnMut(PortIndex, &Packet)>;

struct Shared {
    mainloop: Rc<dyn Mainloop>,
    connected_in: RefCell<HashMap<PortIndex, u16>>,
    connected_out: RefCell<HashMap<PortIndex, u16>>,
    on_packet: RefCell<PacketCallback>,
    timers: RefCell<HashMap<TimerToken, TimeoutHandle>>,
    next_token: Cell<u64>,
    /// Packets the node emitted before the initial port connections
    /// were in place.
    pending: RefCell<VecDeque<(PortIndex, Packet)>>,
    ready: Cell<bool>,
}

impl Shared {
    /// Hand a packet to the callback, or drop it while the port has no
    /// connections.
    fn deliver(&self, port: PortIndex, packet: &Packet) {
        let connected = self.connected_out.borrow().get(&port).copied().unwrap_or(0) > 0;
        if connected {
            (self.on_packet.borrow_mut())(port, packet);
        } else {
            tracing::debug!(port, "dropping packet, output port not connected");
        }
    }
}

/// The context of the root node: sends reach the user callback, timers
/// reach the real mainloop.
struct RootContext {
    shared: Rc<Shared>,
    root: Weak<RefCell<Option<NodeHandle>>>,
}

impl NodeContext for RootContext {
    fn send(&mut self, port: PortIndex, packet: Packet) -> Result<(), FlowError> {
        if !self.shared.ready.get() {
            self.shared.pending.borrow_mut().push_back((port, packet));
            return Ok(());
        }
        self.shared.deliver(port, &packet);
        Ok(())
    }

    fn add_timeout(&mut self, interval: Duration) -> Result<TimerToken, FlowError> {
        self.shared.next_token.set(self.shared.next_token.get() + 1);
        let token = TimerToken(self.shared.next_token.get());
        let shared = self.shared.clone();
        let root = self.root.clone();
        let handle = self.shared.mainloop.add_timeout(
            interval,
            Box::new(move || {
                let Some(cell) = root.upgrade() else {
                    return Repeat::Stop;
                };
                let mut ctx = RootContext {
                    shared: shared.clone(),
                    root: Rc::downgrade(&cell),
                };
                let guard = cell.borrow();
                if let Some(handle) = guard.as_ref() {
                    match handle.node().try_borrow_mut() {
                        Ok(mut node) => {
                            if let Err(e) = node.timeout(&mut ctx, token) {
                                tracing::error!(node = %handle.id(), error = %e, "timeout failed");
                            }
                        }
                        Err(_) => {
                            tracing::error!(node = %handle.id(), "timer fired while the node is processing")
                        }
                    }
                }
                Repeat::Keep
            }),
        );
        self.shared.timers.borrow_mut().insert(token, handle);
        Ok(token)
    }

    fn remove_timeout(&mut self, token: TimerToken) -> Result<(), FlowError> {
        match self.shared.timers.borrow_mut().remove(&token) {
            Some(handle) => {
                self.shared.mainloop.remove_timeout(handle);
                Ok(())
            }
            None => Err(FlowError::NotFound(format!("timer {token:?}"))),
        }
    }
}

/// One node type hosted as a standalone unit.
pub struct SingleNode {
    node_type: Rc<NodeType>,
    shared: Rc<Shared>,
    root: Rc<RefCell<Option<NodeHandle>>>,
}

impl std::fmt::Debug for SingleNode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        fmt.debug_struct("SingleNode")
            .field("node_type", &self.node_type)
            .finish()
    }
}

impl SingleNode {
    /// Open `node_type` with `options`. Ports listed in `connected_in` /
    /// `connected_out` start with one connection each.
    pub fn new(
        mainloop: Rc<dyn Mainloop>,
        node_type: Rc<NodeType>,
        id: &str,
        options: &Options,
        connected_in: &[PortIndex],
        connected_out: &[PortIndex],
        on_packet: PacketCallback,
    ) -> Result<SingleNode, FlowError> {
        let shared = Rc::new(Shared {
            mainloop,
            connected_in: RefCell::new(HashMap::new()),
            connected_out: RefCell::new(HashMap::new()),
            on_packet: RefCell::new(on_packet),
            timers: RefCell::new(HashMap::new()),
            next_token: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
            ready: Cell::new(false),
        });
        let root = Rc::new(RefCell::new(None));
        let mut ctx = RootContext {
            shared: shared.clone(),
            root: Rc::downgrade(&root),
        };
        let handle = node_type.instantiate(id, &mut ctx, options)?;
        *root.borrow_mut() = Some(handle);
        let mut single = SingleNode {
            node_type,
            shared,
            root,
        };
        for &port in connected_in {
            single.connect_port_in(port)?;
        }
        for &port in connected_out {
            single.connect_port_out(port)?;
        }
        // flush what the node emitted while opening, now that the
        // initial connections exist
        single.shared.ready.set(true);
        loop {
            let next = single.shared.pending.borrow_mut().pop_front();
            match next {
                Some((port, packet)) => single.shared.deliver(port, &packet),
                None => break,
            }
        }
        Ok(single)
    }

    pub fn node_type(&self) -> &Rc<NodeType> {
        &self.node_type
    }

    /// A passthrough node type mirroring the inner type's ports, options
    /// and metadata, whose instances are the inner node itself.
    pub fn wrapped_type(inner: &Rc<NodeType>) -> Result<Rc<NodeType>, FlowError> {
        let forward = inner.clone();
        let desc = TypeDescription {
            name: format!("single/{}", inner.name()),
            ..inner.description().clone()
        };
        NodeType::new(
            desc,
            inner.ports_in().to_vec(),
            inner.ports_out().to_vec(),
            inner.options_layout().clone(),
            inner.flags(),
            Box::new(move |ctx, options| forward.build_node(ctx, options)),
        )
    }

    fn with_node<R>(
        &self,
        f: impl FnOnce(&mut dyn Node, &mut dyn NodeContext) -> R,
    ) -> Result<R, FlowError> {
        let mut ctx = RootContext {
            shared: self.shared.clone(),
            root: Rc::downgrade(&self.root),
        };
        let guard = self.root.borrow();
        let handle = guard
            .as_ref()
            .ok_or_else(|| FlowError::InvalidArgument("node is closed".into()))?;
        let mut node = handle.node().try_borrow_mut().map_err(|_| {
            FlowError::node(format!("node {:?} is already processing", handle.id()))
        })?;
        Ok(f(&mut **node, &mut ctx))
    }

    /// Forward an inbound packet to the hosted node's input `port`.
    pub fn send(&mut self, port: PortIndex, packet: Packet) -> Result<(), FlowError> {
        let spec = self
            .node_type
            .port_in(port)
            .ok_or_else(|| FlowError::PortIndexOutOfRange {
                port: self.node_type.name().to_string(),
                index: port,
                size: self.node_type.port_in_count(),
            })?;
        if !spec.packet_type.accepts(&packet.packet_type()) {
            return Err(FlowError::WrongType {
                expected: spec.packet_type.to_string(),
                actual: packet.packet_type().to_string(),
            });
        }
        self.with_node(|node, ctx| node.process(ctx, port, 0, &packet))
            .and_then(|r| r)
    }

    fn adjust(
        &mut self,
        direction: PortDirection,
        port: PortIndex,
        connect: bool,
    ) -> Result<(), FlowError> {
        let known = match direction {
            PortDirection::In => self.node_type.port_in(port).is_some(),
            PortDirection::Out => self.node_type.port_out(port).is_some(),
        };
        if !known {
            return Err(FlowError::PortIndexOutOfRange {
                port: self.node_type.name().to_string(),
                index: port,
                size: match direction {
                    PortDirection::In => self.node_type.port_in_count(),
                    PortDirection::Out => self.node_type.port_out_count(),
                },
            });
        }
        let edge = {
            let counters = match direction {
                PortDirection::In => &self.shared.connected_in,
                PortDirection::Out => &self.shared.connected_out,
            };
            let mut counters = counters.borrow_mut();
            let count = counters.entry(port).or_insert(0);
            if connect {
                *count += 1;
                *count == 1
            } else {
                if *count == 0 {
                    return Err(FlowError::InvalidArgument(format!(
                        "port {port} has no connections to remove"
                    )));
                }
                *count -= 1;
                *count == 0
            }
        };
        if edge {
            self.with_node(|node, ctx| {
                if connect {
                    node.port_connected(ctx, direction, port, 0)
                } else {
                    node.port_disconnected(ctx, direction, port, 0)
                }
            })
            .and_then(|r| r)?;
        }
        Ok(())
    }

    /// Count one more connection on an input port; the 0 to 1 edge
    /// fires the node's connect callback.
    pub fn connect_port_in(&mut self, port: PortIndex) -> Result<(), FlowError> {
        self.adjust(PortDirection::In, port, true)
    }

    pub fn connect_port_out(&mut self, port: PortIndex) -> Result<(), FlowError> {
        self.adjust(PortDirection::Out, port, true)
    }

    /// Count one connection less; the 1 to 0 edge fires the node's
    /// disconnect callback.
    pub fn disconnect_port_in(&mut self, port: PortIndex) -> Result<(), FlowError> {
        self.adjust(PortDirection::In, port, false)
    }

    pub fn disconnect_port_out(&mut self, port: PortIndex) -> Result<(), FlowError> {
        self.adjust(PortDirection::Out, port, false)
    }
}

impl Drop for SingleNode {
    fn drop(&mut self) {
        let _ = self.with_node(|node, ctx| node.close(ctx));
        *self.root.borrow_mut() = None;
        let handles: Vec<TimeoutHandle> =
            self.shared.timers.borrow_mut().drain().map(|(_, h)| h).collect();
        for handle in handles {
            self.shared.mainloop.remove_timeout(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mainloop::BasicMainloop;
    use crate::options::OptionsLayout;
    use crate::packet::PacketType;
    use crate::{ConnId, NodeTypeFlags, PortSpec};

    /// IN any -> OUT forwards, logging connect/disconnect edges.
    fn echo_type(events: Rc<RefCell<Vec<String>>>) -> Rc<NodeType> {
        #[derive(Debug)]
        struct Echo {
            events: Rc<RefCell<Vec<String>>>,
        }
        impl Node for Echo {
            fn process(
                &mut self,
                ctx: &mut dyn NodeContext,
                _port: PortIndex,
                _conn_id: ConnId,
                packet: &Packet,
            ) -> Result<(), FlowError> {
                ctx.send(0, packet.clone())
            }
            fn port_connected(
                &mut self,
                _ctx: &mut dyn NodeContext,
                direction: PortDirection,
                port: PortIndex,
                _conn_id: ConnId,
            ) -> Result<(), FlowError> {
                self.events.borrow_mut().push(format!("connect:{direction:?}:{port}"));
                Ok(())
            }
            fn port_disconnected(
                &mut self,
                _ctx: &mut dyn NodeContext,
                direction: PortDirection,
                port: PortIndex,
                _conn_id: ConnId,
            ) -> Result<(), FlowError> {
                self.events
                    .borrow_mut()
                    .push(format!("disconnect:{direction:?}:{port}"));
                Ok(())
            }
        }
        NodeType::new(
            crate::TypeDescription::named("test/echo"),
            vec![PortSpec::new("IN", PacketType::Any)],
            vec![PortSpec::new("OUT", PacketType::Any)],
            OptionsLayout::default(),
            NodeTypeFlags::empty(),
            Box::new(move |_, _| {
                Ok(Box::new(Echo {
                    events: events.clone(),
                }))
            }),
        )
        .expect("valid type")
    }

    /// Registers a repeating timer on open, emits Empty on every fire.
    fn ticker_type(interval: Duration) -> Rc<NodeType> {
        #[derive(Debug)]
        struct Ticker {
            timer: TimerToken,
        }
        impl Node for Ticker {
            fn process(
                &mut self,
                _ctx: &mut dyn NodeContext,
                _port: PortIndex,
                _conn_id: ConnId,
                _packet: &Packet,
            ) -> Result<(), FlowError> {
                Ok(())
            }
            fn timeout(
                &mut self,
                ctx: &mut dyn NodeContext,
                token: TimerToken,
            ) -> Result<(), FlowError> {
                if token == self.timer {
                    ctx.send(0, Packet::Empty)?;
                }
                Ok(())
            }
            fn close(&mut self, ctx: &mut dyn NodeContext) {
                let _ = ctx.remove_timeout(self.timer);
            }
        }
        NodeType::new(
            crate::TypeDescription::named("test/ticker"),
            vec![],
            vec![PortSpec::new("OUT", PacketType::Empty)],
            OptionsLayout::default(),
            NodeTypeFlags::empty(),
            Box::new(move |ctx, _| {
                let timer = ctx.add_timeout(interval)?;
                Ok(Box::new(Ticker { timer }))
            }),
        )
        .expect("valid type")
    }

    #[test]
    fn output_is_gated_by_port_connections() -> Result<(), FlowError> {
        let ml = BasicMainloop::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let received: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let mut single = SingleNode::new(
            ml,
            echo_type(events),
            "echo",
            &Options::empty(),
            &[0],
            &[],
            Box::new(move |_, packet| sink.borrow_mut().push(packet.clone())),
        )?;

        // no output connection, the echo is dropped
        single.send(0, Packet::Boolean(true))?;
        assert!(received.borrow().is_empty());

        single.connect_port_out(0)?;
        single.send(0, Packet::Boolean(false))?;
        assert_eq!(*received.borrow(), vec![Packet::Boolean(false)]);

        single.disconnect_port_out(0)?;
        single.send(0, Packet::Boolean(true))?;
        assert_eq!(received.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn refcount_edges_fire_connect_and_disconnect_once() -> Result<(), FlowError> {
        let ml = BasicMainloop::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut single = SingleNode::new(
            ml,
            echo_type(events.clone()),
            "echo",
            &Options::empty(),
            &[],
            &[],
            Box::new(|_, _| {}),
        )?;
        single.connect_port_in(0)?;
        single.connect_port_in(0)?;
        single.disconnect_port_in(0)?;
        single.disconnect_port_in(0)?;
        assert_eq!(*events.borrow(), vec!["connect:In:0", "disconnect:In:0"]);
        assert!(matches!(
            single.disconnect_port_in(0),
            Err(FlowError::InvalidArgument(_))
        ));
        assert!(matches!(
            single.connect_port_in(7),
            Err(FlowError::PortIndexOutOfRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn timers_reach_the_node_and_its_packets_reach_the_callback() -> Result<(), FlowError> {
        let ml = BasicMainloop::new();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let _single = SingleNode::new(
            ml.clone(),
            ticker_type(Duration::from_secs(1)),
            "ticker",
            &Options::empty(),
            &[],
            &[0],
            Box::new(move |_, _| counter.set(counter.get() + 1)),
        )?;
        ml.advance(Duration::from_millis(3500));
        assert_eq!(count.get(), 3);
        Ok(())
    }

    #[test]
    fn dropping_the_wrapper_cancels_its_timers() -> Result<(), FlowError> {
        let ml = BasicMainloop::new();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let single = SingleNode::new(
            ml.clone(),
            ticker_type(Duration::from_secs(1)),
            "ticker",
            &Options::empty(),
            &[],
            &[0],
            Box::new(move |_, _| counter.set(counter.get() + 1)),
        )?;
        ml.advance(Duration::from_millis(1500));
        assert_eq!(count.get(), 1);
        drop(single);
        ml.advance(Duration::from_secs(10));
        assert_eq!(count.get(), 1);
        Ok(())
    }

    #[test]
    fn wrapped_type_mirrors_the_inner_layout() -> Result<(), FlowError> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let inner = echo_type(events);
        let wrapped = SingleNode::wrapped_type(&inner)?;
        assert_eq!(wrapped.name(), "single/test/echo");
        assert_eq!(wrapped.ports_in(), inner.ports_in());
        assert_eq!(wrapped.ports_out(), inner.ports_out());
        assert_eq!(wrapped.port_in_count(), inner.port_in_count());
        Ok(())
    }
}
