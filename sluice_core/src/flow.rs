//! The static flow container.
//!
//! A composite node type owns a [`FlowRecord`]: children, the sorted
//! connection table and the exported port/option tables. Instantiating
//! it yields a [`StaticFlow`], the node that builds the children, wires
//! the connections and routes every packet a child sends.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::options::Options;
use crate::packet::Packet;
use crate::{
    ConnId, FlowError, Node, NodeContext, NodeHandle, NodeType, PortDirection, PortIndex,
    TimerToken, ERROR_PORT,
};

/// One edge of the composite graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub src: usize,
    pub src_port: PortIndex,
    pub dst: usize,
    pub dst_port: PortIndex,
    /// Index of this edge within the fan-out of `(src, src_port)`,
    /// stable for the connection's lifetime.
    pub id: ConnId,
}

/// A child of the composite: name, type and resolved options.
#[derive(Debug)]
pub struct ChildSpec {
    pub name: String,
    pub node_type: Rc<NodeType>,
    pub options: Options,
}

/// Mapping of one exported composite port index to a child port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportedPort {
    pub child: usize,
    pub port: PortIndex,
}

/// Link from a composite option member to a child option member.
#[derive(Debug, Clone)]
pub struct OptionLink {
    pub child: usize,
    pub member: String,
    pub exported: String,
}

/// The immutable product of the builder. Children of a record outlive
/// every flow instantiated from it; the record holds their types.
#[derive(Debug, Default)]
pub struct FlowRecord {
    pub children: Vec<ChildSpec>,
    /// Sorted by `(src, src_port, dst, dst_port)`, no duplicates.
    pub connections: Vec<Connection>,
    /// Composite input index -> child input port.
    pub exported_in: Vec<ExportedPort>,
    /// Composite output index -> child output port.
    pub exported_out: Vec<ExportedPort>,
    pub option_links: Vec<OptionLink>,
}

impl FlowRecord {
    /// The contiguous run of connections leaving `(src, src_port)`.
    pub fn run(&self, src: usize, src_port: PortIndex) -> &[Connection] {
        let start = self
            .connections
            .partition_point(|c| (c.src, c.src_port) < (src, src_port));
        let end = self
            .connections
            .partition_point(|c| (c.src, c.src_port) <= (src, src_port));
        &self.connections[start..end]
    }

    /// Composite output indices fed by `(child, port)`.
    pub fn exported_out_for(
        &self,
        child: usize,
        port: PortIndex,
    ) -> impl Iterator<Item = PortIndex> + '_ {
        self.exported_out
            .iter()
            .enumerate()
            .filter(move |(_, ep)| ep.child == child && ep.port == port)
            .map(|(index, _)| index as PortIndex)
    }
}

/// A live composite: the container node owning its children.
pub struct StaticFlow {
    record: Rc<FlowRecord>,
    children: Vec<NodeHandle>,
    ready: bool,
    /// Packets sent while the flow was still opening children.
    pending: RefCell<VecDeque<(usize, PortIndex, Packet)>>,
    /// Timer tokens registered by children, for downward dispatch.
    timers: RefCell<HashMap<TimerToken, usize>>,
    /// Connections per endpoint, maintained while wiring and unwiring.
    counters: RefCell<HashMap<(usize, PortDirection, PortIndex), u16>>,
}

impl std::fmt::Debug for StaticFlow {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        fmt.debug_struct("StaticFlow")
            .field("children", &self.children)
            .field("ready", &self.ready)
            .finish()
    }
}

/// Context handed to a child: sends route through the owning flow,
/// timers bubble up to the root.
struct ChildContext<'a> {
    flow: &'a StaticFlow,
    child: usize,
    parent: &'a mut dyn NodeContext,
}

impl NodeContext for ChildContext<'_> {
    fn send(&mut self, port: PortIndex, packet: Packet) -> Result<(), FlowError> {
        let spec = &self.flow.record.children[self.child];
        let port_spec = spec.node_type.port_out(port).ok_or_else(|| {
            FlowError::PortIndexOutOfRange {
                port: spec.name.clone(),
                index: port,
                size: spec.node_type.port_out_count(),
            }
        })?;
        if !port_spec.packet_type.accepts(&packet.packet_type()) {
            return Err(FlowError::WrongType {
                expected: port_spec.packet_type.to_string(),
                actual: packet.packet_type().to_string(),
            });
        }
        if !self.flow.ready {
            self.flow
                .pending
                .borrow_mut()
                .push_back((self.child, port, packet));
            return Ok(());
        }
        self.flow.route(self.child, port, packet, self.parent)
    }

    fn add_timeout(&mut self, interval: Duration) -> Result<TimerToken, FlowError> {
        let token = self.parent.add_timeout(interval)?;
        self.flow.timers.borrow_mut().insert(token, self.child);
        Ok(token)
    }

    fn remove_timeout(&mut self, token: TimerToken) -> Result<(), FlowError> {
        self.flow.timers.borrow_mut().remove(&token);
        self.parent.remove_timeout(token)
    }
}

fn child_options(record: &FlowRecord, index: usize, composite: &Options) -> Options {
    let mut options = record.children[index].options.clone();
    for link in record.option_links.iter().filter(|l| l.child == index) {
        if let Some(value) = composite.get(&link.exported) {
            options.set(link.member.clone(), value.clone());
        }
    }
    options
}

impl StaticFlow {
    /// Build the children in order, wire the connections and flush the
    /// packets queued during opening. A failure unwinds everything done
    /// so far, in reverse.
    pub(crate) fn open(
        record: Rc<FlowRecord>,
        ctx: &mut dyn NodeContext,
        options: &Options,
    ) -> Result<StaticFlow, FlowError> {
        let mut flow = StaticFlow {
            record: record.clone(),
            children: Vec::with_capacity(record.children.len()),
            ready: false,
            pending: RefCell::new(VecDeque::new()),
            timers: RefCell::new(HashMap::new()),
            counters: RefCell::new(HashMap::new()),
        };
        for (index, spec) in record.children.iter().enumerate() {
            let options = child_options(&record, index, options);
            let built = {
                let mut cctx = ChildContext {
                    flow: &flow,
                    child: index,
                    parent: ctx,
                };
                spec.node_type.instantiate(&spec.name, &mut cctx, &options)
            };
            match built {
                Ok(handle) => flow.children.push(handle),
                Err(e) => {
                    flow.close_children(ctx);
                    return Err(FlowError::node(format!(
                        "could not open node {:?}: {e}",
                        spec.name
                    )));
                }
            }
        }
        if let Err(e) = flow.wire(ctx) {
            flow.close_children(ctx);
            return Err(e);
        }
        flow.ready = true;
        flow.flush_pending(ctx)?;
        Ok(flow)
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// Connections currently attached to an endpoint.
    pub fn connection_count(&self, child: usize, direction: PortDirection, port: PortIndex) -> u16 {
        self.counters
            .borrow()
            .get(&(child, direction, port))
            .copied()
            .unwrap_or(0)
    }

    /// Borrow child `index` and run `f` with a context that routes its
    /// sends. Re-entry into a node that is currently processing is an
    /// error, not a deadlock.
    fn dispatch<R>(
        &self,
        index: usize,
        parent: &mut dyn NodeContext,
        f: impl FnOnce(&mut dyn Node, &mut dyn NodeContext) -> R,
    ) -> Result<R, FlowError> {
        let handle = self
            .children
            .get(index)
            .ok_or_else(|| FlowError::InvalidArgument(format!("no child {index}")))?;
        let mut node = handle.node().try_borrow_mut().map_err(|_| {
            FlowError::node(format!("node {:?} is already processing", handle.id()))
        })?;
        let mut ctx = ChildContext {
            flow: self,
            child: index,
            parent,
        };
        Ok(f(&mut **node, &mut ctx))
    }

    /// Deliver a packet sent by child `src` on output `src_port` to
    /// every connected destination, in table order, then forward it out
    /// of the composite where exported. The packet is dropped here,
    /// exactly once, after the last delivery.
    fn route(
        &self,
        src: usize,
        src_port: PortIndex,
        packet: Packet,
        parent: &mut dyn NodeContext,
    ) -> Result<(), FlowError> {
        let destinations = self.record.run(src, src_port);
        for conn in destinations {
            let delivered = self
                .dispatch(conn.dst, parent, |node, ctx| {
                    node.process(ctx, conn.dst_port, conn.id, &packet)
                })
                .and_then(|r| r);
            if let Err(e) = delivered {
                // one faulty subscriber must not block its siblings
                tracing::error!(
                    node = %self.children[conn.dst].id(),
                    port = conn.dst_port,
                    error = %e,
                    "packet delivery failed"
                );
            }
        }
        let delivered_inside = !destinations.is_empty();
        let mut exported = false;
        for composite_port in self.record.exported_out_for(src, src_port) {
            exported = true;
            parent.send(composite_port, packet.clone())?;
        }
        // error packets nobody consumed bubble out of the composite's
        // own error port
        if src_port == ERROR_PORT && !delivered_inside && !exported {
            parent.send(ERROR_PORT, packet.clone())?;
        }
        Ok(())
    }

    fn flush_pending(&self, parent: &mut dyn NodeContext) -> Result<(), FlowError> {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some((src, port, packet)) => self.route(src, port, packet, parent)?,
                None => return Ok(()),
            }
        }
    }

    fn endpoint_connected(
        &self,
        index: usize,
        direction: PortDirection,
        port: PortIndex,
        conn_id: ConnId,
        parent: &mut dyn NodeContext,
    ) -> Result<(), FlowError> {
        self.dispatch(index, parent, |node, ctx| {
            node.port_connected(ctx, direction, port, conn_id)
        })
        .and_then(|r| r)?;
        *self
            .counters
            .borrow_mut()
            .entry((index, direction, port))
            .or_insert(0) += 1;
        Ok(())
    }

    fn endpoint_disconnected(
        &self,
        index: usize,
        direction: PortDirection,
        port: PortIndex,
        conn_id: ConnId,
        parent: &mut dyn NodeContext,
    ) {
        let result = self
            .dispatch(index, parent, |node, ctx| {
                node.port_disconnected(ctx, direction, port, conn_id)
            })
            .and_then(|r| r);
        if let Err(e) = result {
            tracing::error!(child = index, port, error = %e, "disconnect failed");
        }
        if let Some(count) = self.counters.borrow_mut().get_mut(&(index, direction, port)) {
            *count = count.saturating_sub(1);
        }
    }

    /// Fire connect callbacks for the whole table, in order, on both
    /// endpoints. A failure unwinds what was already connected.
    fn wire(&self, parent: &mut dyn NodeContext) -> Result<(), FlowError> {
        for (i, conn) in self.record.connections.iter().enumerate() {
            if let Err(e) =
                self.endpoint_connected(conn.src, PortDirection::Out, conn.src_port, conn.id, parent)
            {
                self.unwire(parent, i);
                return Err(e);
            }
            if let Err(e) =
                self.endpoint_connected(conn.dst, PortDirection::In, conn.dst_port, conn.id, parent)
            {
                self.endpoint_disconnected(
                    conn.src,
                    PortDirection::Out,
                    conn.src_port,
                    conn.id,
                    parent,
                );
                self.unwire(parent, i);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Disconnect the first `wired` connections, in reverse order.
    fn unwire(&self, parent: &mut dyn NodeContext, wired: usize) {
        for conn in self.record.connections[..wired].iter().rev() {
            self.endpoint_disconnected(conn.dst, PortDirection::In, conn.dst_port, conn.id, parent);
            self.endpoint_disconnected(
                conn.src,
                PortDirection::Out,
                conn.src_port,
                conn.id,
                parent,
            );
        }
    }

    /// Close children in reverse build order.
    fn close_children(&self, parent: &mut dyn NodeContext) {
        for index in (0..self.children.len()).rev() {
            let handle = &self.children[index];
            let mut ctx = ChildContext {
                flow: self,
                child: index,
                parent,
            };
            handle.close(&mut ctx);
        }
    }
}

impl Node for StaticFlow {
    fn process(
        &mut self,
        ctx: &mut dyn NodeContext,
        port: PortIndex,
        conn_id: ConnId,
        packet: &Packet,
    ) -> Result<(), FlowError> {
        let ep = *self.record.exported_in.get(port as usize).ok_or_else(|| {
            FlowError::PortIndexOutOfRange {
                port: "exported input".into(),
                index: port,
                size: self.record.exported_in.len() as u16,
            }
        })?;
        self.dispatch(ep.child, ctx, |node, cctx| {
            node.process(cctx, ep.port, conn_id, packet)
        })
        .and_then(|r| r)
    }

    fn port_connected(
        &mut self,
        ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        conn_id: ConnId,
    ) -> Result<(), FlowError> {
        let ep = match direction {
            PortDirection::In => self.record.exported_in.get(port as usize),
            PortDirection::Out if port == ERROR_PORT => None,
            PortDirection::Out => self.record.exported_out.get(port as usize),
        };
        match ep.copied() {
            Some(ep) => self
                .dispatch(ep.child, ctx, |node, cctx| {
                    node.port_connected(cctx, direction, ep.port, conn_id)
                })
                .and_then(|r| r),
            None => Ok(()),
        }
    }

    fn port_disconnected(
        &mut self,
        ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        conn_id: ConnId,
    ) -> Result<(), FlowError> {
        let ep = match direction {
            PortDirection::In => self.record.exported_in.get(port as usize),
            PortDirection::Out if port == ERROR_PORT => None,
            PortDirection::Out => self.record.exported_out.get(port as usize),
        };
        match ep.copied() {
            Some(ep) => self
                .dispatch(ep.child, ctx, |node, cctx| {
                    node.port_disconnected(cctx, direction, ep.port, conn_id)
                })
                .and_then(|r| r),
            None => Ok(()),
        }
    }

    fn timeout(&mut self, ctx: &mut dyn NodeContext, token: TimerToken) -> Result<(), FlowError> {
        let child = self.timers.borrow().get(&token).copied();
        match child {
            Some(child) => self
                .dispatch(child, ctx, |node, cctx| node.timeout(cctx, token))
                .and_then(|r| r),
            None => Err(FlowError::NotFound(format!("timer {token:?}"))),
        }
    }

    fn close(&mut self, ctx: &mut dyn NodeContext) {
        self.unwire(ctx, self.record.connections.len());
        self.close_children(ctx);
        let tokens: Vec<TimerToken> = self.timers.borrow_mut().drain().map(|(t, _)| t).collect();
        for token in tokens {
            let _ = ctx.remove_timeout(token);
        }
    }
}
