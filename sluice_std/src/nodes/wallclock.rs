use sluice_core::node_prelude::*;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn current_minute() -> i32 {
    ((epoch_seconds() / 60) % 60) as i32
}

fn until_next_minute() -> Duration {
    Duration::from_secs(60 - (epoch_seconds() % 60))
}

fn minute_packet() -> Packet {
    Packet::IntRange(IntRange {
        value: current_minute(),
        min: 0,
        max: 59,
        step: 1,
    })
}

/// Sends the minute of the hour on every minute boundary, and once on
/// each new `OUT` connection unless `send_initial` is off.
#[derive(Debug)]
pub struct MinuteNode {
    timer: Option<TimerToken>,
    send_initial: bool,
}

impl Node for MinuteNode {
    fn process(
        &mut self,
        _ctx: &mut dyn NodeContext,
        _port: PortIndex,
        _conn_id: ConnId,
        _packet: &Packet,
    ) -> Result<(), FlowError> {
        Err(FlowError::node("wallclock nodes have no input ports"))
    }

    fn port_connected(
        &mut self,
        ctx: &mut dyn NodeContext,
        direction: PortDirection,
        port: PortIndex,
        _conn_id: ConnId,
    ) -> Result<(), FlowError> {
        if direction == PortDirection::Out && port == 0 && self.send_initial {
            ctx.send(0, minute_packet())?;
        }
        Ok(())
    }

    fn timeout(&mut self, ctx: &mut dyn NodeContext, token: TimerToken) -> Result<(), FlowError> {
        if Some(token) != self.timer {
            return Ok(());
        }
        ctx.send(0, minute_packet())?;
        // the first interval only reaches the next boundary, switch to
        // a full minute from here on
        ctx.remove_timeout(token)?;
        self.timer = Some(ctx.add_timeout(Duration::from_secs(60))?);
        Ok(())
    }

    fn close(&mut self, ctx: &mut dyn NodeContext) {
        if let Some(timer) = self.timer.take() {
            let _ = ctx.remove_timeout(timer);
        }
    }
}

pub fn wallclock_minute_type() -> Rc<NodeType> {
    NodeType::new(
        TypeDescription::named("wallclock/minute")
            .with_description("The minute of the hour, sent once per minute"),
        vec![],
        vec![PortSpec::new("OUT", PacketType::IntRange)],
        OptionsLayout::new(vec![OptionSpec::new("send_initial", OptionType::Boolean)
            .with_default(OptionValue::Boolean(true))])
        .expect("wallclock/minute layout is valid"),
        NodeTypeFlags::empty(),
        Box::new(|ctx, options| {
            let timer = ctx.add_timeout(until_next_minute())?;
            Ok(Box::new(MinuteNode {
                timer: Some(timer),
                send_initial: options.boolean("send_initial")?,
            }))
        }),
    )
    .expect("wallclock/minute port table is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::mainloop::BasicMainloop;
    use sluice_core::options::NamedOptions;
    use sluice_core::single::SingleNode;
    use std::cell::RefCell;

    #[test]
    fn silent_until_connected_then_one_per_minute() -> Result<(), FlowError> {
        let ml = BasicMainloop::new();
        let log: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let t = wallclock_minute_type();
        let mut single = SingleNode::new(
            ml.clone(),
            t.clone(),
            "minute",
            &t.resolve_options(&NamedOptions::new())?,
            &[],
            &[],
            Box::new(move |_, p| sink.borrow_mut().push(p.clone())),
        )?;

        // no OUT connection: boundary fires are dropped by the wrapper
        ml.advance(Duration::from_secs(61));
        assert!(log.borrow().is_empty());

        single.connect_port_out(0)?;
        // the connection itself sends the current minute once
        assert_eq!(log.borrow().len(), 1);
        // one or two boundaries fit in 61 seconds, depending on where
        // in the minute the test started
        ml.advance(Duration::from_secs(61));
        let count = log.borrow().len();
        assert!((2..=3).contains(&count), "{count} packets");

        for packet in log.borrow().iter() {
            let range = packet.as_int_range()?;
            assert!((0..=59).contains(&range.value));
            assert_eq!(range.min, 0);
            assert_eq!(range.max, 59);
        }
        Ok(())
    }
}
