//! Switches: route gates to one of several outputs.
//!
//! Both publish routed events (see [`Event::channel`](crate::router::Event))
//! so the output index is picked when the event fires, not when edges are
//! wired.

use alloc::rc::Rc;
use core::cell::RefCell;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::engine::AudioEngine;
use crate::error::UnitError;
use crate::params::{Params, ParamsExt};
use crate::router::{Origin, Payload, Verb};

use super::catalog;
use super::{NodeScope, Shape, Unit};

const DEFAULT_OUTPUTS: usize = 2;

fn outputs(params: &Params) -> usize {
    params.count("numOutputs", DEFAULT_OUTPUTS).max(1)
}

struct Cycle {
    active: usize,
    outputs: usize,
}

/// Cycles through its outputs, one step per gate.
///
/// A gate-on advances to the next output and fires there; the matching
/// gate-off goes to the same output. `reset` rewinds to output 0 silently.
pub struct Switch {
    scope: NodeScope,
    state: Rc<RefCell<Cycle>>,
}

impl Switch {
    pub fn new(scope: NodeScope) -> Self {
        let state = Rc::new(RefCell::new(Cycle { active: 0, outputs: DEFAULT_OUTPUTS }));

        let (s, emitter) = (state.clone(), scope.clone());
        scope.on_gate("input", move |e, on| {
            let index = {
                let mut s = s.borrow_mut();
                if on {
                    s.active = (s.active + 1) % s.outputs;
                }
                s.active
            };
            emitter.emit_routed(index, on, e.payload.clone());
        });

        let s = state.clone();
        scope.on("reset", Verb::ReceiveNodeOn, move |_| s.borrow_mut().active = 0);

        Self { scope, state }
    }

    /// The output the last gate went to.
    pub fn active_output(&self) -> usize {
        self.state.borrow().active
    }
}

impl Unit for Switch {
    fn shape(&self) -> &'static Shape {
        &catalog::SWITCH
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let mut s = self.state.borrow_mut();
        s.outputs = outputs(params);
        s.active %= s.outputs;
        Ok(())
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
    }
}

#[derive(Default)]
struct Assignments {
    outputs: usize,
    by_source: HashMap<Option<Origin>, usize>,
}

impl Assignments {
    fn lowest_free(&self) -> Option<usize> {
        (0..self.outputs).find(|i| !self.by_source.values().any(|v| v == i))
    }
}

/// Gives each upstream source its own output for as long as its gate is held.
///
/// A new source takes the lowest free output; with every output taken its
/// gate is dropped. Releasing frees the output. `reset` releases everything,
/// sending a gate-off to each occupied output.
pub struct BlockingSwitch {
    scope: NodeScope,
    state: Rc<RefCell<Assignments>>,
}

impl BlockingSwitch {
    pub fn new(scope: NodeScope) -> Self {
        let state = Rc::new(RefCell::new(Assignments {
            outputs: DEFAULT_OUTPUTS,
            ..Default::default()
        }));

        let (s, emitter) = (state.clone(), scope.clone());
        scope.on_gate("input", move |e, on| {
            let index = {
                let mut s = s.borrow_mut();
                match (s.by_source.get(&e.origin).copied(), on) {
                    (Some(i), true) => Some(i),
                    (Some(i), false) => {
                        s.by_source.remove(&e.origin);
                        Some(i)
                    }
                    (None, true) => {
                        let free = s.lowest_free();
                        if let Some(i) = free {
                            s.by_source.insert(e.origin.clone(), i);
                        }
                        free
                    }
                    (None, false) => None,
                }
            };
            match index {
                Some(i) => {
                    emitter.emit_routed(i, on, e.payload.clone());
                }
                None if on => tracing::trace!(node = %emitter.id(), "all outputs busy, gate dropped"),
                None => {}
            }
        });

        let (s, emitter) = (state.clone(), scope.clone());
        scope.on("reset", Verb::ReceiveNodeOn, move |_| {
            let occupied: Vec<usize> = s.borrow_mut().by_source.drain().map(|(_, i)| i).sorted().collect();
            for i in occupied {
                emitter.emit_routed(i, false, Payload::Bang);
            }
        });

        Self { scope, state }
    }

    /// Occupied outputs, ascending.
    pub fn occupied(&self) -> Vec<usize> {
        self.state.borrow().by_source.values().copied().sorted().collect()
    }
}

impl Unit for BlockingSwitch {
    fn shape(&self) -> &'static Shape {
        &catalog::BLOCKING_SWITCH
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let dropped: Vec<usize> = {
            let mut s = self.state.borrow_mut();
            s.outputs = outputs(params);
            let outputs = s.outputs;
            let dropped = s.by_source.values().copied().filter(|&i| i >= outputs).sorted().collect();
            s.by_source.retain(|_, i| *i < outputs);
            dropped
        };
        // Outputs that no longer exist still owe their gate-off.
        for i in dropped {
            self.scope.emit_routed(i, false, Payload::Bang);
        }
        Ok(())
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
        self.state.borrow_mut().by_source.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::description::NodeId;
    use crate::params::params;
    use crate::router::{Event, EventRouter};
    use crate::timers::Timers;
    use crate::unit::OnChange;

    fn scope(router: &EventRouter) -> NodeScope {
        NodeScope::new(NodeId::new("sw").unwrap(), router.clone(), Timers::new(), OnChange::new())
    }

    fn record(router: &EventRouter) -> Rc<RefCell<Vec<(bool, usize)>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for on in [true, false] {
            let log = log.clone();
            let _ = router.subscribe(format!("sw.routed.{}", Verb::send(on)), move |e| {
                log.borrow_mut().push((on, e.channel.unwrap_or(usize::MAX)));
            });
        }
        log
    }

    fn from(node: &str) -> Event {
        Event::bang().with_origin(Origin {
            node: NodeId::new(node).unwrap(),
            port: "output".into(),
        })
    }

    #[test]
    fn switch_cycles_and_resets_silently() {
        let router = EventRouter::new();
        let log = record(&router);
        let mut sw = Switch::new(scope(&router));
        sw.render(None, &params(json!({ "numOutputs": 3 }))).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            router.publish("sw.input.receiveNodeOn", &Event::bang());
            seen.push(sw.active_output());
        }
        assert_eq!(seen, vec![1, 2, 0]);

        router.publish("sw.input.receiveNodeOn", &Event::bang());
        let emitted = log.borrow().len();
        router.publish("sw.reset.receiveNodeOn", &Event::bang());
        assert_eq!(log.borrow().len(), emitted);
        assert_eq!(sw.active_output(), 0);

        router.publish("sw.input.receiveNodeOff", &Event::bang());
        assert_eq!(log.borrow().last(), Some(&(false, 0)));
    }

    #[test]
    fn blocking_switch_drops_when_full() {
        let router = EventRouter::new();
        let log = record(&router);
        let mut sw = BlockingSwitch::new(scope(&router));
        sw.render(None, &params(json!({ "numOutputs": 2 }))).unwrap();

        for node in ["a", "b", "c"] {
            router.publish("sw.input.receiveNodeOn", &from(node));
        }
        assert_eq!(sw.occupied(), vec![0, 1]);
        assert_eq!(*log.borrow(), vec![(true, 0), (true, 1)]);

        router.publish("sw.input.receiveNodeOff", &from("a"));
        router.publish("sw.input.receiveNodeOn", &from("c"));
        assert_eq!(sw.occupied(), vec![0, 1]);
        assert_eq!(log.borrow()[2..], [(false, 0), (true, 0)]);

        router.publish("sw.reset.receiveNodeOn", &Event::bang());
        assert!(sw.occupied().is_empty());
        assert_eq!(log.borrow()[4..], [(false, 0), (false, 1)]);
    }

    #[test]
    fn shrinking_releases_dropped_outputs() {
        let router = EventRouter::new();
        let log = record(&router);
        let mut sw = BlockingSwitch::new(scope(&router));
        sw.render(None, &params(json!({ "numOutputs": 4 }))).unwrap();

        for node in ["a", "b", "c", "d"] {
            router.publish("sw.input.receiveNodeOn", &from(node));
        }
        assert_eq!(sw.occupied(), vec![0, 1, 2, 3]);

        sw.render(None, &params(json!({ "numOutputs": 2 }))).unwrap();
        assert_eq!(sw.occupied(), vec![0, 1]);
        assert_eq!(log.borrow()[4..], [(false, 2), (false, 3)]);

        // The released sources are unknown again, so their gate-off is ignored.
        router.publish("sw.input.receiveNodeOff", &from("c"));
        assert_eq!(log.borrow().len(), 6);
    }
}
