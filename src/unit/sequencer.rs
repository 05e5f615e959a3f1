//! Step sequencer.

use alloc::rc::Rc;
use core::cell::RefCell;

use serde_json::Value;

use crate::engine::AudioEngine;
use crate::error::UnitError;
use crate::params::{Params, ParamsExt};
use crate::router::{Payload, Verb};

use super::catalog;
use super::{NodeScope, Shape, Unit};

const DEFAULT_PULSE_MS: f64 = 100.0;

#[derive(Default)]
struct Steps {
    /// `pattern[row][step]`
    pattern: Vec<Vec<bool>>,
    /// Gate length per step; a single entry applies to all steps.
    pulses: Vec<f64>,
    cursor: usize,
}

impl Steps {
    fn len(&self) -> usize {
        self.pattern.iter().map(Vec::len).max().unwrap_or(0).max(1)
    }

    fn pulse(&self, step: usize) -> f64 {
        self.pulses
            .get(step)
            .or(self.pulses.first())
            .copied()
            .unwrap_or(DEFAULT_PULSE_MS)
            .max(0.0)
    }
}

fn parse_pattern(value: Option<&Value>) -> Vec<Vec<bool>> {
    let cell = |v: &Value| match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    };
    value
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| row.as_array().map(|r| r.iter().map(cell).collect()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

/// Rows of on/off steps sharing one cursor.
///
/// Each pulse on `advance` opens a gate on every row (`row-{i}`) whose current
/// step is set and closes it after that step's `pulseMs`. When the cursor wraps
/// a pulse also goes out on `sync`.
pub struct Sequencer {
    scope: NodeScope,
    state: Rc<RefCell<Steps>>,
}

impl Sequencer {
    pub fn new(scope: NodeScope) -> Self {
        let state = Rc::new(RefCell::new(Steps::default()));

        let (s, sc) = (state.clone(), scope.clone());
        scope.on("advance", Verb::ReceiveNodeOn, move |_| advance(&s, &sc));

        let s = state.clone();
        scope.on("reset", Verb::ReceiveNodeOn, move |_| s.borrow_mut().cursor = 0);

        Self { scope, state }
    }

    /// The step the next `advance` plays.
    pub fn cursor(&self) -> usize {
        self.state.borrow().cursor
    }
}

fn advance(state: &Rc<RefCell<Steps>>, scope: &NodeScope) {
    let (step, rows, pulse, wrapped) = {
        let mut st = state.borrow_mut();
        let len = st.len();
        let step = st.cursor % len;
        let rows: Vec<usize> = st
            .pattern
            .iter()
            .enumerate()
            .filter(|(_, row)| row.get(step).copied().unwrap_or(false))
            .map(|(i, _)| i)
            .collect();
        let wrapped = step + 1 >= len;
        st.cursor = if wrapped { 0 } else { step + 1 };
        (step, rows, st.pulse(step), wrapped)
    };

    for &row in &rows {
        scope.emit_routed(row, true, Payload::Bang);
    }
    if wrapped {
        scope.emit_on("sync", Payload::Bang);
    }
    scope.report("step", Payload::Value(step as f64));

    let sc = scope.clone();
    scope.timers().schedule_in(pulse, Some(scope.id()), move |_| {
        for &row in &rows {
            sc.emit_routed(row, false, Payload::Bang);
        }
        if wrapped {
            sc.emit_off("sync", Payload::Bang);
        }
    });
}

impl Unit for Sequencer {
    fn shape(&self) -> &'static Shape {
        &catalog::SEQUENCER
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let mut st = self.state.borrow_mut();
        st.pattern = parse_pattern(params.get("pattern"));
        st.pulses = match params.get("pulseMs") {
            Some(Value::Array(_)) => params.numbers("pulseMs"),
            _ => vec![params.number("pulseMs", DEFAULT_PULSE_MS)],
        };
        st.cursor %= st.len();
        Ok(())
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
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

    #[test]
    fn gates_rows_and_syncs_on_wrap() {
        let router = EventRouter::new();
        let timers = Timers::new();
        let scope = NodeScope::new(NodeId::new("seq").unwrap(), router.clone(), timers.clone(), OnChange::new());
        let mut seq = Sequencer::new(scope);
        seq.render(
            None,
            &params(json!({ "pattern": [[1, 0, 1], [0, 1, 1]], "pulseMs": [10, 20, 30] })),
        )
        .unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        for topic in ["seq.routed.sendNodeOn", "seq.routed.sendNodeOff", "seq.sync.sendNodeOn"] {
            let log = log.clone();
            let _ = router.subscribe(topic, move |e| log.borrow_mut().push((topic, e.channel)));
        }

        router.publish("seq.advance.receiveNodeOn", &Event::bang());
        router.publish("seq.advance.receiveNodeOn", &Event::bang());
        assert_eq!(seq.cursor(), 2);
        router.publish("seq.advance.receiveNodeOn", &Event::bang());
        assert_eq!(seq.cursor(), 0);

        assert_eq!(
            *log.borrow(),
            vec![
                ("seq.routed.sendNodeOn", Some(0)),
                ("seq.routed.sendNodeOn", Some(1)),
                ("seq.routed.sendNodeOn", Some(0)),
                ("seq.routed.sendNodeOn", Some(1)),
                ("seq.sync.sendNodeOn", None),
            ]
        );

        log.borrow_mut().clear();
        timers.advance(25.0);
        assert_eq!(log.borrow().len(), 2);
        timers.advance(30.0);
        assert_eq!(log.borrow().len(), 4);
    }
}
