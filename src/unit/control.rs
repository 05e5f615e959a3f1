//! Small control-plane units: function, constant, frequency and macro.
//!
//! All of them listen on `input` and answer on `output`, forwarding the gate
//! direction they received.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use crate::engine::AudioEngine;
use crate::error::{CompileError, EvalFault, UnitError};
use crate::expr::Expression;
use crate::params::{Params, ParamsExt};
use crate::router::Payload;

use super::catalog;
use super::{NodeScope, Shape, Unit};

const INPUT: &str = "input";
const OUTPUT: &str = "output";

/// Re-emit `payload` on `output` in the direction `on`.
fn answer(scope: &NodeScope, on: bool, payload: Payload) {
    if on {
        scope.emit_on(OUTPUT, payload);
    } else {
        scope.emit_off(OUTPUT, payload);
    }
}

/// Applies an expression over `x` to every incoming number.
///
/// Evaluation failures become [`Payload::Error`] and are sent on like values;
/// an incoming error is passed through untouched.
pub struct Function {
    scope: NodeScope,
    expr: Rc<RefCell<Result<Expression, CompileError>>>,
}

impl Function {
    pub fn new(scope: NodeScope) -> Self {
        let expr = Rc::new(RefCell::new(Expression::compile("x", &["x"])));
        let (ex, sc) = (expr.clone(), scope.clone());
        scope.on_gate(INPUT, move |e, on| {
            let payload = evaluate(&ex.borrow(), &e.payload);
            answer(&sc, on, payload);
        });
        Self { scope, expr }
    }
}

fn evaluate(expr: &Result<Expression, CompileError>, input: &Payload) -> Payload {
    let result = match (input, expr) {
        (Payload::Error(fault), _) => Err(fault.clone()),
        (_, Err(e)) => Err(EvalFault::Compile(e.clone())),
        (input, Ok(expr)) => input.as_number().ok_or(EvalFault::NoValue).and_then(|x| expr.eval(&[x])),
    };
    match result {
        Ok(v) => Payload::Value(v),
        Err(fault) => Payload::Error(fault),
    }
}

impl Unit for Function {
    fn shape(&self) -> &'static Shape {
        &catalog::FUNCTION
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let source = params.text("expression", "x");
        let mut expr = self.expr.borrow_mut();
        let unchanged = match &*expr {
            Ok(e) => e.source() == source,
            Err(_) => false,
        };
        if !unchanged {
            *expr = Expression::compile(source, &["x"]);
        }
        match &*expr {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone().into()),
        }
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
    }
}

/// Emits its `value` whenever triggered.
pub struct Constant {
    scope: NodeScope,
    value: Rc<Cell<f64>>,
}

impl Constant {
    pub fn new(scope: NodeScope) -> Self {
        let value = Rc::new(Cell::new(0.0));
        scope.expose_params(catalog::CONSTANT.params);
        let (v, sc) = (value.clone(), scope.clone());
        scope.on_gate(INPUT, move |_, on| answer(&sc, on, Payload::Value(v.get())));
        Self { scope, value }
    }
}

impl Unit for Constant {
    fn shape(&self) -> &'static Shape {
        &catalog::CONSTANT
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        self.value.set(params.number("value", 0.0));
        Ok(())
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
    }
}

/// Equal-tempered frequency of a MIDI note number, A4 = 440 Hz.
pub fn note_to_hz(note: f64) -> f64 {
    440.0 * ((note - 69.0) / 12.0).exp2()
}

/// Turns note numbers into pitched triggers.
///
/// `transpose` (semitones) and `octave` shift the note first. Incoming notes
/// are shifted by the same interval.
pub struct Frequency {
    scope: NodeScope,
    shift: Rc<Cell<f64>>,
}

impl Frequency {
    pub fn new(scope: NodeScope) -> Self {
        let shift = Rc::new(Cell::new(0.0));
        scope.expose_params(catalog::FREQUENCY.params);
        let (s, sc) = (shift.clone(), scope.clone());
        scope.on_gate(INPUT, move |e, on| {
            let payload = match e.payload {
                Payload::Value(note) => Payload::Note {
                    frequency: note_to_hz(note + s.get()),
                    velocity: 1.0,
                },
                Payload::Note { frequency, velocity } => Payload::Note {
                    frequency: frequency * (s.get() / 12.0).exp2(),
                    velocity,
                },
                Payload::Error(ref fault) => Payload::Error(fault.clone()),
                _ => Payload::Error(EvalFault::NoValue),
            };
            answer(&sc, on, payload);
        });
        Self { scope, shift }
    }
}

impl Unit for Frequency {
    fn shape(&self) -> &'static Shape {
        &catalog::FREQUENCY
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        self.shift.set(params.number("transpose", 0.0) + 12.0 * params.number("octave", 0.0));
        Ok(())
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
    }
}

#[derive(Clone, Copy)]
struct Knob {
    value: f64,
    min: f64,
    max: f64,
}

impl Knob {
    fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min.min(self.max), self.max.max(self.min))
    }
}

/// A knob. Numbers arriving on `input` move it (and its stored `value`);
/// every move is sent on `output`. A bare trigger re-sends the current value.
pub struct Macro {
    scope: NodeScope,
    knob: Rc<Cell<Knob>>,
}

impl Macro {
    pub fn new(scope: NodeScope) -> Self {
        let knob = Rc::new(Cell::new(Knob { value: 0.0, min: 0.0, max: 1.0 }));
        let (k, sc) = (knob.clone(), scope.clone());
        scope.on_gate(INPUT, move |e, on| {
            let mut current = k.get();
            if let Some(v) = e.payload.as_number() {
                current.value = current.clamp(v);
                k.set(current);
                let mut patch = Params::new();
                patch.set_number("value", current.value);
                sc.on_change().update(sc.id(), patch);
            }
            answer(&sc, on, Payload::Value(current.value));
        });
        Self { scope, knob }
    }

    pub fn value(&self) -> f64 {
        self.knob.get().value
    }
}

impl Unit for Macro {
    fn shape(&self) -> &'static Shape {
        &catalog::MACRO
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let old = self.knob.get();
        let mut knob = Knob {
            value: old.value,
            min: params.number("min", 0.0),
            max: params.number("max", 1.0),
        };
        knob.value = knob.clamp(params.number("value", old.value));
        self.knob.set(knob);
        if knob.value != old.value {
            self.scope.emit_on(OUTPUT, Payload::Value(knob.value));
        }
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
    use crate::unit::{Deferred, OnChange};

    fn scope(router: &EventRouter, on_change: &OnChange) -> NodeScope {
        NodeScope::new(NodeId::new("f").unwrap(), router.clone(), Timers::new(), on_change.clone())
    }

    fn outputs(router: &EventRouter) -> Rc<RefCell<Vec<Payload>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let _ = router.subscribe("f.output.sendNodeOn", move |e| l.borrow_mut().push(e.payload.clone()));
        log
    }

    #[test]
    fn function_errors_do_not_stick() {
        let router = EventRouter::new();
        let log = outputs(&router);
        let mut f = Function::new(scope(&router, &OnChange::new()));
        f.render(None, &params(json!({ "expression": "sqrt(x)" }))).unwrap();

        router.publish("f.input.receiveNodeOn", &Event::value(-1.0));
        router.publish("f.input.receiveNodeOn", &Event::bang());
        router.publish("f.input.receiveNodeOn", &Event::value(9.0));

        let log = log.borrow();
        assert_eq!(log[0], Payload::Error(EvalFault::NonFinite));
        assert_eq!(log[1], Payload::Error(EvalFault::NoValue));
        assert_eq!(log[2], Payload::Value(3.0));
    }

    #[test]
    fn function_compile_errors_become_payloads() {
        let router = EventRouter::new();
        let log = outputs(&router);
        let mut f = Function::new(scope(&router, &OnChange::new()));
        assert!(f.render(None, &params(json!({ "expression": "x +" }))).is_err());

        router.publish("f.input.receiveNodeOn", &Event::value(1.0));
        assert!(log.borrow()[0].is_error());

        f.render(None, &params(json!({ "expression": "x + 1" }))).unwrap();
        router.publish("f.input.receiveNodeOn", &Event::value(1.0));
        assert_eq!(log.borrow()[1], Payload::Value(2.0));
    }

    #[test]
    fn frequency_converts_notes() {
        let router = EventRouter::new();
        let log = outputs(&router);
        let mut f = Frequency::new(scope(&router, &OnChange::new()));
        f.render(None, &params(json!({ "octave": 1 }))).unwrap();
        router.publish("f.input.receiveNodeOn", &Event::value(57.0));
        assert_eq!(log.borrow()[0], Payload::Note { frequency: 440.0, velocity: 1.0 });
    }

    #[test]
    fn macro_clamps_and_reports_its_value() {
        let router = EventRouter::new();
        let on_change = OnChange::new();
        let log = outputs(&router);
        let mut m = Macro::new(scope(&router, &on_change));
        m.render(None, &params(json!({ "value": 0.5, "min": 0, "max": 10 }))).unwrap();

        router.publish("f.input.receiveNodeOn", &Event::value(12.0));
        assert_eq!(m.value(), 10.0);
        assert_eq!(*log.borrow(), vec![Payload::Value(0.5), Payload::Value(10.0)]);

        let mut patch = Params::new();
        patch.set_number("value", 10.0);
        assert_eq!(on_change.drain(), vec![Deferred::Update { node: NodeId::new("f").unwrap(), patch }]);

        // Echo of its own update: no second emission
        m.render(None, &params(json!({ "value": 10.0, "min": 0, "max": 10 }))).unwrap();
        assert_eq!(log.borrow().len(), 2);
    }
}
