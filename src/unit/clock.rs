//! Tempo clock.
//!
//! Tick `n` is scheduled at `start + n * interval` rather than relative to the
//! previous tick, so timer lateness never accumulates.

use alloc::rc::Rc;
use core::cell::RefCell;

use crate::engine::AudioEngine;
use crate::error::UnitError;
use crate::params::{Params, ParamsExt};
use crate::router::{Payload, Verb};
use crate::timers::TimerId;

use super::catalog;
use super::{NodeScope, Shape, Unit};

const OUTPUT: &str = "output";

/// When a tick's gate-off is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffMode {
    /// Triggers only.
    None,
    /// `pulseMs` after each tick.
    After,
    /// `pulseMs` before the next tick.
    Before,
}

impl OffMode {
    pub fn from_name(name: &str) -> Self {
        match name {
            "after" => OffMode::After,
            "before" => OffMode::Before,
            _ => OffMode::None,
        }
    }
}

struct ClockState {
    running: bool,
    bpm: f64,
    start_time: f64,
    /// Tick index due at `start_time`.
    anchor: u64,
    tick_count: u64,
    off_mode: OffMode,
    pulse_ms: f64,
    next: Option<TimerId>,
}

impl ClockState {
    #[inline]
    fn interval(&self) -> f64 {
        60_000.0 / self.bpm
    }

    #[inline]
    fn tick_time(&self, n: u64) -> f64 {
        self.start_time + n.saturating_sub(self.anchor) as f64 * self.interval()
    }

    /// Off time for the tick at `at`, kept inside `[at, next tick)`.
    fn off_time(&self, at: f64) -> Option<f64> {
        let interval = self.interval();
        let pulse = self.pulse_ms.clamp(0.0, interval);
        match self.off_mode {
            OffMode::None => None,
            OffMode::After => Some(at + pulse.min(interval * 0.999)),
            OffMode::Before => Some(at + (interval - pulse).max(0.0).min(interval * 0.999)),
        }
    }
}

/// Emits a trigger on `output` at a steady tempo.
///
/// Ports: `start`, `stop`, `reset`, `bpm`. The `running` parameter starts and
/// stops it from the editor.
pub struct Clock {
    scope: NodeScope,
    state: Rc<RefCell<ClockState>>,
}

impl Clock {
    pub fn new(scope: NodeScope) -> Self {
        let state = Rc::new(RefCell::new(ClockState {
            running: false,
            bpm: 120.0,
            start_time: 0.0,
            anchor: 0,
            tick_count: 0,
            off_mode: OffMode::None,
            pulse_ms: 50.0,
            next: None,
        }));
        scope.expose_params(catalog::CLOCK.params);

        for (port, running) in [("start", true), ("stop", false)] {
            let (s, sc) = (state.clone(), scope.clone());
            scope.on(port, Verb::ReceiveNodeOn, move |_| {
                set_running(&s, &sc, running);
                let mut patch = Params::new();
                patch.insert("running".to_owned(), running.into());
                sc.on_change().update(sc.id(), patch);
            });
        }

        let (s, sc) = (state.clone(), scope.clone());
        scope.on("reset", Verb::ReceiveNodeOn, move |_| {
            {
                let mut st = s.borrow_mut();
                st.start_time = sc.timers().now();
                st.anchor = 0;
                st.tick_count = 0;
            }
            if s.borrow().running {
                reschedule(&s, &sc);
            }
        });

        Self { scope, state }
    }

    /// Ticks emitted since the last start or reset.
    pub fn tick_count(&self) -> u64 {
        self.state.borrow().tick_count
    }

    /// When the next tick is due, if running.
    pub fn next_tick_time(&self) -> Option<f64> {
        let st = self.state.borrow();
        st.running.then(|| st.tick_time(st.tick_count))
    }
}

fn set_running(state: &Rc<RefCell<ClockState>>, scope: &NodeScope, running: bool) {
    {
        let mut st = state.borrow_mut();
        if st.running == running {
            return;
        }
        st.running = running;
        if running {
            st.start_time = scope.timers().now();
            st.anchor = 0;
            st.tick_count = 0;
        }
    }
    if running {
        reschedule(state, scope);
    } else if let Some(timer) = state.borrow_mut().next.take() {
        scope.timers().cancel(timer);
    }
}

/// Replace the pending tick with one at `start + tick_count * interval`.
fn reschedule(state: &Rc<RefCell<ClockState>>, scope: &NodeScope) {
    let at = {
        let mut st = state.borrow_mut();
        if let Some(timer) = st.next.take() {
            scope.timers().cancel(timer);
        }
        st.tick_time(st.tick_count)
    };
    let (s, sc) = (state.clone(), scope.clone());
    let timer = scope.timers().schedule_at(at, Some(scope.id()), move |at| tick(&s, &sc, at));
    state.borrow_mut().next = Some(timer);
}

fn tick(state: &Rc<RefCell<ClockState>>, scope: &NodeScope, at: f64) {
    let off = {
        let mut st = state.borrow_mut();
        st.next = None;
        if !st.running {
            return;
        }
        st.tick_count += 1;
        st.off_time(at)
    };

    scope.emit_on(OUTPUT, Payload::Bang);
    if let Some(off) = off {
        let sc = scope.clone();
        scope.timers().schedule_at(off, Some(scope.id()), move |_| {
            sc.emit_off(OUTPUT, Payload::Bang);
        });
    }
    if state.borrow().running && state.borrow().next.is_none() {
        reschedule(state, scope);
    }
}

impl Unit for Clock {
    fn shape(&self) -> &'static Shape {
        &catalog::CLOCK
    }

    fn render(&mut self, _: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let bpm = params.number("bpm", 120.0).clamp(1.0, 6000.0);
        let retimed = {
            let mut st = self.state.borrow_mut();
            st.off_mode = OffMode::from_name(params.text("offMode", "none"));
            st.pulse_ms = params.number("pulseMs", 50.0).max(0.0);
            if st.bpm == bpm {
                false
            } else {
                // Re-anchor on the last tick so the tempo change applies from the next one.
                if st.tick_count > 0 {
                    st.start_time = st.tick_time(st.tick_count - 1);
                    st.anchor = st.tick_count - 1;
                }
                st.bpm = bpm;
                st.running
            }
        };
        if retimed {
            reschedule(&self.state, &self.scope);
        }
        set_running(&self.state, &self.scope, params.flag("running", false));
        Ok(())
    }

    fn dispose(&mut self, _: Option<&mut AudioEngine>) {
        self.scope.detach();
        let mut st = self.state.borrow_mut();
        st.running = false;
        st.next = None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::description::NodeId;
    use crate::params::params;
    use crate::router::EventRouter;
    use crate::timers::Timers;
    use crate::unit::OnChange;

    fn clock(router: &EventRouter, timers: &Timers) -> Clock {
        Clock::new(NodeScope::new(NodeId::new("clk").unwrap(), router.clone(), timers.clone(), OnChange::new()))
    }

    #[test]
    fn off_pulses_stay_inside_the_cycle() {
        let router = EventRouter::new();
        let timers = Timers::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (verb, on) in [("sendNodeOn", true), ("sendNodeOff", false)] {
            let (log, t) = (log.clone(), timers.clone());
            let _ = router.subscribe(format!("clk.output.{verb}"), move |_| log.borrow_mut().push((on, t.now())));
        }

        let mut c = clock(&router, &timers);
        c.render(None, &params(json!({ "bpm": 120, "running": true, "offMode": "before", "pulseMs": 100 })))
            .unwrap();
        timers.advance(1000.0);
        assert_eq!(*log.borrow(), vec![(true, 0.0), (false, 400.0), (true, 500.0), (false, 900.0), (true, 1000.0)]);

        log.borrow_mut().clear();
        c.render(None, &params(json!({ "bpm": 120, "running": true, "offMode": "after", "pulseMs": 900 })))
            .unwrap();
        timers.advance(2000.0);
        assert_eq!(log.borrow()[1..], [(true, 1500.0), (false, 1999.5), (true, 2000.0)]);
    }

    #[test]
    fn stop_and_tempo_change() {
        let router = EventRouter::new();
        let timers = Timers::new();
        let mut c = clock(&router, &timers);
        c.render(None, &params(json!({ "bpm": 60, "running": true }))).unwrap();
        timers.advance(2000.0);
        assert_eq!(c.tick_count(), 3);

        c.render(None, &params(json!({ "bpm": 120, "running": true }))).unwrap();
        assert_eq!(c.next_tick_time(), Some(2500.0));

        c.render(None, &params(json!({ "bpm": 120, "running": false }))).unwrap();
        timers.advance(5000.0);
        assert_eq!(c.tick_count(), 3);
        assert_eq!(timers.pending(), 0);
    }
}
