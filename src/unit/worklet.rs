//! Worklet units: primitives rebuilt from source whenever their code changes.
//!
//! Control values of a formula travel as messages. Anything else (a new
//! expression, another noise color, new filter coefficients) compiles a fresh
//! [`Worklet`] and hot-swaps it in with [`AudioEngine::replace`], which keeps
//! the primitive id and every connection.

use alloc::rc::Rc;
use core::cell::RefCell;

use hashbrown::HashSet;
use serde_json::Value;

use crate::engine::{AudioEngine, Handle};
use crate::error::UnitError;
use crate::node::PrimitiveId;
use crate::nodes::{NoiseColor, Worklet, WorkletMessage, WorkletSource};
use crate::params::{Params, ParamsExt};
use crate::router::Verb;

use super::catalog;
use super::{release, NodeScope, Shape, Unit};

/// Which worklet-backed kind a unit realizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkletKind {
    Noise,
    Iir,
    /// User expression with user-named controls.
    Custom,
    /// Waveshaper: a curve over `x` and `drive`.
    Distortion,
}

impl WorkletKind {
    fn shape(self) -> &'static Shape {
        match self {
            WorkletKind::Noise => &catalog::NOISE,
            WorkletKind::Iir => &catalog::IIR,
            WorkletKind::Custom => &catalog::WORKLET,
            WorkletKind::Distortion => &catalog::DISTORTION,
        }
    }

    fn source(self, p: &Params) -> WorkletSource {
        match self {
            WorkletKind::Noise => WorkletSource::Noise(NoiseColor::from_name(p.text("color", "white"))),
            WorkletKind::Iir => {
                let or_unity = |v: Vec<f64>| if v.is_empty() { vec![1.0] } else { v };
                WorkletSource::Iir {
                    feedforward: or_unity(p.numbers("feedforward")),
                    feedback: or_unity(p.numbers("feedback")),
                }
            }
            WorkletKind::Custom => WorkletSource::Formula {
                source: p.text("expression", "x").to_owned(),
                controls: p
                    .get("controls")
                    .and_then(Value::as_object)
                    .map(|c| c.iter().filter_map(|(k, v)| Some((k.clone(), v.as_f64()?))).collect())
                    .unwrap_or_default(),
            },
            WorkletKind::Distortion => WorkletSource::Formula {
                source: p.text("curve", "tanh(drive * x)").to_owned(),
                controls: vec![("drive".to_owned(), p.number("drive", 1.0))],
            },
        }
    }
}

pub(crate) struct WorkletUnit {
    kind: WorkletKind,
    scope: NodeScope,
    handle: Option<Handle<WorkletMessage>>,
    current: Option<WorkletSource>,
    controls: Rc<RefCell<Vec<(String, f64)>>>,
    exposed: HashSet<String>,
}

impl WorkletUnit {
    pub(crate) fn new(kind: WorkletKind, scope: NodeScope) -> Self {
        scope.expose_params(kind.shape().params);
        Self {
            kind,
            scope,
            handle: None,
            current: None,
            controls: Rc::default(),
            exposed: HashSet::new(),
        }
    }

    /// Custom worklets get one control port per named control.
    fn expose_controls(&mut self, source: &WorkletSource) {
        let WorkletSource::Formula { controls, .. } = source else {
            return;
        };
        *self.controls.borrow_mut() = controls.clone();
        if self.kind != WorkletKind::Custom {
            return;
        }
        for (name, _) in controls {
            if !self.exposed.insert(name.clone()) {
                continue;
            }
            let (id, on_change, all) = (self.scope.id().clone(), self.scope.on_change().clone(), self.controls.clone());
            let port = name.clone();
            let name = name.clone();
            self.scope.on(&port, Verb::ReceiveNodeOn, move |e| {
                let Some(v) = e.payload.as_number() else {
                    return;
                };
                let mut controls = Params::new();
                for (n, old) in all.borrow().iter() {
                    controls.set_number(n, if *n == name { v } else { *old });
                }
                let mut patch = Params::new();
                patch.insert("controls".to_owned(), Value::Object(controls));
                on_change.update(&id, patch);
            });
        }
    }

    fn send_controls(&mut self, source: &WorkletSource) {
        let (Some(handle), Some(current)) = (self.handle.as_mut(), self.current.as_ref()) else {
            return;
        };
        for (slot, (old, new)) in current.control_values().zip(source.control_values()).enumerate() {
            if old != new && handle.send(WorkletMessage::Set { slot, value: new }).is_err() {
                tracing::warn!(node = %self.scope.id(), slot, "message queue full, control change dropped");
            }
        }
    }

    fn swap(&mut self, engine: &mut AudioEngine, source: &WorkletSource) -> Result<(), UnitError> {
        let worklet = match Worklet::compile(source, engine.sample_rate(), engine.channels()) {
            Ok(worklet) => worklet,
            Err(e) => {
                release(Some(engine), self.handle.take().map(|h| h.id()));
                return Err(e.into());
            }
        };
        self.handle = Some(match self.handle.take() {
            Some(old) => engine.replace(old.id(), worklet)?,
            None => engine.add(worklet)?,
        });
        tracing::debug!(node = %self.scope.id(), "worklet compiled");
        Ok(())
    }
}

impl Unit for WorkletUnit {
    fn shape(&self) -> &'static Shape {
        self.kind.shape()
    }

    fn primitive(&self) -> Option<PrimitiveId> {
        self.handle.as_ref().map(Handle::id)
    }

    fn render(&mut self, engine: Option<&mut AudioEngine>, params: &Params) -> Result<(), UnitError> {
        let source = self.kind.source(params);
        self.expose_controls(&source);

        let same_code = self.handle.is_some() && self.current.as_ref().is_some_and(|c| c.same_code(&source));
        if same_code {
            self.send_controls(&source);
        } else if let Some(engine) = engine {
            self.swap(engine, &source)?;
        } else {
            return Ok(());
        }
        self.current = Some(source);
        Ok(())
    }

    fn dispose(&mut self, engine: Option<&mut AudioEngine>) {
        self.scope.detach();
        self.exposed.clear();
        self.current = None;
        release(engine, self.handle.take().map(|h| h.id()));
    }
}
