use std::cell::RefCell;
use std::rc::Rc;

use klangnetz::{
    params, AudioEngine, CaptureProvider, EdgeDescriptor, EdgeId, Event, GraphDescription, GraphError, NodeDescriptor,
    NodeId, Orchestrator, OrchestratorConfig, Payload, PermissionError, Plane, ReconcileMode,
};
use rtrb::Consumer;
use serde_json::{json, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn graph() -> Orchestrator {
    init_tracing();
    Orchestrator::offline(OrchestratorConfig::default()).0
}

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

fn node(id: &str, kind: &str, p: Value) -> NodeDescriptor {
    NodeDescriptor::new(id, kind, params(p)).unwrap()
}

fn edge(id: &str, src: &str, sport: &str, dst: &str, dport: &str) -> EdgeDescriptor {
    EdgeDescriptor::new(id, src, sport, dst, dport).unwrap()
}

fn describe(nodes: Vec<NodeDescriptor>, edges: Vec<EdgeDescriptor>) -> GraphDescription {
    GraphDescription { nodes, edges }
}

/// Collect payloads published on `topic`.
fn listen(graph: &Orchestrator, topic: &str) -> Rc<RefCell<Vec<Payload>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    let _ = graph.router().subscribe(topic, move |e| l.borrow_mut().push(e.payload.clone()));
    log
}

fn press(graph: &Orchestrator, node: &str, on: bool) {
    let verb = if on { "receiveNodeOn" } else { "receiveNodeOff" };
    graph.router().publish(&format!("{node}.input.{verb}"), &Event::bang());
}

#[test]
fn switch_cycles_through_routed_edges() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("c", "constant", json!({ "value": 1 })),
                node("sw", "switch", json!({ "numOutputs": 3 })),
                node("f0", "function", json!({})),
                node("f1", "function", json!({})),
                node("f2", "function", json!({})),
            ],
            vec![
                edge("in", "c", "output", "sw", "input"),
                edge("o0", "sw", "output-0", "f0", "input"),
                edge("o1", "sw", "output-1", "f1", "input"),
                edge("o2", "sw", "output-2", "f2", "input"),
            ],
        ))
        .unwrap();
    let hits: Vec<_> = ["f0", "f1", "f2"]
        .iter()
        .map(|f| listen(&graph, &format!("{f}.output.sendNodeOn")))
        .collect();
    let counts = || hits.iter().map(|h| h.borrow().len()).collect::<Vec<_>>();

    press(&graph, "c", true);
    assert_eq!(counts(), vec![0, 1, 0]);
    press(&graph, "c", true);
    press(&graph, "c", true);
    assert_eq!(counts(), vec![1, 1, 1]);

    graph.router().publish("sw.reset.receiveNodeOn", &Event::bang());
    assert_eq!(counts(), vec![1, 1, 1]);
    press(&graph, "c", true);
    assert_eq!(counts(), vec![1, 2, 1]);
    assert_eq!(graph.plane_of(&EdgeId::new("o1")), Some(Plane::Control));
}

#[test]
fn blocking_switch_holds_an_output_per_source() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("c1", "constant", json!({})),
                node("c2", "constant", json!({})),
                node("c3", "constant", json!({})),
                node("bs", "blocking-switch", json!({ "numOutputs": 2 })),
                node("f0", "function", json!({})),
                node("f1", "function", json!({})),
            ],
            vec![
                edge("a", "c1", "output", "bs", "input"),
                edge("b", "c2", "output", "bs", "input"),
                edge("c", "c3", "output", "bs", "input"),
                edge("o0", "bs", "output-0", "f0", "input"),
                edge("o1", "bs", "output-1", "f1", "input"),
            ],
        ))
        .unwrap();
    let on0 = listen(&graph, "f0.output.sendNodeOn");
    let off0 = listen(&graph, "f0.output.sendNodeOff");
    let on1 = listen(&graph, "f1.output.sendNodeOn");

    press(&graph, "c1", true);
    press(&graph, "c2", true);
    press(&graph, "c3", true);
    assert_eq!((on0.borrow().len(), on1.borrow().len()), (1, 1));

    // c1 re-triggers on its own output
    press(&graph, "c1", true);
    assert_eq!(on0.borrow().len(), 2);

    press(&graph, "c1", false);
    assert_eq!(off0.borrow().len(), 1);
    press(&graph, "c3", true);
    assert_eq!(on0.borrow().len(), 3);
}

#[test]
fn clock_ticks_do_not_drift() {
    let mut graph = graph();
    graph
        .load(describe(vec![node("clk", "clock", json!({ "bpm": 600, "running": true }))], vec![]))
        .unwrap();

    let times = Rc::new(RefCell::new(Vec::new()));
    let (t, timers) = (times.clone(), graph.timers().clone());
    let _ = graph
        .router()
        .subscribe("clk.output.sendNodeOn", move |_| t.borrow_mut().push(timers.now()));

    // Irregular polling, as a host's frame callback would do
    let mut now = 0.0;
    while now < 100_000.0 {
        now = f64::min(now + 37.0, 100_000.0);
        graph.advance(now);
    }

    let times = times.borrow();
    assert_eq!(times.len(), 1001);
    for (n, at) in times.iter().enumerate() {
        assert_eq!(*at, n as f64 * 100.0);
    }
}

#[test]
fn removing_a_node_leaves_nothing_behind() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("clk", "clock", json!({ "running": true })),
                node("osc", "oscillator", json!({})),
                node("out", "output", json!({})),
            ],
            vec![
                edge("tick", "clk", "output", "osc", "frequency"),
                edge("audio", "osc", "output", "out", "main-input"),
            ],
        ))
        .unwrap();
    let clk = id("clk");
    assert!(graph.router().subscriptions_for_node(&clk) > 0);
    assert_eq!(graph.timers().pending_for(&clk), 1);

    graph.remove_node(&clk).unwrap();
    assert_eq!(graph.router().subscriptions_for_node(&clk), 0);
    assert_eq!(graph.timers().pending_for(&clk), 0);
    assert_eq!(graph.plane_of(&EdgeId::new("tick")), None);
    assert!(matches!(graph.remove_node(&clk), Err(GraphError::UnknownNode(_))));

    let before = graph.engine().primitive_count();
    graph.remove_node(&id("osc")).unwrap();
    assert_eq!(graph.engine().primitive_count(), before - 1);
    assert!(graph.connections().is_empty());
}

#[test]
fn hot_swap_keeps_id_and_connections() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("osc", "oscillator", json!({})),
                node("w", "worklet", json!({ "expression": "x * 0.5" })),
                node("out", "output", json!({})),
            ],
            vec![
                edge("a", "osc", "output", "w", "main-input"),
                edge("b", "w", "output", "out", "main-input"),
            ],
        ))
        .unwrap();
    let w = id("w");
    let primitive = graph.primitive_of(&w).unwrap();
    let wiring = graph.engine().connections();
    let status = listen(&graph, "w.node.status");

    graph.update_params(&w, params(json!({ "expression": "tanh(3 * x)" }))).unwrap();
    graph.process().unwrap();
    assert_eq!(graph.primitive_of(&w), Some(primitive));
    assert_eq!(graph.engine().connections(), wiring);

    // A broken expression leaves the node inert but present
    graph.update_params(&w, params(json!({ "expression": "x +" }))).unwrap();
    assert_eq!(graph.primitive_of(&w), None);
    assert_eq!(status.borrow().len(), 1);
    assert_eq!(graph.node_ids().len(), 3);
    graph.process().unwrap();

    graph.update_params(&w, params(json!({ "expression": "x" }))).unwrap();
    let revived = graph.primitive_of(&w).unwrap();
    let osc = graph.primitive_of(&id("osc")).unwrap();
    let out = graph.primitive_of(&id("out")).unwrap();
    let wiring = graph.engine().connections();
    assert!(wiring.contains(&(osc, revived)));
    assert!(wiring.contains(&(revived, out)));
}

#[test]
fn evaluation_errors_flow_downstream_and_recover() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("c", "constant", json!({ "value": -1 })),
                node("root", "function", json!({ "expression": "sqrt(x)" })),
                node("inc", "function", json!({ "expression": "x + 1" })),
            ],
            vec![
                edge("a", "c", "output", "root", "input"),
                edge("b", "root", "output", "inc", "input"),
            ],
        ))
        .unwrap();
    let out = listen(&graph, "inc.output.sendNodeOn");

    press(&graph, "c", true);
    assert!(out.borrow()[0].is_error());

    graph.update_params(&id("c"), params(json!({ "value": 4 }))).unwrap();
    press(&graph, "c", true);
    assert_eq!(out.borrow()[1], Payload::Value(3.0));
}

fn synth() -> GraphDescription {
    describe(
        vec![
            node("clk", "clock", json!({ "bpm": 600, "running": true })),
            node("osc", "oscillator", json!({ "frequency": 220 })),
            node("amp", "gain", json!({ "gain": 0.5 })),
            node("out", "output", json!({})),
        ],
        vec![
            edge("a", "osc", "output", "amp", "main-input"),
            edge("b", "amp", "output", "out", "main-input"),
        ],
    )
}

#[test]
fn diff_leaves_untouched_units_alone() {
    let mut graph = graph();
    graph.load(synth()).unwrap();
    let ticks = listen(&graph, "clk.output.sendNodeOn");
    graph.advance(1000.0);
    assert_eq!(ticks.borrow().len(), 11);

    let osc = graph.primitive_of(&id("osc"));
    let amp = graph.primitive_of(&id("amp"));

    let mut next = synth();
    next.nodes[2].parameters = params(json!({ "gain": 0.25 }));
    next.nodes.push(node("lfo", "oscillator", json!({ "frequency": 2 })));
    graph.apply(next.clone()).unwrap();

    assert_eq!(graph.primitive_of(&id("osc")), osc);
    assert_eq!(graph.primitive_of(&id("amp")), amp);
    assert_eq!(graph.params(&id("amp")).unwrap()["gain"], json!(0.25));

    // The clock kept its phase
    graph.advance(1200.0);
    assert_eq!(ticks.borrow().len(), 13);

    // A kind change rebuilds the node and rewires its edges
    next.nodes[2] = node("amp", "filter", json!({ "frequency": 500 }));
    graph.apply(next).unwrap();
    let (osc, amp, out) = (
        graph.primitive_of(&id("osc")).unwrap(),
        graph.primitive_of(&id("amp")).unwrap(),
        graph.primitive_of(&id("out")).unwrap(),
    );
    let wiring = graph.engine().connections();
    assert!(wiring.contains(&(osc, amp)));
    assert!(wiring.contains(&(amp, out)));
    assert_eq!(graph.connections().len(), 2);
}

#[test]
fn rebuild_keeps_editor_listeners() {
    init_tracing();
    let config = OrchestratorConfig::default().with_reconcile(ReconcileMode::Rebuild);
    let (mut graph, _out) = Orchestrator::offline(config);
    let started = listen(&graph, "graphStarted");

    graph.load(synth()).unwrap();
    graph.apply(synth()).unwrap();
    assert_eq!(started.borrow().len(), 2);
    assert_eq!(graph.node_ids().len(), 4);
    assert_eq!(graph.timers().pending_for(&id("clk")), 1);
}

#[test]
fn structural_errors_change_nothing() {
    let mut graph = graph();
    graph.load(synth()).unwrap();
    let nodes = graph.node_ids();
    let wiring = graph.engine().connections();

    let mut dup = synth();
    dup.nodes.push(node("osc", "gain", json!({})));
    assert!(matches!(graph.apply(dup), Err(GraphError::DuplicateNode(_))));

    let mut unknown = synth();
    unknown.nodes[1].kind = "theremin".into();
    assert!(matches!(graph.apply(unknown), Err(GraphError::UnknownKind(_))));

    assert!(matches!(
        graph.add_edge(edge("x", "osc", "output", "amp", "bogus")),
        Err(GraphError::UnknownPort { .. })
    ));
    assert!(matches!(
        graph.add_edge(edge("a", "osc", "output", "amp", "main-input")),
        Err(GraphError::DuplicateEdge(_))
    ));
    assert!(matches!(
        graph.add_edge(edge("y", "ghost", "output", "amp", "main-input")),
        Err(GraphError::UnknownNode(_))
    ));
    assert!(matches!(
        graph.add_node(node("osc", "gain", json!({}))),
        Err(GraphError::DuplicateNode(_))
    ));

    assert_eq!(graph.node_ids(), nodes);
    assert_eq!(graph.engine().connections(), wiring);
    assert!(graph.notices().is_empty());
}

#[test]
fn invalid_audio_edges_are_skipped_on_load() {
    let mut graph = graph();
    let mut description = synth();
    description.edges.push(edge("bad", "clk", "output", "out", "main-input"));
    graph.load(description).unwrap();

    assert_eq!(graph.notices().len(), 1);
    assert_eq!(graph.notices()[0].edge.id, EdgeId::new("bad"));
    assert_eq!(graph.plane_of(&EdgeId::new("bad")), None);
    assert_eq!(graph.connections().len(), 2);
}

#[test]
fn forwarding_goes_with_either_endpoint() {
    let mut graph = graph();
    let description = describe(
        vec![node("c", "constant", json!({})), node("f", "function", json!({}))],
        vec![edge("e", "c", "output", "f", "input")],
    );
    graph.load(description.clone()).unwrap();
    assert_eq!(graph.router().subscriber_count("c.output.sendNodeOn"), 1);

    graph.remove_node(&id("f")).unwrap();
    assert_eq!(graph.router().subscriber_count("c.output.sendNodeOn"), 0);

    graph.load(description).unwrap();
    graph.remove_node(&id("c")).unwrap();
    assert!(graph.router().list_topics().iter().all(|t| !t.starts_with("c.")));
    assert!(graph.router().subscriptions_for_node(&id("f")) > 0);
}

#[test]
fn feedback_loops_stop_at_the_depth_cap() {
    init_tracing();
    let config = OrchestratorConfig::default().with_max_dispatch_depth(16);
    let (mut graph, _out) = Orchestrator::offline(config);
    graph
        .load(describe(
            vec![
                node("f1", "function", json!({ "expression": "x + 1" })),
                node("f2", "function", json!({ "expression": "x + 1" })),
            ],
            vec![
                edge("there", "f1", "output", "f2", "input"),
                edge("back", "f2", "output", "f1", "input"),
            ],
        ))
        .unwrap();
    let out = listen(&graph, "f1.output.sendNodeOn");

    graph.router().publish("f1.input.receiveNodeOn", &Event::value(0.0));
    let count = out.borrow().len();
    assert!((1..16).contains(&count), "{count}");
}

#[test]
fn sequencer_wrap_emits_sync() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("seq", "sequencer", json!({ "pattern": [[1, 0], [0, 1]], "pulseMs": 10 })),
                node("f0", "function", json!({})),
                node("f1", "function", json!({})),
                node("bar", "function", json!({})),
            ],
            vec![
                edge("r0", "seq", "row-0", "f0", "input"),
                edge("r1", "seq", "row-1", "f1", "input"),
                edge("s", "seq", "sync", "bar", "input"),
            ],
        ))
        .unwrap();
    let f0 = listen(&graph, "f0.output.sendNodeOn");
    let f0_off = listen(&graph, "f0.output.sendNodeOff");
    let f1 = listen(&graph, "f1.output.sendNodeOn");
    let bar = listen(&graph, "bar.output.sendNodeOn");
    let steps = listen(&graph, "seq.step.status");

    graph.router().publish("seq.advance.receiveNodeOn", &Event::bang());
    assert_eq!((f0.borrow().len(), f1.borrow().len(), bar.borrow().len()), (1, 0, 0));
    graph.router().publish("seq.advance.receiveNodeOn", &Event::bang());
    assert_eq!((f0.borrow().len(), f1.borrow().len(), bar.borrow().len()), (1, 1, 1));
    graph.router().publish("seq.advance.receiveNodeOn", &Event::bang());
    assert_eq!(f0.borrow().len(), 2);
    assert_eq!(*steps.borrow(), vec![Payload::Value(0.0), Payload::Value(1.0), Payload::Value(0.0)]);

    graph.advance(20.0);
    assert_eq!(f0_off.borrow().len(), 2);
}

struct Refuse;

impl CaptureProvider for Refuse {
    fn open(&mut self, _: u32) -> Result<Consumer<f32>, PermissionError> {
        Err(PermissionError::Denied)
    }
}

#[test]
fn capture_denial_is_reported_once_until_retried() {
    init_tracing();
    let engine = AudioEngine::new(48_000).with_capture(Refuse);
    let mut graph = Orchestrator::new(engine, OrchestratorConfig::default());
    let status = Rc::new(RefCell::new(0));
    let s = status.clone();
    let _ = graph.router().subscribe("mic.node.status", move |_| *s.borrow_mut() += 1);

    graph
        .load(describe(vec![node("mic", "microphone", json!({}))], vec![]))
        .unwrap();
    assert_eq!(*status.borrow(), 1);

    graph.update_params(&id("mic"), params(json!({ "gain": 0.5 }))).unwrap();
    graph.process().unwrap();
    assert_eq!(*status.borrow(), 1);

    graph.router().publish("mic.retry.receiveNodeOn", &Event::bang());
    graph.flush();
    assert_eq!(*status.borrow(), 2);
    assert_eq!(graph.primitive_of(&id("mic")), None);
}

#[test]
fn recordings_land_in_the_buffer_store() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![node("osc", "oscillator", json!({})), node("rec", "recorder", json!({}))],
            vec![edge("a", "osc", "output", "rec", "main-input")],
        ))
        .unwrap();
    let announced = listen(&graph, "rec.recording.status");

    graph.router().publish("rec.record.receiveNodeOn", &Event::bang());
    for _ in 0..4 {
        graph.process().unwrap();
    }
    graph.router().publish("rec.record.receiveNodeOff", &Event::bang());
    graph.process().unwrap();

    let take = graph.buffers().get("rec").unwrap();
    assert_eq!(take.frames(), 256);
    assert_eq!(announced.borrow().last(), Some(&Payload::Value(256.0 / 48_000.0)));
}

#[test]
fn analyzer_publishes_levels() {
    let mut graph = graph();
    graph
        .load(describe(
            vec![
                node("osc", "oscillator", json!({ "waveform": "square", "amplitude": 0.5 })),
                node("an", "analyzer", json!({})),
            ],
            vec![edge("a", "osc", "output", "an", "main-input")],
        ))
        .unwrap();
    let meters = listen(&graph, "an.meter.status");

    graph.process().unwrap();
    graph.process().unwrap();
    let Some(Payload::Meter { peak, .. }) = meters.borrow().last().cloned() else {
        panic!("no meter published");
    };
    assert!(peak > 0.0);
}

#[test]
fn unit_driven_changes_reach_on_change() {
    init_tracing();
    let changes = Rc::new(RefCell::new(Vec::new()));
    let c = changes.clone();
    let (graph, _out) = Orchestrator::offline(OrchestratorConfig::default());
    let mut graph = graph.on_change(move |node, p| c.borrow_mut().push((node.clone(), p["value"].clone())));
    graph
        .load(describe(vec![node("m", "macro", json!({ "min": 0, "max": 1 }))], vec![]))
        .unwrap();

    graph.router().publish("m.input.receiveNodeOn", &Event::value(0.3));
    graph.flush();
    assert_eq!(*changes.borrow(), vec![(id("m"), json!(0.3))]);
    assert_eq!(graph.params(&id("m")).unwrap()["value"], json!(0.3));

    // Parameter bags pushed on the node's updateParams topic go the same way
    graph
        .router()
        .publish("m.node.updateParams", &Event::new(Payload::Params(params(json!({ "value": 0.7 })))));
    graph.flush();
    assert_eq!(changes.borrow().len(), 2);
}
