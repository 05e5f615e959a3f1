use klangnetz::unit::{shape_of, KINDS};
use klangnetz::{
    EdgeDescriptor, Event, EventRouter, GraphDescription, NodeDescriptor, NodeId, Orchestrator, OrchestratorConfig,
    Params,
};
use proptest::collection::vec;
use proptest::prelude::*;

fn description(kinds: &[usize], edges: &[(usize, usize, bool)]) -> GraphDescription {
    let nodes: Vec<NodeDescriptor> = kinds
        .iter()
        .enumerate()
        .map(|(i, &k)| NodeDescriptor::new(&format!("n{i}"), KINDS[k], Params::new()).unwrap())
        .collect();
    let edges = edges
        .iter()
        .enumerate()
        .map(|(i, &(a, b, audio))| {
            let port = if audio { "main-input" } else { "input" };
            let (source, target) = (format!("n{}", a % kinds.len()), format!("n{}", b % kinds.len()));
            EdgeDescriptor::new(&format!("e{i}"), &source, "output", &target, port).unwrap()
        })
        .collect();
    GraphDescription { nodes, edges }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn audio_edges_come_from_audio_capable_sources(
        kinds in vec(0..KINDS.len(), 1..8),
        edges in vec((0usize..8, 0usize..8, any::<bool>()), 0..16),
    ) {
        let desc = description(&kinds, &edges);
        let (mut graph, _out) = Orchestrator::offline(OrchestratorConfig::default());
        graph.load(desc.clone()).unwrap();

        for edge in graph.connections() {
            let source = desc.node(&edge.source_node_id).unwrap();
            prop_assert!(shape_of(&source.kind).unwrap().is_audio_capable());
        }
        prop_assert!(graph.connections().len() + graph.notices().len() <= edges.len());
    }

    #[test]
    fn removing_every_node_releases_everything(
        kinds in vec(0..KINDS.len(), 1..8),
        edges in vec((0usize..8, 0usize..8, any::<bool>()), 0..16),
    ) {
        let (mut graph, _out) = Orchestrator::offline(OrchestratorConfig::default());
        graph.load(description(&kinds, &edges)).unwrap();

        for id in graph.node_ids() {
            graph.remove_node(&id).unwrap();
        }
        prop_assert!(graph.router().list_topics().is_empty());
        prop_assert_eq!(graph.timers().pending(), 0);
        prop_assert_eq!(graph.engine().primitive_count(), 0);
        prop_assert!(graph.engine().connections().is_empty());
    }

    #[test]
    fn switch_never_routes_past_its_outputs(outputs in 1usize..6, presses in 0usize..40) {
        let (mut graph, _out) = Orchestrator::offline(OrchestratorConfig::default());
        let mut params = Params::new();
        params.insert("numOutputs".into(), outputs.into());
        graph
            .add_node(NodeDescriptor::new("sw", "switch", params).unwrap())
            .unwrap();

        let router: EventRouter = graph.router().clone();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let s = seen.clone();
        let _ = router.subscribe("sw.routed.sendNodeOn", move |e| s.borrow_mut().push(e.channel));
        for _ in 0..presses {
            router.publish("sw.input.receiveNodeOn", &Event::bang());
        }

        let seen = seen.borrow();
        prop_assert_eq!(seen.len(), presses);
        for (i, channel) in seen.iter().enumerate() {
            prop_assert_eq!(*channel, Some((i + 1) % outputs));
        }
        prop_assert!(graph.node_ids() == vec![NodeId::new("sw").unwrap()]);
    }
}
