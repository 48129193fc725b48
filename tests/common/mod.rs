//! Graph fixtures shared by the integration tests.
#![allow(dead_code)]

use flowplan_core::config::PlannerConfig;
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::OperatorId;
use flowplan_core::operator::{CoreOperatorKind, InputUnit, OperatorSpec, PortSpec, UserOperatorKind};
use flowplan_core::schema::{DataType, Group};
use flowplan_planner::PlanningContext;

pub fn ty(name: &str) -> DataType {
    DataType::named(name)
}

/// Connects the first output of `up` to the first input of `down`.
pub fn connect(g: &mut OperatorGraph, up: OperatorId, down: OperatorId) {
    let from = g.output(up, 0).unwrap();
    let to = g.input(down, 0).unwrap();
    g.connect(from, to).unwrap();
}

pub fn connect_named(g: &mut OperatorGraph, up: OperatorId, out: &str, down: OperatorId, input: &str) {
    let from = g.output_named(up, out).unwrap();
    let to = g.input_named(down, input).unwrap();
    g.connect(from, to).unwrap();
}

pub fn extract(name: &str, data_type: &str) -> OperatorSpec {
    OperatorSpec::user(name, UserOperatorKind::Extract)
        .input("in", ty(data_type))
        .output("out", ty(data_type))
}

pub fn context() -> PlanningContext {
    PlanningContext::new(PlannerConfig::default())
}

pub fn context_with(edit: impl FnOnce(&mut PlannerConfig)) -> PlanningContext {
    let mut config = PlannerConfig::default();
    edit(&mut config);
    PlanningContext::new(config)
}

pub struct Pipeline {
    pub graph: OperatorGraph,
    pub input: OperatorId,
    pub total: OperatorId,
    pub output: OperatorId,
}

/// `orders` (input) → `total` (fold grouped by customer) → `result` (output).
pub fn grouped_pipeline(partial: bool) -> Pipeline {
    let mut graph = OperatorGraph::new();
    let input = graph.add(OperatorSpec::external_input("orders", ty("order")).path("in/${date}/orders"));
    let total = graph.add(
        OperatorSpec::user("total", UserOperatorKind::Fold)
            .grouped_input("in", ty("order"), Group::by(["customer"]))
            .output("out", ty("total"))
            .partial_aggregation(partial),
    );
    let output = graph.add(OperatorSpec::external_output("result", ty("total")));
    connect(&mut graph, input, total);
    connect(&mut graph, total, output);
    Pipeline {
        graph,
        input,
        total,
        output,
    }
}

/// `orders` joined with the whole of `rates` (broadcast), then written.
pub fn broadcast_join() -> OperatorGraph {
    let mut g = OperatorGraph::new();
    let orders = g.add(OperatorSpec::external_input("orders", ty("order")));
    let rates = g.add(OperatorSpec::external_input("rates", ty("rate")));
    let convert = g.add(
        OperatorSpec::user("convert", UserOperatorKind::Extract)
            .input("in", ty("order"))
            .input_port(PortSpec::new("rates", ty("rate")).unit(InputUnit::Whole))
            .output("out", ty("order")),
    );
    let output = g.add(OperatorSpec::external_output("converted", ty("order")));
    connect_named(&mut g, orders, "port", convert, "in");
    connect_named(&mut g, rates, "port", convert, "rates");
    connect(&mut g, convert, output);
    g
}

/// One checkpointed input consumed by two independent branches.
pub fn checkpoint_fan_out() -> OperatorGraph {
    let mut g = OperatorGraph::new();
    let input = g.add(OperatorSpec::external_input("orders", ty("order")));
    let checkpoint = g.add(OperatorSpec::core(CoreOperatorKind::Checkpoint, ty("order")));
    let left = g.add(extract("left", "order"));
    let right = g.add(extract("right", "order"));
    let left_out = g.add(OperatorSpec::external_output("left_out", ty("order")));
    let right_out = g.add(OperatorSpec::external_output("right_out", ty("order")));
    connect(&mut g, input, checkpoint);
    connect(&mut g, checkpoint, left);
    connect(&mut g, checkpoint, right);
    connect(&mut g, left, left_out);
    connect(&mut g, right, right_out);
    g
}

/// `circuits` independent loops, each fed by an input and drained by an output.
pub fn cyclic_graph(circuits: usize) -> OperatorGraph {
    let mut g = OperatorGraph::new();
    for i in 0..circuits {
        let input = g.add(OperatorSpec::external_input(format!("in{i}"), ty("row")));
        let head = g.add(
            OperatorSpec::user(format!("head{i}"), UserOperatorKind::Extract)
                .input("in", ty("row"))
                .input("loop", ty("row"))
                .output("out", ty("row")),
        );
        let tail = g.add(
            OperatorSpec::user(format!("tail{i}"), UserOperatorKind::Extract)
                .input("in", ty("row"))
                .output("out", ty("row"))
                .output("back", ty("row")),
        );
        let output = g.add(OperatorSpec::external_output(format!("out{i}"), ty("row")));
        connect_named(&mut g, input, "port", head, "in");
        connect_named(&mut g, head, "out", tail, "in");
        connect_named(&mut g, tail, "back", head, "loop");
        connect_named(&mut g, tail, "out", output, "port");
    }
    g
}

/// Two inputs whose consumers broadcast across each other: `wa` reads `a`
/// with the whole of `b`, `wb` reads `b` with the whole of a fold over `a`.
pub fn crossing_broadcasts() -> OperatorGraph {
    let mut g = OperatorGraph::new();
    let a = g.add(OperatorSpec::external_input("a", ty("row")));
    let b = g.add(OperatorSpec::external_input("b", ty("row")));
    let side = |name: &str| {
        OperatorSpec::user(name, UserOperatorKind::Extract)
            .input("in", ty("row"))
            .input_port(PortSpec::new("side", ty("row")).unit(InputUnit::Whole))
            .output("out", ty("row"))
    };
    let wa = g.add(side("wa"));
    let wb = g.add(side("wb"));
    let fold = g.add(
        OperatorSpec::user("fold", UserOperatorKind::Fold)
            .grouped_input("in", ty("row"), Group::by(["k"]))
            .output("out", ty("row")),
    );
    let out_a = g.add(OperatorSpec::external_output("out_a", ty("row")));
    let out_b = g.add(OperatorSpec::external_output("out_b", ty("row")));
    connect_named(&mut g, a, "port", wa, "in");
    connect_named(&mut g, b, "port", wa, "side");
    connect_named(&mut g, a, "port", fold, "in");
    connect_named(&mut g, b, "port", wb, "in");
    connect_named(&mut g, fold, "out", wb, "side");
    connect(&mut g, wa, out_a);
    connect(&mut g, wb, out_b);
    g
}

/// One input read by two folds over the same key; `partial` enables partial
/// aggregation on the first.
pub fn twin_folds(partial: bool) -> OperatorGraph {
    let mut g = OperatorGraph::new();
    let input = g.add(OperatorSpec::external_input("orders", ty("order")));
    for (i, name) in ["count", "sum"].into_iter().enumerate() {
        let fold = g.add(
            OperatorSpec::user(name, UserOperatorKind::Fold)
                .grouped_input("in", ty("order"), Group::by(["customer"]))
                .output("out", ty("total"))
                .partial_aggregation(partial && i == 0),
        );
        let output = g.add(OperatorSpec::external_output(format!("{name}_out"), ty("total")));
        connect(&mut g, input, fold);
        connect(&mut g, fold, output);
    }
    g
}
