use criterion::{criterion_group, criterion_main, Criterion};
use flowplan_core::prelude::*;
use flowplan_planner::{plan_copy, PlanningContext};

/// `width` parallel chains of extract → fold → extract, each from its own
/// input to its own output.
fn make_graph(width: usize) -> OperatorGraph {
    let ty = DataType::named("row");
    let mut g = OperatorGraph::new();
    for i in 0..width {
        let input = g.add(OperatorSpec::external_input(format!("in{i}"), ty.clone()));
        let first = g.add(
            OperatorSpec::user(format!("parse{i}"), UserOperatorKind::Extract)
                .input("in", ty.clone())
                .output("out", ty.clone()),
        );
        let fold = g.add(
            OperatorSpec::user(format!("sum{i}"), UserOperatorKind::Fold)
                .grouped_input("in", ty.clone(), Group::by(["key"]))
                .output("out", ty.clone())
                .partial_aggregation(i % 2 == 0),
        );
        let last = g.add(
            OperatorSpec::user(format!("format{i}"), UserOperatorKind::Extract)
                .input("in", ty.clone())
                .output("out", ty.clone()),
        );
        let output = g.add(OperatorSpec::external_output(format!("out{i}"), ty.clone()));
        for (up, down) in [(input, first), (first, fold), (fold, last), (last, output)] {
            let from = g.output(up, 0).unwrap();
            let to = g.input(down, 0).unwrap();
            g.connect(from, to).unwrap();
        }
    }
    g
}

fn bench_planning(c: &mut Criterion) {
    let context = PlanningContext::new(PlannerConfig::default());
    for width in [4, 32] {
        let graph = make_graph(width);
        c.bench_function(&format!("plan_{width}_chains"), |b| {
            b.iter(|| {
                let _ = plan_copy(&context, &graph).unwrap();
            })
        });
    }
}

criterion_group!(planning, bench_planning);
criterion_main!(planning);
