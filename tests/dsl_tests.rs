//! YAML graph documents planned end to end.

use flowplan_core::config::{PlannerConfig, PlanningOption};
use flowplan_planner::{parse_yaml_graph, plan_copy, to_info, DataExchange, PlanningContext};

const MASTER_JOIN: &str = r#"
config:
  broadcast_limit: 1000
operators:
  - { id: rates, op: input, type: rate, size: 100 }
  - { id: orders, op: input, type: order }
  - id: join
    op: master_join
    inputs:
      - { name: master, type: rate, group: [currency] }
      - { name: tx, type: order, group: [currency] }
    outputs:
      - { name: joined, type: order }
      - { name: missed, type: order }
  - { id: joined, op: output, type: order }
  - { id: missed, op: output, type: order }
edges:
  - { from: rates, to: join.master }
  - { from: orders, to: join.tx }
  - { from: join.joined, to: joined }
  - { from: join.missed, to: missed }
"#;

fn context_for(yaml: &str) -> (flowplan_planner::dsl::yaml::ParsedGraph, PlanningContext) {
    let parsed = parse_yaml_graph(yaml).unwrap();
    let mut config = PlannerConfig::default();
    parsed.config.apply_to(&mut config).unwrap();
    (parsed, PlanningContext::new(config))
}

fn exchanges(info: &flowplan_planner::PlanGraphInfo) -> Vec<DataExchange> {
    info.vertices
        .iter()
        .flat_map(|v| v.inputs.iter().map(|i| i.exchange))
        .collect()
}

#[test]
fn small_master_is_broadcast() {
    let (parsed, context) = context_for(MASTER_JOIN);
    let detail = plan_copy(&context, &parsed.graph).unwrap();
    let info = to_info(detail.plan());
    let found = exchanges(&info);
    assert!(found.contains(&DataExchange::Broadcast));
    assert!(!found.contains(&DataExchange::Shuffle));
}

#[test]
fn disabled_broadcast_shuffles_both_sides() {
    let yaml = MASTER_JOIN.replace("broadcast_limit: 1000", "broadcast_limit: -1");
    let (parsed, context) = context_for(&yaml);
    assert_eq!(context.config().broadcast_limit_bytes, None);
    let detail = plan_copy(&context, &parsed.graph).unwrap();
    let info = to_info(detail.plan());
    let found = exchanges(&info);
    assert!(!found.contains(&DataExchange::Broadcast));
    assert_eq!(
        found.iter().filter(|e| **e == DataExchange::Shuffle).count(),
        2
    );
}

#[test]
fn document_options_reach_the_planner() {
    let yaml = r#"
config:
  options: { plan_statistics: true, unify_subplan_io: false }
operators:
  - { id: a, op: input, type: row }
  - id: x
    op: extract
    inputs:  [ { name: in, type: row } ]
    outputs: [ { name: out, type: row } ]
  - { id: b, op: output, type: row }
edges:
  - { from: a, to: x }
  - { from: x, to: b }
"#;
    let (parsed, context) = context_for(yaml);
    assert!(context.is_enabled(PlanningOption::PlanStatistics));
    assert!(!context.is_enabled(PlanningOption::UnifySubplanIo));
    let detail = plan_copy(&context, &parsed.graph).unwrap();
    assert_eq!(detail.plan().len(), 1);
}

#[test]
fn cyclic_documents_are_rejected() {
    let yaml = r#"
operators:
  - { id: a, op: input, type: row }
  - id: head
    op: extract
    inputs:  [ { name: in, type: row }, { name: loop, type: row } ]
    outputs: [ { name: out, type: row } ]
  - id: tail
    op: extract
    inputs:  [ { name: in, type: row } ]
    outputs: [ { name: out, type: row }, { name: back, type: row } ]
  - { id: b, op: output, type: row }
edges:
  - { from: a, to: head.in }
  - { from: head.out, to: tail.in }
  - { from: tail.back, to: head.loop }
  - { from: tail.out, to: b }
"#;
    let (parsed, context) = context_for(yaml);
    let err = plan_copy(&context, &parsed.graph).unwrap_err();
    assert_eq!(err.diagnostics().len(), 1);
}
