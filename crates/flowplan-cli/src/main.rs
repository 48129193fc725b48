//! flowplan CLI: plan, validate and explain YAML graph documents.

use clap::{Parser, Subcommand};
use flowplan_core::config::{PlannerConfig, OPTION_PREFIX};
use flowplan_core::depgraph::GraphStatistics;
use flowplan_core::hash::{hash_bytes, hash_serde};
use flowplan_core::manifest::PlanManifest;
use flowplan_planner::analyze::{IterativeInfo, ParameterInfo, PlanStatistics};
use flowplan_planner::dsl::yaml::ParsedGraph;
use flowplan_planner::{parse_yaml_graph, plan, prepare_operator_graph, to_info};
use flowplan_planner::{PlanGraphInfo, PlanningContext};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowplan")]
#[command(about = "Turns dataflow operator graphs into staged execution plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct PlanningArgs {
    /// Planning option override, `symbol=true|false` (repeatable)
    #[arg(long = "option", value_name = "SYMBOL=BOOL")]
    options: Vec<String>,

    /// Broadcast threshold in bytes (negative disables broadcasts)
    #[arg(long, allow_hyphen_values = true)]
    broadcast_limit: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a graph document and print or write the plan document (JSON)
    Plan {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        /// Write the plan document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        planning: PlanningArgs,
    },

    /// Parse and prepare a graph document without building a plan
    Validate {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        #[command(flatten)]
        planning: PlanningArgs,
    },

    /// Show the stages of the plan in human readable form
    Explain {
        /// Path to the graph YAML file
        #[arg(short, long)]
        graph: PathBuf,

        #[command(flatten)]
        planning: PlanningArgs,
    },
}

/// Saved form of a plan: the exported graph plus provenance.
#[derive(Debug, Serialize)]
struct PlanDocument {
    manifest: PlanManifest,
    plan: PlanGraphInfo,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    parameters: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterative: Option<IterativeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    statistics: Option<PlanStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    graph_statistics: Option<GraphStatistics>,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            graph,
            output,
            planning,
        } => {
            if let Err(e) = plan_graph(&graph, output.as_deref(), &planning) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { graph, planning } => {
            if let Err(e) = validate_graph(&graph, &planning) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Graph is valid");
        }
        Commands::Explain { graph, planning } => {
            if let Err(e) = explain_graph(&graph, &planning) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Logs go to stderr so that plan documents on stdout stay clean.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Environment, then the document's `config` section, then CLI flags.
fn resolve_config(
    base: PlannerConfig,
    parsed: &ParsedGraph,
    args: &PlanningArgs,
) -> CliResult<PlannerConfig> {
    let mut config = base;
    parsed.config.apply_to(&mut config)?;
    for entry in &args.options {
        let (symbol, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("option must look like symbol=true: {entry}"))?;
        let key = format!("{OPTION_PREFIX}{}", symbol.trim());
        config.apply_properties([(key.as_str(), value)])?;
    }
    if let Some(limit) = args.broadcast_limit {
        config.broadcast_limit_bytes = (limit >= 0.0).then_some(limit);
    }
    Ok(config)
}

fn load(path: &Path, args: &PlanningArgs) -> CliResult<(String, ParsedGraph, PlanningContext)> {
    let yaml_content = fs::read_to_string(path)?;
    let parsed = parse_yaml_graph(&yaml_content)?;
    tracing::debug!(path = %path.display(), operators = parsed.graph.len(), "loaded graph document");
    let config = resolve_config(PlannerConfig::from_env(), &parsed, args)?;
    Ok((yaml_content, parsed, PlanningContext::new(config)))
}

fn build_document(
    yaml_content: &str,
    parsed: ParsedGraph,
    context: &PlanningContext,
) -> CliResult<PlanDocument> {
    let mut graph = parsed.graph;
    let detail = plan(context, &mut graph)?;
    let staged = detail.plan();
    let info = to_info(staged);
    let created_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let manifest = PlanManifest::new(hash_serde(&info)?, staged.len(), created_ms)
        .with_source(hash_bytes(yaml_content.as_bytes()));
    Ok(PlanDocument {
        manifest,
        parameters: staged
            .attribute::<ParameterInfo>()
            .map(|p| p.names.clone())
            .unwrap_or_default(),
        iterative: staged.attribute::<IterativeInfo>().cloned(),
        statistics: staged.attribute::<PlanStatistics>().cloned(),
        graph_statistics: staged.attribute::<GraphStatistics>().cloned(),
        plan: info,
    })
}

fn plan_graph(path: &Path, output: Option<&Path>, args: &PlanningArgs) -> CliResult<()> {
    let (yaml_content, parsed, context) = load(path, args)?;
    let document = build_document(&yaml_content, parsed, &context)?;
    let json = serde_json::to_string_pretty(&document)?;
    match output {
        Some(out) => {
            fs::write(out, json)?;
            eprintln!(
                "✓ Planned {} stages into {} (plan hash {})",
                document.manifest.stages,
                out.display(),
                document.manifest.plan_hash.short()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn validate_graph(path: &Path, args: &PlanningArgs) -> CliResult<()> {
    let (_, parsed, context) = load(path, args)?;
    let mut graph = parsed.graph;
    let report = prepare_operator_graph(&context, &mut graph)?;
    if !report.optimization.converged {
        eprintln!(
            "warning: optimization stopped after {} steps",
            report.optimization.steps
        );
    }
    Ok(())
}

fn explain_graph(path: &Path, args: &PlanningArgs) -> CliResult<()> {
    let (yaml_content, parsed, context) = load(path, args)?;
    let operators = parsed.graph.len();
    let document = build_document(&yaml_content, parsed, &context)?;
    print!("{}", render_explain(operators, &document));
    Ok(())
}

fn render_explain(operators: usize, document: &PlanDocument) -> String {
    let mut out = String::new();
    out.push_str("Execution Plan\n");
    out.push_str("==============\n\n");
    out.push_str(&format!("Operators: {}\n", operators));
    out.push_str(&format!("Stages: {}\n", document.plan.vertices.len()));
    out.push_str(&format!("Plan hash: {}\n", document.manifest.plan_hash.short()));
    if !document.parameters.is_empty() {
        let names: Vec<&str> = document.parameters.iter().map(String::as_str).collect();
        out.push_str(&format!("Parameters: {}\n", names.join(", ")));
    }
    out.push('\n');
    for vertex in &document.plan.vertices {
        out.push_str(&format!("{} [{}]\n", vertex.name, vertex.label));
        for input in &vertex.inputs {
            out.push_str(&format!(
                "  {} <- {:?} {} ({})\n",
                input.name,
                input.exchange,
                input.opposites.join(", "),
                input.data_type
            ));
        }
        for output in &vertex.outputs {
            out.push_str(&format!(
                "  {} -> {:?} {} ({})\n",
                output.name,
                output.exchange,
                output.opposites.join(", "),
                output.data_type
            ));
        }
        for op in &vertex.operators {
            out.push_str(&format!("    {}\n", op));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::config::PlanningOption;

    const GRAPH: &str = r#"
config:
  options: { plan_statistics: true }
operators:
  - { id: orders, op: input, type: order, path: "in/${date}" }
  - id: total
    op: fold
    inputs:  [ { name: in, type: order, group: [customer] } ]
    outputs: [ { name: out, type: total } ]
  - { id: result, op: output, type: total }
edges:
  - { from: orders, to: total.in }
  - { from: total.out, to: result }
"#;

    #[test]
    fn cli_flags_override_document_config() {
        let parsed = parse_yaml_graph(GRAPH).unwrap();
        let args = PlanningArgs {
            options: vec!["plan_statistics=false".into(), "graph_statistics=true".into()],
            broadcast_limit: Some(-1.0),
        };
        let config = resolve_config(PlannerConfig::default(), &parsed, &args).unwrap();
        assert!(!config.options.is_enabled(PlanningOption::PlanStatistics));
        assert!(config.options.is_enabled(PlanningOption::GraphStatistics));
        assert_eq!(config.broadcast_limit_bytes, None);
    }

    #[test]
    fn malformed_option_flag_is_rejected() {
        let parsed = parse_yaml_graph(GRAPH).unwrap();
        let args = PlanningArgs {
            options: vec!["plan_statistics".into()],
            broadcast_limit: None,
        };
        assert!(resolve_config(PlannerConfig::default(), &parsed, &args).is_err());
    }

    #[test]
    fn document_carries_manifest_and_parameters() {
        let parsed = parse_yaml_graph(GRAPH).unwrap();
        let config =
            resolve_config(PlannerConfig::default(), &parsed, &PlanningArgs::default()).unwrap();
        let context = PlanningContext::new(config);
        let document = build_document(GRAPH, parsed, &context).unwrap();

        assert_eq!(document.manifest.stages, 2);
        assert_eq!(document.plan.vertices.len(), 2);
        assert_eq!(
            document.manifest.plan_hash,
            hash_serde(&document.plan).unwrap()
        );
        assert!(document.parameters.contains("date"));
        assert_eq!(document.statistics.as_ref().map(|s| s.stages), Some(2));

        let text = render_explain(3, &document);
        assert!(text.contains("v0 ["));
        assert!(text.contains("Shuffle"));
    }
}
