//! Batch parameters a plan depends on (`${name}` references).

use std::collections::BTreeSet;

use flowplan_core::operator::{ArgumentValue, OperatorKind};
use serde::{Deserialize, Serialize};

use crate::plan::Plan;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub names: BTreeSet<String>,
}

impl ParameterInfo {
    /// Scans string arguments and external paths of every stage operator.
    pub fn of(plan: &Plan) -> Self {
        let mut names = BTreeSet::new();
        for stage in plan.elements() {
            for op in stage.operators().operators() {
                for argument in op.arguments() {
                    if let ArgumentValue::String(text) = &argument.value {
                        collect_references(text, &mut names);
                    }
                }
                let path = match op.kind() {
                    OperatorKind::Input(input) => input.path.as_deref(),
                    OperatorKind::Output(output) => output.path.as_deref(),
                    _ => None,
                };
                if let Some(path) = path {
                    collect_references(path, &mut names);
                }
            }
        }
        Self { names }
    }
}

/// Adds every `${name}` found in `text`.
pub fn collect_references(text: &str, names: &mut BTreeSet<String>) {
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = after[..end].trim();
        if !name.is_empty() {
            names.insert(name.to_string());
        }
        rest = &after[end + 1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_references() {
        let mut names = BTreeSet::new();
        collect_references("s3://bucket/${date}/${ region }/part-${}.csv ${open", &mut names);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["date".to_string(), "region".to_string()]
        );
    }
}
