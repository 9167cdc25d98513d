use serde_json::{json, Value};

use crate::analyzers::{first_sql, shapes_of, Analyzer, IssueIter};
use crate::clause::find_null_misuse;
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Severity, Suggestion};
use crate::record::QueryTrace;

pub struct NullComparisonAnalyzer {
    assembler: IssueAssembler,
}

impl NullComparisonAnalyzer {
    pub fn new(max_sampled_queries: usize) -> Self {
        Self {
            assembler: IssueAssembler::new(max_sampled_queries),
        }
    }
}

impl Analyzer for NullComparisonAnalyzer {
    fn name(&self) -> &'static str {
        "null_comparison"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let buckets = shapes_of(trace, None);

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let findings = find_null_misuse(first_sql(&bucket));
            let first = findings.first()?;

            let mut extra = Context::new();
            extra.insert("field".to_string(), first.field.as_str().into());
            extra.insert("operator".to_string(), first.operator.as_str().into());
            extra.insert("replacement".to_string(), first.operator.replacement().into());
            let comparisons: Vec<Value> = findings
                .iter()
                .map(|finding| {
                    json!({
                        "field": finding.field,
                        "operator": finding.operator.as_str(),
                        "replacement": finding.operator.replacement(),
                    })
                })
                .collect();
            extra.insert("comparisons".to_string(), Value::Array(comparisons));

            Some(
                self.assembler
                    .assemble_with_severity(&bucket, self, Severity::Critical, extra),
            )
        }))
    }
}

impl IssueTemplate for NullComparisonAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Integrity
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Comparison with NULL: {} {} NULL",
            facts.get_str("field").unwrap_or_default(),
            facts.get_str("operator").unwrap_or("=")
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        let extra = facts
            .context
            .get("comparisons")
            .and_then(Value::as_array)
            .map_or(0, |all| all.len().saturating_sub(1));
        let mut text = format!(
            "`{field} {op} NULL` evaluates to NULL, never true, so the condition silently \
             filters every row. Write `{field} {replacement}` instead.",
            field = facts.get_str("field").unwrap_or_default(),
            op = facts.get_str("operator").unwrap_or("="),
            replacement = facts.get_str("replacement").unwrap_or("IS NULL"),
        );
        if extra > 0 {
            text.push_str(&format!(" The statement has {extra} more such comparison(s)."));
        }
        text
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "null_comparison",
                "Use IS NULL or IS NOT NULL",
                "null_comparison.md",
            )
            .with_facts(facts),
        )
    }
}
