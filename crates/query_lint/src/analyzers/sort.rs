use crate::analyzers::{first_sql, shapes_of, Analyzer, IssueIter};
use crate::clause::{extract_order_by, extract_table_name, has_limit};
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Severity, Suggestion};
use crate::record::{OperationClass, QueryTrace};

pub struct UnboundedSortAnalyzer {
    assembler: IssueAssembler,
}

impl UnboundedSortAnalyzer {
    pub fn new(max_sampled_queries: usize) -> Self {
        Self {
            assembler: IssueAssembler::new(max_sampled_queries),
        }
    }
}

impl Analyzer for UnboundedSortAnalyzer {
    fn name(&self) -> &'static str {
        "unbounded_sort"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let buckets = shapes_of(trace, Some(OperationClass::Read));

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let sql = first_sql(&bucket);
            if has_limit(sql) {
                return None;
            }
            let order_by = extract_order_by(sql)?;
            let mut extra = Context::new();
            extra.insert("order_by".to_string(), order_by.into());
            if let Some(table) = extract_table_name(sql) {
                extra.insert("table".to_string(), table.into());
            }
            Some(
                self.assembler
                    .assemble_with_severity(&bucket, self, Severity::Warning, extra),
            )
        }))
    }
}

impl IssueTemplate for UnboundedSortAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        match facts.get_str("table") {
            Some(table) => format!("ORDER BY without LIMIT on {table}"),
            None => "ORDER BY without LIMIT".to_string(),
        }
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "The query sorts by `{}` but returns every row. The database has to sort \
             the full result set on each of its {} executions.",
            facts.get_str("order_by").unwrap_or_default(),
            facts.occurrences
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "unbounded_sort",
                "Add a LIMIT or drop the ORDER BY if order does not matter",
                "unbounded_sort.md",
            )
            .with_facts(facts),
        )
    }
}
