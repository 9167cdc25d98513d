use crate::analyzers::{first_sql, shapes_of, Analyzer, IssueIter};
use crate::clause::find_empty_in_clause;
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Severity, Suggestion};
use crate::record::QueryTrace;

pub struct EmptyInClauseAnalyzer {
    assembler: IssueAssembler,
}

impl EmptyInClauseAnalyzer {
    pub fn new(max_sampled_queries: usize) -> Self {
        Self {
            assembler: IssueAssembler::new(max_sampled_queries),
        }
    }
}

impl Analyzer for EmptyInClauseAnalyzer {
    fn name(&self) -> &'static str {
        "empty_in_clause"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let buckets = shapes_of(trace, None);

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let fields = find_empty_in_clause(first_sql(&bucket));
            let field = fields.first()?.clone();
            let mut extra = Context::new();
            extra.insert("field".to_string(), field.into());
            extra.insert("fields".to_string(), fields.into());
            Some(
                self.assembler
                    .assemble_with_severity(&bucket, self, Severity::Warning, extra),
            )
        }))
    }
}

impl IssueTemplate for EmptyInClauseAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::CodeQuality
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Empty IN list on {}",
            facts.get_str("field").unwrap_or_default()
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "`{} IN ()` was sent {} time(s). An empty list is rejected by most \
             databases and matches nothing where it is accepted.",
            facts.get_str("field").unwrap_or_default(),
            facts.occurrences
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "empty_in_clause",
                "Skip the query when the list is empty",
                "empty_in_clause.md",
            )
            .with_facts(facts),
        )
    }
}
