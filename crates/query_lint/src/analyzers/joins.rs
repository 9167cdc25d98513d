use crate::analyzers::{first_sql, shapes_of, Analyzer, IssueIter};
use crate::clause::count_joins;
use crate::config::{ConfigError, ThresholdTiers};
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::record::QueryTrace;

pub struct JoinFanoutAnalyzer {
    tiers: ThresholdTiers<usize>,
    assembler: IssueAssembler,
}

impl JoinFanoutAnalyzer {
    pub fn new(tiers: ThresholdTiers<usize>, max_sampled_queries: usize) -> Result<Self, ConfigError> {
        tiers.validate("join_fanout.tiers")?;
        Ok(Self {
            tiers,
            assembler: IssueAssembler::new(max_sampled_queries),
        })
    }
}

impl Analyzer for JoinFanoutAnalyzer {
    fn name(&self) -> &'static str {
        "join_fanout"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let buckets = shapes_of(trace, None);

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let joins = count_joins(first_sql(&bucket));
            let severity = self.tiers.classify(joins)?;
            let mut extra = Context::new();
            extra.insert("join_count".to_string(), joins.into());
            Some(
                self.assembler
                    .assemble_with_severity(&bucket, self, severity, extra),
            )
        }))
    }
}

impl IssueTemplate for JoinFanoutAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Query with {} JOINs",
            facts.get_u64("join_count").unwrap_or_default()
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "A statement joining {} tables ran {} times ({:.2}ms on average). \
             Wide joins multiply intermediate rows and are hard for the planner.",
            facts.get_u64("join_count").unwrap_or_default() + 1,
            facts.occurrences,
            facts.avg_time_ms()
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "join_fanout",
                "Split the query or load the associations separately",
                "join_fanout.md",
            )
            .with_facts(facts),
        )
    }
}
