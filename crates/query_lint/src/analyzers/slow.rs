use crate::analyzers::{shapes_of, Analyzer, IssueIter};
use crate::config::{ConfigError, ThresholdTiers};
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::record::QueryTrace;

pub struct SlowQueryAnalyzer {
    tiers: ThresholdTiers<f64>,
    assembler: IssueAssembler,
}

impl SlowQueryAnalyzer {
    pub fn new(tiers: ThresholdTiers<f64>, max_sampled_queries: usize) -> Result<Self, ConfigError> {
        tiers.validate("slow_query.tiers")?;
        Ok(Self {
            tiers,
            assembler: IssueAssembler::new(max_sampled_queries),
        })
    }
}

impl Analyzer for SlowQueryAnalyzer {
    fn name(&self) -> &'static str {
        "slow_query"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let buckets = shapes_of(trace, None);

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let slowest = bucket
                .members()
                .iter()
                .map(|record| record.time_ms())
                .fold(0.0_f64, f64::max);
            let severity = self.tiers.classify(slowest)?;
            let mut extra = Context::new();
            extra.insert("max_time_ms".to_string(), slowest.into());
            Some(
                self.assembler
                    .assemble_with_severity(&bucket, self, severity, extra),
            )
        }))
    }
}

impl IssueTemplate for SlowQueryAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Slow query: {:.0}ms",
            facts.get_f64("max_time_ms").unwrap_or_default()
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "The slowest execution took {:.2}ms; {} execution(s) averaged {:.2}ms.",
            facts.get_f64("max_time_ms").unwrap_or_default(),
            facts.occurrences,
            facts.avg_time_ms()
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "slow_query",
                "Check the query plan for sequential scans and missing indexes",
                "slow_query.md",
            )
            .with_facts(facts),
        )
    }
}
