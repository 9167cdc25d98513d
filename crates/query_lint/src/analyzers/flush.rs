use crate::analyzers::{Analyzer, IssueIter};
use crate::config::{ConfigError, FlushConfig, ThresholdTiers};
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::record::QueryTrace;
use crate::scan::{RunSubject, SequentialScanner};

pub struct FlushInLoopAnalyzer {
    scanner: SequentialScanner,
    tiers: ThresholdTiers<usize>,
    assembler: IssueAssembler,
}

impl FlushInLoopAnalyzer {
    pub fn new(config: FlushConfig, max_sampled_queries: usize) -> Result<Self, ConfigError> {
        config.tiers.validate("flush_in_loop.tiers")?;
        Ok(Self {
            scanner: SequentialScanner::new(config.scan)?,
            tiers: config.tiers,
            assembler: IssueAssembler::new(max_sampled_queries),
        })
    }
}

impl Analyzer for FlushInLoopAnalyzer {
    fn name(&self) -> &'static str {
        "flush_in_loop"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let records = trace.records();
        let runs = self.scanner.scan_flushes(records);
        tracing::debug!(runs = runs.len(), "flush regions found");

        Box::new(runs.into_iter().filter_map(move |run| {
            let subject = RunSubject { run: &run, records };
            self.assembler
                .assemble(&subject, self, &self.tiers, Context::new())
        }))
    }
}

impl IssueTemplate for FlushInLoopAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Flush inside a loop: {} write/read round trips",
            facts.occurrences
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        let start = facts.get_u64("start_index").unwrap_or_default();
        let end = facts.get_u64("end_index").unwrap_or_default();
        format!(
            "Queries {start} to {end} repeat a write followed by a read {} times, \
             taking {:.2}ms. Each iteration pushes pending changes to the database \
             before querying again.",
            facts.occurrences, facts.total_time_ms
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "flush_in_loop",
                "Collect the changes and flush once after the loop",
                "flush_in_loop.md",
            )
            .with_facts(facts),
        )
    }
}
