use crate::analyzers::{shapes_of, Analyzer, IssueIter};
use crate::clause::{extract_offset, extract_table_name};
use crate::config::{ConfigError, ThresholdTiers};
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::record::{OperationClass, QueryTrace};

pub struct DeepPaginationAnalyzer {
    tiers: ThresholdTiers<usize>,
    assembler: IssueAssembler,
}

impl DeepPaginationAnalyzer {
    pub fn new(tiers: ThresholdTiers<usize>, max_sampled_queries: usize) -> Result<Self, ConfigError> {
        tiers.validate("deep_pagination.tiers")?;
        Ok(Self {
            tiers,
            assembler: IssueAssembler::new(max_sampled_queries),
        })
    }
}

impl Analyzer for DeepPaginationAnalyzer {
    fn name(&self) -> &'static str {
        "deep_pagination"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let buckets = shapes_of(trace, Some(OperationClass::Read));

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            // Offsets are literals, so members of one shape differ; the
            // deepest page decides.
            let deepest = bucket
                .members()
                .iter()
                .filter_map(|record| extract_offset(&record.sql))
                .max()?;
            let severity = self
                .tiers
                .classify(usize::try_from(deepest).unwrap_or(usize::MAX))?;

            let mut extra = Context::new();
            extra.insert("offset".to_string(), deepest.into());
            if let Some(table) = bucket
                .members()
                .first()
                .and_then(|record| extract_table_name(&record.sql))
            {
                extra.insert("table".to_string(), table.into());
            }
            Some(
                self.assembler
                    .assemble_with_severity(&bucket, self, severity, extra),
            )
        }))
    }
}

impl IssueTemplate for DeepPaginationAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Deep pagination with OFFSET {}",
            facts.get_u64("offset").unwrap_or_default()
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "The database reads and discards {} rows before returning a page. \
             The cost grows with every page requested.",
            facts.get_u64("offset").unwrap_or_default()
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "deep_pagination",
                "Paginate by key: WHERE id > :last_seen_id ORDER BY id LIMIT n",
                "keyset_pagination.md",
            )
            .with_facts(facts),
        )
    }
}
