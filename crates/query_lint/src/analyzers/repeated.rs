use crate::analyzers::{first_sql, Analyzer, IssueIter};
use crate::clause::extract_table_name;
use crate::config::{ConfigError, EngineConfig};
use crate::index::index;
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::record::{OperationClass, QueryTrace};

pub struct RepeatedQueryAnalyzer {
    config: EngineConfig,
    assembler: IssueAssembler,
}

impl RepeatedQueryAnalyzer {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            assembler: IssueAssembler::new(config.max_sampled_queries),
            config,
        })
    }
}

impl Analyzer for RepeatedQueryAnalyzer {
    fn name(&self) -> &'static str {
        "repeated_query"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let reads = trace
            .iter()
            .filter(|record| record.operation() == OperationClass::Read);
        let buckets = index(reads, self.config.mode);

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let mut extra = Context::new();
            if let Some(table) = extract_table_name(first_sql(&bucket)) {
                extra.insert("table".to_string(), table.into());
            }
            self.assembler
                .assemble(&bucket, self, &self.config.tiers, extra)
        }))
    }
}

impl IssueTemplate for RepeatedQueryAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        match facts.get_str("table") {
            Some(table) => format!(
                "Query on {table} executed {} times",
                facts.occurrences
            ),
            None => format!("Query executed {} times", facts.occurrences),
        }
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "The same query shape ran {} times, taking {:.2}ms in total ({:.2}ms on average). \
             Repeating one query per row of an earlier result is the N+1 pattern.",
            facts.occurrences,
            facts.total_time_ms,
            facts.avg_time_ms()
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "n_plus_one",
                "Load the related rows up front with a join or a single IN (...) query",
                "n_plus_one.md",
            )
            .with_facts(facts),
        )
    }
}
