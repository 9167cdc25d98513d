use crate::analyzers::{first_sql, Analyzer, IssueIter};
use crate::clause::extract_table_name;
use crate::config::{ConfigError, EngineConfig};
use crate::index::{index, Bucket};
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::normalize::has_placeholder;
use crate::record::{OperationClass, QueryTrace};

pub struct CachingOpportunityAnalyzer {
    config: EngineConfig,
    assembler: IssueAssembler,
}

impl CachingOpportunityAnalyzer {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            assembler: IssueAssembler::new(config.max_sampled_queries),
            config,
        })
    }
}

/// A bucket whose members are provably the same query. Without parameters
/// only byte-identical SQL text with every value inline qualifies.
fn is_true_duplicate(bucket: &Bucket<'_>) -> bool {
    if bucket.signature().is_parameterized() {
        return true;
    }
    let members = bucket.members();
    let unprovable = members.iter().any(|record| {
        record.parameters.is_some() || has_placeholder(&record.sql)
    });
    if unprovable {
        return false;
    }
    let mut sql = members.iter().map(|record| record.sql.trim());
    match sql.next() {
        Some(first) => sql.all(|other| other == first),
        None => false,
    }
}

impl Analyzer for CachingOpportunityAnalyzer {
    fn name(&self) -> &'static str {
        "caching_opportunity"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let reads = trace
            .iter()
            .filter(|record| record.operation() == OperationClass::Read);
        let buckets = index(reads, self.config.mode);

        Box::new(
            buckets
                .into_iter()
                .filter(is_true_duplicate)
                .filter_map(move |bucket| {
                    let mut extra = Context::new();
                    if let Some(table) = extract_table_name(first_sql(&bucket)) {
                        extra.insert("table".to_string(), table.into());
                    }
                    self.assembler
                        .assemble(&bucket, self, &self.config.tiers, extra)
                }),
        )
    }
}

impl IssueTemplate for CachingOpportunityAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        format!(
            "Identical query executed {} times with the same parameters",
            facts.occurrences
        )
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        let mut text = format!(
            "The same query with the same parameter values ran {} times ({:.2}ms in total).",
            facts.occurrences, facts.total_time_ms
        );
        if let Some(params) = facts.get_str("parameters") {
            text.push_str(&format!(" Parameters: {params}."));
        }
        text.push_str(" Its result can be reused instead of fetched again.");
        text
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        Some(
            Suggestion::new(
                "caching_opportunity",
                "Keep the first result in a request-scoped cache or memoize the lookup",
                "caching_opportunity.md",
            )
            .with_facts(facts),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SignatureMode, ThresholdTiers};
    use crate::issue::Severity;
    use crate::record::{ParamValue, QueryRecord};

    fn analyzer() -> CachingOpportunityAnalyzer {
        CachingOpportunityAnalyzer::new(EngineConfig {
            tiers: ThresholdTiers::new(3, 5, 10),
            mode: SignatureMode::ParamAware,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    fn lookup(id: i64) -> QueryRecord {
        QueryRecord::new("SELECT * FROM settings WHERE id = ?", 1.0)
            .with_parameters(vec![ParamValue::Int(id)])
    }

    #[test]
    fn distinct_parameters_are_not_cacheable() {
        let trace: QueryTrace = (1..=4).map(lookup).collect();
        assert_eq!(analyzer().analyze(&trace).count(), 0);
    }

    #[test]
    fn same_parameters_are_reported() {
        let trace: QueryTrace = [1, 1, 2, 1, 1, 1].into_iter().map(lookup).collect();
        let analyzer = analyzer();
        let issues: Vec<_> = analyzer.analyze(&trace).collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].occurrences, 5);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].description.contains("[i:1]"));
        assert_eq!(
            issues[0].suggestion.as_ref().unwrap().context["table"],
            "settings"
        );
    }

    #[test]
    fn literal_sql_needs_identical_text() {
        let same: QueryTrace = (0..3)
            .map(|_| QueryRecord::new("SELECT * FROM flags WHERE name = 'beta'", 0.0))
            .collect();
        assert_eq!(analyzer().analyze(&same).count(), 1);

        let varied: QueryTrace = ["'a'", "'b'", "'a'"]
            .iter()
            .map(|v| QueryRecord::new(format!("SELECT * FROM flags WHERE name = {v}"), 0.0))
            .collect();
        assert_eq!(analyzer().analyze(&varied).count(), 0);
    }

    #[test]
    fn mixed_parameter_presence_is_not_provable() {
        let mut records: Vec<_> = (1..=3).map(lookup).collect();
        records.push(QueryRecord::new("SELECT * FROM settings WHERE id = ?", 1.0));
        let trace = QueryTrace::new(records);
        assert_eq!(analyzer().analyze(&trace).count(), 0);
    }

    #[test]
    fn placeholders_without_parameters_are_not_provable() {
        let trace: QueryTrace = (0..4)
            .map(|_| QueryRecord::new("SELECT * FROM settings WHERE id = ?", 1.0))
            .collect();
        assert_eq!(analyzer().analyze(&trace).count(), 0);
    }
}
