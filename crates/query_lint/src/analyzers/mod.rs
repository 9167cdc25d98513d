mod bulk;
mod caching;
mod empty_in;
mod flush;
mod joins;
mod null_comparison;
mod pagination;
mod repeated;
mod slow;
mod sort;

pub use bulk::BulkOperationAnalyzer;
pub use caching::CachingOpportunityAnalyzer;
pub use empty_in::EmptyInClauseAnalyzer;
pub use flush::FlushInLoopAnalyzer;
pub use joins::JoinFanoutAnalyzer;
pub use null_comparison::NullComparisonAnalyzer;
pub use pagination::DeepPaginationAnalyzer;
pub use repeated::RepeatedQueryAnalyzer;
pub use slow::SlowQueryAnalyzer;
pub use sort::UnboundedSortAnalyzer;

use crate::config::{Config, ConfigError, SignatureMode};
use crate::index::{index, Bucket};
use crate::issue::Issue;
use crate::record::{OperationClass, QueryTrace};

/// Lazily produced issues of one analyzer run.
pub type IssueIter<'a> = Box<dyn Iterator<Item = Issue> + 'a>;

pub trait Analyzer: Send + Sync {
    /// Stable identifier, also the configuration section name.
    fn name(&self) -> &'static str;

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a>;
}

/// Shape-only buckets of the records of one operation class.
pub(crate) fn shapes_of(trace: &QueryTrace, class: Option<OperationClass>) -> Vec<Bucket<'_>> {
    let records = trace
        .iter()
        .filter(move |record| class.map_or(true, |class| record.operation() == class));
    index(records, SignatureMode::ShapeOnly)
}

pub(crate) fn first_sql<'a>(bucket: &Bucket<'a>) -> &'a str {
    bucket
        .members()
        .first()
        .copied()
        .map_or("", |record| record.sql.as_str())
}

/// The configured analyzers, run in a fixed order.
pub struct AnalyzerSet {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerSet {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let sample = config.max_sampled_queries;

        let mut analyzers: Vec<Box<dyn Analyzer>> = Vec::new();
        if config.repeated_query.enabled {
            analyzers.push(Box::new(RepeatedQueryAnalyzer::new(
                config.engine(config.repeated_query.tiers, SignatureMode::ShapeOnly),
            )?));
        }
        if config.caching_opportunity.enabled {
            analyzers.push(Box::new(CachingOpportunityAnalyzer::new(
                config.engine(config.caching_opportunity.tiers, SignatureMode::ParamAware),
            )?));
        }
        if config.bulk_operation.enabled {
            analyzers.push(Box::new(BulkOperationAnalyzer::new(
                config.engine(config.bulk_operation.tiers, SignatureMode::ShapeOnly),
            )?));
        }
        if config.flush_in_loop.enabled {
            analyzers.push(Box::new(FlushInLoopAnalyzer::new(
                config.flush_in_loop,
                sample,
            )?));
        }
        if config.join_fanout.enabled {
            analyzers.push(Box::new(JoinFanoutAnalyzer::new(config.join_fanout.tiers, sample)?));
        }
        if config.unbounded_sort.enabled {
            analyzers.push(Box::new(UnboundedSortAnalyzer::new(sample)));
        }
        if config.deep_pagination.enabled {
            analyzers.push(Box::new(DeepPaginationAnalyzer::new(
                config.deep_pagination.tiers,
                sample,
            )?));
        }
        if config.null_comparison.enabled {
            analyzers.push(Box::new(NullComparisonAnalyzer::new(sample)));
        }
        if config.empty_in_clause.enabled {
            analyzers.push(Box::new(EmptyInClauseAnalyzer::new(sample)));
        }
        if config.slow_query.enabled {
            analyzers.push(Box::new(SlowQueryAnalyzer::new(config.slow_query.tiers, sample)?));
        }

        Ok(Self { analyzers })
    }

    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::from_config(&Config::default())
    }

    /// Keeps only the analyzers named in `names`. An empty list keeps all.
    pub fn retain_named<S: AsRef<str>>(&mut self, names: &[S]) {
        if names.is_empty() {
            return;
        }
        self.analyzers
            .retain(|analyzer| names.iter().any(|name| name.as_ref() == analyzer.name()));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|analyzer| analyzer.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    pub fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> impl Iterator<Item = Issue> + 'a {
        self.analyzers.iter().flat_map(move |analyzer| {
            tracing::debug!(analyzer = analyzer.name(), records = trace.len(), "running analyzer");
            analyzer.analyze(trace)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Severity;
    use crate::record::QueryRecord;

    fn noisy_trace() -> QueryTrace {
        let mut records = Vec::new();
        for i in 0..12 {
            records.push(QueryRecord::new(
                format!("SELECT * FROM comments WHERE post_id = {i}"),
                2.0,
            ));
        }
        records.push(QueryRecord::new("SELECT * FROM users WHERE email = NULL", 1.0));
        records.push(QueryRecord::new("SELECT * FROM posts ORDER BY created_at DESC", 700.0));
        QueryTrace::new(records)
    }

    #[test]
    fn default_set_runs_every_analyzer() {
        let set = AnalyzerSet::with_defaults().unwrap();
        assert_eq!(
            set.names(),
            vec![
                "repeated_query",
                "caching_opportunity",
                "bulk_operation",
                "flush_in_loop",
                "join_fanout",
                "unbounded_sort",
                "deep_pagination",
                "null_comparison",
                "empty_in_clause",
                "slow_query",
            ]
        );

        let trace = noisy_trace();
        let issues: Vec<_> = set.analyze(&trace).collect();
        let titles: Vec<_> = issues.iter().map(|issue| issue.title.as_str()).collect();
        assert!(titles.iter().any(|t| t.contains("12 times")), "{titles:?}");
        assert!(issues.iter().any(|i| i.severity == Severity::Critical));
        assert!(titles.iter().any(|t| t.contains("ORDER BY without LIMIT")), "{titles:?}");
        assert!(titles.iter().any(|t| t.contains("Slow query")), "{titles:?}");
    }

    #[test]
    fn retain_named_filters_analyzers() {
        let mut set = AnalyzerSet::with_defaults().unwrap();
        set.retain_named(&["null_comparison"]);
        assert_eq!(set.names(), vec!["null_comparison"]);

        let trace = noisy_trace();
        let issues: Vec<_> = set.analyze(&trace).collect();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn disabled_sections_are_skipped() {
        let mut config = Config::default();
        config.slow_query.enabled = false;
        config.repeated_query.enabled = false;
        let set = AnalyzerSet::from_config(&config).unwrap();
        assert!(!set.names().contains(&"slow_query"));
        assert!(!set.names().contains(&"repeated_query"));
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let mut config = Config::default();
        config.flush_in_loop.scan.max_gap = 0;
        assert!(AnalyzerSet::from_config(&config).is_err());
    }

    #[test]
    fn consumption_can_stop_early() {
        let set = AnalyzerSet::with_defaults().unwrap();
        let trace = noisy_trace();
        assert_eq!(set.analyze(&trace).take(1).count(), 1);
    }

    #[test]
    fn empty_trace_is_clean() {
        let set = AnalyzerSet::with_defaults().unwrap();
        assert_eq!(set.analyze(&QueryTrace::default()).count(), 0);
    }
}
