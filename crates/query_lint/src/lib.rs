pub mod analyzers;
pub mod clause;
pub mod config;
pub mod index;
pub mod issue;
pub mod normalize;
pub mod record;
pub mod scan;

use thiserror::Error;

pub use analyzers::{Analyzer, AnalyzerSet, IssueIter};
pub use config::{
    Config, ConfigError, EngineConfig, ScanConfig, SignatureMode, ThresholdTiers,
};
pub use index::{classify_severity, index, Bucket, Signature};
pub use issue::{
    Context, Facts, Issue, IssueAssembler, IssueCategory, IssueSubject, IssueTemplate, Severity,
    Suggestion,
};
pub use normalize::{normalize, NormalizedShape};
pub use record::{
    Frame, OperationClass, ParamValue, QueryRecord, QueryTrace, StatementKind, TraceError,
};
pub use scan::{scan_boundaries, Boundary, Run, SequentialScanner};

#[derive(Debug, Error)]
pub enum LintError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Runs every enabled analyzer of `config` over `trace`, most severe first.
/// Issues of equal severity keep analyzer order.
pub fn lint(trace: &QueryTrace, config: &Config) -> Result<Vec<Issue>, LintError> {
    let analyzers = AnalyzerSet::from_config(config)?;
    let mut issues: Vec<Issue> = analyzers.analyze(trace).collect();
    issues.sort_by(|a, b| b.severity.cmp(&a.severity));
    tracing::debug!(records = trace.len(), issues = issues.len(), "trace analyzed");
    Ok(issues)
}
