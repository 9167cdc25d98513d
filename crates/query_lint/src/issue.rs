use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::config::ThresholdTiers;
use crate::record::{Frame, QueryRecord};

/// Default cap on the number of queries attached to one issue.
pub const DEFAULT_MAX_SAMPLED_QUERIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Performance,
    Integrity,
    CodeQuality,
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssueCategory::Performance => "performance",
            IssueCategory::Integrity => "integrity",
            IssueCategory::CodeQuality => "code_quality",
        })
    }
}

/// Values a suggestion template is rendered with.
pub type Context = BTreeMap<String, Value>;

/// Remediation bound to an issue. Rendering `template_name` with `context`
/// happens outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub code: String,
    pub description: String,
    pub template_name: String,
    pub context: Context,
}

impl Suggestion {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            template_name: template_name.into(),
            context: Context::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Copies every fact into the template context; later `with` calls win.
    pub fn with_facts(mut self, facts: &Facts<'_>) -> Self {
        self.context
            .extend(facts.context.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.context.insert("occurrences".to_string(), facts.occurrences.into());
        self.context
            .insert("total_time_ms".to_string(), facts.total_time_ms.into());
        if let Some(sql) = facts.sample_sql {
            self.context.insert("example_sql".to_string(), sql.into());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: IssueCategory,
    /// How many times the pattern occurred, independent of `queries.len()`.
    pub occurrences: usize,
    pub total_time_ms: f64,
    pub queries: Vec<QueryRecord>,
    pub backtrace: Option<Vec<Frame>>,
    pub suggestion: Option<Suggestion>,
}

/// Numeric facts about a subject, computed once and handed to the template.
#[derive(Debug, Clone)]
pub struct Facts<'a> {
    pub occurrences: usize,
    pub total_time_ms: f64,
    pub severity: Severity,
    /// SQL of the first member, when there is one.
    pub sample_sql: Option<&'a str>,
    pub context: Context,
}

impl Facts<'_> {
    pub fn avg_time_ms(&self) -> f64 {
        if self.occurrences == 0 {
            0.0
        } else {
            self.total_time_ms / self.occurrences as f64
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.context.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.context.get(key).and_then(Value::as_f64)
    }
}

/// Something an issue can be assembled from: a signature bucket, a run, or
/// a single record.
pub trait IssueSubject {
    /// True number of occurrences; may exceed the number of members sampled.
    fn occurrences(&self) -> usize;

    /// Member records in trace order.
    fn members(&self) -> impl Iterator<Item = &QueryRecord> + '_;

    fn total_time_ms(&self) -> f64 {
        self.members().map(QueryRecord::time_ms).sum()
    }

    /// Subject-specific facts (shape, table, run statistics).
    fn describe(&self, _context: &mut Context) {}
}

impl IssueSubject for QueryRecord {
    fn occurrences(&self) -> usize {
        1
    }

    fn members(&self) -> impl Iterator<Item = &QueryRecord> + '_ {
        std::iter::once(self)
    }
}

/// Builds title, description and suggestion from facts. No SQL re-parsing
/// happens here; everything needed is in `Facts`.
pub trait IssueTemplate {
    fn category(&self) -> IssueCategory;

    fn title(&self, facts: &Facts<'_>) -> String;

    fn description(&self, facts: &Facts<'_>) -> String;

    fn suggestion(&self, _facts: &Facts<'_>) -> Option<Suggestion> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IssueAssembler {
    max_sampled_queries: usize,
}

impl Default for IssueAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLED_QUERIES)
    }
}

impl IssueAssembler {
    /// A cap of zero is raised to one so an issue always shows an example.
    pub fn new(max_sampled_queries: usize) -> Self {
        Self {
            max_sampled_queries: max_sampled_queries.max(1),
        }
    }

    pub fn max_sampled_queries(&self) -> usize {
        self.max_sampled_queries
    }

    /// Severity from the subject's occurrence count; `None` below the
    /// lowest tier.
    pub fn assemble<S, T>(
        &self,
        subject: &S,
        template: &T,
        tiers: &ThresholdTiers<usize>,
        extra: Context,
    ) -> Option<Issue>
    where
        S: IssueSubject + ?Sized,
        T: IssueTemplate + ?Sized,
    {
        let severity = tiers.classify(subject.occurrences())?;
        Some(self.assemble_with_severity(subject, template, severity, extra))
    }

    pub fn assemble_with_severity<S, T>(
        &self,
        subject: &S,
        template: &T,
        severity: Severity,
        extra: Context,
    ) -> Issue
    where
        S: IssueSubject + ?Sized,
        T: IssueTemplate + ?Sized,
    {
        let mut queries = Vec::with_capacity(self.max_sampled_queries.min(subject.occurrences()));
        let mut backtrace: Option<&[Frame]> = None;
        let mut sample_sql = None;
        for record in subject.members() {
            if sample_sql.is_none() {
                sample_sql = Some(record.sql.as_str());
            }
            if backtrace.is_none() {
                backtrace = record.backtrace.as_deref().filter(|frames| !frames.is_empty());
            }
            if queries.len() < self.max_sampled_queries {
                queries.push(record.clone());
            } else if backtrace.is_some() {
                break;
            }
        }

        let mut context = Context::new();
        subject.describe(&mut context);
        context.extend(extra);

        let facts = Facts {
            occurrences: subject.occurrences(),
            total_time_ms: subject.total_time_ms(),
            severity,
            sample_sql,
            context,
        };

        Issue {
            title: template.title(&facts),
            description: template.description(&facts),
            severity,
            category: template.category(),
            occurrences: facts.occurrences,
            total_time_ms: facts.total_time_ms,
            queries,
            backtrace: backtrace.map(<[Frame]>::to_vec),
            suggestion: template.suggestion(&facts),
        }
    }
}
