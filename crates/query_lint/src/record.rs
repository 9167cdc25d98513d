use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode trace: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One frame of the call stack captured when a query ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// A bound parameter value. Only scalars are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Type-tagged rendering used for by-value parameter comparison.
    /// `1`, `1.0` and `"1"` all render differently.
    pub fn write_canonical(&self, out: &mut String) {
        use std::fmt::Write;

        // Writing into a String cannot fail.
        let _ = match self {
            ParamValue::Null => write!(out, "n:"),
            ParamValue::Bool(value) => write!(out, "b:{value}"),
            ParamValue::Int(value) => write!(out, "i:{value}"),
            ParamValue::Float(value) => write!(out, "f:{:?}", value),
            ParamValue::Text(value) => write!(out, "s:{}:{value}", value.len()),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql: String,
    #[serde(
        default,
        alias = "executionTimeMs",
        alias = "executionMS",
        alias = "execution_ms"
    )]
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParamValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Vec<Frame>>,
}

impl QueryRecord {
    pub fn new(sql: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            sql: sql.into(),
            execution_time_ms: execution_time_ms.max(0.0),
            parameters: None,
            backtrace: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParamValue>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_backtrace(mut self, backtrace: Vec<Frame>) -> Self {
        self.backtrace = Some(backtrace);
        self
    }

    pub fn kind(&self) -> StatementKind {
        StatementKind::of(&self.sql)
    }

    pub fn operation(&self) -> OperationClass {
        self.kind().operation()
    }

    /// Line number of the innermost captured frame, if any.
    pub fn call_site_line(&self) -> Option<u32> {
        self.backtrace
            .as_deref()
            .and_then(|frames| frames.first())
            .map(|frame| frame.line)
    }

    /// Negative, NaN or infinite timings are treated as zero.
    pub fn time_ms(&self) -> f64 {
        if self.execution_time_ms.is_finite() && self.execution_time_ms > 0.0 {
            self.execution_time_ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationClass {
    Read,
    Write,
    Other,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationClass::Read => "READ",
            OperationClass::Write => "WRITE",
            OperationClass::Other => "OTHER",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    pub fn of(sql: &str) -> Self {
        let dialect = GenericDialect {};
        match Tokenizer::new(&dialect, sql).tokenize() {
            Ok(tokens) => kind_from_tokens(&tokens),
            Err(_) => kind_from_leading_word(sql),
        }
    }

    pub fn operation(self) -> OperationClass {
        match self {
            StatementKind::Select => OperationClass::Read,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete => {
                OperationClass::Write
            }
            StatementKind::Other => OperationClass::Other,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Other => "OTHER",
        })
    }
}

fn keyword_kind(word: &str) -> Option<StatementKind> {
    let kind = match word.to_ascii_uppercase().as_str() {
        "SELECT" => StatementKind::Select,
        "INSERT" | "REPLACE" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        _ => return None,
    };
    Some(kind)
}

fn kind_from_tokens(tokens: &[Token]) -> StatementKind {
    let mut words = tokens.iter().filter_map(|token| match token {
        Token::Word(word) => Some(word.value.as_str()),
        _ => None,
    });
    let Some(first) = words.next() else {
        return StatementKind::Other;
    };
    if let Some(kind) = keyword_kind(first) {
        return kind;
    }
    if !first.eq_ignore_ascii_case("WITH") {
        return StatementKind::Other;
    }

    // A CTE takes the kind of the first statement keyword outside its bodies.
    let mut depth = 0usize;
    let mut seen_with = false;
    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(word) if depth == 0 => {
                if !seen_with {
                    seen_with = true;
                    continue;
                }
                if let Some(kind) = keyword_kind(&word.value) {
                    return kind;
                }
            }
            _ => {}
        }
    }
    StatementKind::Other
}

fn kind_from_leading_word(sql: &str) -> StatementKind {
    let word = sql
        .trim_start_matches(|ch: char| !ch.is_ascii_alphabetic())
        .split(|ch: char| !ch.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    keyword_kind(word).unwrap_or(StatementKind::Other)
}

/// The ordered list of queries executed during one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryTrace {
    records: Vec<QueryRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TraceDocument {
    Records(Vec<QueryRecord>),
    Wrapped { queries: Vec<QueryRecord> },
}

impl QueryTrace {
    pub fn new(records: Vec<QueryRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryRecord> {
        self.records.iter()
    }

    /// Accepts either a bare JSON array of records or `{"queries": [...]}`.
    pub fn from_json(contents: &str) -> Result<Self, TraceError> {
        let document: TraceDocument = serde_json::from_str(contents)?;
        let records = match document {
            TraceDocument::Records(records) => records,
            TraceDocument::Wrapped { queries } => queries,
        };
        Ok(Self::new(records))
    }

    /// One statement per line; blank lines and `#` comments are skipped.
    pub fn from_log(contents: &str) -> Self {
        let records = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| QueryRecord::new(line, 0.0))
            .collect();
        Self::new(records)
    }

    pub fn load_json(path: &Path) -> Result<Self, TraceError> {
        Self::from_json(&read(path)?)
    }

    pub fn load_log(path: &Path) -> Result<Self, TraceError> {
        Ok(Self::from_log(&read(path)?))
    }
}

fn read(path: &Path) -> Result<String, TraceError> {
    fs::read_to_string(path).map_err(|source| TraceError::Io {
        path: path.display().to_string(),
        source,
    })
}

impl From<Vec<QueryRecord>> for QueryTrace {
    fn from(records: Vec<QueryRecord>) -> Self {
        Self::new(records)
    }
}

impl FromIterator<QueryRecord> for QueryTrace {
    fn from_iter<I: IntoIterator<Item = QueryRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a QueryTrace {
    type Item = &'a QueryRecord;
    type IntoIter = std::slice::Iter<'a, QueryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_first_keyword() {
        assert_eq!(StatementKind::of("  select 1"), StatementKind::Select);
        assert_eq!(
            StatementKind::of("INSERT INTO users (id) VALUES (1)"),
            StatementKind::Insert
        );
        assert_eq!(StatementKind::of("update users set a = 1"), StatementKind::Update);
        assert_eq!(StatementKind::of("DELETE FROM users"), StatementKind::Delete);
        assert_eq!(StatementKind::of("BEGIN"), StatementKind::Other);
        assert_eq!(StatementKind::of(""), StatementKind::Other);
    }

    #[test]
    fn skips_comments_and_parens_before_keyword() {
        assert_eq!(
            StatementKind::of("/* app:users */ SELECT * FROM users"),
            StatementKind::Select
        );
        assert_eq!(
            StatementKind::of("(SELECT id FROM a) UNION (SELECT id FROM b)"),
            StatementKind::Select
        );
    }

    #[test]
    fn resolves_cte_to_top_level_statement() {
        let sql = "WITH stale AS (SELECT id FROM sessions WHERE seen < 3) \
                   DELETE FROM sessions WHERE id IN (SELECT id FROM stale)";
        assert_eq!(StatementKind::of(sql), StatementKind::Delete);
        assert_eq!(
            StatementKind::of("WITH x AS (SELECT 1) SELECT * FROM x"),
            StatementKind::Select
        );
    }

    #[test]
    fn falls_back_when_tokenizer_rejects_input() {
        assert_eq!(
            StatementKind::of("SELECT * FROM users WHERE name = 'unterminated"),
            StatementKind::Select
        );
    }

    #[test]
    fn operation_classes() {
        assert_eq!(QueryRecord::new("SELECT 1", 0.0).operation(), OperationClass::Read);
        assert_eq!(
            QueryRecord::new("delete from t", 0.0).operation(),
            OperationClass::Write
        );
        assert_eq!(QueryRecord::new("COMMIT", 0.0).operation(), OperationClass::Other);
    }

    #[test]
    fn parses_json_trace_with_optional_fields() {
        let json = r#"{"queries": [
            {"sql": "SELECT * FROM users WHERE id = ?", "execution_time_ms": 1.5,
             "parameters": [1, "fr", null, true, 2.5],
             "backtrace": [{"file": "src/Controller.php", "line": 42, "function": "show"}]},
            {"sql": "SELECT 1"},
            {"sql": "SELECT 2", "executionTimeMs": 250.0}
        ]}"#;
        let trace = QueryTrace::from_json(json).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.records()[2].execution_time_ms, 250.0);

        let first = &trace.records()[0];
        assert_eq!(
            first.parameters.as_deref(),
            Some(
                &[
                    ParamValue::Int(1),
                    ParamValue::Text("fr".to_string()),
                    ParamValue::Null,
                    ParamValue::Bool(true),
                    ParamValue::Float(2.5),
                ][..]
            )
        );
        assert_eq!(first.call_site_line(), Some(42));
        assert!(trace.records()[1].parameters.is_none());
        assert!(trace.records()[1].backtrace.is_none());
    }

    #[test]
    fn parses_plain_log() {
        let log = "\n# captured\nSELECT 1;\n\n  SELECT 2;  \n";
        let trace = QueryTrace::from_log(log);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.records()[1].sql, "SELECT 2;");
    }

    #[test]
    fn canonical_params_distinguish_types() {
        let render = |value: ParamValue| {
            let mut out = String::new();
            value.write_canonical(&mut out);
            out
        };
        assert_ne!(render(ParamValue::Int(1)), render(ParamValue::Text("1".into())));
        assert_ne!(render(ParamValue::Int(1)), render(ParamValue::Float(1.0)));
        assert_eq!(render(ParamValue::Int(7)), render(ParamValue::Int(7)));
    }

    #[test]
    fn negative_time_is_clamped() {
        let mut record = QueryRecord::new("SELECT 1", 3.0);
        record.execution_time_ms = -4.0;
        assert_eq!(record.time_ms(), 0.0);
    }
}
