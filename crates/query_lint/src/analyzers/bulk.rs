use crate::analyzers::{first_sql, Analyzer, IssueIter};
use crate::clause::extract_table_name;
use crate::config::{ConfigError, EngineConfig};
use crate::index::index;
use crate::issue::{Context, Facts, IssueAssembler, IssueCategory, IssueTemplate, Suggestion};
use crate::record::{OperationClass, QueryTrace, StatementKind};

pub struct BulkOperationAnalyzer {
    config: EngineConfig,
    assembler: IssueAssembler,
}

impl BulkOperationAnalyzer {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            assembler: IssueAssembler::new(config.max_sampled_queries),
            config,
        })
    }
}

fn verb(kind: StatementKind) -> &'static str {
    match kind {
        StatementKind::Insert => "INSERT",
        StatementKind::Update => "UPDATE",
        StatementKind::Delete => "DELETE",
        StatementKind::Select | StatementKind::Other => "write",
    }
}

impl Analyzer for BulkOperationAnalyzer {
    fn name(&self) -> &'static str {
        "bulk_operation"
    }

    fn analyze<'a>(&'a self, trace: &'a QueryTrace) -> IssueIter<'a> {
        let writes = trace
            .iter()
            .filter(|record| record.operation() == OperationClass::Write);
        let buckets = index(writes, self.config.mode);

        Box::new(buckets.into_iter().filter_map(move |bucket| {
            let sql = first_sql(&bucket);
            let mut extra = Context::new();
            extra.insert(
                "operation".to_string(),
                verb(StatementKind::of(sql)).into(),
            );
            if let Some(table) = extract_table_name(sql) {
                extra.insert("table".to_string(), table.into());
            }
            self.assembler
                .assemble(&bucket, self, &self.config.tiers, extra)
        }))
    }
}

impl IssueTemplate for BulkOperationAnalyzer {
    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn title(&self, facts: &Facts<'_>) -> String {
        let operation = facts.get_str("operation").unwrap_or("write");
        match facts.get_str("table") {
            Some(table) => format!(
                "{operation} on {table} executed {} times individually",
                facts.occurrences
            ),
            None => format!("{operation} executed {} times individually", facts.occurrences),
        }
    }

    fn description(&self, facts: &Facts<'_>) -> String {
        format!(
            "{} single-row {} statements of the same shape took {:.2}ms in total. \
             Each one is a separate round trip to the database.",
            facts.occurrences,
            facts.get_str("operation").unwrap_or("write"),
            facts.total_time_ms
        )
    }

    fn suggestion(&self, facts: &Facts<'_>) -> Option<Suggestion> {
        let description = match facts.get_str("operation") {
            Some("INSERT") => "Insert all rows with one multi-row INSERT",
            Some("DELETE") => "Delete the rows with one DELETE ... WHERE id IN (...)",
            _ => "Apply the change with one set-based statement",
        };
        Some(Suggestion::new("bulk_operation", description, "bulk_operation.md").with_facts(facts))
    }
}
