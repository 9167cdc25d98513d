use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use query_lint::{clause, Config, Issue, QueryTrace, Severity};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qlint")]
#[command(about = "Detect database anti-patterns in captured query traces.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the analyzers over a trace file
    Analyze {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Trace encoding; inferred from the file extension when omitted
        #[arg(long, value_enum)]
        input: Option<Input>,
        /// TOML file overriding the default thresholds
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_sampled: Option<usize>,
        /// Run only the named analyzer (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,
        /// Exit with status 2 when an issue at or above this severity is found
        #[arg(long, value_parser = parse_severity)]
        fail_on: Option<Severity>,
    },
    /// Print the normalized shape of a statement
    Normalize { sql: String },
    /// Print the clauses extracted from a statement
    Inspect { sql: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Input {
    Json,
    Log,
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    Severity::parse(value).ok_or_else(|| format!("unknown severity: {value}"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QLINT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("qlint=info,query_lint=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze {
            path,
            format,
            input,
            config,
            max_sampled,
            only,
            fail_on,
        } => {
            let mut config = match config {
                Some(config_path) => Config::load(&config_path)
                    .with_context(|| format!("invalid config {}", config_path.display()))?,
                None => Config::default(),
            };
            if let Some(max_sampled) = max_sampled {
                config.max_sampled_queries = max_sampled;
            }

            let trace = load_trace(&path, input)?;
            tracing::info!(path = %path.display(), records = trace.len(), "trace loaded");

            let mut analyzers = query_lint::AnalyzerSet::from_config(&config)?;
            for name in &only {
                if !analyzers.names().contains(&name.as_str()) {
                    anyhow::bail!(
                        "unknown or disabled analyzer: {name} (available: {})",
                        analyzers.names().join(", ")
                    );
                }
            }
            analyzers.retain_named(&only);

            let mut issues: Vec<Issue> = analyzers.analyze(&trace).collect();
            issues.sort_by(|a, b| b.severity.cmp(&a.severity));

            match format {
                Format::Text => print_text(&issues, trace.len()),
                Format::Json => println!("{}", serde_json::to_string_pretty(&issues)?),
            }

            let failed = fail_on
                .is_some_and(|threshold| issues.iter().any(|issue| issue.severity >= threshold));
            if failed {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Normalize { sql } => {
            println!("{}", query_lint::normalize(&sql));
        }
        Command::Inspect { sql } => print_inspection(&sql),
    }

    Ok(ExitCode::SUCCESS)
}

fn load_trace(path: &Path, input: Option<Input>) -> anyhow::Result<QueryTrace> {
    let input = input.unwrap_or_else(|| {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Input::Json
        } else {
            Input::Log
        }
    });
    let trace = match input {
        Input::Json => QueryTrace::load_json(path),
        Input::Log => QueryTrace::load_log(path),
    };
    trace.with_context(|| format!("failed to load trace {}", path.display()))
}

fn print_text(issues: &[Issue], records: usize) {
    if issues.is_empty() {
        println!("OK: No issues found in {records} queries.");
        return;
    }

    for issue in issues {
        println!(
            "{}: {}",
            issue.severity.as_str().to_ascii_uppercase(),
            issue.title
        );
        println!("  {}", issue.description);
        if let Some(frame) = issue.backtrace.as_ref().and_then(|frames| frames.first()) {
            match &frame.function {
                Some(function) => println!("  AT: {}:{} ({function})", frame.file, frame.line),
                None => println!("  AT: {}:{}", frame.file, frame.line),
            }
        }
        if let Some(query) = issue.queries.first() {
            println!("  SQL: {}", query.sql);
        }
        if let Some(suggestion) = &issue.suggestion {
            println!("  SUGGESTION: {}", suggestion.description);
        }
    }
}

fn print_inspection(sql: &str) {
    let kind = query_lint::StatementKind::of(sql);
    println!("KIND: {kind}");
    println!("OPERATION: {}", kind.operation());
    println!("SHAPE: {}", query_lint::normalize(sql));
    if let Some(table) = clause::extract_table_name(sql) {
        println!("TABLE: {table}");
    }
    println!("JOINS: {}", clause::count_joins(sql));
    if let Some(where_clause) = clause::extract_where(sql) {
        println!("WHERE: {where_clause}");
    }
    if let Some(order_by) = clause::extract_order_by(sql) {
        println!("ORDER BY: {order_by}");
    }
    match clause::extract_limit(sql) {
        Some(limit) => match limit.offset {
            Some(offset) => println!("LIMIT: {} OFFSET {offset}", limit.row_count),
            None => println!("LIMIT: {}", limit.row_count),
        },
        None if clause::has_limit(sql) => println!("LIMIT: bound"),
        None => {}
    }
    for comparison in clause::find_null_misuse(sql) {
        println!(
            "NULL COMPARISON: {} {} NULL (use {})",
            comparison.field,
            comparison.operator,
            comparison.operator.replacement()
        );
    }
    for field in clause::find_empty_in_clause(sql) {
        println!("EMPTY IN: {field}");
    }
}
