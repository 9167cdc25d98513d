//! Gap-tolerant sequential run detection.
//!
//! A boundary is a start record followed, later in the trace, by an end
//! record. Boundaries close together form a region; two consecutive
//! boundaries separated by more than `max_gap` records belong to different
//! regions. The scan is a single forward pass and never revisits an index.

use serde::Serialize;

use crate::config::{ConfigError, ScanConfig};
use crate::issue::{Context, IssueSubject};
use crate::record::{QueryRecord, StatementKind};

/// One matched start/end pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Boundary {
    pub start: usize,
    pub end: usize,
    /// Records between `start` and `end` that matched neither predicate.
    pub gap: usize,
}

/// A contiguous region of boundaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub start_index: usize,
    pub end_index: usize,
    pub matched_boundary_count: usize,
    /// Some boundary's internal gap exceeded `max_gap`.
    pub gaps_exceeded: bool,
    /// Share of boundaries whose internal gap is within `max_gap`.
    pub proximity_ratio: f64,
    /// Non-boundary records in the region per boundary.
    pub avg_operations_between: f64,
    pub boundaries: Vec<Boundary>,
}

impl Run {
    /// Records from the first boundary start to the last boundary end.
    pub fn span<'a>(&self, records: &'a [QueryRecord]) -> &'a [QueryRecord] {
        let end = (self.end_index + 1).min(records.len());
        records.get(self.start_index..end).unwrap_or_default()
    }

    /// The record opening each boundary.
    pub fn start_records<'a>(
        &'a self,
        records: &'a [QueryRecord],
    ) -> impl Iterator<Item = &'a QueryRecord> + 'a {
        self.boundaries
            .iter()
            .filter_map(move |boundary| records.get(boundary.start))
    }
}

struct Pending<'a> {
    /// Start index of each iteration and the gap count when it began.
    iterations: Vec<(usize, usize)>,
    last_sql: &'a str,
    last_line: Option<u32>,
    gap: usize,
}

impl<'a> Pending<'a> {
    fn open(index: usize, record: &'a QueryRecord) -> Self {
        Self {
            iterations: vec![(index, 0)],
            last_sql: &record.sql,
            last_line: record.call_site_line(),
            gap: 0,
        }
    }

    /// One boundary per iteration, all ending at the read at `end`. Each
    /// iteration's gap covers the records up to the next iteration.
    fn close(self, end: usize, builder: &mut RegionBuilder) {
        let mut iterations = self.iterations.iter().peekable();
        while let Some(&(start, gap_before)) = iterations.next() {
            let gap_after = iterations.peek().map_or(self.gap, |next| next.1);
            builder.close(Boundary {
                start,
                end,
                gap: gap_after - gap_before,
            });
        }
    }
}

struct Region {
    boundaries: Vec<Boundary>,
    within_gap: usize,
    intervening: usize,
}

impl Region {
    fn into_run(self) -> Option<Run> {
        let first = self.boundaries.first()?;
        let last = self.boundaries.last()?;
        let count = self.boundaries.len();
        Some(Run {
            start_index: first.start,
            end_index: last.end,
            matched_boundary_count: count,
            gaps_exceeded: self.within_gap < count,
            proximity_ratio: self.within_gap as f64 / count as f64,
            avg_operations_between: self.intervening as f64 / count as f64,
            boundaries: self.boundaries,
        })
    }
}

struct RegionBuilder {
    max_gap: usize,
    current: Option<Region>,
    last_end: Option<usize>,
    runs: Vec<Run>,
}

impl RegionBuilder {
    fn close(&mut self, boundary: Boundary) {
        let between = self
            .last_end
            .map_or(0, |end| boundary.start.saturating_sub(end + 1));
        if between > self.max_gap {
            self.flush();
        }

        let max_gap = self.max_gap;
        let region = self.current.get_or_insert_with(|| Region {
            boundaries: Vec::new(),
            within_gap: 0,
            intervening: 0,
        });
        if !region.boundaries.is_empty() {
            region.intervening += between;
        }
        region.intervening += boundary.gap;
        if boundary.gap <= max_gap {
            region.within_gap += 1;
        }
        region.boundaries.push(boundary);
        self.last_end = Some(boundary.end);
    }

    fn flush(&mut self) {
        if let Some(run) = self.current.take().and_then(Region::into_run) {
            self.runs.push(run);
        }
    }

    fn finish(mut self) -> Vec<Run> {
        self.flush();
        self.runs
    }
}

/// Finds every boundary region in `records`, qualifying or not.
///
/// Consecutive start records form one iteration body, except that a start
/// repeating the previous start's SQL from a different source line begins
/// a new iteration. Iterations only become boundaries once an end record
/// follows; starts with no later end are dropped.
pub fn scan_boundaries<S, E>(
    records: &[QueryRecord],
    mut is_start: S,
    mut is_end: E,
    max_gap: usize,
) -> Vec<Run>
where
    S: FnMut(&QueryRecord) -> bool,
    E: FnMut(&QueryRecord) -> bool,
{
    let mut builder = RegionBuilder {
        max_gap,
        current: None,
        last_end: None,
        runs: Vec::new(),
    };
    let mut pending: Option<Pending<'_>> = None;

    for (index, record) in records.iter().enumerate() {
        if is_start(record) {
            match pending.as_mut() {
                None => pending = Some(Pending::open(index, record)),
                Some(open) => {
                    let line = record.call_site_line();
                    let new_call_site = open.last_sql == record.sql
                        && matches!((open.last_line, line), (Some(a), Some(b)) if a != b);
                    if new_call_site {
                        open.iterations.push((index, open.gap));
                    }
                    open.last_sql = &record.sql;
                    open.last_line = line;
                }
            }
        } else if is_end(record) {
            if let Some(open) = pending.take() {
                open.close(index, &mut builder);
            }
        } else if let Some(open) = pending.as_mut() {
            open.gap += 1;
        }
    }

    builder.finish()
}

/// INSERT or UPDATE: a write an ORM flush pushes out. DELETE is excluded;
/// delete-then-verify is a legitimate pattern.
pub fn is_flush_write(record: &QueryRecord) -> bool {
    matches!(record.kind(), StatementKind::Insert | StatementKind::Update)
}

pub fn is_read(record: &QueryRecord) -> bool {
    record.kind() == StatementKind::Select
}

/// Applies the reportability criteria of a [`ScanConfig`] to boundary regions.
#[derive(Debug, Clone, Copy)]
pub struct SequentialScanner {
    config: ScanConfig,
}

impl SequentialScanner {
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Regions that meet the minimum boundary count, the proximity ratio, and
    /// the average-spacing ceiling.
    pub fn scan<S, E>(&self, records: &[QueryRecord], is_start: S, is_end: E) -> Vec<Run>
    where
        S: FnMut(&QueryRecord) -> bool,
        E: FnMut(&QueryRecord) -> bool,
    {
        scan_boundaries(records, is_start, is_end, self.config.max_gap)
            .into_iter()
            .filter(|run| self.qualifies(run))
            .collect()
    }

    /// Write→read flush boundaries.
    pub fn scan_flushes(&self, records: &[QueryRecord]) -> Vec<Run> {
        self.scan(records, is_flush_write, is_read)
    }

    pub fn qualifies(&self, run: &Run) -> bool {
        let config = &self.config;
        if run.matched_boundary_count < config.min_boundary_count {
            tracing::trace!(
                start = run.start_index,
                boundaries = run.matched_boundary_count,
                "region rejected: too few boundaries"
            );
            return false;
        }
        if run.proximity_ratio < config.min_proximity_ratio {
            tracing::trace!(
                start = run.start_index,
                ratio = run.proximity_ratio,
                "region rejected: boundaries too sparse"
            );
            return false;
        }
        if run.avg_operations_between > config.max_avg_operations_between as f64 {
            tracing::trace!(
                start = run.start_index,
                avg = run.avg_operations_between,
                "region rejected: too many operations between boundaries"
            );
            return false;
        }
        true
    }
}

/// A run bound to the trace it was found in.
#[derive(Debug, Clone, Copy)]
pub struct RunSubject<'a> {
    pub run: &'a Run,
    pub records: &'a [QueryRecord],
}

impl IssueSubject for RunSubject<'_> {
    fn occurrences(&self) -> usize {
        self.run.matched_boundary_count
    }

    fn members(&self) -> impl Iterator<Item = &QueryRecord> + '_ {
        self.run.start_records(self.records)
    }

    fn total_time_ms(&self) -> f64 {
        self.run.span(self.records).iter().map(QueryRecord::time_ms).sum()
    }

    fn describe(&self, context: &mut Context) {
        let run = self.run;
        context.insert("boundary_count".to_string(), run.matched_boundary_count.into());
        context.insert("start_index".to_string(), run.start_index.into());
        context.insert("end_index".to_string(), run.end_index.into());
        context.insert("proximity_ratio".to_string(), run.proximity_ratio.into());
        context.insert(
            "avg_operations_between".to_string(),
            run.avg_operations_between.into(),
        );
        context.insert("gaps_exceeded".to_string(), run.gaps_exceeded.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Frame;

    fn insert(i: usize) -> QueryRecord {
        QueryRecord::new(format!("INSERT INTO log (n) VALUES ({i})"), 1.0)
    }

    fn select() -> QueryRecord {
        QueryRecord::new("SELECT * FROM counters WHERE id = 1", 1.0)
    }

    fn other() -> QueryRecord {
        QueryRecord::new("SAVEPOINT sp", 0.0)
    }

    fn pairs(n: usize, filler_inside: usize, filler_between: usize) -> Vec<QueryRecord> {
        let mut records = Vec::new();
        for i in 0..n {
            records.push(insert(i));
            records.extend((0..filler_inside).map(|_| other()));
            records.push(select());
            records.extend((0..filler_between).map(|_| other()));
        }
        records
    }

    fn scanner() -> SequentialScanner {
        SequentialScanner::new(ScanConfig::default()).unwrap()
    }

    #[test]
    fn four_pairs_are_below_minimum() {
        assert!(scanner().scan_flushes(&pairs(4, 1, 1)).is_empty());
    }

    #[test]
    fn five_close_pairs_form_one_run() {
        let records = pairs(5, 2, 3);
        let runs = scanner().scan_flushes(&records);
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.matched_boundary_count, 5);
        assert_eq!(run.start_index, 0);
        assert_eq!(run.end_index, records.len() - 4);
        assert!(!run.gaps_exceeded);
        assert_eq!(run.proximity_ratio, 1.0);
        assert_eq!(run.avg_operations_between, (5.0 * 2.0 + 4.0 * 3.0) / 5.0);
        assert_eq!(run.start_records(&records).count(), 5);
    }

    #[test]
    fn widely_separated_pairs_do_not_form_a_run() {
        let records = pairs(6, 0, 15);
        assert!(scanner().scan_flushes(&records).is_empty());

        let regions = scan_boundaries(&records, is_flush_write, is_read, 10);
        assert_eq!(regions.len(), 6);
        assert!(regions.iter().all(|run| run.matched_boundary_count == 1));
    }

    #[test]
    fn delete_then_select_is_not_a_flush() {
        let mut records = Vec::new();
        for i in 0..8 {
            records.push(QueryRecord::new(format!("DELETE FROM t WHERE id = {i}"), 0.0));
            records.push(select());
        }
        assert!(scan_boundaries(&records, is_flush_write, is_read, 10).is_empty());
    }

    #[test]
    fn update_counts_as_flush_write() {
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(QueryRecord::new(format!("UPDATE t SET n = {i} WHERE id = 1"), 0.0));
            records.push(select());
        }
        assert_eq!(scanner().scan_flushes(&records).len(), 1);
    }

    #[test]
    fn sparse_pairs_fail_proximity_ratio() {
        // Alternating close and far pairs: half of the gaps exceed max_gap.
        let mut records = Vec::new();
        for i in 0..10 {
            records.push(insert(i));
            let inside = if i % 2 == 0 { 0 } else { 12 };
            records.extend((0..inside).map(|_| other()));
            records.push(select());
        }
        let regions = scan_boundaries(&records, is_flush_write, is_read, 10);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].gaps_exceeded);
        assert_eq!(regions[0].proximity_ratio, 0.5);
        assert!(scanner().scan_flushes(&records).is_empty());
    }

    #[test]
    fn dense_average_ceiling_rejects_busy_regions() {
        let config = ScanConfig {
            max_gap: 20,
            max_avg_operations_between: 4,
            ..ScanConfig::default()
        };
        let strict = SequentialScanner::new(config).unwrap();
        assert!(strict.scan_flushes(&pairs(6, 3, 3)).is_empty());
        assert_eq!(strict.scan_flushes(&pairs(6, 1, 1)).len(), 1);
    }

    #[test]
    fn consecutive_writes_share_one_iteration() {
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(insert(i));
            records.push(QueryRecord::new(format!("UPDATE totals SET n = {i}"), 0.0));
            records.push(select());
        }
        let runs = scanner().scan_flushes(&records);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].matched_boundary_count, 5);
    }

    #[test]
    fn same_sql_from_new_line_is_a_new_iteration() {
        let at = |line| {
            QueryRecord::new("INSERT INTO audit (msg) VALUES ('tick')", 0.0).with_backtrace(vec![
                Frame {
                    file: "src/Job.php".to_string(),
                    line,
                    class: Some("Job".to_string()),
                    function: Some("run".to_string()),
                },
            ])
        };

        let same_line: Vec<_> = (0..5).map(|_| at(10)).chain([select()]).collect();
        let regions = scan_boundaries(&same_line, is_flush_write, is_read, 10);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].matched_boundary_count, 1);

        let new_lines: Vec<_> = (0..5).map(|i| at(10 + i)).chain([select()]).collect();
        let regions = scan_boundaries(&new_lines, is_flush_write, is_read, 10);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].matched_boundary_count, 5);
        assert_eq!(regions[0].boundaries[0], Boundary { start: 0, end: 5, gap: 0 });
        assert_eq!(regions[0].end_index, 5);
    }

    #[test]
    fn new_call_sites_without_a_read_are_not_boundaries() {
        let writes: Vec<_> = (0..7)
            .map(|i| {
                QueryRecord::new("INSERT INTO audit (msg) VALUES ('tick')", 0.0).with_backtrace(
                    vec![Frame {
                        file: "src/Job.php".to_string(),
                        line: 10 + i,
                        class: None,
                        function: Some("run".to_string()),
                    }],
                )
            })
            .collect();
        assert!(scan_boundaries(&writes, is_flush_write, is_read, 10).is_empty());
        assert!(scanner().scan_flushes(&writes).is_empty());
    }

    #[test]
    fn trailing_write_without_read_is_ignored() {
        let mut records = pairs(5, 0, 0);
        records.push(insert(99));
        let runs = scanner().scan_flushes(&records);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].end_index, 9);
    }

    #[test]
    fn run_subject_reports_boundary_facts() {
        let records = pairs(5, 0, 0);
        let runs = scanner().scan_flushes(&records);
        let subject = RunSubject {
            run: &runs[0],
            records: &records,
        };
        assert_eq!(subject.occurrences(), 5);
        assert_eq!(subject.total_time_ms(), 10.0);
        let mut context = Context::new();
        subject.describe(&mut context);
        assert_eq!(context["boundary_count"], 5);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ScanConfig {
            min_boundary_count: 0,
            ..ScanConfig::default()
        };
        assert!(SequentialScanner::new(config).is_err());
    }
}
