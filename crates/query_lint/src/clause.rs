//! Extractors run over a copy of the statement with literals and comments
//! blanked to spaces, so offsets match the original text.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::record::StatementKind;

static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?:inner|cross|natural|(?:left|right|full)(?:\s+outer)?)\s+)?join\b")
        .expect("static regex")
});

static LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\blimit\s+(\d+)(?:\s*,\s*(\d+)|\s+offset\s+(\d+))?").expect("static regex")
});

static OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\boffset\s+(\d+)").expect("static regex"));

static ANY_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\blimit\s+\S|\btop\s*\(?\s*[\d?:@$]|\bfetch\s+(?:first|next)\b")
        .expect("static regex")
});

static ORDER_BY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\border\s+by\b").expect("static regex"));

static WHERE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwhere\b").expect("static regex"));

static NULL_MISUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([\w.`"\[\]]+)\s*(!=|<>|=)\s*null\b"#).expect("static regex")
});

static EMPTY_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([\w.`"\[\]]+)\s+(?:not\s+)?in\s*\(\s*\)"#).expect("static regex")
});

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:delete\s+from|from|into|update)\s+([\w.`"\[\]]+)"#)
        .expect("static regex")
});

/// Keywords that end an `ORDER BY` or `WHERE` clause at the same nesting level.
const ORDER_BY_TERMINATORS: &[&str] = &[
    "limit", "offset", "fetch", "for", "union", "intersect", "except", "lock", "into",
];
const WHERE_TERMINATORS: &[&str] = &[
    "group", "having", "order", "limit", "offset", "fetch", "for", "union", "intersect",
    "except", "window", "returning", "lock",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitClause {
    pub row_count: u64,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NullOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<>")]
    Diamond,
}

impl NullOperator {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(NullOperator::Eq),
            "!=" => Some(NullOperator::NotEq),
            "<>" => Some(NullOperator::Diamond),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NullOperator::Eq => "=",
            NullOperator::NotEq => "!=",
            NullOperator::Diamond => "<>",
        }
    }

    /// The `IS [NOT] NULL` form that should have been written.
    pub fn replacement(self) -> &'static str {
        match self {
            NullOperator::Eq => "IS NULL",
            NullOperator::NotEq | NullOperator::Diamond => "IS NOT NULL",
        }
    }
}

impl fmt::Display for NullOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NullComparison {
    pub operator: NullOperator,
    pub field: String,
}

/// Counts JOINs, each once regardless of its join-kind keywords.
pub fn count_joins(sql: &str) -> usize {
    JOIN_RE.find_iter(&mask_literals(sql)).count()
}

/// Extracts the last `LIMIT` of the statement. Understands `LIMIT n`,
/// `LIMIT n OFFSET m`, MySQL's `LIMIT m, n` (second number is the row
/// count), and a separate `OFFSET m` clause.
pub fn extract_limit(sql: &str) -> Option<LimitClause> {
    let masked = mask_literals(sql);
    let caps = LIMIT_RE.captures_iter(&masked).last()?;
    let first = caps.get(1)?.as_str().parse::<u64>().ok()?;

    if let Some(count) = caps.get(2) {
        return Some(LimitClause {
            row_count: count.as_str().parse().ok()?,
            offset: Some(first),
        });
    }

    let offset = match caps.get(3) {
        Some(offset) => offset.as_str().parse().ok(),
        None => OFFSET_RE
            .captures_iter(&masked)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|offset| offset.as_str().parse().ok()),
    };
    Some(LimitClause {
        row_count: first,
        offset,
    })
}

/// Numeric offset of the statement, with or without a `LIMIT`.
pub fn extract_offset(sql: &str) -> Option<u64> {
    if let Some(limit) = extract_limit(sql) {
        return limit.offset;
    }
    OFFSET_RE
        .captures_iter(&mask_literals(sql))
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|offset| offset.as_str().parse().ok())
}

/// Whether the statement bounds its row count in any form: a numeric or
/// bound `LIMIT`, `TOP`, or `FETCH FIRST/NEXT`.
pub fn has_limit(sql: &str) -> bool {
    ANY_LIMIT_RE.is_match(&mask_literals(sql))
}

/// Text of the outermost `ORDER BY` clause, as written.
pub fn extract_order_by(sql: &str) -> Option<String> {
    let masked = mask_literals(sql);
    let (start, end) = outermost_clause(&masked, &ORDER_BY_RE, ORDER_BY_TERMINATORS)?;
    let clause = sql.get(start..end)?.trim();
    (!clause.is_empty()).then(|| clause.to_string())
}

/// Text of the outermost `WHERE` clause, as written.
pub fn extract_where(sql: &str) -> Option<String> {
    let masked = mask_literals(sql);
    let (start, end) = outermost_clause(&masked, &WHERE_RE, WHERE_TERMINATORS)?;
    let clause = sql.get(start..end)?.trim();
    (!clause.is_empty()).then(|| clause.to_string())
}

/// Finds `field = NULL`, `field != NULL` and `field <> NULL`. `IS [NOT] NULL`
/// is never matched, and assignments in an `UPDATE ... SET` list are skipped.
pub fn find_null_misuse(sql: &str) -> Vec<NullComparison> {
    let masked = mask_literals(sql);
    let from = if StatementKind::of(sql) == StatementKind::Update {
        let depths = paren_depths(&masked);
        let outer_where = WHERE_RE
            .find_iter(&masked)
            .find(|found| depths.get(found.start()).copied() == Some(0));
        match outer_where {
            Some(found) => found.end(),
            None => return Vec::new(),
        }
    } else {
        0
    };

    NULL_MISUSE_RE
        .captures_iter(&masked[from..])
        .filter_map(|caps| {
            let field = caps.get(1)?;
            if field.as_str().eq_ignore_ascii_case("is") || field.as_str().eq_ignore_ascii_case("not")
            {
                return None;
            }
            let operator = NullOperator::parse(caps.get(2)?.as_str())?;
            let field = sql.get(from + field.start()..from + field.end())?;
            Some(NullComparison {
                operator,
                field: field.to_string(),
            })
        })
        .collect()
}

/// Fields compared against an empty list: `field IN ()` / `field NOT IN ( )`.
pub fn find_empty_in_clause(sql: &str) -> Vec<String> {
    let masked = mask_literals(sql);
    EMPTY_IN_RE
        .captures_iter(&masked)
        .filter_map(|caps| {
            let field = caps.get(1)?;
            sql.get(field.start()..field.end()).map(str::to_string)
        })
        .collect()
}

/// The table following `FROM`, `INTO`, `UPDATE` or `DELETE FROM`, with
/// identifier quoting removed. Aliases are not part of the result.
pub fn extract_table_name(sql: &str) -> Option<String> {
    let masked = mask_literals(sql);
    let depths = paren_depths(&masked);
    let caps = TABLE_RE
        .captures_iter(&masked)
        .find(|caps| caps.get(0).is_some_and(|m| depths.get(m.start()).copied() == Some(0)))
        .or_else(|| TABLE_RE.captures(&masked))?;
    let name = caps.get(1)?;
    let name = sql.get(name.start()..name.end())?;
    let name: String = name
        .chars()
        .filter(|ch| !matches!(ch, '`' | '"' | '[' | ']'))
        .collect();
    (!name.is_empty()).then_some(name)
}

/// Span of the clause body introduced by the last depth-zero match of
/// `opener`, ending at a terminator keyword at the same depth, an unbalanced
/// `)`, a `;`, or end of input.
fn outermost_clause(masked: &str, opener: &Regex, terminators: &[&str]) -> Option<(usize, usize)> {
    let depths = paren_depths(masked);
    let found = opener
        .find_iter(masked)
        .filter(|found| depths.get(found.start()).copied() == Some(0))
        .last()
        .or_else(|| opener.find_iter(masked).last())?;

    let start = found.end();
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                if depth == 0 {
                    return Some((start, i));
                }
                depth -= 1;
            }
            b';' if depth == 0 => return Some((start, i)),
            b if depth == 0 && b.is_ascii_alphabetic() && is_word_boundary(bytes, i) => {
                let word_end = bytes[i..]
                    .iter()
                    .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                    .map_or(bytes.len(), |len| i + len);
                let word = &masked[i..word_end];
                if terminators.iter().any(|t| word.eq_ignore_ascii_case(t)) {
                    return Some((start, i));
                }
                i = word_end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    Some((start, bytes.len()))
}

fn is_word_boundary(bytes: &[u8], i: usize) -> bool {
    i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_')
}

/// Parenthesis depth at every byte offset.
fn paren_depths(masked: &str) -> Vec<usize> {
    let mut depth = 0usize;
    masked
        .bytes()
        .map(|b| match b {
            b'(' => {
                let at = depth;
                depth += 1;
                at
            }
            b')' => {
                depth = depth.saturating_sub(1);
                depth
            }
            _ => depth,
        })
        .collect()
}

/// Blanks out the contents of single-quoted literals and comments with
/// spaces, keeping every other byte (and therefore every offset) intact.
/// Unterminated literals and comments run to the end of input.
pub(crate) fn mask_literals(sql: &str) -> Cow<'_, str> {
    if !sql.contains(['\'', '-', '/']) {
        return Cow::Borrowed(sql);
    }

    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        match ch {
            '\'' => {
                out.push('\'');
                while let Some((_, next)) = chars.next() {
                    if next == '\'' {
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                            out.push_str("  ");
                            continue;
                        }
                        out.push('\'');
                        break;
                    }
                    blank(&mut out, next);
                }
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                out.push(' ');
                for (_, next) in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                    blank(&mut out, next);
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                out.push(' ');
                let mut prev = '\0';
                for (_, next) in chars.by_ref() {
                    blank(&mut out, next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Replaces `ch` with as many spaces as it has UTF-8 bytes.
fn blank(out: &mut String, ch: char) {
    for _ in 0..ch.len_utf8() {
        out.push(' ');
    }
}
