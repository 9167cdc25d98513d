//! A small lexer, not a parser. Rendering re-lexes to the same tokens, so
//! normalization is idempotent.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use serde::Serialize;

/// Literal-stripped signature of a SQL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NormalizedShape(String);

impl NormalizedShape {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedShape {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

const PLACEHOLDER: &str = "?";
const OPERATOR_CHARS: &str = "<>=!|&+-*/%~^@#:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Literal,
    /// A bind placeholder: `?`, `?1`, `$1` or `:name`.
    Param,
    Open,
    Close,
    Comma,
    Dot,
    Semi,
    Op(String),
}

impl Tok {
    fn is_value(&self) -> bool {
        matches!(self, Tok::Word(_) | Tok::Literal | Tok::Param | Tok::Close)
    }
}

/// Normalizes `sql` into its shape. Never fails; malformed quoting is
/// consumed to the end of input and treated as a literal.
pub fn normalize(sql: &str) -> NormalizedShape {
    let mut tokens = lex(sql);
    while tokens.last() == Some(&Tok::Semi) {
        tokens.pop();
    }
    let tokens = collapse_in_lists(tokens);
    NormalizedShape(render(&tokens))
}

/// Whether `sql` carries bind placeholders whose values are not in the text.
pub fn has_placeholder(sql: &str) -> bool {
    lex(sql).contains(&Tok::Param)
}

fn lex(sql: &str) -> Vec<Tok> {
    let mut out: Vec<Tok> = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_whitespace() {
            continue;
        }

        if ch == '-' && chars.peek() == Some(&'-') {
            for next in chars.by_ref() {
                if next == '\n' {
                    break;
                }
            }
            continue;
        }

        if ch == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for next in chars.by_ref() {
                if prev == '*' && next == '/' {
                    break;
                }
                prev = next;
            }
            continue;
        }

        if ch == '\'' {
            skip_quoted(&mut chars, '\'');
            out.push(Tok::Literal);
            continue;
        }

        if ch == '"' || ch == '`' {
            let mut ident = String::from(ch);
            take_quoted(&mut chars, ch, &mut ident);
            out.push(Tok::Word(ident));
            continue;
        }

        if ch.is_ascii_digit() {
            skip_number(&mut chars);
            out.push(Tok::Literal);
            continue;
        }

        if ch == '-'
            && matches!(chars.peek(), Some(peek) if peek.is_ascii_digit())
            && !out.last().is_some_and(Tok::is_value)
        {
            skip_number(&mut chars);
            out.push(Tok::Literal);
            continue;
        }

        if ch == '?' {
            while matches!(chars.peek(), Some(peek) if peek.is_ascii_digit()) {
                chars.next();
            }
            out.push(Tok::Param);
            continue;
        }

        if ch == '$' && matches!(chars.peek(), Some(peek) if peek.is_ascii_digit()) {
            while matches!(chars.peek(), Some(peek) if peek.is_ascii_digit()) {
                chars.next();
            }
            out.push(Tok::Param);
            continue;
        }

        if ch == ':' && chars.peek() == Some(&':') {
            chars.next();
            out.push(Tok::Op("::".to_string()));
            continue;
        }

        if ch == ':' && matches!(chars.peek(), Some(peek) if is_word_start(*peek)) {
            while matches!(chars.peek(), Some(peek) if is_word_char(*peek)) {
                chars.next();
            }
            out.push(Tok::Param);
            continue;
        }

        if is_word_start(ch) {
            // N'..', E'..', X'..' and B'..' are prefixed string literals.
            if matches!(ch, 'n' | 'N' | 'e' | 'E' | 'x' | 'X' | 'b' | 'B')
                && chars.peek() == Some(&'\'')
            {
                chars.next();
                skip_quoted(&mut chars, '\'');
                out.push(Tok::Literal);
                continue;
            }
            let mut word = String::from(ch.to_ascii_lowercase());
            while let Some(&next) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                word.push(next.to_ascii_lowercase());
                chars.next();
            }
            out.push(Tok::Word(word));
            continue;
        }

        match ch {
            '(' => out.push(Tok::Open),
            ')' => out.push(Tok::Close),
            ',' => out.push(Tok::Comma),
            '.' => out.push(Tok::Dot),
            ';' => out.push(Tok::Semi),
            _ if OPERATOR_CHARS.contains(ch) => {
                let mut op = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if !OPERATOR_CHARS.contains(next) || starts_literal_or_comment(next, &chars) {
                        break;
                    }
                    op.push(next);
                    chars.next();
                }
                out.push(Tok::Op(op));
            }
            // Anything else (brackets, unicode punctuation) is kept verbatim.
            _ => out.push(Tok::Word(ch.to_string())),
        }
    }

    out
}

fn is_word_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// Whether the operator char `next` (still unconsumed) starts a comment, a
/// signed number, or a named placeholder rather than continuing the operator.
fn starts_literal_or_comment(next: char, chars: &Peekable<Chars<'_>>) -> bool {
    let mut ahead = chars.clone();
    ahead.next();
    let after = ahead.peek().copied();
    match next {
        '-' => matches!(after, Some('-')) || matches!(after, Some(c) if c.is_ascii_digit()),
        '/' => after == Some('*'),
        ':' => after == Some(':') || matches!(after, Some(c) if is_word_start(c)),
        _ => false,
    }
}

fn skip_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) {
    while let Some(next) = chars.next() {
        if next == quote {
            if chars.peek() == Some(&quote) {
                chars.next();
                continue;
            }
            return;
        }
    }
}

fn take_quoted(chars: &mut Peekable<Chars<'_>>, quote: char, out: &mut String) {
    while let Some(next) = chars.next() {
        out.push(next.to_ascii_lowercase());
        if next == quote {
            if chars.peek() == Some(&quote) {
                out.push(quote);
                chars.next();
                continue;
            }
            return;
        }
    }
}

fn skip_number(chars: &mut Peekable<Chars<'_>>) {
    while matches!(chars.peek(), Some(peek) if peek.is_ascii_alphanumeric() || *peek == '.' || *peek == '_')
    {
        chars.next();
    }
}

/// `in ( ?, ?, ? )` becomes `in ( ? )`. Subqueries and expression lists are
/// left alone.
fn collapse_in_lists(tokens: Vec<Tok>) -> Vec<Tok> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let is_in = matches!(&tokens[i], Tok::Word(word) if word == "in");
        if is_in && tokens.get(i + 1) == Some(&Tok::Open) {
            if let Some(close) = literal_list_end(&tokens, i + 2) {
                out.push(Tok::Word("in".to_string()));
                out.push(Tok::Open);
                out.push(Tok::Literal);
                out.push(Tok::Close);
                i = close + 1;
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

/// Index of the `)` closing a non-empty `? , ? , ...` list starting at `start`.
fn literal_list_end(tokens: &[Tok], start: usize) -> Option<usize> {
    let mut expect_literal = true;
    for (offset, token) in tokens[start.min(tokens.len())..].iter().enumerate() {
        match (token, expect_literal) {
            (Tok::Literal | Tok::Param, true) => expect_literal = false,
            (Tok::Comma, false) => expect_literal = true,
            (Tok::Close, false) => return Some(start + offset),
            _ => return None,
        }
    }
    None
}

fn render(tokens: &[Tok]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Tok> = None;
    for token in tokens {
        let glue = match (prev, token) {
            (None, _) => true,
            (_, Tok::Close | Tok::Comma | Tok::Dot | Tok::Semi) => true,
            (Some(Tok::Open | Tok::Dot), _) => true,
            _ => false,
        };
        if !glue {
            out.push(' ');
        }
        match token {
            Tok::Word(word) => out.push_str(word),
            Tok::Literal | Tok::Param => out.push_str(PLACEHOLDER),
            Tok::Open => out.push('('),
            Tok::Close => out.push(')'),
            Tok::Comma => out.push(','),
            Tok::Dot => out.push('.'),
            Tok::Semi => out.push(';'),
            Tok::Op(op) => out.push_str(op),
        }
        prev = Some(token);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(sql: &str) -> String {
        normalize(sql).into_string()
    }

    #[test]
    fn replaces_literals_and_numbers() {
        let input = "SELECT * FROM users WHERE age > 18 AND name = 'O''Reilly';";
        assert_eq!(shape(input), "select * from users where age > ? and name = ?");
    }

    #[test]
    fn literal_values_do_not_change_shape() {
        assert_eq!(
            normalize("SELECT * FROM users WHERE id = 1"),
            normalize("SELECT * FROM users WHERE id = 2")
        );
        assert_eq!(
            normalize("SELECT * FROM t WHERE price = 19.99"),
            normalize("select *  from t\n where price = -3")
        );
    }

    #[test]
    fn in_lists_collapse_regardless_of_length() {
        let a = normalize("SELECT * FROM users WHERE id IN (1,2,3)");
        let b = normalize("SELECT * FROM users WHERE id IN (4, 5, 6, 7)");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "select * from users where id in (?)");
    }

    #[test]
    fn in_subquery_is_kept() {
        assert_eq!(
            shape("SELECT * FROM a WHERE id IN (SELECT a_id FROM b WHERE x = 1)"),
            "select * from a where id in (select a_id from b where x = ?)"
        );
    }

    #[test]
    fn placeholders_are_canonical() {
        let positional = normalize("SELECT * FROM t WHERE a = ? AND b = ?");
        let named = normalize("SELECT * FROM t WHERE a = :first AND b = :second");
        let numbered = normalize("SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(positional, named);
        assert_eq!(positional, numbered);
    }

    #[test]
    fn detects_bind_placeholders() {
        assert!(has_placeholder("SELECT * FROM t WHERE a = ?"));
        assert!(has_placeholder("SELECT * FROM t WHERE a = $1"));
        assert!(has_placeholder("SELECT * FROM t WHERE a = :name"));
        assert!(!has_placeholder("SELECT * FROM t WHERE a = 1 AND b = 'x?'"));
        assert!(!has_placeholder("SELECT a::text FROM t"));
    }

    #[test]
    fn identifiers_with_digits_are_untouched() {
        assert_eq!(
            shape("SELECT t1.col_2 FROM table3 t1"),
            "select t1.col_2 from table3 t1"
        );
    }

    #[test]
    fn casts_are_not_placeholders() {
        assert_eq!(shape("SELECT a::int FROM t"), "select a :: int from t");
    }

    #[test]
    fn whitespace_and_comments_are_dropped() {
        assert_eq!(
            normalize("/* UserRepo */ SELECT  a,\n\tb FROM t -- trailing"),
            normalize("SELECT a, b FROM t")
        );
        assert_eq!(normalize("SELECT f( a ,b ) FROM t"), normalize("SELECT f(a, b) FROM t"));
    }

    #[test]
    fn unterminated_quote_degrades() {
        let first = shape("SELECT * FROM t WHERE name = 'abc");
        assert_eq!(first, "select * from t where name = ?");
        let ident = shape("SELECT \"abc FROM t");
        assert_eq!(ident, "select \"abc from t");
        assert_eq!(shape(&ident), ident);
    }

    #[test]
    fn empty_input_has_empty_shape() {
        assert!(normalize("   \n ").is_empty());
    }

    #[test]
    fn normalization_is_idempotent_on_samples() {
        let samples = [
            "SELECT * FROM users WHERE id IN (1, 2) AND name = 'x'",
            "UPDATE t SET a = a - 1, b = -2 WHERE c >= 10 AND d <> 'q'",
            "INSERT INTO t (a, b) VALUES (1, 'two'), (3, 'four');",
            "SELECT x FROM t WHERE a=-1 AND b::text = :name",
            "select 1.5e10, .5, 0xff from dual",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(once.as_str()), once, "sample: {sample}");
        }
    }
}
