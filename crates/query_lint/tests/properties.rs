//! Property-based checks for the normalizer and the clause extractors.
//!
//! Statements are assembled from a SQL-like vocabulary so the generated
//! inputs exercise literals, placeholders, IN lists and nesting rather than
//! random noise. Arbitrary strings are used only where the property is
//! totality.

use proptest::prelude::*;
use query_lint::clause::{
    count_joins, extract_limit, extract_offset, extract_order_by, extract_table_name,
    extract_where, find_empty_in_clause, find_null_misuse, has_limit,
};
use query_lint::{index, normalize, QueryRecord, SignatureMode, StatementKind};

fn sql_token() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "SELECT", "select", "FROM", "WHERE", "AND", "OR", "IN", "JOIN", "LEFT", "ON",
            "ORDER", "BY", "LIMIT", "OFFSET", "users", "Posts", "t1", "id", "name", "*", "=",
            "<>", ">=", "<", "-", "+", "(", ")", ",", ".", "?", "$1", ":name", "NULL", "IS",
            "NOT", "\"Quoted\"",
        ])
        .prop_map(str::to_string),
        (0u32..100_000).prop_map(|n| n.to_string()),
        (0u32..1000, 0u32..100).prop_map(|(a, b)| format!("{a}.{b}")),
        "[a-z ]{0,8}".prop_map(|s| format!("'{s}'")),
        "[a-z]{1,6}".prop_map(|s| format!("'{s}''{s}'")),
    ]
}

fn sql_statement() -> impl Strategy<Value = String> {
    prop::collection::vec(sql_token(), 0..40).prop_map(|tokens| tokens.join(" "))
}

fn literal() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i64>().prop_map(|n| n.to_string()),
        (0u32..10_000, 0u32..100).prop_map(|(a, b)| format!("{a}.{b}")),
        "[A-Za-z0-9 _%]{0,12}".prop_map(|s| format!("'{}'", s)),
        "[A-Za-z]{1,6}".prop_map(|s| format!("'{s}''s'")),
    ]
}

fn filled(id: &str, list: &[String], text: &str) -> String {
    format!(
        "SELECT u.id, u.name FROM users u WHERE u.id = {id} AND u.team_id IN ({}) \
         AND u.name <> {text} ORDER BY u.name LIMIT 10",
        list.join(", ")
    )
}

proptest! {
    #[test]
    fn normalization_is_idempotent(sql in sql_statement()) {
        let once = normalize(&sql);
        let twice = normalize(once.as_str());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn literal_values_never_change_the_shape(
        a in literal(),
        b in literal(),
        list_a in prop::collection::vec(literal(), 1..8),
        list_b in prop::collection::vec(literal(), 1..8),
        text_a in literal(),
        text_b in literal(),
    ) {
        prop_assert_eq!(
            normalize(&filled(&a, &list_a, &text_a)),
            normalize(&filled(&b, &list_b, &text_b))
        );
    }

    #[test]
    fn shape_only_buckets_partition_the_input(
        statements in prop::collection::vec(sql_statement(), 0..30)
    ) {
        let records: Vec<QueryRecord> =
            statements.iter().map(|sql| QueryRecord::new(sql.as_str(), 1.0)).collect();
        let buckets = index(&records, SignatureMode::ShapeOnly);

        let total: usize = buckets.iter().map(|bucket| bucket.count()).sum();
        prop_assert_eq!(total, records.len());
        for pair in buckets.windows(2) {
            prop_assert!(pair[0].first_position() < pair[1].first_position());
            prop_assert_ne!(pair[0].shape(), pair[1].shape());
        }
    }

    #[test]
    fn extractors_are_total(sql in any::<String>()) {
        let _ = normalize(&sql);
        let _ = StatementKind::of(&sql);
        let _ = count_joins(&sql);
        let _ = extract_limit(&sql);
        let _ = extract_offset(&sql);
        let _ = has_limit(&sql);
        let _ = extract_order_by(&sql);
        let _ = extract_where(&sql);
        let _ = find_null_misuse(&sql);
        let _ = find_empty_in_clause(&sql);
        let _ = extract_table_name(&sql);
    }

    #[test]
    fn extractors_are_total_on_sql_like_input(sql in sql_statement()) {
        let joins = count_joins(&sql);
        prop_assert!(joins <= sql.len());
        if let Some(order_by) = extract_order_by(&sql) {
            prop_assert!(sql.contains(order_by.as_str()));
        }
        if let Some(where_clause) = extract_where(&sql) {
            prop_assert!(sql.contains(where_clause.as_str()));
        }
        if extract_limit(&sql).is_some() {
            prop_assert!(has_limit(&sql));
        }
    }
}
