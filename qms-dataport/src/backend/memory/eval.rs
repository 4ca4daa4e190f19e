//! Query evaluation over rows held in memory

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::MemoryStoreError;
use crate::port::Row;
use crate::query::{FilterOperator, JoinType, QueryFilter, QueryJoin, QueryOptions, QuerySort, SortDirection};

/// Every table, by name
pub type Tables = HashMap<String, Vec<Row>>;

/// Column part of `table.column`
pub(super) fn column_name(field: &str) -> &str {
    field.rsplit('.').next().unwrap_or(field)
}

/// Resolve `column`, `base.column` or `alias.column` against a (possibly joined) row
pub(super) fn lookup<'a>(row: &'a Row, path: &str, base: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(path) {
        return Some(value);
    }
    let (head, tail) = path.split_once('.')?;
    if head == base {
        return row.get(tail);
    }
    match row.get(head)? {
        Value::Object(inner) => inner.get(tail),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.len() < 10 || !s.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Equality with numeric, timestamp and UUID normalization
pub(super) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::String(x), Value::String(y)) => {
            x == y
                || matches!((parse_timestamp(x), parse_timestamp(y)), (Some(p), Some(q)) if p == q)
                || matches!(
                    (uuid::Uuid::parse_str(x), uuid::Uuid::parse_str(y)),
                    (Ok(p), Ok(q)) if p == q
                )
        }
        _ => a == b,
    }
}

/// Ordering between two comparable values
pub(super) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(p), Some(q)) => Some(p.cmp(&q)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting
///
/// Timestamps sort chronologically and ahead of other strings, so a column
/// mixing both still sorts consistently. Values of different JSON types sort
/// by type.
pub(super) fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(p), Some(q)) => p.cmp(&q),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => x.cmp(y),
        },
        _ => compare_values(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Whether `container` holds `contained` (jsonb `@>` semantics)
fn json_contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(k, v)| a.get(k).is_some_and(|av| json_contains(av, v))),
        (Value::Array(a), Value::Array(b)) => b
            .iter()
            .all(|v| a.iter().any(|av| json_contains(av, v))),
        (Value::Array(a), scalar) if !scalar.is_object() => {
            a.iter().any(|av| values_equal(av, scalar))
        }
        (a, b) => values_equal(a, b),
    }
}

/// Compile a LIKE pattern (`%` any run, `_` one char, `\` escapes)
pub(super) fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(next.encode_utf8(&mut [0; 4])));
                }
            }
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    RegexBuilder::new(&re)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
}

/// Text form of a value for substring search
pub(super) fn search_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Evaluate one filter against a row
pub(super) fn matches_filter(
    row: &Row,
    filter: &QueryFilter,
    base: &str,
) -> Result<bool, MemoryStoreError> {
    let column = lookup(row, &filter.field, base).unwrap_or(&Value::Null);
    let target = filter.value.to_json();

    let result = match filter.operator {
        FilterOperator::Eq => !column.is_null() && values_equal(column, &target),
        FilterOperator::Neq => !column.is_null() && !values_equal(column, &target),
        FilterOperator::Gt => compare_values(column, &target) == Some(Ordering::Greater),
        FilterOperator::Gte => matches!(
            compare_values(column, &target),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::Lt => compare_values(column, &target) == Some(Ordering::Less),
        FilterOperator::Lte => matches!(
            compare_values(column, &target),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::Like | FilterOperator::Ilike => {
            match (column.as_str(), filter.value.as_str()) {
                (Some(text), Some(pattern)) => {
                    like_regex(pattern, filter.operator == FilterOperator::Ilike)?.is_match(text)
                }
                _ => false,
            }
        }
        FilterOperator::In => match target {
            Value::Array(ref items) => {
                !column.is_null() && items.iter().any(|item| values_equal(column, item))
            }
            _ => false,
        },
        FilterOperator::Is => match target {
            Value::Null => column.is_null(),
            Value::Bool(b) => column.as_bool() == Some(b),
            _ => false,
        },
        FilterOperator::Contains => !column.is_null() && json_contains(column, &target),
        FilterOperator::Overlaps => match (column, &target) {
            (Value::Array(a), Value::Array(b)) => {
                a.iter().any(|x| b.iter().any(|y| values_equal(x, y)))
            }
            _ => false,
        },
        FilterOperator::Match => {
            return Err(MemoryStoreError::UnsupportedOperator(FilterOperator::Match))
        }
        FilterOperator::StartsWith => column
            .as_str()
            .zip(filter.value.as_str())
            .is_some_and(|(text, prefix)| text.starts_with(prefix)),
        FilterOperator::EndsWith => column
            .as_str()
            .zip(filter.value.as_str())
            .is_some_and(|(text, suffix)| text.ends_with(suffix)),
    };
    Ok(result)
}

/// Keep rows satisfying every filter
pub(super) fn filter_rows(
    rows: Vec<Row>,
    filters: &[QueryFilter],
    base: &str,
) -> Result<Vec<Row>, MemoryStoreError> {
    let mut kept = Vec::with_capacity(rows.len());
    'rows: for row in rows {
        for filter in filters {
            if !matches_filter(&row, filter, base)? {
                continue 'rows;
            }
        }
        kept.push(row);
    }
    Ok(kept)
}

/// Base table rows with every join applied
pub(super) fn joined_rows(
    tables: &Tables,
    table: &str,
    joins: &[QueryJoin],
) -> Result<Vec<Row>, MemoryStoreError> {
    let mut rows = tables
        .get(table)
        .cloned()
        .ok_or_else(|| MemoryStoreError::UnknownTable(table.to_string()))?;
    for join in joins {
        let right = tables
            .get(&join.table)
            .ok_or_else(|| MemoryStoreError::UnknownTable(join.table.clone()))?;
        rows = apply_join(rows, right, join, table);
    }
    Ok(rows)
}

fn apply_join(left_rows: Vec<Row>, right_rows: &[Row], join: &QueryJoin, base: &str) -> Vec<Row> {
    let name = join.name();
    let to_field = column_name(&join.on.to_field);
    let keep_left = matches!(join.join_type, JoinType::Left | JoinType::Full);
    let keep_right = matches!(join.join_type, JoinType::Right | JoinType::Full);

    let mut out = Vec::with_capacity(left_rows.len());
    let mut right_matched = vec![false; right_rows.len()];

    for left in left_rows {
        let key = lookup(&left, &join.on.from_field, base).filter(|v| !v.is_null());
        let mut matched = false;
        if let Some(key) = key {
            for (i, right) in right_rows.iter().enumerate() {
                if right.get(to_field).is_some_and(|v| values_equal(v, key)) {
                    let mut row = left.clone();
                    row.insert(name.to_string(), Value::Object(right.clone()));
                    out.push(row);
                    right_matched[i] = true;
                    matched = true;
                }
            }
        }
        if !matched && keep_left {
            let mut row = left;
            row.insert(name.to_string(), Value::Null);
            out.push(row);
        }
    }

    if keep_right {
        for (right, _) in right_rows
            .iter()
            .zip(&right_matched)
            .filter(|(_, matched)| !**matched)
        {
            let mut row = Row::new();
            row.insert(name.to_string(), Value::Object(right.clone()));
            out.push(row);
        }
    }
    out
}

fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>, sort: &QuerySort) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let nulls = if sort.nulls_come_first() {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => nulls,
        (Some(_), None) => nulls.reverse(),
        (Some(x), Some(y)) => {
            let ord = sort_order(x, y);
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    }
}

/// Stable multi-key sort, primary key first
pub(super) fn sort_rows(rows: &mut [Row], sorts: &[QuerySort], base: &str) {
    if sorts.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        sorts
            .iter()
            .map(|s| sort_key_cmp(lookup(a, &s.field, base), lookup(b, &s.field, base), s))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Collapse rows into one per distinct `group_by` key, with a `count` column
fn group_rows(rows: Vec<Row>, group_by: &[String], base: &str) -> Vec<Row> {
    let mut groups: Vec<(Row, u64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let mut key_row = Row::new();
        for column in group_by {
            let value = lookup(&row, column, base).cloned().unwrap_or(Value::Null);
            key_row.insert(column_name(column).to_string(), value);
        }
        let key = Value::Object(key_row.clone()).to_string();
        match index.get(&key) {
            Some(&i) => groups[i].1 += 1,
            None => {
                index.insert(key, groups.len());
                groups.push((key_row, 1));
            }
        }
    }
    groups
        .into_iter()
        .map(|(mut row, count)| {
            row.insert("count".to_string(), Value::from(count));
            row
        })
        .collect()
}

/// Keep only the selected columns; empty selection keeps the row whole
pub(super) fn project(row: Row, columns: &[&str], base: &str) -> Row {
    if columns.is_empty() {
        return row;
    }
    columns
        .iter()
        .map(|column| {
            let value = lookup(&row, column, base).cloned().unwrap_or(Value::Null);
            (column_name(column).to_string(), value)
        })
        .collect()
}

/// Grouping, ordering, windowing and projection over filtered rows
pub(super) fn finish(
    rows: Vec<Row>,
    options: &QueryOptions,
    base: &str,
) -> Result<Vec<Row>, MemoryStoreError> {
    let grouped = !options.group_by.is_empty();
    let mut rows = if grouped {
        filter_rows(
            group_rows(rows, &options.group_by, base),
            options.effective_having(),
            base,
        )?
    } else {
        rows
    };

    sort_rows(&mut rows, &options.sort, base);

    let rows: Vec<Row> = match options.pagination {
        Some(window) => {
            let (offset, limit) = window.offset_limit();
            rows.into_iter()
                .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect()
        }
        None => rows,
    };

    if grouped {
        return Ok(rows);
    }
    let columns = options.columns();
    Ok(rows
        .into_iter()
        .map(|row| project(row, &columns, base))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FilterValue;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture rows must be objects"),
        }
    }

    #[test]
    fn test_like_translation() {
        let re = like_regex("Ha%cut_", false).unwrap();
        assert!(re.is_match("Haircut1"));
        assert!(!re.is_match("haircut1"));
        assert!(like_regex("ha%", true).unwrap().is_match("HAIRCUT"));
        assert!(like_regex("50\\%", false).unwrap().is_match("50%"));
        assert!(!like_regex("50\\%", false).unwrap().is_match("500"));
        assert!(like_regex("a.b", false).unwrap().is_match("a.b"));
        assert!(!like_regex("a.b", false).unwrap().is_match("axb"));
    }

    #[test]
    fn test_values_equal_normalizes() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(
            &json!("2024-01-01T00:00:00Z"),
            &json!("2024-01-01T00:00:00+00:00")
        ));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_timestamps_compare_chronologically() {
        assert_eq!(
            compare_values(&json!("2024-01-02T00:00:00+02:00"), &json!("2024-01-01T23:00:00Z")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_mixed_string_column_sorts_consistently() {
        let values = [
            json!("2024-01-02T00:00:00+02:00"),
            json!("2024-01-01T23:00:00Z"),
            json!("2024-01-01T23:30:00 x"),
        ];
        for a in &values {
            for b in &values {
                assert_eq!(sort_order(a, b), sort_order(b, a).reverse());
            }
        }
        assert_eq!(sort_order(&values[0], &values[1]), Ordering::Less);
        assert_eq!(sort_order(&values[1], &values[2]), Ordering::Less);
        assert_eq!(sort_order(&values[0], &values[2]), Ordering::Less);

        let expected: Vec<Row> = values.iter().map(|v| row(json!({"at": v}))).collect();
        for start in 0..values.len() {
            let mut rows: Vec<Row> = expected.clone();
            rows.rotate_left(start);
            sort_rows(&mut rows, &[QuerySort::asc("at")], "t");
            assert_eq!(rows, expected);
        }
    }

    #[test]
    fn test_null_never_equals() {
        let r = row(json!({"status": null}));
        assert!(!matches_filter(&r, &QueryFilter::eq("status", "open"), "t").unwrap());
        assert!(!matches_filter(&r, &QueryFilter::neq("status", "open"), "t").unwrap());
        assert!(matches_filter(&r, &QueryFilter::is_null("status"), "t").unwrap());
        assert!(matches_filter(&r, &QueryFilter::is_null("missing"), "t").unwrap());
    }

    #[test]
    fn test_contains_and_overlaps() {
        let r = row(json!({"tags": ["vip", "walk-in"], "meta": {"tier": "gold", "n": 2}}));
        assert!(matches_filter(&r, &QueryFilter::contains("tags", vec!["vip"]), "t").unwrap());
        assert!(!matches_filter(&r, &QueryFilter::contains("tags", vec!["vip", "x"]), "t").unwrap());
        assert!(matches_filter(
            &r,
            &QueryFilter::contains("meta", FilterValue::Json(json!({"tier": "gold"}))),
            "t"
        )
        .unwrap());
        assert!(matches_filter(&r, &QueryFilter::overlaps("tags", vec!["x", "walk-in"]), "t").unwrap());
        assert!(!matches_filter(&r, &QueryFilter::overlaps("tags", vec!["x"]), "t").unwrap());
    }

    #[test]
    fn test_match_is_unsupported() {
        let r = row(json!({"name": "x"}));
        let err = matches_filter(&r, &QueryFilter::text_match("name", "x"), "t").unwrap_err();
        assert!(matches!(err, MemoryStoreError::UnsupportedOperator(FilterOperator::Match)));
    }

    #[test]
    fn test_lookup_paths() {
        let r = row(json!({"id": 1, "shop": {"name": "North"}}));
        assert_eq!(lookup(&r, "id", "queues"), Some(&json!(1)));
        assert_eq!(lookup(&r, "queues.id", "queues"), Some(&json!(1)));
        assert_eq!(lookup(&r, "shop.name", "queues"), Some(&json!("North")));
        assert_eq!(lookup(&r, "shop.missing", "queues"), None);
    }

    #[test]
    fn test_sort_nulls_placement() {
        let mut rows = vec![
            row(json!({"n": 2})),
            row(json!({"n": null})),
            row(json!({"n": 1})),
        ];
        sort_rows(&mut rows, &[QuerySort::asc("n")], "t");
        let order: Vec<_> = rows.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(order, vec![json!(1), json!(2), Value::Null]);

        sort_rows(&mut rows, &[QuerySort::asc("n").nulls_first(true)], "t");
        assert!(rows[0]["n"].is_null());

        sort_rows(&mut rows, &[QuerySort::desc("n")], "t");
        assert!(rows[0]["n"].is_null());
        assert_eq!(rows[1]["n"], json!(2));
    }

    #[test]
    fn test_secondary_sort() {
        let mut rows = vec![
            row(json!({"a": 1, "b": "y"})),
            row(json!({"a": 0, "b": "z"})),
            row(json!({"a": 1, "b": "x"})),
        ];
        sort_rows(&mut rows, &[QuerySort::desc("a"), QuerySort::asc("b")], "t");
        let bs: Vec<_> = rows.iter().map(|r| r["b"].as_str().unwrap()).collect();
        assert_eq!(bs, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_group_with_having() {
        let rows = vec![
            row(json!({"status": "open"})),
            row(json!({"status": "closed"})),
            row(json!({"status": "open"})),
        ];
        let options = QueryOptions::new()
            .group_by("status")
            .having(QueryFilter::gt("count", 1));
        let out = finish(rows, &options, "t").unwrap();
        assert_eq!(out, vec![row(json!({"status": "open", "count": 2}))]);
    }

    #[test]
    fn test_projection_flattens_alias_columns() {
        let r = row(json!({"id": 1, "name": "q", "shop": {"name": "North"}}));
        let out = project(r, &["id", "shop.name"], "queues");
        assert_eq!(Value::Object(out), json!({"id": 1, "name": "North"}));
    }
}
