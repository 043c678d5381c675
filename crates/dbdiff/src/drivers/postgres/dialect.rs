//! PostgreSQL SQL dialect.
//!
//! Normalization expressions render each logical type exactly the way the
//! MSSQL dialect does, so row hashes and fetched values compare equal across
//! engines:
//!
//! - NULL becomes `'N'` and every other value is prefixed with `'V'`, so no
//!   stored string can read the same as NULL
//! - Timestamps use ISO 8601 with millisecond precision
//! - Booleans become `'0'` / `'1'`
//! - Floats are fixed to six decimal places
//! - Binary is lowercase hex, UUIDs are lowercase, CRLF becomes LF

use crate::core::schema::ColumnType;
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(v) => v.to_string(),
            // standard_conforming_strings is on by default, so only quotes need escaping.
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    fn normalize_expr(&self, column: &str, ty: ColumnType) -> String {
        let col = self.quote_ident(column);
        let text = match ty {
            ColumnType::Timestamp => format!("TO_CHAR({col}, 'YYYY-MM-DD\"T\"HH24:MI:SS.MS')"),
            ColumnType::Date => format!("TO_CHAR({col}, 'YYYY-MM-DD')"),
            ColumnType::Boolean => format!("CASE WHEN {col} THEN '1' ELSE '0' END"),
            ColumnType::Float => {
                format!("TRIM(TO_CHAR({col}, 'FM999999999999999999990.000000'))")
            }
            ColumnType::Decimal | ColumnType::Integer => format!("{col}::TEXT"),
            ColumnType::Uuid => format!("LOWER({col}::TEXT)"),
            ColumnType::Binary => format!("ENCODE({col}, 'hex')"),
            ColumnType::Text => format!("REPLACE({col}::TEXT, E'\\r\\n', E'\\n')"),
        };
        format!("CASE WHEN {col} IS NULL THEN 'N' ELSE 'V' || {text} END")
    }

    fn concat(&self, exprs: &[String]) -> String {
        exprs.join(" || '|' || ")
    }

    fn row_hash_expr(&self, text_expr: &str) -> String {
        format!("('x' || SUBSTR(MD5({text_expr}), 1, 8))::BIT(32)::BIGINT")
    }

    fn count_expr(&self) -> &'static str {
        "COUNT(*)"
    }

    fn sum_as_text(&self, expr: &str) -> String {
        format!("COALESCE(SUM({expr}), 0)::TEXT")
    }

    fn key_text_expr(&self, column: &str) -> String {
        format!("{}::TEXT", self.quote_ident(column))
    }

    fn order_offset_one(&self, order_by: &str, offset: u64) -> String {
        format!("ORDER BY {order_by} OFFSET {offset} LIMIT 1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        let d = PostgresDialect::new();
        assert_eq!(d.quote_ident("orders"), "\"orders\"");
        assert_eq!(d.quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(d.qualify("public", "orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_literals() {
        let d = PostgresDialect::new();
        assert_eq!(d.literal(&SqlValue::Int(5)), "5");
        assert_eq!(d.literal(&SqlValue::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(d.literal(&SqlValue::Bool(true)), "TRUE");
        assert_eq!(d.literal(&SqlValue::Null), "NULL");
    }

    #[test]
    fn test_boolean_normalization_keeps_null_apart_from_false() {
        let expr = PostgresDialect::new().normalize_expr("is_active", ColumnType::Boolean);
        assert_eq!(
            expr,
            "CASE WHEN \"is_active\" IS NULL THEN 'N' \
             ELSE 'V' || CASE WHEN \"is_active\" THEN '1' ELSE '0' END END"
        );
    }

    #[test]
    fn test_text_null_flag_precedes_value() {
        let expr = PostgresDialect::new().normalize_expr("note", ColumnType::Text);
        assert!(expr.starts_with("CASE WHEN \"note\" IS NULL THEN 'N' ELSE 'V' || REPLACE("));
    }

    #[test]
    fn test_timestamp_normalization() {
        let expr = PostgresDialect::new().normalize_expr("created_at", ColumnType::Timestamp);
        assert!(expr.contains("TO_CHAR(\"created_at\""));
        assert!(expr.contains("SS.MS"));
    }

    #[test]
    fn test_row_hash_uses_first_four_md5_bytes() {
        let d = PostgresDialect::new();
        let hash = d.row_hash_expr(&d.concat(&["a".to_string(), "b".to_string()]));
        assert_eq!(
            hash,
            "('x' || SUBSTR(MD5(a || '|' || b), 1, 8))::BIT(32)::BIGINT"
        );
    }

    #[test]
    fn test_order_offset_one() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.order_offset_one("\"id\"", 1000),
            "ORDER BY \"id\" OFFSET 1000 LIMIT 1"
        );
    }
}
