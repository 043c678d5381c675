//! Microsoft SQL Server dialect.
//!
//! Normalized values use the same NULL flag as the PostgreSQL dialect:
//! `'N'` for NULL, `'V'` followed by the value otherwise.
//!
//! Row hashes cast the concatenated row to `VARCHAR(MAX)` before hashing so
//! the MD5 input bytes match PostgreSQL's UTF-8 text. Non-ASCII values hash
//! identically only under a UTF-8 collation.

use crate::core::schema::ColumnType;
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;

#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Text(s) => format!("N'{}'", s.replace('\'', "''")),
        }
    }

    fn normalize_expr(&self, column: &str, ty: ColumnType) -> String {
        let col = self.quote_ident(column);
        let text = match ty {
            ColumnType::Timestamp => format!("FORMAT({col}, 'yyyy-MM-ddTHH:mm:ss.fff')"),
            ColumnType::Date => format!("CONVERT(NVARCHAR(10), {col}, 23)"),
            ColumnType::Boolean => format!("CAST({col} AS NCHAR(1))"),
            ColumnType::Float => format!("LTRIM(STR({col}, 38, 6))"),
            ColumnType::Decimal => format!("CAST({col} AS NVARCHAR(50))"),
            ColumnType::Integer => format!("CAST({col} AS NVARCHAR(20))"),
            ColumnType::Uuid => format!("LOWER(CAST({col} AS NVARCHAR(36)))"),
            ColumnType::Binary => format!("LOWER(CONVERT(NVARCHAR(MAX), {col}, 2))"),
            ColumnType::Text => format!(
                "REPLACE(CAST({col} AS NVARCHAR(MAX)), CHAR(13) + CHAR(10), CHAR(10))"
            ),
        };
        format!("CASE WHEN {col} IS NULL THEN N'N' ELSE N'V' + {text} END")
    }

    fn concat(&self, exprs: &[String]) -> String {
        exprs.join(" + N'|' + ")
    }

    fn row_hash_expr(&self, text_expr: &str) -> String {
        format!(
            "CAST(CAST(HASHBYTES('MD5', CAST({text_expr} AS VARCHAR(MAX))) AS BINARY(4)) AS BIGINT)"
        )
    }

    fn count_expr(&self) -> &'static str {
        "COUNT_BIG(*)"
    }

    fn sum_as_text(&self, expr: &str) -> String {
        format!("CAST(ISNULL(SUM({expr}), 0) AS VARCHAR(40))")
    }

    fn key_text_expr(&self, column: &str) -> String {
        format!("CONVERT(NVARCHAR(4000), {}, 126)", self.quote_ident(column))
    }

    fn order_offset_one(&self, order_by: &str, offset: u64) -> String {
        format!("ORDER BY {order_by} OFFSET {offset} ROWS FETCH NEXT 1 ROWS ONLY")
    }
}
