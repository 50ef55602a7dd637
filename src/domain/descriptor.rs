//! Data-grid descriptor parser.
//!
//! Descriptor texts open with a `release N;` line or a `datawindow(...)`
//! block and carry a retrieve SQL, an update base table, and column entries
//! with `dbname` source hints. Absent markers yield an object record with no
//! SQL.

use once_cell::sync::Lazy;
use regex::Regex;

static RELEASE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*release\s+\d+(\.\d+)?\s*;").expect("release marker regex"));

static DATAWINDOW_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*datawindow\s*\(").expect("datawindow marker regex"));

static RETRIEVE_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\bretrieve\s*=\s*"((?:[^"]|"")*)""#).expect("retrieve regex")
});

static UPDATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bupdate\s*=\s*"([A-Za-z_][A-Za-z0-9_$#.]*)""#).expect("update regex")
});

static DB_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bdbname\s*=\s*"((?:[^"]|"")*)""#).expect("dbname regex")
});

/// A column of a data-grid descriptor with its source table hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwColumn {
    pub name: String,
    pub table_hint: Option<String>,
}

/// The extracted content of one descriptor file.
#[derive(Debug, Clone)]
pub struct ParsedDataWindow {
    pub object_name: String,
    pub dw_name: String,
    pub base_table: Option<String>,
    pub sql_select: Option<String>,
    pub columns: Vec<DwColumn>,
}

/// Whether a text looks like a data-grid descriptor.
pub fn is_descriptor_text(text: &str) -> bool {
    let head: String = text.lines().take(5).collect::<Vec<_>>().join("\n");
    RELEASE_MARKER.is_match(&head) || DATAWINDOW_MARKER.is_match(&head)
}

/// Parse a descriptor text. `object_name` is the file stem; it names both
/// the implicit DataGrid object and the data window.
pub fn parse_descriptor(object_name: &str, text: &str) -> ParsedDataWindow {
    let sql_select = RETRIEVE_SQL
        .captures(text)
        .map(|caps| unquote(&caps[1]))
        .map(|sql| collapse_whitespace(&sql))
        .filter(|sql| !sql.is_empty());

    let base_table = UPDATE_TABLE
        .captures(text)
        .map(|caps| caps[1].trim().to_lowercase())
        .filter(|name| !name.is_empty());

    let columns = DB_COLUMN
        .captures_iter(text)
        .map(|caps| column_from_dbname(&unquote(&caps[1])))
        .collect();

    ParsedDataWindow {
        object_name: object_name.to_lowercase(),
        dw_name: object_name.to_lowercase(),
        base_table,
        sql_select,
        columns,
    }
}

fn unquote(raw: &str) -> String {
    raw.replace("\"\"", "\"")
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `dbname` values carry `table.column`; a bare value is a column with no
/// table hint.
fn column_from_dbname(dbname: &str) -> DwColumn {
    let trimmed = dbname.trim();
    match trimmed.rsplit_once('.') {
        Some((table, column)) => DwColumn {
            name: column.to_lowercase(),
            table_hint: Some(table.rsplit('.').next().unwrap_or(table).to_lowercase()),
        },
        None => DwColumn {
            name: trimmed.to_lowercase(),
            table_hint: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"release 12;
datawindow(units=0 timer_interval=0 color=1090519039)
table(column=(type=char(10) name=order_no dbname="tb_orders.order_no" )
 column=(type=decimal(2) name=amount dbname="tb_orders.amount" )
 retrieve="SELECT order_no,
   amount
 FROM tb_orders JOIN tb_lines ON tb_orders.id = tb_lines.order_id"
 update="tb_orders"
)
"#;

    #[test]
    fn test_marker_detection() {
        assert!(is_descriptor_text(SAMPLE));
        assert!(is_descriptor_text("datawindow(units=0)"));
        assert!(!is_descriptor_text("event clicked\nend event"));
    }

    #[test]
    fn test_full_descriptor() {
        let parsed = parse_descriptor("dw_orders", SAMPLE);
        assert_eq!(parsed.dw_name, "dw_orders");
        assert_eq!(parsed.base_table.as_deref(), Some("tb_orders"));
        let sql = parsed.sql_select.expect("retrieve sql");
        assert!(sql.starts_with("SELECT order_no, amount FROM tb_orders"));
        assert_eq!(parsed.columns.len(), 2);
        assert_eq!(parsed.columns[0].name, "order_no");
        assert_eq!(parsed.columns[0].table_hint.as_deref(), Some("tb_orders"));
    }

    #[test]
    fn test_retrieve_quote_doubling() {
        let text = r#"release 10;
table( retrieve="SELECT a FROM t WHERE n = ""x""" )
"#;
        let parsed = parse_descriptor("dw_a", text);
        assert_eq!(
            parsed.sql_select.as_deref(),
            Some(r#"SELECT a FROM t WHERE n = "x""#)
        );
    }

    #[test]
    fn test_descriptor_without_sql() {
        let text = "release 9;\ndatawindow(units=0)\n";
        let parsed = parse_descriptor("dw_empty", text);
        assert!(parsed.sql_select.is_none());
        assert!(parsed.base_table.is_none());
        assert!(parsed.columns.is_empty());
    }

    #[test]
    fn test_bare_dbname_has_no_hint() {
        let text = r#"release 9;
table(column=(type=char(8) name=code dbname="code" ))
"#;
        let parsed = parse_descriptor("dw_codes", text);
        assert_eq!(parsed.columns.len(), 1);
        assert!(parsed.columns[0].table_hint.is_none());
    }
}
