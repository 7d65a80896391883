//! SQL error signature detection
//!
//! Ordered, case-insensitive substring allowlist. First match wins.

use crate::models::Dbms;

/// A signature found in a response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlErrorMatch {
    /// Signature as listed
    pub signature: &'static str,
    /// Matching text exactly as it appears in the body
    pub matched: String,
    /// Engine the signature is specific to, if any
    pub dbms: Option<Dbms>,
}

const SIGNATURES: &[(&str, Option<Dbms>)] = &[
    ("SQL syntax", Some(Dbms::MySql)),
    ("mysql_fetch", Some(Dbms::MySql)),
    ("ORA-", Some(Dbms::Oracle)),
    ("ODBC", None),
    ("Unclosed quotation mark", Some(Dbms::MsSql)),
    ("You have an error in your SQL syntax", Some(Dbms::MySql)),
    ("Warning: mysql_", Some(Dbms::MySql)),
    ("Warning: pg_", Some(Dbms::PostgreSql)),
    ("Warning: oci_", Some(Dbms::Oracle)),
    ("pg_query", Some(Dbms::PostgreSql)),
    ("syntax error", None),
    ("quoted string not properly terminated", Some(Dbms::Oracle)),
    ("Microsoft OLE DB Provider", Some(Dbms::MsSql)),
    ("DB2 SQL error", None),
    ("SQLite/JDBCDriver", Some(Dbms::Sqlite)),
    ("MySQL server version", Some(Dbms::MySql)),
    ("MariaDB server version", Some(Dbms::MySql)),
    ("supplied argument is not a valid MySQL", Some(Dbms::MySql)),
    ("Division by zero", None),
    ("SQLSTATE", None),
    ("near '", None),
    ("unterminated quoted string", Some(Dbms::PostgreSql)),
    ("Conversion failed when converting the varchar value", Some(Dbms::MsSql)),
    ("error in your SQL syntax", Some(Dbms::MySql)),
    ("ORA-00921", Some(Dbms::Oracle)),
    ("ORA-01756", Some(Dbms::Oracle)),
    ("ORA-00933", Some(Dbms::Oracle)),
    ("Syntax error converting the nvarchar value", Some(Dbms::MsSql)),
    ("psycopg2.errors", Some(Dbms::PostgreSql)),
    ("Uncaught PDOException", None),
    ("unterminated quoted identifier", Some(Dbms::PostgreSql)),
    ("nvarchar to numeric", Some(Dbms::MsSql)),
    ("conversion failed", Some(Dbms::MsSql)),
    ("SQLITE_ERROR", Some(Dbms::Sqlite)),
    ("sqlite3.OperationalError", Some(Dbms::Sqlite)),
    ("unrecognized token", Some(Dbms::Sqlite)),
    ("Incorrect syntax near", Some(Dbms::MsSql)),
    ("SequelizeDatabaseError", None),
    ("PG::SyntaxError", Some(Dbms::PostgreSql)),
    ("java.sql.SQLException", None),
];

/// Returns the first known SQL error signature contained in `body`
pub fn detect(body: &str) -> Option<SqlErrorMatch> {
    if body.is_empty() {
        return None;
    }
    // ASCII lowercasing keeps byte offsets aligned with `body`
    let lowered = body.to_ascii_lowercase();
    SIGNATURES.iter().find_map(|(signature, dbms)| {
        let needle = signature.to_ascii_lowercase();
        lowered.find(&needle).map(|start| SqlErrorMatch {
            signature,
            matched: body[start..start + needle.len()].to_string(),
            dbms: *dbms,
        })
    })
}

pub fn contains_sql_error(body: &str) -> bool {
    detect(body).is_some()
}
