/// SQL Dialect Module
///
/// Text transformations for the PostgreSQL dialect: identifier quoting,
/// string-literal escaping and table-prefix substitution. Everything here is
/// pure and works on SQL text only, so it is shared by every transport.
use crate::core::{DriverError, Result};

/// Character used to open and close quoted identifiers.
pub const NAME_QUOTE: char = '"';

/// Placeholder that stands for the live table prefix in stored SQL.
pub const DEFAULT_PREFIX_TOKEN: &str = "#__";

/// Functions whose first string argument names a catalog object.
const CATALOG_FUNCTIONS: [&str; 4] = ["nextval", "currval", "setval", "pg_get_serial_sequence"];

/// Quotes a possibly dotted identifier, optionally appending an alias.
///
/// Every `.`-separated segment is wrapped on its own, so `public.jos_users`
/// becomes `"public"."jos_users"`. Embedded quote characters are not escaped.
///
/// # Examples
///
/// ```
/// use pgdriver::core::db::dialect::quote_name;
///
/// assert_eq!(quote_name("a.b.c", None), r#""a"."b"."c""#);
/// assert_eq!(quote_name("a.b.c", Some("x")), r#""a"."b"."c" AS "x""#);
/// ```
pub fn quote_name(name: &str, alias: Option<&str>) -> String {
    let mut quoted = name
        .split('.')
        .map(|segment| format!("{NAME_QUOTE}{segment}{NAME_QUOTE}"))
        .collect::<Vec<_>>()
        .join(".");

    if let Some(alias) = alias {
        quoted.push_str(" AS ");
        quoted.push_str(&quote_name(alias, None));
    }

    quoted
}

/// Element-wise [`quote_name`] over a list of identifiers.
///
/// `aliases`, when given, must have the same length as `names`; a `None`
/// element leaves that identifier without an alias.
///
/// # Errors
///
/// Returns `DriverError::Query` when the two lists differ in length.
pub fn quote_names(names: &[&str], aliases: Option<&[Option<&str>]>) -> Result<Vec<String>> {
    match aliases {
        None => Ok(names.iter().map(|name| quote_name(name, None)).collect()),
        Some(aliases) if aliases.len() == names.len() => Ok(names
            .iter()
            .zip(aliases)
            .map(|(name, alias)| quote_name(name, *alias))
            .collect()),
        Some(aliases) => Err(DriverError::query(
            names.join(", "),
            format!(
                "cannot quote {} names with {} aliases",
                names.len(),
                aliases.len()
            ),
        )),
    }
}

/// Escapes text for embedding inside a single-quoted SQL literal.
///
/// Single quotes are doubled. Backslashes are doubled only when the input
/// contains one. With `extra` set, `%` and `_` are escaped as well so the
/// result is safe inside a `LIKE` pattern. No surrounding quotes are added;
/// see [`quote`].
pub fn escape(text: &str, extra: bool) -> String {
    let mut result = if text.contains('\\') {
        text.replace('\\', "\\\\")
    } else {
        text.to_string()
    };
    result = result.replace('\'', "''");

    if extra {
        result = result.replace('%', "\\%").replace('_', "\\_");
    }

    result
}

/// Wraps text in single quotes, escaping it first unless `escape_text` is false.
pub fn quote(text: &str, escape_text: bool) -> String {
    if escape_text {
        format!("'{}'", escape(text, false))
    } else {
        format!("'{}'", text)
    }
}

/// Builds `CREATE DATABASE "db" OWNER "user"`, with a UTF-8 encoding clause when `utf` is set.
pub fn create_database_query(database: &str, owner: &str, utf: bool) -> String {
    let mut sql = format!(
        "CREATE DATABASE {} OWNER {}",
        quote_name(database, None),
        quote_name(owner, None)
    );
    if utf {
        sql.push_str(" ENCODING ");
        sql.push_str(&quote("UTF-8", true));
    }
    sql
}

/// Builds the statement that pins a database's client encoding to UTF-8.
pub fn alter_db_character_set_query(database: &str) -> String {
    format!(
        "ALTER DATABASE {} SET CLIENT_ENCODING TO {}",
        quote_name(database, None),
        quote("UTF8", true)
    )
}

/// Quote context while scanning SQL text
#[derive(Debug, Clone, Copy, PartialEq)]
enum QuoteState {
    /// Plain SQL text
    Outside,
    /// Inside a `'...'` literal
    InSingleQuote,
    /// Inside a `"..."` identifier
    InDoubleQuote,
}

/// Replaces `token` with `prefix` wherever it is used as part of a name.
///
/// Occurrences in plain SQL and inside double-quoted identifiers are
/// replaced. Occurrences inside single-quoted literals are left alone unless
/// the literal names a catalog object: it is cast with `::regclass` or it is
/// the first argument of a sequence function such as `currval`.
///
/// Only quote characters drive the scan. `--` and `/* */` comments and
/// `E'...'` escape strings are not recognised, so an apostrophe inside a
/// comment opens a literal as far as the rewriter is concerned.
pub fn replace_prefix(sql: &str, token: &str, prefix: &str) -> String {
    if token.is_empty() {
        return sql.to_string();
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut state = QuoteState::Outside;
    // set while inside a literal that names a catalog object
    let mut rewrite_literal = false;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match (state, bytes[i]) {
            (QuoteState::Outside, b'\'') => {
                rewrite_literal = names_catalog_object(sql, i, literal_end(bytes, i));
                state = QuoteState::InSingleQuote;
                i += 1;
            }
            (QuoteState::Outside, b'"') => {
                state = QuoteState::InDoubleQuote;
                i += 1;
            }
            (QuoteState::InSingleQuote, b'\'') => {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                } else {
                    state = QuoteState::Outside;
                    i += 1;
                }
            }
            (QuoteState::InDoubleQuote, b'"') => {
                state = QuoteState::Outside;
                i += 1;
            }
            (QuoteState::InSingleQuote, _) if !rewrite_literal => i += 1,
            _ if bytes[i..].starts_with(token.as_bytes()) => {
                out.push_str(&sql[copied..i]);
                out.push_str(prefix);
                i += token.len();
                copied = i;
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    out
}

/// Byte offset just past the single-quoted literal that opens at `start`.
///
/// A doubled `''` inside the literal does not close it. An unterminated
/// literal runs to the end of the text.
fn literal_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Whether the literal spanning `start..end` denotes a catalog object name.
fn names_catalog_object(sql: &str, start: usize, end: usize) -> bool {
    let after = sql[end..].trim_start();
    if after
        .get(..10)
        .is_some_and(|cast| cast.eq_ignore_ascii_case("::regclass"))
    {
        return true;
    }

    let before = sql[..start].trim_end();
    let Some(before) = before.strip_suffix('(') else {
        return false;
    };
    let before = before.trim_end().to_ascii_lowercase();
    CATALOG_FUNCTIONS.iter().any(|function| {
        before.ends_with(function)
            && !before[..before.len() - function.len()]
                .ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
    })
}
