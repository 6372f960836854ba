//! Parameter binding and row decoding for MySQL.
//!
//! The core emits `:name` placeholders; the MySQL driver only understands `?`.
//! Named statements are rewritten to positional ones with the values laid out
//! in placeholder order. Rows are decoded column by column into [`Data`] based
//! on the column's reported type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use datamap::{Data, Params, StorageError, Value};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::{Arguments, Column, Row, TypeInfo};

const DATETIME_PATTERN: &str = "%Y-%m-%d %H:%M:%S";
const DATE_PATTERN: &str = "%Y-%m-%d";
const TIME_PATTERN: &str = "%H:%M:%S";

/// A statement ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Positional {
    pub sql: String,
    pub values: Vec<Value>,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Placeholders for one bound value. Lists expand to one `?` per element so
/// they can sit inside `IN (...)`; an empty list becomes `NULL`.
fn push_placeholders(sql: &mut String, values: &mut Vec<Value>, value: &Value) {
    match value {
        Value::List(items) if items.is_empty() => sql.push_str("NULL"),
        Value::List(items) => {
            let marks = vec!["?"; items.len()];
            sql.push_str(&marks.join(", "));
            values.extend(items.iter().cloned());
        }
        other => {
            sql.push('?');
            values.push(other.clone());
        }
    }
}

/// Rewrite `sql` so every parameter is a `?`.
///
/// Text inside quotes or backticks is copied untouched, as is `::`. A named
/// placeholder without a value fails with [`StorageError::MissingParameter`].
pub fn to_positional(sql: &str, params: &Params) -> Result<Positional, StorageError> {
    let named = match params {
        Params::Positional(values) => {
            return Ok(Positional {
                sql: sql.to_string(),
                values: values.clone(),
            });
        }
        Params::Named(named) => named,
    };

    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::with_capacity(named.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            ':' if chars.peek() == Some(&':') => {
                out.push_str("::");
                chars.next();
            }
            ':' if chars.peek().copied().is_some_and(is_name_start) => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if !is_name_char(n) {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                let value = named
                    .get(&name)
                    .ok_or(StorageError::MissingParameter(name))?;
                push_placeholders(&mut out, &mut values, value);
            }
            _ => out.push(c),
        }
    }

    Ok(Positional { sql: out, values })
}

fn bind_error(e: impl ToString) -> StorageError {
    StorageError::Query(e.to_string())
}

fn bind_value(args: &mut MySqlArguments, value: &Value) -> Result<(), StorageError> {
    match value {
        Value::Null => args.add(None::<String>),
        Value::Bool(b) => args.add(*b),
        Value::Int(n) => args.add(*n),
        Value::Float(n) => args.add(*n),
        Value::String(s) => args.add(s.as_str()),
        Value::Bytes(b) => args.add(b.as_slice()),
        Value::Json(json) => args.add(sqlx::types::Json(json)),
        Value::List(items) => {
            for item in items {
                bind_value(args, item)?;
            }
            Ok(())
        }
    }
    .map_err(bind_error)
}

/// Driver arguments for positional values, in order.
pub fn arguments(values: &[Value]) -> Result<MySqlArguments, StorageError> {
    let mut args = MySqlArguments::default();
    for value in values {
        bind_value(&mut args, value)?;
    }
    Ok(args)
}

fn decode_error(column: &str, e: impl ToString) -> StorageError {
    StorageError::Decode(format!("{column}: {}", e.to_string()))
}

fn cell(row: &MySqlRow, idx: usize, name: &str, type_name: &str) -> Result<Value, StorageError> {
    let value = match type_name {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(Value::Int),
        t if t.ends_with("UNSIGNED") => {
            let n = row
                .try_get::<Option<u64>, _>(idx)
                .map_err(|e| decode_error(name, e))?;
            match n {
                Some(n) => Some(Value::Int(
                    i64::try_from(n).map_err(|e| decode_error(name, e))?,
                )),
                None => None,
            }
        }
        "FLOAT" => row
            .try_get::<Option<f32>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(|n| Value::Float(f64::from(n))),
        "DOUBLE" => row
            .try_get::<Option<f64>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(Value::Float),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(|dt| Value::String(dt.format(DATETIME_PATTERN).to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(|dt| Value::String(dt.format(DATETIME_PATTERN).to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(|d| Value::String(d.format(DATE_PATTERN).to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(|t| Value::String(t.format(TIME_PATTERN).to_string())),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(Value::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(Value::Bytes),
        "NULL" => None,
        // VARCHAR, TEXT, CHAR, ENUM, SET, DECIMAL all arrive as text
        _ => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .map_err(|e| decode_error(name, e))?
            .map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decode a row into [`Data`] keyed by column label, in select-list order.
pub fn decode_row(row: &MySqlRow) -> Result<Data, StorageError> {
    let mut data = Data::with_capacity(row.columns().len());
    for column in row.columns() {
        let name = column.name();
        let value = cell(row, column.ordinal(), name, column.type_info().name())?;
        data.insert(name.to_string(), value);
    }
    Ok(data)
}
