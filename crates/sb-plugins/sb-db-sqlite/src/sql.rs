//! SQL generation for the document tables.
//!
//! Every collection is a table `(id TEXT PRIMARY KEY, doc TEXT)` holding the
//! whole document as JSON. `_id` maps to the `id` column; every other field
//! is read with `json_extract`. Field names are inlined into the SQL, so they
//! are restricted to identifier characters.

use sb_core::{AppError, Collection, Condition, Document, Filter, FindOptions, Result, SortOrder, ID_FIELD};
use serde_json::Value;

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    Text(String),
    Integer(i64),
    Real(f64),
    Null,
}

impl Param {
    /// Maps a JSON value onto what `json_extract` yields for it.
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Param::Null,
            Value::Bool(b) => Param::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Param::Integer(i),
                None => Param::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Param::Text(s.clone()),
            other => Param::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

pub(crate) fn create_table(collection: Collection) -> String {
    format!("CREATE TABLE IF NOT EXISTS {collection} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)")
}

fn check_field(field: &str) -> Result<()> {
    let valid = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(AppError::Validation(format!("unsupported field name '{field}'")));
    }
    Ok(())
}

fn column(field: &str) -> Result<String> {
    check_field(field)?;
    if field == ID_FIELD {
        return Ok("id".to_string());
    }
    Ok(format!("json_extract(doc, '$.{field}')"))
}

fn where_clause(filter: &Filter, params: &mut Vec<Param>) -> Result<String> {
    let mut terms = Vec::with_capacity(filter.conditions().len());
    for condition in filter.conditions() {
        let column = column(condition.field())?;
        match condition {
            Condition::Eq(_, value) => {
                terms.push(format!("{column} = ?"));
                params.push(Param::from_value(value));
            }
            Condition::In(_, values) if values.is_empty() => terms.push("0 = 1".to_string()),
            Condition::In(_, values) => {
                let slots = vec!["?"; values.len()].join(", ");
                terms.push(format!("{column} IN ({slots})"));
                params.extend(values.iter().map(Param::from_value));
            }
        }
    }
    if terms.is_empty() {
        return Ok(String::new());
    }
    Ok(format!(" WHERE {}", terms.join(" AND ")))
}

/// Picks at most one matching row, for `*_one` writes.
fn first_match(collection: Collection, filter: &Filter, params: &mut Vec<Param>) -> Result<String> {
    let clause = where_clause(filter, params)?;
    Ok(format!("id IN (SELECT id FROM {collection}{clause} LIMIT 1)"))
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn select(collection: Collection, filter: &Filter, options: &FindOptions) -> Result<Statement> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT doc FROM {collection}{}", where_clause(filter, &mut params)?);

    if let Some((field, order)) = &options.sort {
        let direction = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {} {direction}", column(field)?));
    }
    if options.limit.is_some() || options.skip > 0 {
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(Param::Integer(options.limit.map_or(-1, clamp)));
        params.push(Param::Integer(clamp(options.skip)));
    }
    Ok(Statement { sql, params })
}

pub(crate) fn count(collection: Collection, filter: &Filter) -> Result<Statement> {
    let mut params = Vec::new();
    let sql = format!("SELECT COUNT(*) FROM {collection}{}", where_clause(filter, &mut params)?);
    Ok(Statement { sql, params })
}

pub(crate) fn insert(collection: Collection, id: &str, doc: &Document) -> Result<Statement> {
    Ok(Statement {
        sql: format!("INSERT INTO {collection} (id, doc) VALUES (?, ?)"),
        params: vec![
            Param::Text(id.to_string()),
            Param::Text(serde_json::to_string(doc)?),
        ],
    })
}

pub(crate) fn update_one(collection: Collection, filter: &Filter, set: &Document) -> Result<Statement> {
    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(set.len());
    for (field, value) in set {
        check_field(field)?;
        if field == ID_FIELD {
            return Err(AppError::Validation("_id cannot be updated".into()));
        }
        assignments.push(format!("'$.{field}', json(?)"));
        params.push(Param::Text(value.to_string()));
    }
    let target = if assignments.is_empty() {
        "doc".to_string()
    } else {
        format!("json_set(doc, {})", assignments.join(", "))
    };
    let matched = first_match(collection, filter, &mut params)?;
    Ok(Statement {
        sql: format!("UPDATE {collection} SET doc = {target} WHERE {matched}"),
        params,
    })
}

pub(crate) fn delete(collection: Collection, filter: &Filter, only_first: bool) -> Result<Statement> {
    let mut params = Vec::new();
    let sql = if only_first {
        format!("DELETE FROM {collection} WHERE {}", first_match(collection, filter, &mut params)?)
    } else {
        format!("DELETE FROM {collection}{}", where_clause(filter, &mut params)?)
    };
    Ok(Statement { sql, params })
}
