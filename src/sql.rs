use sqlparser::ast::{
    self, AssignmentTarget, Expr, LimitClause, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Page size used when a listing has no `LIMIT`.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
        email: String,
    },
    UpdateUser {
        id: Ulid,
        name: Option<String>,
        email: Option<String>,
    },
    SelectUsers {
        id: Option<Ulid>,
    },
    InsertItem {
        name: String,
        description: String,
        available: bool,
    },
    UpdateItem {
        id: Ulid,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    },
    SelectItem {
        id: Ulid,
    },
    SelectOwnerItems {
        from: i64,
        size: i64,
    },
    SearchItems {
        text: String,
        from: i64,
        size: i64,
    },
    InsertBooking {
        item_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        id: Ulid,
        approved: bool,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookerBookings {
        state: String,
        from: i64,
        size: i64,
    },
    SelectOwnerBookings {
        state: String,
        from: i64,
        size: i64,
    },
    InsertComment {
        item_id: Ulid,
        text: String,
    },
    SelectComments {
        item_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = InsertRow::new(insert, insert_defaults(&table)?)?;

    match table.as_str() {
        "users" => Ok(Command::InsertUser {
            name: parse_string(row.get("name")?)?,
            email: parse_string(row.get("email")?)?,
        }),
        "items" => Ok(Command::InsertItem {
            name: parse_string(row.get("name")?)?,
            description: parse_string(row.get("description")?)?,
            available: parse_bool(row.get("available")?)?,
        }),
        "bookings" => Ok(Command::InsertBooking {
            item_id: parse_ulid(row.get("item_id")?)?,
            start: parse_i64(row.get("start")?)?,
            end: parse_i64(row.get("end")?)?,
        }),
        "comments" => Ok(Command::InsertComment {
            item_id: parse_ulid(row.get("item_id")?)?,
            text: parse_string(row.get("text")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column order assumed when an INSERT omits its column list.
fn insert_defaults(table: &str) -> Result<&'static [&'static str], SqlError> {
    match table {
        "users" => Ok(&["name", "email"]),
        "items" => Ok(&["name", "description", "available"]),
        "bookings" => Ok(&["item_id", "start", "end"]),
        "comments" => Ok(&["item_id", "text"]),
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

/// The single VALUES row of an INSERT, addressable by column name.
struct InsertRow<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> InsertRow<'a> {
    fn new(insert: &'a ast::Insert, defaults: &[&str]) -> Result<Self, SqlError> {
        let body = insert
            .source
            .as_ref()
            .ok_or(SqlError::Parse("no VALUES".into()))?;
        let rows = match body.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let values = match rows.as_slice() {
            [row] => row.as_slice(),
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        };
        let columns = if insert.columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        Ok(Self { columns, values })
    }

    fn get(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .ok_or(SqlError::MissingColumn(column))
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &a.value));
    }
    let assigned = |column: &str| set.iter().find(|(c, _)| c == column).map(|(_, v)| *v);

    match table.as_str() {
        "users" => Ok(Command::UpdateUser {
            id,
            name: assigned("name").map(parse_string).transpose()?,
            email: assigned("email").map(parse_string).transpose()?,
        }),
        "items" => Ok(Command::UpdateItem {
            id,
            name: assigned("name").map(parse_string).transpose()?,
            description: assigned("description").map(parse_string).transpose()?,
            available: assigned("available").map(parse_bool).transpose()?,
        }),
        "bookings" => {
            let approved = assigned("approved").ok_or(SqlError::MissingColumn("approved"))?;
            Ok(Command::DecideBooking {
                id,
                approved: parse_bool(approved)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |column: &str| filters.iter().find(|(c, _)| c == column).map(|(_, v)| *v);
    let (from, size) = extract_page(query)?;
    let state = || {
        filter("state")
            .map(parse_string)
            .transpose()
            .map(|s| s.unwrap_or_else(|| "ALL".to_string()))
    };

    match table.as_str() {
        "users" => Ok(Command::SelectUsers {
            id: filter("id").map(parse_ulid).transpose()?,
        }),
        "items" => {
            if let Some(id) = filter("id") {
                Ok(Command::SelectItem {
                    id: parse_ulid(id)?,
                })
            } else if let Some(text) = filter("search") {
                Ok(Command::SearchItems {
                    text: parse_string(text)?,
                    from,
                    size,
                })
            } else {
                Ok(Command::SelectOwnerItems { from, size })
            }
        }
        "bookings" => match filter("id") {
            Some(id) => Ok(Command::SelectBooking {
                id: parse_ulid(id)?,
            }),
            None => Ok(Command::SelectBookerBookings {
                state: state()?,
                from,
                size,
            }),
        },
        "owner_bookings" => Ok(Command::SelectOwnerBookings {
            state: state()?,
            from,
            size,
        }),
        "comments" => Ok(Command::SelectComments {
            item_id: parse_ulid(filter("item_id").ok_or(SqlError::MissingFilter("item_id"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

/// `LIMIT size OFFSET from`, defaulting to the first page of `DEFAULT_PAGE_SIZE`.
fn extract_page(query: &ast::Query) -> Result<(i64, i64), SqlError> {
    let (mut from, mut size) = (0, DEFAULT_PAGE_SIZE);
    match &query.limit_clause {
        None => {}
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            if let Some(limit) = limit {
                size = parse_i64(limit)?;
            }
            if let Some(offset) = offset {
                from = parse_i64(&offset.value)?;
            }
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
            from = parse_i64(offset)?;
            size = parse_i64(limit)?;
        }
    }
    Ok((from, size))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_eq_filters(sel, &mut filters)?;
    match filters.as_slice() {
        [(column, value)] if column == "id" => parse_ulid(value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
