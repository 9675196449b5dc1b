use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateOwner {
        id: Ulid,
        name: String,
        email: String,
    },
    RegisterKennel(NewKennel),
    AddDog(NewDog),
    PublishAvailability {
        id: Ulid,
        kennel_id: Ulid,
        start: Day,
        days: u64,
    },
    BookKennel {
        id: Ulid,
        owner_id: Ulid,
        dog_id: Ulid,
        kennel_id: Ulid,
        check_in: Day,
        check_out: Day,
    },
    ReviewBooking {
        booking_id: Ulid,
        owner_id: Ulid,
        rating: u8,
        text: Option<String>,
    },
    SelectAvailableKennels {
        owner_id: Ulid,
        dog_id: Ulid,
        check_in: Day,
        check_out: Day,
        /// Restrict the search to one kennel.
        kennel_id: Option<Ulid>,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookingsForOwner {
        owner_id: Ulid,
    },
    SelectBookingsForHost {
        host_id: Ulid,
    },
    SelectKennelsForHost {
        host_id: Ulid,
    },
    SelectDogsForOwner {
        owner_id: Ulid,
    },
    SelectOwnerByEmail {
        email: String,
    },
    SelectSchedule {
        kennel_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// The table a SELECT reads from, lowercased. Works on statements that still
/// carry `$N` placeholders, so it can drive Describe before Bind.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "owners" => {
            let row = Row::from_insert(insert, "owners", &["id", "name", "email"], 3)?;
            Ok(Command::CreateOwner {
                id: parse_ulid(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                email: parse_string(row.required("email")?)?,
            })
        }
        "kennels" => {
            let cols = ["id", "host_id", "name", "price", "size", "has_toys", "allow_unsocial"];
            let row = Row::from_insert(insert, "kennels", &cols, 5)?;
            Ok(Command::RegisterKennel(NewKennel {
                id: parse_ulid(row.required("id")?)?,
                host_id: parse_ulid(row.required("host_id")?)?,
                name: parse_string(row.required("name")?)?,
                price: parse_f64(row.required("price")?)?,
                size: parse_size(row.required("size")?)?,
                has_toys: row.optional("has_toys").map(parse_bool).transpose()?.unwrap_or(false),
                allow_unsocial: row
                    .optional("allow_unsocial")
                    .map(parse_bool)
                    .transpose()?
                    .unwrap_or(false),
            }))
        }
        "dogs" => {
            let cols = ["id", "owner_id", "name", "breed", "size", "unsocial"];
            let row = Row::from_insert(insert, "dogs", &cols, 5)?;
            Ok(Command::AddDog(NewDog {
                id: parse_ulid(row.required("id")?)?,
                owner_id: parse_ulid(row.required("owner_id")?)?,
                name: parse_string(row.required("name")?)?,
                breed: parse_string(row.required("breed")?)?,
                size: parse_size(row.required("size")?)?,
                unsocial: row.optional("unsocial").map(parse_bool).transpose()?.unwrap_or(false),
            }))
        }
        "availability" => {
            let row = Row::from_insert(insert, "availability", &["id", "kennel_id", "start_date", "days"], 4)?;
            let days = parse_i64(row.required("days")?)?;
            Ok(Command::PublishAvailability {
                id: parse_ulid(row.required("id")?)?,
                kennel_id: parse_ulid(row.required("kennel_id")?)?,
                start: parse_date(row.required("start_date")?)?,
                days: u64::try_from(days).map_err(|_| SqlError::Parse(format!("days must be positive, got {days}")))?,
            })
        }
        "bookings" => {
            let cols = ["id", "owner_id", "dog_id", "kennel_id", "check_in", "check_out"];
            let row = Row::from_insert(insert, "bookings", &cols, 6)?;
            Ok(Command::BookKennel {
                id: parse_ulid(row.required("id")?)?,
                owner_id: parse_ulid(row.required("owner_id")?)?,
                dog_id: parse_ulid(row.required("dog_id")?)?,
                kennel_id: parse_ulid(row.required("kennel_id")?)?,
                check_in: parse_date(row.required("check_in")?)?,
                check_out: parse_date(row.required("check_out")?)?,
            })
        }
        "reviews" => {
            let row = Row::from_insert(insert, "reviews", &["booking_id", "owner_id", "rating", "review"], 3)?;
            let rating = parse_i64(row.required("rating")?)?;
            Ok(Command::ReviewBooking {
                booking_id: parse_ulid(row.required("booking_id")?)?,
                owner_id: parse_ulid(row.required("owner_id")?)?,
                rating: u8::try_from(rating).map_err(|_| SqlError::Parse(format!("rating out of range: {rating}")))?,
                text: row.optional("review").map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name.
///
/// Without an explicit column list the values are taken positionally in
/// `columns` order; the first `required` columns must be present.
struct Row {
    values: HashMap<String, Expr>,
}

impl Row {
    fn from_insert(
        insert: &ast::Insert,
        table: &'static str,
        columns: &[&str],
        required: usize,
    ) -> Result<Self, SqlError> {
        let rows = extract_insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported(format!("{table}: one row per INSERT")));
        }
        let exprs = &rows[0];

        let names: Vec<String> = if insert.columns.is_empty() {
            columns.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|i| i.value.to_lowercase()).collect()
        };
        if let Some(unknown) = names.iter().find(|n| !columns.contains(&n.as_str())) {
            return Err(SqlError::UnknownColumn(table, unknown.clone()));
        }
        if exprs.len() > names.len() || (insert.columns.is_empty() && exprs.len() < required) {
            return Err(SqlError::WrongArity(table, required, exprs.len()));
        }
        if !insert.columns.is_empty() && exprs.len() != names.len() {
            return Err(SqlError::WrongArity(table, names.len(), exprs.len()));
        }

        let values = names.into_iter().zip(exprs.iter().cloned()).collect();
        Ok(Self { values })
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.values.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn optional(&self, column: &str) -> Option<&Expr> {
        self.values.get(column)
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = HashMap::new();
    if let Some(selection) = &select.selection {
        collect_equality_filters(selection, &mut filters)?;
    }
    let filter = |col: &'static str| filters.get(col).ok_or(SqlError::MissingFilter(col));

    match table.as_str() {
        "available_kennels" => Ok(Command::SelectAvailableKennels {
            owner_id: parse_ulid(filter("owner_id")?)?,
            dog_id: parse_ulid(filter("dog_id")?)?,
            check_in: parse_date(filter("check_in")?)?,
            check_out: parse_date(filter("check_out")?)?,
            kennel_id: filters.get("kennel_id").map(parse_ulid).transpose()?,
        }),
        "bookings" => {
            if let Some(id) = filters.get("id") {
                Ok(Command::SelectBooking { id: parse_ulid(id)? })
            } else if let Some(owner_id) = filters.get("owner_id") {
                Ok(Command::SelectBookingsForOwner {
                    owner_id: parse_ulid(owner_id)?,
                })
            } else if let Some(host_id) = filters.get("host_id") {
                Ok(Command::SelectBookingsForHost {
                    host_id: parse_ulid(host_id)?,
                })
            } else {
                Err(SqlError::MissingFilter("owner_id or host_id"))
            }
        }
        "kennels" => Ok(Command::SelectKennelsForHost {
            host_id: parse_ulid(filter("host_id")?)?,
        }),
        "dogs" => Ok(Command::SelectDogsForOwner {
            owner_id: parse_ulid(filter("owner_id")?)?,
        }),
        "owners" => Ok(Command::SelectOwnerByEmail {
            email: parse_string(filter("email")?)?,
        }),
        "schedule" => Ok(Command::SelectSchedule {
            kennel_id: parse_ulid(filter("kennel_id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `col = value` terms joined by AND. Anything else is rejected
/// rather than silently ignored.
fn collect_equality_filters(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equality_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equality_filters(left, out)?;
            collect_equality_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_size(expr: &Expr) -> Result<SizeClass, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(n, _)) => n
            .parse::<i64>()
            .ok()
            .and_then(SizeClass::from_code)
            .ok_or_else(|| SqlError::Parse(format!("bad size class: {n}"))),
        Some(Value::SingleQuotedString(s)) => s.parse().map_err(SqlError::Parse),
        Some(value) => Err(SqlError::Parse(format!("expected size class, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.trim().parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_f64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.trim().parse().map_err(|e| SqlError::Parse(format!("bad number {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Ok(true),
            "false" | "f" | "0" | "no" | "n" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => match n.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {n}"))),
        },
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
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
