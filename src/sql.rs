use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Shifts need two people unless the caller says otherwise.
pub const DEFAULT_REQUIRED_COUNT: u32 = 2;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTent {
        id: Ulid,
        name: String,
        tent_type: TentType,
    },
    JoinTent {
        join_code: String,
    },
    UpdateTent {
        id: Ulid,
        name: Option<String>,
        /// `Some(None)` clears the image.
        image_url: Option<Option<String>>,
    },
    UpdateProfile {
        full_name: Option<String>,
    },
    InsertAvailability {
        start: Ms,
        end: Ms,
        status: AvailabilityStatus,
    },
    /// Multi-row paint: one reconciliation per row, in order.
    BatchInsertAvailability {
        entries: Vec<(Ms, Ms, AvailabilityStatus)>,
    },
    InsertShift {
        id: Ulid,
        tent_id: Ulid,
        start: Ms,
        end: Ms,
        required_count: u32,
        is_grace: bool,
    },
    DeleteShift {
        id: Ulid,
    },
    InsertAssignment {
        id: Ulid,
        shift_id: Ulid,
        user_id: Ulid,
    },
    DeleteAssignment {
        id: Ulid,
    },
    /// `None` selects the caller's own tent.
    SelectTent {
        id: Option<Ulid>,
    },
    /// `None` selects the caller's own profile.
    SelectProfiles {
        tent_id: Option<Ulid>,
    },
    SelectAvailability {
        tent_id: Option<Ulid>,
        user_id: Option<Ulid>,
        window: Option<(Ms, Ms)>,
    },
    SelectCoverage {
        tent_id: Ulid,
        start: Ms,
        end: Ms,
        status: AvailabilityStatus,
        min_count: u32,
    },
    SelectShifts {
        tent_id: Option<Ulid>,
        user_id: Option<Ulid>,
    },
    SelectShiftSummary {
        tent_id: Ulid,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("LISTEN ")) {
        let channel = trimmed[7..].trim().trim_matches(';').trim().to_string();
        return Ok(Command::Listen { channel });
    }

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
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let listed = &insert.columns;

    match table.as_str() {
        "tents" => {
            let row = InsertRow::bind("tents", &["id", "name", "tent_type"], listed, &rows[0])?;
            let tent_type = match row.get("tent_type") {
                Some(v) => parse_tent_type(v)?,
                None => TentType::default(),
            };
            Ok(Command::InsertTent {
                id: parse_ulid(row.require("id")?)?,
                name: parse_string(row.require("name")?)?,
                tent_type,
            })
        }
        "memberships" => {
            let row = InsertRow::bind("memberships", &["join_code"], listed, &rows[0])?;
            Ok(Command::JoinTent {
                join_code: parse_string(row.require("join_code")?)?,
            })
        }
        "availabilities" => {
            let mut entries = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                let row = InsertRow::bind("availabilities", &["start", "end", "status"], listed, values)
                    .map_err(at_row)?;
                entries.push((
                    row.require("start").and_then(parse_i64).map_err(at_row)?,
                    row.require("end").and_then(parse_i64).map_err(at_row)?,
                    row.require("status").and_then(parse_status).map_err(at_row)?,
                ));
            }
            if let [(start, end, status)] = entries[..] {
                Ok(Command::InsertAvailability { start, end, status })
            } else {
                Ok(Command::BatchInsertAvailability { entries })
            }
        }
        "shifts" => {
            let row = InsertRow::bind(
                "shifts",
                &["id", "tent_id", "start", "end", "required_count", "is_grace"],
                listed,
                &rows[0],
            )?;
            let required_count = match row.get("required_count") {
                Some(v) => parse_u32(v)?,
                None => DEFAULT_REQUIRED_COUNT,
            };
            let is_grace = match row.get("is_grace") {
                Some(v) => parse_bool(v)?,
                None => false,
            };
            Ok(Command::InsertShift {
                id: parse_ulid(row.require("id")?)?,
                tent_id: parse_ulid(row.require("tent_id")?)?,
                start: parse_i64(row.require("start")?)?,
                end: parse_i64(row.require("end")?)?,
                required_count,
                is_grace,
            })
        }
        "assignments" => {
            let row = InsertRow::bind("assignments", &["id", "shift_id", "user_id"], listed, &rows[0])?;
            Ok(Command::InsertAssignment {
                id: parse_ulid(row.require("id")?)?,
                shift_id: parse_ulid(row.require("shift_id")?)?,
                user_id: parse_ulid(row.require("user_id")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row with its values placed by column name. Without a column
/// list the values follow the table's declared column order.
struct InsertRow<'a> {
    columns: &'static [&'static str],
    values: Vec<Option<&'a Expr>>,
}

impl<'a> InsertRow<'a> {
    fn bind(
        table: &'static str,
        columns: &'static [&'static str],
        listed: &[ast::Ident],
        row: &'a [Expr],
    ) -> Result<Self, SqlError> {
        if listed.is_empty() {
            if row.len() > columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), row.len()));
            }
            let values = (0..columns.len()).map(|i| row.get(i)).collect();
            return Ok(Self { columns, values });
        }

        if listed.len() != row.len() {
            return Err(SqlError::WrongArity(table, listed.len(), row.len()));
        }
        let mut values = vec![None; columns.len()];
        for (ident, value) in listed.iter().zip(row) {
            let name = ident.value.to_lowercase();
            let pos = columns
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| SqlError::UnknownColumn(name.clone()))?;
            if values[pos].replace(value).is_some() {
                return Err(SqlError::Parse(format!("column {name} given twice")));
            }
        }
        Ok(Self { columns, values })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        let pos = self.columns.iter().position(|c| *c == column)?;
        self.values[pos]
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }

    match table.as_str() {
        "tents" => {
            let id = extract_where_id(selection)?;
            let (mut name, mut image_url) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string(value)?),
                    "image_url" => image_url = Some(parse_string_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            if name.is_none() && image_url.is_none() {
                return Err(SqlError::Parse("UPDATE without SET".into()));
            }
            Ok(Command::UpdateTent { id, name, image_url })
        }
        "profiles" => {
            let mut full_name = None;
            for (column, value) in set {
                match column.as_str() {
                    "full_name" => full_name = Some(parse_string_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            let full_name = full_name.ok_or(SqlError::Parse("UPDATE without SET".into()))?;
            Ok(Command::UpdateProfile { full_name })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(delete.selection.as_ref())?;

    match table.as_str() {
        "shifts" => Ok(Command::DeleteShift { id }),
        "assignments" => Ok(Command::DeleteAssignment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection);
    }

    match table.as_str() {
        "tents" => Ok(Command::SelectTent {
            id: filters.eq("id").map(parse_ulid).transpose()?,
        }),
        "profiles" => Ok(Command::SelectProfiles {
            tent_id: filters.eq("tent_id").map(parse_ulid).transpose()?,
        }),
        "availabilities" => {
            let start = filters.ge("start").map(parse_i64).transpose()?;
            let end = filters.le("end").map(parse_i64).transpose()?;
            let window = match (start, end) {
                (Some(s), Some(e)) => Some((s, e)),
                (None, None) => None,
                (None, Some(_)) => return Err(SqlError::MissingFilter("start")),
                (Some(_), None) => return Err(SqlError::MissingFilter("end")),
            };
            Ok(Command::SelectAvailability {
                tent_id: filters.eq("tent_id").map(parse_ulid).transpose()?,
                user_id: filters.eq("user_id").map(parse_ulid).transpose()?,
                window,
            })
        }
        "coverage" => Ok(Command::SelectCoverage {
            tent_id: parse_ulid(filters.eq("tent_id").ok_or(SqlError::MissingFilter("tent_id"))?)?,
            start: parse_i64(filters.ge("start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_i64(filters.le("end").ok_or(SqlError::MissingFilter("end"))?)?,
            status: filters
                .eq("status")
                .map(parse_status)
                .transpose()?
                .unwrap_or(AvailabilityStatus::Available),
            min_count: filters.eq("min_count").map(parse_u32).transpose()?.unwrap_or(1),
        }),
        "shifts" => Ok(Command::SelectShifts {
            tent_id: filters.eq("tent_id").map(parse_ulid).transpose()?,
            user_id: filters.eq("user_id").map(parse_ulid).transpose()?,
        }),
        "shift_summary" => Ok(Command::SelectShiftSummary {
            tent_id: parse_ulid(filters.eq("tent_id").ok_or(SqlError::MissingFilter("tent_id"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column op value` predicates from an AND-chain in a WHERE clause.
#[derive(Default)]
struct Filters<'a> {
    preds: Vec<(String, BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(&mut self, expr: &'a Expr) {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect(left);
                self.collect(right);
            }
            Expr::BinaryOp { left, op, right } => {
                if let Some(col) = expr_column_name(left) {
                    self.preds.push((col, op.clone(), &**right));
                }
            }
            Expr::Nested(inner) => self.collect(inner),
            _ => {}
        }
    }

    fn find(&self, column: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.preds
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &BinaryOperator::Eq)
    }

    fn ge(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &BinaryOperator::GtEq)
    }

    fn le(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &BinaryOperator::LtEq)
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
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
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
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
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
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_status(expr: &Expr) -> Result<AvailabilityStatus, SqlError> {
    let s = parse_string(expr)?;
    AvailabilityStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

fn parse_tent_type(expr: &Expr) -> Result<TentType, SqlError> {
    let s = parse_string(expr)?;
    TentType::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad tent type: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing value for column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    #[test]
    fn parse_insert_tent_defaults_to_black() {
        let sql = format!("INSERT INTO tents (id, name) VALUES ('{ID}', 'Tent 42')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertTent {
                id: id(),
                name: "Tent 42".into(),
                tent_type: TentType::Black,
            }
        );
    }

    #[test]
    fn parse_insert_tent_with_type() {
        let sql = format!("INSERT INTO tents (id, name, tent_type) VALUES ('{ID}', 'Tent', 'White')");
        match parse_sql(&sql).unwrap() {
            Command::InsertTent { tent_type, .. } => assert_eq!(tent_type, TentType::White),
            cmd => panic!("expected InsertTent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_join() {
        let cmd = parse_sql("INSERT INTO memberships (join_code) VALUES ('x7k2qp')").unwrap();
        assert_eq!(cmd, Command::JoinTent { join_code: "x7k2qp".into() });
    }

    #[test]
    fn parse_insert_availability() {
        let sql = r#"INSERT INTO availabilities (start, "end", status) VALUES (1000, 2000, 'maybe')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertAvailability {
                start: 1000,
                end: 2000,
                status: AvailabilityStatus::Maybe,
            }
        );
    }

    #[test]
    fn parse_insert_follows_column_list() {
        let sql = r#"INSERT INTO availabilities ("end", start, status) VALUES (2000, 1000, 'maybe')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertAvailability {
                start: 1000,
                end: 2000,
                status: AvailabilityStatus::Maybe,
            }
        );

        let sql = format!(
            r#"INSERT INTO shifts (is_grace, "end", start, tent_id, id) VALUES (true, 2000, 1000, '{ID}', '{ID}')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertShift {
                start,
                end,
                required_count,
                is_grace,
                ..
            } => {
                assert_eq!((start, end), (1000, 2000));
                assert_eq!(required_count, DEFAULT_REQUIRED_COUNT);
                assert!(is_grace);
            }
            cmd => panic!("expected InsertShift, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_without_column_list_is_positional() {
        let sql = "INSERT INTO availabilities VALUES (1000, 2000, 'available')";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::InsertAvailability { start: 1000, end: 2000, .. }
        ));
        let sql = format!("INSERT INTO assignments VALUES ('{ID}', '{ID}', '{ID}', 4)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("assignments", 3, 4))));
    }

    #[test]
    fn parse_insert_column_list_errors() {
        let sql = format!("INSERT INTO tents (id, name, colour) VALUES ('{ID}', 'Tent', 'Blue')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));

        let sql = r#"INSERT INTO availabilities (start, "end") VALUES (1000, 2000)"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(msg)) if msg.contains("status")));

        let sql = "INSERT INTO tents (name) VALUES ('Nameless')";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("id"))));

        let sql = r#"INSERT INTO availabilities (start, start, status) VALUES (1000, 2000, 'maybe')"#;
        assert!(parse_sql(sql).is_err());

        let sql = r#"INSERT INTO availabilities (start, "end", status) VALUES (1000, 2000)"#;
        assert!(parse_sql(sql).is_err());
    }

    #[test]
    fn parse_batch_availability() {
        let sql = r#"INSERT INTO availabilities (start, "end", status) VALUES (1000, 2000, 'available'), (3000, 4000, 'unavailable')"#;
        match parse_sql(sql).unwrap() {
            Command::BatchInsertAvailability { entries } => {
                assert_eq!(
                    entries,
                    vec![
                        (1000, 2000, AvailabilityStatus::Available),
                        (3000, 4000, AvailabilityStatus::Unavailable),
                    ]
                );
            }
            cmd => panic!("expected BatchInsertAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_availability_bad_status() {
        let sql = r#"INSERT INTO availabilities (start, "end", status) VALUES (1000, 2000, 'sometimes')"#;
        let err = parse_sql(sql).unwrap_err();
        assert!(err.to_string().contains("bad status"), "{err}");
    }

    #[test]
    fn parse_insert_shift_defaults() {
        let sql = format!(r#"INSERT INTO shifts (id, tent_id, start, "end") VALUES ('{ID}', '{ID}', 1000, 2000)"#);
        match parse_sql(&sql).unwrap() {
            Command::InsertShift {
                required_count,
                is_grace,
                ..
            } => {
                assert_eq!(required_count, DEFAULT_REQUIRED_COUNT);
                assert!(!is_grace);
            }
            cmd => panic!("expected InsertShift, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_grace_shift() {
        let sql = format!(
            r#"INSERT INTO shifts (id, tent_id, start, "end", required_count, is_grace) VALUES ('{ID}', '{ID}', 1000, 2000, 1, true)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertShift {
                required_count,
                is_grace,
                ..
            } => {
                assert_eq!(required_count, 1);
                assert!(is_grace);
            }
            cmd => panic!("expected InsertShift, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_assignment_insert_and_delete() {
        let sql = format!("INSERT INTO assignments (id, shift_id, user_id) VALUES ('{ID}', '{ID}', '{ID}')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertAssignment { .. }));
        let sql = format!("DELETE FROM assignments WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteAssignment { id: id() });
    }

    #[test]
    fn parse_delete_shift() {
        let sql = format!("DELETE FROM shifts WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteShift { id: id() });
    }

    #[test]
    fn parse_delete_requires_id() {
        assert!(matches!(
            parse_sql("DELETE FROM shifts"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_update_tent() {
        let sql = format!("UPDATE tents SET name = 'Renamed', image_url = NULL WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateTent {
                id: id(),
                name: Some("Renamed".into()),
                image_url: Some(None),
            }
        );
    }

    #[test]
    fn parse_update_tent_unknown_column() {
        let sql = format!("UPDATE tents SET join_code = 'AAAAAA' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(_))));
    }

    #[test]
    fn parse_update_profile() {
        let cmd = parse_sql("UPDATE profiles SET full_name = 'Coach K'").unwrap();
        assert_eq!(
            cmd,
            Command::UpdateProfile {
                full_name: Some("Coach K".into())
            }
        );
    }

    #[test]
    fn parse_select_tent() {
        assert_eq!(parse_sql("SELECT * FROM tents").unwrap(), Command::SelectTent { id: None });
        let sql = format!("SELECT * FROM tents WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectTent { id: Some(id()) });
    }

    #[test]
    fn parse_select_tent_availability_window() {
        let sql = format!(
            r#"SELECT * FROM availabilities WHERE tent_id = '{ID}' AND start >= 1000 AND "end" <= 2000"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                tent_id: Some(id()),
                user_id: None,
                window: Some((1000, 2000)),
            }
        );
    }

    #[test]
    fn parse_select_availability_half_window_errors() {
        let sql = "SELECT * FROM availabilities WHERE start >= 1000";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn parse_select_coverage() {
        let sql = format!(
            r#"SELECT * FROM coverage WHERE tent_id = '{ID}' AND start >= 1000 AND "end" <= 2000 AND min_count = 6"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectCoverage {
                tent_id: id(),
                start: 1000,
                end: 2000,
                status: AvailabilityStatus::Available,
                min_count: 6,
            }
        );
    }

    #[test]
    fn parse_select_coverage_requires_tent() {
        let sql = r#"SELECT * FROM coverage WHERE start >= 1000 AND "end" <= 2000"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("tent_id"))));
    }

    #[test]
    fn parse_select_shifts_by_user() {
        let sql = format!("SELECT * FROM shifts WHERE user_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectShifts {
                tent_id: None,
                user_id: Some(id()),
            }
        );
    }

    #[test]
    fn parse_select_shift_summary() {
        let sql = format!("SELECT * FROM shift_summary WHERE tent_id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectShiftSummary { tent_id: id() });
    }

    #[test]
    fn parse_listen() {
        let cmd = parse_sql(&format!("LISTEN tent_{ID};")).unwrap();
        assert_eq!(cmd, Command::Listen { channel: format!("tent_{ID}") });
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO rosters (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
