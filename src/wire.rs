use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{Session, TentShiftAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct TentShiftHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TentShiftQueryParser>,
}

impl TentShiftHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TentShiftQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    fn resolve_session<C: ClientInfo>(client: &C) -> Session {
        Session::from_login(client.metadata().get("user").map(String::as_str))
    }

    /// Parse and execute, recording RED metrics per command.
    async fn run<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let session = Self::resolve_session(client);
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, &session, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, session: &Session, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertTent { id, name, tent_type } => {
                engine
                    .create_tent(session, id, &name, tent_type)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![executed("INSERT", 1)])
            }
            Command::JoinTent { join_code } => {
                engine.join_tent(session, &join_code).await.map_err(engine_err)?;
                Ok(vec![executed("INSERT", 1)])
            }
            Command::UpdateTent { id, name, image_url } => {
                if let Some(name) = name {
                    engine.rename_tent(session, id, &name).await.map_err(engine_err)?;
                }
                if let Some(image_url) = image_url {
                    engine
                        .update_tent_image(session, id, image_url)
                        .await
                        .map_err(engine_err)?;
                }
                Ok(vec![executed("UPDATE", 1)])
            }
            Command::UpdateProfile { full_name } => {
                engine.update_profile(session, full_name).await.map_err(engine_err)?;
                Ok(vec![executed("UPDATE", 1)])
            }
            Command::InsertAvailability { start, end, status } => {
                engine
                    .submit_availability(session, start, end, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![executed("INSERT", 1)])
            }
            Command::BatchInsertAvailability { entries } => {
                let count = entries.len();
                for (start, end, status) in entries {
                    engine
                        .submit_availability(session, start, end, status)
                        .await
                        .map_err(engine_err)?;
                }
                Ok(vec![executed("INSERT", count)])
            }
            Command::InsertShift {
                id,
                tent_id,
                start,
                end,
                required_count,
                is_grace,
            } => {
                engine
                    .create_shift(session, id, tent_id, start, end, required_count, is_grace)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![executed("INSERT", 1)])
            }
            Command::DeleteShift { id } => {
                engine.delete_shift(session, id).await.map_err(engine_err)?;
                Ok(vec![executed("DELETE", 1)])
            }
            Command::InsertAssignment { id, shift_id, user_id } => {
                engine
                    .assign(session, id, shift_id, user_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![executed("INSERT", 1)])
            }
            Command::DeleteAssignment { id } => {
                engine.unassign(session, id).await.map_err(engine_err)?;
                Ok(vec![executed("DELETE", 1)])
            }
            Command::SelectTent { id } => {
                let tent = match id {
                    None => engine.my_tent(session).await.map_err(engine_err)?,
                    Some(id) => {
                        let caller = session.require_user().map_err(engine_err)?;
                        engine.require_member(caller, id).await.map_err(engine_err)?;
                        engine
                            .get_tent(id)
                            .await
                            .ok_or(EngineError::NotFound(id))
                            .map_err(engine_err)?
                    }
                };
                Ok(vec![rows(tent_schema(), vec![tent], encode_tent)])
            }
            Command::SelectProfiles { tent_id } => {
                let caller = session.require_user().map_err(engine_err)?;
                let profiles = match tent_id {
                    Some(tent_id) => {
                        engine.require_member(caller, tent_id).await.map_err(engine_err)?;
                        engine.list_members(tent_id).await
                    }
                    None => engine.get_profile(caller).await.into_iter().collect(),
                };
                Ok(vec![rows(profile_schema(), profiles, encode_profile)])
            }
            Command::SelectAvailability {
                tent_id,
                user_id,
                window,
            } => {
                let window = window
                    .map(|(start, end)| Span::try_new(start, end).ok_or(EngineError::InvalidRange { start, end }))
                    .transpose()
                    .map_err(engine_err)?;
                let intervals = match tent_id {
                    Some(tent_id) => engine
                        .tent_availability(session, tent_id, window)
                        .await
                        .map_err(engine_err)?,
                    None => {
                        let caller = session.require_user().map_err(engine_err)?;
                        let target = user_id.unwrap_or(caller);
                        if target != caller {
                            require_shared_tent(engine, caller, target).await?;
                        }
                        engine.user_availability(target, window).await
                    }
                };
                Ok(vec![rows(availability_schema(), intervals, encode_availability)])
            }
            Command::SelectCoverage {
                tent_id,
                start,
                end,
                status,
                min_count,
            } => {
                let window = Span::try_new(start, end)
                    .ok_or(EngineError::InvalidRange { start, end })
                    .map_err(engine_err)?;
                let spans = engine
                    .coverage(session, tent_id, window, status, min_count)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![rows(coverage_schema(), spans, encode_coverage)])
            }
            Command::SelectShifts { tent_id, user_id } => {
                let caller = session.require_user().map_err(engine_err)?;
                let shifts = match (tent_id, user_id) {
                    (Some(tent_id), _) => {
                        engine.require_member(caller, tent_id).await.map_err(engine_err)?;
                        let mut shifts = engine.tent_shifts(tent_id).await;
                        if let Some(user_id) = user_id {
                            shifts.retain(|s| s.assignees.contains(&user_id));
                        }
                        shifts
                    }
                    (None, user_id) => {
                        let target = user_id.unwrap_or(caller);
                        if target != caller {
                            require_shared_tent(engine, caller, target).await?;
                        }
                        engine.member_shifts(target).await
                    }
                };
                Ok(vec![rows(shift_schema(), shifts, encode_shift)])
            }
            Command::SelectShiftSummary { tent_id } => {
                let caller = session.require_user().map_err(engine_err)?;
                engine.require_member(caller, tent_id).await.map_err(engine_err)?;
                let summary = engine.shift_summary(tent_id).await;
                Ok(vec![rows(shift_summary_schema(), summary, encode_shift_summary)])
            }
            Command::Listen { channel } => {
                let tent_id = channel
                    .strip_prefix("tent_")
                    .and_then(|id| Ulid::from_string(id).ok())
                    .ok_or_else(|| {
                        user_error("42000", format!("invalid channel: {channel} (expected tent_{{id}})"))
                    })?;
                let caller = session.require_user().map_err(engine_err)?;
                engine.require_member(caller, tent_id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

/// Reading another user's data requires being in the same tent.
async fn require_shared_tent(engine: &Engine, caller: Ulid, target: Ulid) -> PgWireResult<()> {
    let tent_id = engine
        .get_profile(caller)
        .await
        .and_then(|p| p.tent_id)
        .ok_or(EngineError::NoTent)
        .map_err(engine_err)?;
    engine.require_member(target, tent_id).await.map_err(engine_err)
}

fn executed(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Row encoders ─────────────────────────────────────────────────

fn encode_tent(encoder: &mut DataRowEncoder, t: &TentInfo) -> PgWireResult<()> {
    encoder.encode_field(&t.id.to_string())?;
    encoder.encode_field(&t.name)?;
    encoder.encode_field(&t.join_code)?;
    encoder.encode_field(&t.tent_type.as_str().to_string())?;
    encoder.encode_field(&t.image_url)?;
    encoder.encode_field(&t.created_by.to_string())
}

fn encode_profile(encoder: &mut DataRowEncoder, p: &ProfileInfo) -> PgWireResult<()> {
    encoder.encode_field(&p.id.to_string())?;
    encoder.encode_field(&p.full_name)?;
    encoder.encode_field(&p.tent_id.map(|t| t.to_string()))?;
    encoder.encode_field(&p.role.as_str().to_string())
}

fn encode_availability(encoder: &mut DataRowEncoder, a: &AvailabilityInfo) -> PgWireResult<()> {
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.user_id.to_string())?;
    encoder.encode_field(&a.tent_id.to_string())?;
    encoder.encode_field(&a.start)?;
    encoder.encode_field(&a.end)?;
    encoder.encode_field(&a.status.as_str().to_string())
}

fn encode_coverage(encoder: &mut DataRowEncoder, c: &CoverageSpan) -> PgWireResult<()> {
    encoder.encode_field(&c.span.start)?;
    encoder.encode_field(&c.span.end)?;
    encoder.encode_field(&(c.count as i32))
}

fn encode_shift(encoder: &mut DataRowEncoder, s: &ShiftInfo) -> PgWireResult<()> {
    let assignees = serde_json::to_string(&s.assignees).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    encoder.encode_field(&s.id.to_string())?;
    encoder.encode_field(&s.tent_id.to_string())?;
    encoder.encode_field(&s.start)?;
    encoder.encode_field(&s.end)?;
    encoder.encode_field(&(s.required_count as i32))?;
    encoder.encode_field(&s.is_grace)?;
    encoder.encode_field(&assignees)
}

fn encode_shift_summary(encoder: &mut DataRowEncoder, s: &ShiftSummary) -> PgWireResult<()> {
    encoder.encode_field(&s.shift_id.to_string())?;
    encoder.encode_field(&s.start)?;
    encoder.encode_field(&s.end)?;
    encoder.encode_field(&(s.assigned as i32))?;
    encoder.encode_field(&(s.required as i32))?;
    encoder.encode_field(&s.is_safe)
}

// ── Schemas ──────────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn tent_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("join_code", Type::VARCHAR),
        field("tent_type", Type::VARCHAR),
        field("image_url", Type::VARCHAR),
        field("created_by", Type::VARCHAR),
    ]
}

fn profile_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("full_name", Type::VARCHAR),
        field("tent_id", Type::VARCHAR),
        field("role", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("tent_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
    ]
}

fn coverage_schema() -> Vec<FieldInfo> {
    vec![
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("count", Type::INT4),
    ]
}

fn shift_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("tent_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("required_count", Type::INT4),
        field("is_grace", Type::BOOL),
        field("assignees", Type::VARCHAR),
    ]
}

fn shift_summary_schema() -> Vec<FieldInfo> {
    vec![
        field("shift_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("assigned", Type::INT4),
        field("required", Type::INT4),
        field("is_safe", Type::BOOL),
    ]
}

/// Result columns of a statement, known before execution from its FROM table.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let mut tokens = sql.split_whitespace();
    if !tokens.next().is_some_and(|t| t.eq_ignore_ascii_case("SELECT")) {
        return Vec::new();
    }
    let table = tokens
        .skip_while(|t| !t.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| t.trim_matches(|c| c == ';' || c == '"').to_lowercase());
    match table.as_deref() {
        Some("tents") => tent_schema(),
        Some("profiles") => profile_schema(),
        Some("availabilities") => availability_schema(),
        Some("coverage") => coverage_schema(),
        Some("shifts") => shift_schema(),
        Some("shift_summary") => shift_summary_schema(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for TentShiftHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TentShiftQueryParser;

#[async_trait]
impl QueryParser for TentShiftQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TentShiftHandler {
    type Statement = String;
    type QueryParser = TentShiftQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "command produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// `$N` placeholders outside single-quoted literals: byte range and N.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[i + 1..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    bind_params(&portal.statement.statement, &params)
}

/// One left-to-right pass over the statement text: a bound value is never
/// scanned again, so `$1` inside a value stays literal text.
fn bind_params(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TentShiftFactory {
    handler: Arc<TentShiftHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<TentShiftAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TentShiftFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(TentShiftHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TentShiftAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TentShiftFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(TentShiftFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Unauthorized => "28000",
        EngineError::NoTent | EngineError::NotFound(_) => "P0002",
        EngineError::InvalidRange { .. } | EngineError::Invalid(_) => "22023",
        EngineError::Transaction(_) => "40000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidJoinCode(_) => "22P02",
        EngineError::NotMember(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
