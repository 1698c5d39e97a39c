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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::ShareItAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct ShareItHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ShareItQueryParser>,
}

impl ShareItHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ShareItQueryParser),
        }
    }

    /// The connection's login user is the caller's user id.
    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Ulid> {
        let token = client.metadata().get("user").cloned().unwrap_or_default();
        let resolved = Ulid::from_string(&token)
            .map_err(|_| EngineError::NotFound(format!("user {token}")))
            .and_then(|id| self.engine.resolve_user(&id).map(|u| u.id));
        resolved.map_err(|e| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            engine_err(e)
        })
    }

    async fn run<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(client, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command<C: ClientInfo>(
        &self,
        client: &C,
        cmd: Command,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { name, email } => {
                let user = engine.create_user(name, email).await.map_err(engine_err)?;
                user_rows(vec![user])
            }
            Command::UpdateUser { id, name, email } => {
                let user = engine.update_user(id, name, email).await.map_err(engine_err)?;
                user_rows(vec![user])
            }
            Command::SelectUsers { id: Some(id) } => {
                let user = engine.resolve_user(&id).map_err(engine_err)?;
                user_rows(vec![user])
            }
            Command::SelectUsers { id: None } => user_rows(engine.list_users()),
            Command::InsertItem { name, description, available } => {
                let owner = self.resolve_caller(client)?;
                let item = engine
                    .create_item(owner, name, description, available)
                    .await
                    .map_err(engine_err)?;
                item_rows(vec![bare_view(item)])
            }
            Command::UpdateItem { id, name, description, available } => {
                let caller = self.resolve_caller(client)?;
                let item = engine
                    .update_item(id, caller, name, description, available)
                    .await
                    .map_err(engine_err)?;
                item_rows(vec![bare_view(item)])
            }
            Command::SelectItem { id } => {
                let caller = self.resolve_caller(client)?;
                let view = engine.get_item(id, caller).await.map_err(engine_err)?;
                item_rows(vec![view])
            }
            Command::SelectOwnerItems { from, size } => {
                let owner = self.resolve_caller(client)?;
                let views = engine
                    .list_owner_items(owner, from, size)
                    .await
                    .map_err(engine_err)?;
                item_rows(views)
            }
            Command::SearchItems { text, from, size } => {
                let items = engine.search_items(&text, from, size).await.map_err(engine_err)?;
                item_rows(items.into_iter().map(bare_view).collect())
            }
            Command::InsertBooking { item_id, start, end } => {
                let booker = self.resolve_caller(client)?;
                let view = engine
                    .create_booking(booker, item_id, Span::new(start, end))
                    .await
                    .map_err(engine_err)?;
                booking_rows(vec![view])
            }
            Command::DecideBooking { id, approved } => {
                let owner = self.resolve_caller(client)?;
                let view = engine
                    .decide_booking(id, owner, approved)
                    .await
                    .map_err(engine_err)?;
                booking_rows(vec![view])
            }
            Command::SelectBooking { id } => {
                let caller = self.resolve_caller(client)?;
                let view = engine.get_booking(id, caller).await.map_err(engine_err)?;
                booking_rows(vec![view])
            }
            Command::SelectBookerBookings { state, from, size } => {
                let caller = self.resolve_caller(client)?;
                let views = engine
                    .list_by_booker(caller, &state, from, size)
                    .await
                    .map_err(engine_err)?;
                booking_rows(views)
            }
            Command::SelectOwnerBookings { state, from, size } => {
                let caller = self.resolve_caller(client)?;
                let views = engine
                    .list_by_owner(caller, &state, from, size)
                    .await
                    .map_err(engine_err)?;
                booking_rows(views)
            }
            Command::InsertComment { item_id, text } => {
                let author = self.resolve_caller(client)?;
                let comment = engine
                    .add_comment(item_id, author, text)
                    .await
                    .map_err(engine_err)?;
                comment_rows(vec![comment])
            }
            Command::SelectComments { item_id } => {
                let comments = engine.list_comments(item_id).await.map_err(engine_err)?;
                comment_rows(comments)
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn users_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), text_field("email")]
}

/// `last_booking`, `next_booking` and `comments` are JSON text; the snapshot
/// columns are NULL unless the caller owns the item.
fn items_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner_id"),
        text_field("name"),
        text_field("description"),
        bool_field("available"),
        text_field("last_booking"),
        text_field("next_booking"),
        text_field("comments"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("item_id"),
        text_field("item_name"),
        text_field("booker_id"),
        text_field("booker_name"),
        int8_field("start"),
        int8_field("end"),
        text_field("status"),
    ]
}

fn comments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("item_id"),
        text_field("author_name"),
        text_field("text"),
        int8_field("created"),
    ]
}

/// Result columns for a statement, keyed by the table it names.
fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let mut words = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    let table = loop {
        match words.next() {
            Some("FROM" | "INTO" | "UPDATE") => break words.next(),
            Some(_) => {}
            None => break None,
        }
    };
    match table {
        Some("USERS") => users_schema(),
        Some("ITEMS") => items_schema(),
        Some("BOOKINGS" | "OWNER_BOOKINGS") => bookings_schema(),
        Some("COMMENTS") => comments_schema(),
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn user_rows(users: Vec<User>) -> PgWireResult<Response> {
    let schema = Arc::new(users_schema());
    let rows: Vec<PgWireResult<_>> = users
        .into_iter()
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&u.id.to_string())?;
            encoder.encode_field(&u.name)?;
            encoder.encode_field(&u.email)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Item row without snapshot or comments, for writes and search hits.
fn bare_view(item: Item) -> ItemView {
    ItemView {
        item,
        snapshot: None,
        comments: Vec::new(),
    }
}

fn item_rows(views: Vec<ItemView>) -> PgWireResult<Response> {
    let schema = Arc::new(items_schema());
    let mut rows: Vec<PgWireResult<_>> = Vec::with_capacity(views.len());
    for view in views {
        let last = view.snapshot.as_ref().and_then(|s| s.last_booking.as_ref());
        let next = view.snapshot.as_ref().and_then(|s| s.next_booking.as_ref());
        let last = last.map(to_json).transpose()?;
        let next = next.map(to_json).transpose()?;
        let comments = to_json(&view.comments)?;

        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&view.item.id.to_string())?;
        encoder.encode_field(&view.item.owner_id.to_string())?;
        encoder.encode_field(&view.item.name)?;
        encoder.encode_field(&view.item.description)?;
        encoder.encode_field(&view.item.available)?;
        encoder.encode_field(&last)?;
        encoder.encode_field(&next)?;
        encoder.encode_field(&comments)?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(views: Vec<BookingView>) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = views
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.item.id.to_string())?;
            encoder.encode_field(&b.item.name)?;
            encoder.encode_field(&b.booker.id.to_string())?;
            encoder.encode_field(&b.booker.name)?;
            encoder.encode_field(&b.start)?;
            encoder.encode_field(&b.end)?;
            encoder.encode_field(&b.status.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn comment_rows(comments: Vec<CommentInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(comments_schema());
    let rows: Vec<PgWireResult<_>> = comments
        .into_iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.id.to_string())?;
            encoder.encode_field(&c.item_id.to_string())?;
            encoder.encode_field(&c.author_name)?;
            encoder.encode_field(&c.text)?;
            encoder.encode_field(&c.created)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "58030".into(),
            format!("encoding error: {e}"),
        )))
    })
}

#[async_trait]
impl SimpleQueryHandler for ShareItHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ShareItQueryParser;

#[async_trait]
impl QueryParser for ShareItQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ShareItHandler {
    type Statement = String;
    type QueryParser = ShareItQueryParser;

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
        self.run(client, &sql).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_sql(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
/// Byte range and index of every `$N` placeholder, left to right.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let dollar = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[dollar + 1..i].parse::<usize>() {
                found.push((dollar..i, n));
            }
        } else {
            i += 1;
        }
    }
    found
}

fn count_params(sql: &str) -> usize {
    placeholders(sql)
        .into_iter()
        .map(|(_, n)| n)
        .max()
        .unwrap_or(0)
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Only the statement text is scanned; bound values are copied in verbatim
/// as quoted literals.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ShareItFactory {
    handler: Arc<ShareItHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ShareItAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ShareItFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ShareItAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ShareItHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ShareItFactory {
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
    engine: Arc<Engine>,
    password: String,
) -> io::Result<()> {
    let factory = Arc::new(ShareItFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "P0002",
        ErrorKind::InvalidRequest => "22023",
        ErrorKind::Conflict => "23505",
        ErrorKind::Internal => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.kind()).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
