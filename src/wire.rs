use std::fmt::Debug;
use std::io;
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

use crate::auth::KennelAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct KennelHandler {
    engine: Arc<Engine>,
    query_parser: Arc<KennelQueryParser>,
}

impl KennelHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(KennelQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd).await;
        observability::record_query(label, result.is_ok(), start.elapsed());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::CreateOwner { id, name, email } => {
                engine.create_owner(id, name, email).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::RegisterKennel(new) => {
                engine.register_kennel(new).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::AddDog(new) => {
                engine.add_dog(new).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::PublishAvailability {
                id,
                kennel_id,
                start,
                days,
            } => {
                engine
                    .publish_availability(id, kennel_id, start, days)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::BookKennel {
                id,
                owner_id,
                dog_id,
                kennel_id,
                check_in,
                check_out,
            } => {
                engine
                    .book_kennel(id, owner_id, dog_id, kennel_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::ReviewBooking {
                booking_id,
                owner_id,
                rating,
                text,
            } => {
                engine
                    .review_booking(booking_id, owner_id, rating, text)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectAvailableKennels {
                owner_id,
                dog_id,
                check_in,
                check_out,
                kennel_id,
            } => {
                let mut kennels = engine
                    .query_available_kennels(owner_id, dog_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                if let Some(kennel_id) = kennel_id {
                    kennels.retain(|k| k.id == kennel_id);
                }
                rows(kennel_schema(), &kennels, encode_kennel)
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                rows(booking_schema(), &[booking], encode_booking)
            }
            Command::SelectBookingsForOwner { owner_id } => {
                let bookings = engine.list_bookings_for_owner(owner_id).await.map_err(engine_err)?;
                rows(booking_schema(), &bookings, encode_booking)
            }
            Command::SelectBookingsForHost { host_id } => {
                let bookings = engine.list_bookings_for_host(host_id).await.map_err(engine_err)?;
                rows(booking_schema(), &bookings, encode_booking)
            }
            Command::SelectKennelsForHost { host_id } => {
                let kennels = engine.list_kennels_for_host(host_id).await.map_err(engine_err)?;
                rows(kennel_schema(), &kennels, encode_kennel)
            }
            Command::SelectDogsForOwner { owner_id } => {
                let dogs = engine.list_dogs_for_owner(owner_id).map_err(engine_err)?;
                rows(dog_schema(), &dogs, encode_dog)
            }
            Command::SelectOwnerByEmail { email } => {
                let owner = engine.find_owner_by_email(&email).map_err(engine_err)?;
                rows(owner_schema(), &[owner], encode_owner)
            }
            Command::SelectSchedule { kennel_id } => {
                let entries = engine.kennel_schedule(kennel_id).await.map_err(engine_err)?;
                rows(schedule_schema(), &entries, encode_schedule_entry)
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn owner_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
    ]
}

fn kennel_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("price", Type::FLOAT8),
        field("size", Type::VARCHAR),
        field("has_toys", Type::BOOL),
        field("allow_unsocial", Type::BOOL),
    ]
}

fn dog_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("owner_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("breed", Type::VARCHAR),
        field("size", Type::VARCHAR),
        field("unsocial", Type::BOOL),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("kennel_id", Type::VARCHAR),
        field("kennel_name", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("owner_id", Type::VARCHAR),
        field("dog_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("nights", Type::INT8),
        field("booked_at", Type::VARCHAR),
        field("rating", Type::INT8),
        field("review", Type::VARCHAR),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("kennel_id", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("owner_id", Type::VARCHAR),
        field("dog_id", Type::VARCHAR),
    ]
}

/// Result schema for a statement, by the table it selects from.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("available_kennels" | "kennels") => kennel_schema(),
        Some("bookings") => booking_schema(),
        Some("dogs") => dog_schema(),
        Some("owners") => owner_schema(),
        Some("schedule") => schedule_schema(),
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_owner(encoder: &mut DataRowEncoder, o: &OwnerInfo) -> PgWireResult<()> {
    encoder.encode_field(&o.id.to_string())?;
    encoder.encode_field(&o.name)?;
    encoder.encode_field(&o.email)
}

fn encode_kennel(encoder: &mut DataRowEncoder, k: &KennelInfo) -> PgWireResult<()> {
    encoder.encode_field(&k.id.to_string())?;
    encoder.encode_field(&k.host_id.to_string())?;
    encoder.encode_field(&k.name)?;
    encoder.encode_field(&k.price)?;
    encoder.encode_field(&k.size.to_string())?;
    encoder.encode_field(&k.has_toys)?;
    encoder.encode_field(&k.allow_unsocial)
}

fn encode_dog(encoder: &mut DataRowEncoder, d: &DogInfo) -> PgWireResult<()> {
    encoder.encode_field(&d.id.to_string())?;
    encoder.encode_field(&d.owner_id.to_string())?;
    encoder.encode_field(&d.name)?;
    encoder.encode_field(&d.breed)?;
    encoder.encode_field(&d.size.to_string())?;
    encoder.encode_field(&d.unsocial)
}

fn encode_booking(encoder: &mut DataRowEncoder, b: &BookingInfo) -> PgWireResult<()> {
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.kennel_id.to_string())?;
    encoder.encode_field(&b.kennel_name)?;
    encoder.encode_field(&b.host_id.to_string())?;
    encoder.encode_field(&b.owner_id.to_string())?;
    encoder.encode_field(&b.dog_id.to_string())?;
    encoder.encode_field(&b.check_in.to_string())?;
    encoder.encode_field(&b.check_out.to_string())?;
    encoder.encode_field(&b.nights())?;
    encoder.encode_field(&b.booked_at.map(|t| t.to_rfc3339()))?;
    encoder.encode_field(&b.review.as_ref().map(|r| i64::from(r.rating)))?;
    encoder.encode_field(&b.review.as_ref().and_then(|r| r.text.clone()))
}

fn encode_schedule_entry(encoder: &mut DataRowEncoder, e: &ScheduleEntry) -> PgWireResult<()> {
    encoder.encode_field(&e.id.to_string())?;
    encoder.encode_field(&e.kennel_id.to_string())?;
    encoder.encode_field(&e.start.to_string())?;
    encoder.encode_field(&e.end.to_string())?;
    let status = if e.occupant.is_some() { "booked" } else { "free" };
    encoder.encode_field(&status.to_string())?;
    encoder.encode_field(&e.occupant.map(|o| o.owner_id.to_string()))?;
    encoder.encode_field(&e.occupant.map(|o| o.dog_id.to_string()))
}

#[async_trait]
impl SimpleQueryHandler for KennelHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct KennelQueryParser;

#[async_trait]
impl QueryParser for KennelQueryParser {
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
impl ExtendedQueryHandler for KennelHandler {
    type Statement = String;
    type QueryParser = KennelQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        self.run(&sql).await
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
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1, $2, ...` with bound parameter values as quoted text literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_text_params(&portal.statement.statement, &params)
}

/// One left-to-right pass: bound text is copied out, never rescanned, so a
/// value containing `$N` stays literal.
fn bind_text_params(sql: &str, params: &[Option<String>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let digits = i + 1;
        let mut end = digits;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[digits..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| params.get(n));
        if let Some(param) = param {
            out.push_str(&sql[copied..i]);
            match param {
                Some(text) => {
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                None => out.push_str("NULL"),
            }
            copied = end;
        }
        i = end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct KennelFactory {
    handler: Arc<KennelHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<KennelAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl KennelFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = KennelAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(KennelHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for KennelFactory {
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
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(KennelFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for an engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e.kind() {
        ErrorKind::Validation => "22023",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => "23P01",
        ErrorKind::Storage => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE owner_id = $1"), 1);
        assert_eq!(count_params("INSERT INTO bookings VALUES ($1, $2, $3, $4, $5, $10)"), 10);
        assert_eq!(count_params("SELECT * FROM owners WHERE email = 'a$b@c.d'"), 0);
    }

    #[test]
    fn bind_quotes_text_and_nulls() {
        let sql = bind_text_params(
            "INSERT INTO reviews VALUES ($1, $2, $3, $4)",
            &[Some("A".into()), Some("B".into()), Some("5".into()), None],
        );
        assert_eq!(sql, "INSERT INTO reviews VALUES ('A', 'B', '5', NULL)");

        let sql = bind_text_params("SELECT * FROM owners WHERE email = $1", &[Some("o'brien@x.ie".into())]);
        assert_eq!(sql, "SELECT * FROM owners WHERE email = 'o''brien@x.ie'");
    }

    #[test]
    fn bind_does_not_confuse_one_and_ten() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(format!("v{i}"))).collect();
        let sql = bind_text_params("$1 $10", &params);
        assert_eq!(sql, "'v1' 'v10'");
    }

    #[test]
    fn bound_text_is_never_rebound() {
        let sql = bind_text_params(
            "INSERT INTO reviews VALUES ($1, $2, $3, $4)",
            &[
                Some("AAA".into()),
                Some("BBB".into()),
                Some("5".into()),
                Some("worth every $1, isn't it".into()),
            ],
        );
        assert_eq!(
            sql,
            "INSERT INTO reviews VALUES ('AAA', 'BBB', '5', 'worth every $1, isn''t it')"
        );
    }

    #[test]
    fn unbound_placeholders_and_bare_dollars_are_kept() {
        let sql = bind_text_params("SELECT '$' , $2, $0", &[Some("a".into())]);
        assert_eq!(sql, "SELECT '$' , $2, $0");
    }

    #[test]
    fn error_kinds_map_to_sqlstates() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::Invalid("x")), "22023");
        assert_eq!(sqlstate(&EngineError::KennelNotFound(id)), "P0002");
        assert_eq!(sqlstate(&EngineError::UnsocialNotAllowed(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn result_schema_by_table() {
        let names = |sql: &str| result_schema(sql).iter().map(|f| f.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names("SELECT * FROM owners WHERE email = $1"), vec!["id", "name", "email"]);
        assert_eq!(names("SELECT * FROM available_kennels WHERE owner_id = $1")[3], "price");
        assert_eq!(names("SELECT * FROM schedule WHERE kennel_id = $1")[4], "status");
        assert!(names("INSERT INTO owners VALUES ($1, $2, $3)").is_empty());
    }
}
