use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;

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
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::auth::SharedPasswordAuthSource;
use crate::engine::{Ledger, LedgerError};
use crate::model::*;
use crate::sql::{self, Command};

/// The one ledger of the process. Each statement holds the lock for its whole run.
pub type SharedLedger = Arc<Mutex<Ledger>>;

pub struct SplitroomHandler {
    ledger: SharedLedger,
    query_parser: Arc<SplitroomQueryParser>,
}

impl SplitroomHandler {
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            query_parser: Arc::new(SplitroomQueryParser),
        }
    }

    /// Run one statement. `format` is the result format the client asked for.
    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.run(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let mut ledger = self.ledger.lock().await;
        match cmd {
            Command::Register(request) => {
                let id = ledger.register(request).map_err(ledger_err)?;
                let schema = Arc::new(id_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&id.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Cancel { id } => {
                ledger.cancel(id).map_err(ledger_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::ListReservations { date, active_only } => {
                let reservations = if active_only {
                    ledger.list_active(date)
                } else {
                    ledger.list(date)
                };
                drop(ledger);

                let schema = Arc::new(reservation_schema(format));
                let rows: Vec<PgWireResult<_>> = reservations
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.section.as_str())?;
                        encoder.encode_field(&r.date.to_string())?;
                        encoder.encode_field(&format_hhmm(r.span.start))?;
                        encoder.encode_field(&format_hhmm(r.span.end))?;
                        encoder.encode_field(&r.owner)?;
                        encoder.encode_field(&r.purpose)?;
                        encoder.encode_field(&r.contact)?;
                        encoder.encode_field(&if r.is_active() { "active" } else { "cancelled" })?;
                        encoder.encode_field(
                            &r.cancelled_on().map(|at| at.format("%Y-%m-%dT%H:%M:%S").to_string()),
                        )?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectOccupancy { date } => {
                let view = ledger.occupancy(date);
                drop(ledger);

                let schema = Arc::new(occupancy_schema(format));
                let rows: Vec<PgWireResult<_>> = view
                    .slots
                    .iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&format_hhmm(slot.span.start))?;
                        encoder.encode_field(&slot.front.as_str())?;
                        encoder.encode_field(&slot.rear.as_str())?;
                        encoder.encode_field(&slot.both)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { date, half } => {
                let free = ledger.free_spans(date, half);
                drop(ledger);

                let schema = Arc::new(availability_schema(format));
                let rows: Vec<PgWireResult<_>> = free
                    .iter()
                    .map(|span| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&half.as_str())?;
                        encoder.encode_field(&format_hhmm(span.start))?;
                        encoder.encode_field(&format_hhmm(span.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn id_schema(format: &Format) -> Vec<FieldInfo> {
    fields(&[("id", Type::VARCHAR)], format)
}

fn reservation_schema(format: &Format) -> Vec<FieldInfo> {
    let columns: Vec<(&str, Type)> = [
        "id", "section", "date", "start", "end", "owner", "purpose", "contact", "status",
        "cancelled_on",
    ]
    .into_iter()
    .map(|name| (name, Type::VARCHAR))
    .collect();
    fields(&columns, format)
}

fn occupancy_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("slot", Type::VARCHAR),
            ("front", Type::VARCHAR),
            ("rear", Type::VARCHAR),
            ("both", Type::BOOL),
        ],
        format,
    )
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[("section", Type::VARCHAR), ("start", Type::VARCHAR), ("end", Type::VARCHAR)],
        format,
    )
}

/// Result columns for a statement, judged from its text (it may still hold `$N` placeholders).
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("INSERT") {
        id_schema(format)
    } else if !upper.contains("SELECT") {
        vec![]
    } else if upper.contains("OCCUPANCY") {
        occupancy_schema(format)
    } else if upper.contains("AVAILABILITY") {
        availability_schema(format)
    } else if upper.contains("RESERVATIONS") {
        reservation_schema(format)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SplitroomHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        tracing::debug!("simple query: {query}");
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(cmd, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SplitroomQueryParser;

#[async_trait]
impl QueryParser for SplitroomQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SplitroomHandler {
    type Statement = String;
    type QueryParser = SplitroomQueryParser;

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
        tracing::debug!("extended query: {sql}");
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self
            .execute_command(cmd, &portal.result_column_format)
            .await?;
        Ok(responses.remove(0))
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
            result_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// `$N` placeholders outside quoted literals, as (byte range, N).
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>()
                    && n > 0
                {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text_params(&portal.statement.statement, &params)
}

/// Splice quoted parameter values into the statement in one pass over the
/// original text. Substituted values are never rescanned.
fn substitute_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = params.get(n - 1) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(text) => {
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

pub struct SplitroomFactory {
    handler: Arc<SplitroomHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SplitroomFactory {
    pub fn new(ledger: SharedLedger, password: String) -> Self {
        let auth_source = SharedPasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SplitroomHandler::new(ledger)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SplitroomFactory {
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
    ledger: SharedLedger,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SplitroomFactory::new(ledger, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn ledger_err(e: LedgerError) -> PgWireError {
    let code = match &e {
        LedgerError::Validation(_) => "22023",
        LedgerError::Conflict { .. } => "23P01",
        LedgerError::NotFound(_) => "P0002",
        LedgerError::NotSaved { .. } => "58030",
        LedgerError::LimitExceeded(_) => "54000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM occupancy WHERE date = $1"), 1);
        assert_eq!(count_params("INSERT INTO reservations VALUES ($1, $2, $3, $4, $10)"), 10);
        assert_eq!(count_params("SELECT * FROM reservations"), 0);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let sql = "INSERT INTO reservations VALUES ($1, $2, $3, $4, $5, $6)";
        let params = vec![
            Some("front".to_string()),
            Some("2025-04-01".to_string()),
            Some("10:00".to_string()),
            Some("11:00".to_string()),
            Some("O'Brien".to_string()),
            None,
        ];
        assert_eq!(
            substitute_text_params(sql, &params),
            "INSERT INTO reservations VALUES ('front', '2025-04-01', '10:00', '11:00', 'O''Brien', NULL)"
        );
    }

    #[test]
    fn substitute_high_index_first() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        assert_eq!(substitute_text_params("$1 $10", &params), "'1' '10'");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let sql = "INSERT INTO reservations (section, owner, purpose) VALUES ($1, $2, $3)";
        let params = vec![
            Some("front".to_string()),
            Some("Tanaka".to_string()),
            Some("costs $1, or $2 for O'Brien".to_string()),
        ];
        assert_eq!(
            substitute_text_params(sql, &params),
            "INSERT INTO reservations (section, owner, purpose) VALUES ('front', 'Tanaka', 'costs $1, or $2 for O''Brien')"
        );
    }

    #[test]
    fn dollar_inside_literal_is_not_a_placeholder() {
        let sql = "SELECT * FROM reservations WHERE date = $1 AND owner = 'pays $2'";
        assert_eq!(count_params(sql), 1);
        let params = vec![Some("2025-04-01".to_string())];
        assert_eq!(
            substitute_text_params(sql, &params),
            "SELECT * FROM reservations WHERE date = '2025-04-01' AND owner = 'pays $2'"
        );
    }

    #[test]
    fn result_schema_by_statement() {
        let text = Format::UnifiedText;
        assert_eq!(result_schema("INSERT INTO reservations VALUES ($1)", &text).len(), 1);
        assert_eq!(result_schema("SELECT * FROM occupancy WHERE date = $1", &text).len(), 4);
        assert_eq!(result_schema("select * from availability where date = $1", &text).len(), 3);
        assert_eq!(result_schema("SELECT * FROM reservations WHERE date = $1", &text).len(), 10);
        assert!(result_schema("DELETE FROM reservations WHERE id = $1", &text).is_empty());
    }

    #[test]
    fn result_schema_follows_requested_format() {
        let binary = result_schema("SELECT * FROM occupancy WHERE date = $1", &Format::UnifiedBinary);
        assert!(binary.iter().all(|f| f.format() == FieldFormat::Binary));
        assert_eq!(binary[3].datatype(), &Type::BOOL);

        let text = result_schema("SELECT * FROM occupancy WHERE date = $1", &Format::UnifiedText);
        assert!(text.iter().all(|f| f.format() == FieldFormat::Text));
    }

    #[test]
    fn ledger_errors_map_to_sqlstate() {
        let id = ulid::Ulid::new();
        let err = ledger_err(LedgerError::Conflict { half: Half::Rear, with: id });
        match err {
            PgWireError::UserError(info) => {
                assert_eq!(info.code, "23P01");
                assert!(info.message.contains("rear"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
