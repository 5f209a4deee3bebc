//! PostgreSQL sessions over `sqlx::PgConnection`

use std::fmt;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
   PgArgumentBuffer, PgArguments, PgConnectOptions, PgConnection, PgRow, PgTypeInfo, Postgres,
};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection as _, Encode, Row as _, Type};
use tracing::debug;

use crate::decode::pg_to_json;
use crate::driver::{ConnectionFactory, Driver, Row};
use crate::params::ConnectionParams;
use crate::{Error, Result};

/// Opens PostgreSQL sessions from parsed connection parameters
///
/// Every new session has its client encoding forced to UTF8 before it is
/// handed to the pool.
#[derive(Clone)]
pub struct PgFactory {
   params: ConnectionParams,
   options: PgConnectOptions,
}

impl PgFactory {
   pub fn new(params: ConnectionParams) -> Self {
      let mut options = PgConnectOptions::new()
         .database(&params.dbname)
         .port(params.port);

      if let Some(host) = &params.host {
         options = options.host(host);
      }
      if let Some(user) = &params.user {
         options = options.username(user);
      }
      if let Some(password) = &params.password {
         options = options.password(password);
      }

      Self { params, options }
   }

   pub fn params(&self) -> &ConnectionParams {
      &self.params
   }
}

impl fmt::Debug for PgFactory {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_tuple("PgFactory")
         .field(&self.params.to_string())
         .finish()
   }
}

#[async_trait]
impl ConnectionFactory for PgFactory {
   async fn connect(&self) -> Result<Box<dyn Driver>> {
      let mut conn = self.options.connect().await.map_err(Error::Connect)?;

      sqlx::query("SET client_encoding TO 'UTF8'")
         .execute(&mut conn)
         .await
         .map_err(Error::Connect)?;

      debug!("Opened PostgreSQL session to {}", self.params);
      Ok(Box::new(PgDriver { conn }))
   }
}

struct PgDriver {
   conn: PgConnection,
}

#[async_trait]
impl Driver for PgDriver {
   async fn run(&mut self, sql: &str, params: &[JsonValue]) -> Result<Vec<Row>> {
      let mut query = sqlx::query(sql);
      for value in params {
         query = bind_value(query, value);
      }

      // the server types an unknown NULL from context; caching that plan
      // would pin the inferred type onto later non-NULL binds of the same SQL
      if params.iter().any(JsonValue::is_null) {
         query = query.persistent(false);
      }

      let rows = query
         .fetch_all(&mut self.conn)
         .await
         .map_err(Error::Statement)?;

      rows.iter().map(decode_row).collect()
   }

   async fn close(self: Box<Self>) -> Result<()> {
      self.conn.close().await.map_err(Error::Connect)
   }
}

/// pg_type OID of `unknown`
const UNKNOWN_OID: Oid = Oid(705);

/// A NULL parameter declared as `unknown`, so the server infers its type
/// from where it is used instead of requiring a `text` column.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
   fn type_info() -> PgTypeInfo {
      PgTypeInfo::with_oid(UNKNOWN_OID)
   }
}

impl Encode<'_, Postgres> for UntypedNull {
   fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
      Ok(IsNull::Yes)
   }
}

/// Bind a JSON value as a positional `$n` parameter.
///
/// NULL takes its type from the statement, so it fits any column. Numbers
/// bind as INT8 or FLOAT8 and rely on PostgreSQL's assignment casts for
/// narrower columns. Strings bind as TEXT: parameters travel in binary
/// format, so a string meant for another type needs a cast in the query
/// (`$1::date`). Arrays and objects are sent as JSONB.
fn bind_value<'q>(
   query: Query<'q, Postgres, PgArguments>,
   value: &JsonValue,
) -> Query<'q, Postgres, PgArguments> {
   match value {
      JsonValue::Null => query.bind(UntypedNull),
      JsonValue::Bool(b) => query.bind(*b),
      JsonValue::Number(n) => {
         if let Some(i) = n.as_i64() {
            query.bind(i)
         } else {
            query.bind(n.as_f64().unwrap_or_default())
         }
      }
      JsonValue::String(s) => query.bind(s.clone()),
      JsonValue::Array(_) | JsonValue::Object(_) => query.bind(sqlx::types::Json(value.clone())),
   }
}

fn decode_row(row: &PgRow) -> Result<Row> {
   let mut decoded = Row::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let value = row.try_get_raw(i).map_err(Error::Statement)?;
      decoded.insert(column.name().to_string(), pg_to_json(value)?);
   }
   Ok(decoded)
}
