//! Column value decoding into JSON for each backend

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rust_decimal::prelude::ToPrimitive;
use serde_json::Value as JsonValue;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgTypeKind, PgValue, PgValueRef, Postgres};
use sqlx::sqlite::SqliteValueRef;
use sqlx::types::Decimal;
use sqlx::{Decode, Type, TypeInfo, Value, ValueRef};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::Error;

/// Convert a PostgreSQL value to a JSON value.
///
/// Integers and floats become numbers, JSON/JSONB is passed through, and
/// UUID, date and time types are rendered as strings. NUMERIC becomes a
/// number when it converts without overflow, otherwise its decimal text.
/// INTERVAL is rendered as an ISO 8601 duration and INET/CIDR in the usual
/// address notation. One-dimensional arrays of the scalar types above become
/// JSON arrays. BYTEA is returned as base64 since JSON has no binary type.
///
/// Enum labels are returned as strings. Any other type is rejected with
/// [`Error::UnsupportedDatatype`]; cast the column to `text` in the query.
pub fn pg_to_json(value: PgValueRef) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_info = value.type_info();
   let type_name = type_info.name();
   let owned = ValueRef::to_owned(&value);

   let decoded = match type_name {
      "BOOL" => owned.try_decode::<bool>().map(JsonValue::Bool),
      "INT2" => owned.try_decode::<i16>().map(JsonValue::from),
      "INT4" => owned.try_decode::<i32>().map(JsonValue::from),
      "INT8" => owned.try_decode::<i64>().map(JsonValue::from),
      "FLOAT4" => owned.try_decode::<f32>().map(|v| JsonValue::from(f64::from(v))),
      "FLOAT8" => owned.try_decode::<f64>().map(JsonValue::from),
      "NUMERIC" => owned.try_decode::<Decimal>().map(decimal_to_json),
      "OID" => owned.try_decode::<Oid>().map(|v| JsonValue::from(v.0)),
      "\"CHAR\"" => owned
         .try_decode::<i8>()
         .map(|v| JsonValue::String(char::from(v as u8).to_string())),
      "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => owned.try_decode::<String>().map(JsonValue::String),
      "JSON" | "JSONB" => owned.try_decode::<JsonValue>(),
      "UUID" => owned
         .try_decode::<sqlx::types::Uuid>()
         .map(|v| JsonValue::String(v.to_string())),
      "TIMESTAMP" => owned
         .try_decode::<PrimitiveDateTime>()
         .map(|v| JsonValue::String(v.to_string())),
      "TIMESTAMPTZ" => owned
         .try_decode::<OffsetDateTime>()
         .map(|v| JsonValue::String(v.to_string())),
      "DATE" => owned
         .try_decode::<Date>()
         .map(|v| JsonValue::String(v.to_string())),
      "TIME" => owned
         .try_decode::<Time>()
         .map(|v| JsonValue::String(v.to_string())),
      "INTERVAL" => owned
         .try_decode::<PgInterval>()
         .map(|v| JsonValue::String(interval_to_iso8601(&v))),
      "INET" | "CIDR" => {
         return value
            .as_bytes()
            .ok()
            .and_then(inet_to_string)
            .map(JsonValue::String)
            .ok_or_else(|| {
               Error::UnsupportedDatatype(format!("cannot decode PostgreSQL {type_name}: malformed address"))
            });
      }
      "BYTEA" => owned
         .try_decode::<Vec<u8>>()
         .map(|v| JsonValue::String(base64_encode(&v))),
      "BOOL[]" => decode_array::<bool>(&owned),
      "INT2[]" => decode_array::<i16>(&owned),
      "INT4[]" => decode_array::<i32>(&owned),
      "INT8[]" => decode_array::<i64>(&owned),
      "FLOAT4[]" => decode_array::<f32>(&owned),
      "FLOAT8[]" => decode_array::<f64>(&owned),
      "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => decode_array::<String>(&owned),
      "NUMERIC[]" => owned.try_decode::<Vec<Option<Decimal>>>().map(|items| {
         JsonValue::Array(
            items
               .into_iter()
               .map(|item| item.map_or(JsonValue::Null, decimal_to_json))
               .collect(),
         )
      }),
      "VOID" => Ok(JsonValue::Null),

      // enum values travel as their label in both wire formats
      _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
         owned.try_decode_unchecked::<String>().map(JsonValue::String)
      }

      _ => {
         return Err(Error::UnsupportedDatatype(format!(
            "cannot decode PostgreSQL {type_name}; cast the column to text"
         )));
      }
   };

   decoded.map_err(|e| {
      Error::UnsupportedDatatype(format!("cannot decode PostgreSQL {type_name}: {e}"))
   })
}

fn decode_array<T>(owned: &PgValue) -> Result<JsonValue, sqlx::Error>
where
   T: Into<JsonValue>,
   Vec<Option<T>>: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
   owned.try_decode::<Vec<Option<T>>>().map(JsonValue::from)
}

/// Integral values that fit `i64` become JSON integers, the rest go
/// through `f64`.
fn decimal_to_json(value: Decimal) -> JsonValue {
   if value.fract().is_zero()
      && let Some(i) = value.to_i64()
   {
      return JsonValue::from(i);
   }

   value
      .to_f64()
      .filter(|f| f.is_finite())
      .map(JsonValue::from)
      .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

/// Render an interval as an ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
///
/// Each component keeps its own sign, the way PostgreSQL's `iso_8601`
/// interval style prints them.
fn interval_to_iso8601(interval: &PgInterval) -> String {
   const MICROS_PER_SECOND: i64 = 1_000_000;
   const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
   const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

   let years = interval.months / 12;
   let months = interval.months % 12;
   let hours = interval.microseconds / MICROS_PER_HOUR;
   let minutes = interval.microseconds % MICROS_PER_HOUR / MICROS_PER_MINUTE;
   let micros = interval.microseconds % MICROS_PER_MINUTE;

   let mut out = String::from("P");
   for (amount, unit) in [(years, 'Y'), (months, 'M'), (interval.days, 'D')] {
      if amount != 0 {
         out.push_str(&format!("{amount}{unit}"));
      }
   }

   if hours != 0 || minutes != 0 || micros != 0 {
      out.push('T');
      if hours != 0 {
         out.push_str(&format!("{hours}H"));
      }
      if minutes != 0 {
         out.push_str(&format!("{minutes}M"));
      }
      if micros != 0 {
         let sign = if micros < 0 { "-" } else { "" };
         let abs = micros.unsigned_abs();
         let whole = abs / MICROS_PER_SECOND as u64;
         let frac = abs % MICROS_PER_SECOND as u64;
         if frac == 0 {
            out.push_str(&format!("{sign}{whole}S"));
         } else {
            let frac = format!("{frac:06}");
            out.push_str(&format!("{sign}{whole}.{}S", frac.trim_end_matches('0')));
         }
      }
   }

   if out.len() == 1 {
      out.push_str("T0S");
   }
   out
}

/// Decode the binary INET/CIDR layout: family, prefix bits, is_cidr flag,
/// address length, then the address bytes.
///
/// Host addresses print without a prefix, as PostgreSQL does for `inet`.
fn inet_to_string(bytes: &[u8]) -> Option<String> {
   const PGSQL_AF_INET: u8 = 2;
   const PGSQL_AF_INET6: u8 = 3;

   let (&[family, bits, is_cidr, len], addr) = bytes.split_first_chunk::<4>()?;
   if addr.len() != usize::from(len) {
      return None;
   }

   let (ip, full): (IpAddr, u8) = match family {
      PGSQL_AF_INET => (Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?).into(), 32),
      PGSQL_AF_INET6 => (Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?).into(), 128),
      _ => return None,
   };

   if is_cidr == 0 && bits == full {
      Some(ip.to_string())
   } else {
      Some(format!("{ip}/{bits}"))
   }
}

/// Convert a SQLite value to a JSON value.
///
/// Follows SQLite's type affinity. BLOB values are returned as base64;
/// booleans are stored as INTEGER unless the column is declared BOOLEAN.
pub fn sqlite_to_json(value: SqliteValueRef) -> Result<JsonValue, Error> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_info = value.type_info();
   let type_name = type_info.name();
   let owned = ValueRef::to_owned(&value);

   let decoded = match type_name {
      "NULL" => Ok(JsonValue::Null),
      "INTEGER" => owned.try_decode::<i64>().map(JsonValue::from),
      "REAL" => owned.try_decode::<f64>().map(JsonValue::from),
      "BOOLEAN" => owned.try_decode::<bool>().map(JsonValue::Bool),

      // NUMERIC affinity keeps whichever of integer or real fits
      "NUMERIC" => owned
         .try_decode::<i64>()
         .map(JsonValue::from)
         .or_else(|_| owned.try_decode::<f64>().map(JsonValue::from)),

      "DATETIME" => owned
         .try_decode::<PrimitiveDateTime>()
         .map(|v| JsonValue::String(v.to_string()))
         .or_else(|_| owned.try_decode::<String>().map(JsonValue::String)),

      "BLOB" => owned
         .try_decode::<Vec<u8>>()
         .map(|v| JsonValue::String(base64_encode(&v))),

      // TEXT, DATE and TIME are all stored as text
      _ => owned.try_decode::<String>().map(JsonValue::String),
   };

   decoded.map_err(|e| Error::UnsupportedDatatype(format!("cannot decode SQLite {type_name}: {e}")))
}

/// Base64 encode binary data for JSON serialization.
fn base64_encode(data: &[u8]) -> String {
   use base64::Engine;
   base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
   use super::*;

   use serde_json::json;

   #[test]
   fn test_base64_encode() {
      assert_eq!(base64_encode(b"hello"), "aGVsbG8=");
      assert_eq!(base64_encode(&[0, 0, 0]), "AAAA");
      assert_eq!(base64_encode(&[]), "");
   }

   #[test]
   fn test_decimal_to_json() {
      assert_eq!(decimal_to_json(Decimal::new(15, 1)), json!(1.5));
      assert_eq!(decimal_to_json(Decimal::new(-42, 0)), json!(-42));

      // avg() over integers comes back with a long zero tail
      assert_eq!(decimal_to_json(Decimal::new(15_000_000_000_000_000, 16)), json!(1.5));
      assert_eq!(decimal_to_json(Decimal::new(600, 2)), json!(6));

      // integral but wider than i64
      assert_eq!(decimal_to_json(Decimal::MAX), json!(Decimal::MAX.to_f64().unwrap()));
   }

   #[test]
   fn test_interval_to_iso8601() {
      let interval = |months, days, microseconds| PgInterval {
         months,
         days,
         microseconds,
      };

      assert_eq!(interval_to_iso8601(&interval(0, 0, 0)), "PT0S");
      assert_eq!(interval_to_iso8601(&interval(14, 3, 0)), "P1Y2M3D");
      assert_eq!(
         interval_to_iso8601(&interval(0, 0, 4 * 3_600_000_000 + 5 * 60_000_000 + 6_500_000)),
         "PT4H5M6.5S"
      );
      assert_eq!(interval_to_iso8601(&interval(-1, 0, -500_000)), "P-1MT-0.5S");
   }

   #[test]
   fn test_inet_to_string() {
      assert_eq!(inet_to_string(&[2, 32, 0, 4, 192, 168, 0, 1]).as_deref(), Some("192.168.0.1"));
      assert_eq!(inet_to_string(&[2, 24, 1, 4, 10, 0, 0, 0]).as_deref(), Some("10.0.0.0/24"));

      let mut v6 = vec![3, 128, 0, 16];
      v6.extend_from_slice(&[0; 15]);
      v6.push(1);
      assert_eq!(inet_to_string(&v6).as_deref(), Some("::1"));

      assert_eq!(inet_to_string(&[2, 32, 0, 4, 1, 2]), None);
      assert_eq!(inet_to_string(&[9, 32, 0, 0]), None);
   }
}
