//! Connection parameters parsed from a `postgres://` URL or a key=value DSN

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Port used when a URL or DSN does not name one
pub const DEFAULT_PORT: u16 = 5432;

const URL_SCHEMES: [&str; 2] = ["postgres", "postgresql"];

/// Driver-level connection parameters
///
/// # Examples
///
/// ```
/// use sqlx_pg_conn_mgr::ConnectionParams;
///
/// let params = ConnectionParams::parse("postgres://jdoe@localhost/testdb").unwrap();
/// assert_eq!(params.dbname, "testdb");
/// assert_eq!(params.user.as_deref(), Some("jdoe"));
/// assert_eq!(params.port, 5432);
/// assert_eq!(params.to_dsn(), "dbname=testdb user=jdoe host=localhost port=5432");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
   pub dbname: String,
   pub user: Option<String>,
   pub password: Option<String>,
   pub host: Option<String>,
   pub port: u16,
}

impl ConnectionParams {
   /// Parse either a `postgres://` / `postgresql://` URL or a DSN string
   pub fn parse(conninfo: &str) -> Result<Self> {
      let conninfo = conninfo.trim();
      let is_url = URL_SCHEMES
         .iter()
         .any(|scheme| conninfo.starts_with(&format!("{scheme}://")));

      if is_url {
         Self::from_url(conninfo)
      } else {
         Self::from_dsn(conninfo)
      }
   }

   /// Parse `postgres://[user[:password]@]host[:port]/dbname`
   ///
   /// User and password are percent-decoded. Query parameters are ignored.
   pub fn from_url(url: &str) -> Result<Self> {
      let parsed = Url::parse(url)
         .map_err(|e| Error::Configuration(format!("invalid connection URL: {e}")))?;

      if !URL_SCHEMES.contains(&parsed.scheme()) {
         return Err(Error::Configuration(format!(
            "unsupported URL scheme '{}', expected postgres://",
            parsed.scheme()
         )));
      }

      let dbname = percent_decode(parsed.path().trim_start_matches('/'))?;
      if dbname.is_empty() {
         return Err(Error::Configuration(
            "connection URL does not name a database".to_string(),
         ));
      }

      let user = match parsed.username() {
         "" => None,
         name => Some(percent_decode(name)?),
      };
      let password = parsed.password().map(percent_decode).transpose()?;
      let host = parsed
         .host_str()
         .filter(|h| !h.is_empty())
         .map(str::to_string);

      Ok(Self {
         dbname,
         user,
         password,
         host,
         port: parsed.port().unwrap_or(DEFAULT_PORT),
      })
   }

   /// Parse a libpq-style DSN such as `dbname=testdb user=jdoe port=5433`
   ///
   /// Values may be single-quoted; inside or outside quotes a backslash
   /// escapes the next character.
   pub fn from_dsn(dsn: &str) -> Result<Self> {
      let mut dbname = None;
      let mut user = None;
      let mut password = None;
      let mut host = None;
      let mut port = DEFAULT_PORT;

      for (key, value) in parse_pairs(dsn)? {
         match key.as_str() {
            "dbname" => dbname = Some(value),
            "user" => user = Some(value),
            "password" => password = Some(value),
            "host" => host = Some(value),
            "port" => {
               port = value
                  .parse()
                  .map_err(|_| Error::Configuration(format!("invalid port '{value}'")))?;
            }
            other => {
               return Err(Error::Configuration(format!(
                  "unknown connection option '{other}'"
               )));
            }
         }
      }

      let dbname = dbname
         .filter(|name| !name.is_empty())
         .ok_or_else(|| Error::Configuration("DSN does not name a database".to_string()))?;

      Ok(Self {
         dbname,
         user,
         password,
         host,
         port,
      })
   }

   /// Render as a DSN string. Absent fields are omitted.
   pub fn to_dsn(&self) -> String {
      self.render(self.password.as_deref())
   }

   fn render(&self, password: Option<&str>) -> String {
      let mut pairs = vec![format!("dbname={}", quote_value(&self.dbname))];
      if let Some(user) = &self.user {
         pairs.push(format!("user={}", quote_value(user)));
      }
      if let Some(password) = password {
         pairs.push(format!("password={}", quote_value(password)));
      }
      if let Some(host) = &self.host {
         pairs.push(format!("host={}", quote_value(host)));
      }
      pairs.push(format!("port={}", self.port));
      pairs.join(" ")
   }
}

/// DSN form with the password masked, safe for logs
impl fmt::Display for ConnectionParams {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let masked = self.password.as_ref().map(|_| "***");
      f.write_str(&self.render(masked))
   }
}

impl FromStr for ConnectionParams {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self> {
      Self::parse(s)
   }
}

fn percent_decode(s: &str) -> Result<String> {
   urlencoding::decode(s)
      .map(|decoded| decoded.into_owned())
      .map_err(|e| Error::Configuration(format!("invalid percent-encoding in URL: {e}")))
}

fn quote_value(value: &str) -> String {
   let needs_quotes = value.is_empty()
      || value
         .chars()
         .any(|c| c.is_whitespace() || c == '\'' || c == '\\');

   if !needs_quotes {
      return value.to_string();
   }

   let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
   format!("'{escaped}'")
}

fn parse_pairs(dsn: &str) -> Result<Vec<(String, String)>> {
   let mut pairs = Vec::new();
   let mut chars = dsn.chars().peekable();

   loop {
      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      if chars.peek().is_none() {
         break;
      }

      let mut key = String::new();
      while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
         key.push(c);
      }
      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      if chars.next() != Some('=') {
         return Err(Error::Configuration(format!(
            "missing '=' after '{key}' in connection string"
         )));
      }
      while chars.next_if(|c| c.is_whitespace()).is_some() {}

      let mut value = String::new();
      if chars.next_if_eq(&'\'').is_some() {
         loop {
            match chars.next() {
               Some('\\') => match chars.next() {
                  Some(escaped) => value.push(escaped),
                  None => break,
               },
               Some('\'') => break,
               Some(c) => value.push(c),
               None => {
                  return Err(Error::Configuration(format!(
                     "unterminated quoted value for '{key}'"
                  )));
               }
            }
         }
      } else {
         while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
            if c == '\\' {
               if let Some(escaped) = chars.next() {
                  value.push(escaped);
               }
            } else {
               value.push(c);
            }
         }
      }

      pairs.push((key, value));
   }

   Ok(pairs)
}
