//! Parsing of the `host[:port][/db]` store address used on the command line.

use super::StoreError;
use core::fmt;

const DEFAULT_PORT: u16 = 6379;

/// A Redis connection target.
///
/// Operators configure the store as `host[:port][/db]` with the password
/// supplied separately, which keeps secrets out of the address string.
///
/// ```
/// use ndjson_relay_core::store::RedisTarget;
///
/// let target = RedisTarget::parse("10.0.0.5:6380/2", None).unwrap();
/// assert_eq!(target.to_url(), "redis://10.0.0.5:6380/2");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct RedisTarget {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl RedisTarget {
    /// Parses `host[:port][/db]`. Missing parts default to port 6379 and
    /// database 0. An empty password is treated as no password.
    pub fn parse(raw: &str, password: Option<&str>) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        let (address, db) = match trimmed.split_once('/') {
            Some((address, db)) => {
                let db = db
                    .parse::<i64>()
                    .map_err(|_| invalid("database must be a non-negative integer"))?;
                if db < 0 {
                    return Err(invalid("database must be a non-negative integer"));
                }
                (address, db)
            }
            None => (trimmed, 0),
        };

        let (host, port) = match address.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
                (host, port)
            }
            None => (address, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(invalid("host is empty"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            db,
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    /// Renders the target as a `redis://` URL understood by the client.
    pub fn to_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                self.host,
                self.port,
                self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

// Never print the password.
impl fmt::Display for RedisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.db)
    }
}

impl fmt::Debug for RedisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_target() {
        let target = RedisTarget::parse("127.0.0.1:6379/1", None).unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 6379);
        assert_eq!(target.db, 1);
        assert_eq!(target.password, None);
    }

    #[test]
    fn fills_in_defaults() {
        let target = RedisTarget::parse("redis.internal", None).unwrap();
        assert_eq!(target.port, 6379);
        assert_eq!(target.db, 0);

        let target = RedisTarget::parse("redis.internal/4", None).unwrap();
        assert_eq!(target.port, 6379);
        assert_eq!(target.db, 4);
    }

    #[test]
    fn empty_password_means_none() {
        let target = RedisTarget::parse("localhost:6379", Some("")).unwrap();
        assert_eq!(target.password, None);
    }

    #[test]
    fn url_encodes_password() {
        let target = RedisTarget::parse("localhost:6379/1", Some("p@ss/word")).unwrap();
        assert_eq!(target.to_url(), "redis://:p%40ss%2Fword@localhost:6379/1");
    }

    #[test]
    fn display_and_debug_hide_password() {
        let target = RedisTarget::parse("localhost:6379/1", Some("hunter2")).unwrap();
        assert_eq!(target.to_string(), "localhost:6379/1");
        assert!(!format!("{target:?}").contains("hunter2"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(RedisTarget::parse("", None).is_err());
        assert!(RedisTarget::parse(":6379", None).is_err());
        assert!(RedisTarget::parse("localhost:http", None).is_err());
        assert!(RedisTarget::parse("localhost:6379/x", None).is_err());
        assert!(RedisTarget::parse("localhost:6379/-1", None).is_err());
    }
}
