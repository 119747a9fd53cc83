use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use ndjson_relay_core::{
    RelayConfig, Sentinels,
    relay::{DEFAULT_LINE_PAUSE, DEFAULT_MAX_IDLE_TIME, DEFAULT_POLL_INTERVAL, DEFAULT_SENTINELS},
    store::RedisTarget,
    task::{DEFAULT_CHANNEL, DEFAULT_KEY_PREFIX, DEFAULT_LIST_PREFIX, DEFAULT_TASK_TTL, KeyScheme},
};
use std::net::{IpAddr, SocketAddr};

/// Runtime configuration for the `ndjson-relay-server` binary.
///
/// Every setting can be given on the command line or through the environment
/// (a `.env` file in the working directory is loaded first). Command-line
/// flags win over environment variables, which win over the defaults.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ndjson-relay-server",
    version,
    about = "Streams background-worker output to HTTP clients as NDJSON"
)]
pub struct CliArgs {
    /// TCP port for the HTTP listener.
    ///
    /// Environment variable: `HTTP_PORT`
    #[arg(short = 'p', long, env = "HTTP_PORT", default_value_t = 8771)]
    pub port: u16,

    /// Interface to bind.
    ///
    /// Environment variable: `BIND_ADDR`
    #[arg(long = "bind", env = "BIND_ADDR", default_value_t = IpAddr::from([0, 0, 0, 0]))]
    pub bind_addr: IpAddr,

    /// Redis server as `host[:port][/db]`.
    ///
    /// Environment variable: `REDIS_SERVER`
    #[arg(short = 'R', long = "redis", env = "REDIS_SERVER", default_value = "127.0.0.1:6379/1")]
    pub redis_server: String,

    /// Redis password. Empty means no authentication.
    ///
    /// Environment variable: `REDIS_PASSWORD`
    #[arg(
        short = 'S',
        long = "secret",
        env = "REDIS_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub redis_password: String,

    /// Pub/sub channel tasks are announced on.
    ///
    /// Environment variable: `REDIS_CHANNEL`
    #[arg(short = 'C', long = "channel", env = "REDIS_CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,

    /// Prefix of task metadata keys.
    ///
    /// Environment variable: `REDIS_KEY_PREFIX`
    #[arg(short = 'X', long, env = "REDIS_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    /// Prefix of task output lists.
    ///
    /// Environment variable: `REDIS_LIST_PREFIX`
    #[arg(short = 'L', long, env = "REDIS_LIST_PREFIX", default_value = DEFAULT_LIST_PREFIX)]
    pub list_prefix: String,

    /// Lifetime of a task's metadata record, in seconds.
    ///
    /// Environment variable: `REDIS_TTL`
    #[arg(short = 't', long = "ttl", env = "REDIS_TTL", default_value_t = DEFAULT_TASK_TTL.as_secs())]
    pub ttl_secs: u64,

    /// Wait between polls of an empty output list, in milliseconds.
    ///
    /// Environment variable: `INTERVAL`
    #[arg(
        short = 'i',
        long = "interval",
        env = "INTERVAL",
        default_value_t = millis(DEFAULT_POLL_INTERVAL)
    )]
    pub interval_ms: u64,

    /// Pause after each forwarded line, in milliseconds.
    ///
    /// Environment variable: `PAUSE`
    #[arg(
        short = 'P',
        long = "pause",
        env = "PAUSE",
        default_value_t = millis(DEFAULT_LINE_PAUSE)
    )]
    pub pause_ms: u64,

    /// Longest time without output before a stream times out, in
    /// milliseconds.
    ///
    /// Environment variable: `MAXTIME`
    #[arg(
        short = 'm',
        long = "maxtime",
        env = "MAXTIME",
        default_value_t = millis(DEFAULT_MAX_IDLE_TIME)
    )]
    pub maxtime_ms: u64,

    /// Line sent to the client when a stream times out. Empty sends nothing.
    ///
    /// Environment variable: `MAXTIME_ERROR`
    #[arg(short = 'E', long = "maxtime-error", env = "MAXTIME_ERROR", default_value = "")]
    pub maxtime_error: String,

    /// Comma-separated termination sentinels.
    ///
    /// Environment variable: `SENTINELS`
    #[arg(
        long,
        env = "SENTINELS",
        value_delimiter = ',',
        default_values_t = DEFAULT_SENTINELS.map(String::from)
    )]
    pub sentinels: Vec<String>,

    /// Capacity of the buffer between a relay and its HTTP response body.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight streams on shutdown before cancelling
    /// them.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long = "shutdown-timeout", env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,

    /// Enable debug logging (`RUST_LOG` still takes precedence).
    ///
    /// Environment variable: `DEBUG`
    #[arg(short, long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,
}

/// Validated server settings, shared immutably by every request.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub redis: RedisTarget,
    pub channel: String,
    pub key_scheme: KeyScheme,
    pub task_ttl: Duration,
    pub relay: RelayConfig,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub debug: bool,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.ttl_secs == 0 {
            bail!("REDIS_TTL must be greater than 0");
        }
        if args.interval_ms == 0 {
            bail!("INTERVAL must be greater than 0");
        }
        if args.maxtime_ms == 0 {
            bail!("MAXTIME must be greater than 0");
        }
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }
        if args.channel.trim().is_empty() {
            bail!("REDIS_CHANNEL must not be empty");
        }

        let redis = RedisTarget::parse(&args.redis_server, Some(&args.redis_password))
            .context("invalid REDIS_SERVER")?;
        let key_scheme = KeyScheme::new(args.key_prefix, args.list_prefix)?;
        let sentinels = Sentinels::new(&args.sentinels)?;

        let relay = RelayConfig {
            poll_interval: Duration::from_millis(args.interval_ms),
            line_pause: Duration::from_millis(args.pause_ms),
            max_idle_time: Duration::from_millis(args.maxtime_ms),
            timeout_message: args.maxtime_error,
            sentinels,
        };
        relay.validate()?;

        Ok(Self {
            listen_addr: SocketAddr::new(args.bind_addr, args.port),
            redis,
            channel: args.channel,
            key_scheme,
            task_ttl: Duration::from_secs(args.ttl_secs),
            relay,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            debug: args.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("ndjson-relay-server").chain(args.iter().copied());
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_match_deployed_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.listen_addr.port(), 8771);
        assert_eq!(config.redis.to_string(), "127.0.0.1:6379/1");
        assert_eq!(config.redis.password, None);
        assert_eq!(config.channel, "ndjson_jobs");
        assert_eq!(config.key_scheme, KeyScheme::default());
        assert_eq!(config.task_ttl, Duration::from_secs(600));
        assert_eq!(config.relay, RelayConfig::default());
        assert_eq!(config.stream_buffer_size, 8);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert!(!config.debug);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "-p",
            "9000",
            "-R",
            "redis.internal:6380/3",
            "-S",
            "hunter2",
            "-i",
            "50",
            "-P",
            "0",
            "-m",
            "1000",
            "-E",
            "{\"error\":\"timeout\"}",
            "--sentinels",
            "DONE,STOP",
            "-d",
        ])
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.db, 3);
        assert_eq!(config.redis.password.as_deref(), Some("hunter2"));
        assert_eq!(config.relay.poll_interval, Duration::from_millis(50));
        assert_eq!(config.relay.line_pause, Duration::ZERO);
        assert_eq!(config.relay.max_idle_time, Duration::from_millis(1000));
        assert_eq!(config.relay.timeout_message, "{\"error\":\"timeout\"}");
        assert!(config.relay.sentinels.contains("STOP"));
        assert!(!config.relay.sentinels.contains("EOF"));
        assert!(config.debug);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse(&["-t", "0"]).is_err());
        assert!(parse(&["-i", "0"]).is_err());
        assert!(parse(&["-m", "0"]).is_err());
        assert!(parse(&["--stream-buffer-size", "0"]).is_err());
        assert!(parse(&["-X", "same", "-L", "same"]).is_err());
        assert!(parse(&["--sentinels", ","]).is_err());
        assert!(parse(&["-R", "localhost:notaport"]).is_err());
    }
}
