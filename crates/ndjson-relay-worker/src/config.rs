use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use ndjson_relay_core::{
    Sentinels,
    relay::DEFAULT_SENTINELS,
    store::RedisTarget,
    task::DEFAULT_CHANNEL,
};

/// Runtime configuration for the `ndjson-relay-worker` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ndjson-relay-worker",
    version,
    about = "Example producer that answers ndjson-relay tasks with demo messages"
)]
pub struct CliArgs {
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

    /// Number of pool workers serving tasks concurrently.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Demo messages emitted per task before the completion summary.
    #[arg(long, default_value_t = 5)]
    pub messages: u32,

    /// Lower bound of the random delay before each message, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub min_delay_ms: u64,

    /// Upper bound of the random delay before each message, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub max_delay_ms: u64,

    /// Termination sentinel appended when a task is done.
    #[arg(long, default_value = DEFAULT_SENTINELS[0])]
    pub sentinel: String,

    /// Keep serving tasks until interrupted instead of exiting after the
    /// first one.
    #[arg(long = "loop", default_value_t = false)]
    pub loop_mode: bool,

    /// Seconds to wait for busy workers on shutdown before aborting their
    /// tasks.
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

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis: RedisTarget,
    pub channel: String,
    pub workers: usize,
    pub messages: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub sentinels: Sentinels,
    pub loop_mode: bool,
    pub shutdown_timeout: Duration,
    pub debug: bool,
}

impl TryFrom<CliArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.min_delay_ms > args.max_delay_ms {
            bail!(
                "--min-delay-ms ({}) exceeds --max-delay-ms ({})",
                args.min_delay_ms,
                args.max_delay_ms
            );
        }

        let redis = RedisTarget::parse(&args.redis_server, Some(&args.redis_password))
            .context("invalid REDIS_SERVER")?;
        // The configured sentinel is the one appended; the defaults stay
        // reserved so the demo never emits one of them as data.
        let sentinels = Sentinels::new(
            core::iter::once(args.sentinel.as_str()).chain(DEFAULT_SENTINELS),
        )?;

        Ok(Self {
            redis,
            channel: args.channel,
            workers: args.workers,
            messages: args.messages,
            min_delay: Duration::from_millis(args.min_delay_ms),
            max_delay: Duration::from_millis(args.max_delay_ms),
            sentinels,
            loop_mode: args.loop_mode,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            debug: args.debug,
        })
    }
}
