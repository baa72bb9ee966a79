use std::time::Duration;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 1489;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_MAX_BODY_BYTES: usize = 0x2000;

#[derive(Parser, Debug, Clone)]
#[command(name = "url-rate-limiter")]
#[command(about = "Blocks URLs reported too many times within a fixed window")]
pub struct Args {
    /// Window duration in milliseconds
    #[arg(value_name = "TTL", env = "SRL_TTL_MS")]
    pub ttl_ms: u64,

    /// Requests allowed per window before blocking
    #[arg(value_name = "THRESHOLD", env = "SRL_THRESHOLD")]
    pub threshold: u32,

    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(
        long,
        env = "SRL_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,

    #[arg(
        long,
        env = "SRL_MAX_BODY_BYTES",
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        value_parser = parse_nonzero_usize
    )]
    pub max_body_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub ttl: Duration,
    pub threshold: u32,
    pub sweep_interval: Duration,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_args() -> Self {
        Self::from(Args::parse())
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            port: args.port,
            ttl: Duration::from_millis(args.ttl_ms),
            threshold: args.threshold,
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            max_body_bytes: args.max_body_bytes,
        }
    }
}

fn parse_nonzero_usize(value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| format!("expected a positive integer, got {}", value))
}
