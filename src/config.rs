//! Startup configuration.
//!
//! A single immutable struct built once in `main` from environment variables, falling
//! back to documented defaults. There is no configuration file format or schema crate
//! here; the handful of tunables don't earn one.

use std::net::IpAddr;
use std::path::PathBuf;

/// Immutable, startup-constructed configuration. Shared behind an `Arc` rather than
/// read from a global.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: IpAddr,
    pub listen_port: u16,
    pub doc_root: PathBuf,

    pub db_url: String,
    pub db_user: String,
    pub db_password: String,
    pub db_database: String,
    pub db_port: u16,
    pub db_max_conn: u32,

    pub thread_count: u32,
    pub queue_capacity: usize,

    pub timeslot_seconds: u64,
    pub inactivity_multiplier: u32,

    pub read_buf: usize,
    pub write_buf: usize,

    pub log_dir: PathBuf,
    pub log_stem: String,
    pub log_buf: usize,
    pub split_lines: u64,
    pub log_queue_cap: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Builds configuration from environment variables, falling back to documented
    /// defaults. The listen port is supplied separately, since it comes from the CLI's
    /// single positional argument rather than the environment.
    pub fn from_env(listen_port: u16) -> Self {
        Config {
            bind_address: env_or("HOLT_BIND_ADDRESS", IpAddr::from([0, 0, 0, 0])),
            listen_port,
            doc_root: PathBuf::from(env_or_string("HOLT_DOC_ROOT", "./root")),

            db_url: env_or_string("HOLT_DB_URL", "127.0.0.1"),
            db_user: env_or_string("HOLT_DB_USER", "root"),
            db_password: env_or_string("HOLT_DB_PASSWORD", ""),
            db_database: env_or_string("HOLT_DB_DATABASE", "holt"),
            db_port: env_or("HOLT_DB_PORT", 3306),
            db_max_conn: env_or("HOLT_DB_MAX_CONN", 8),

            thread_count: env_or("HOLT_THREAD_COUNT", 8),
            queue_capacity: env_or("HOLT_QUEUE_CAPACITY", 10_000),

            timeslot_seconds: env_or("HOLT_TIMESLOT_SECONDS", 5),
            inactivity_multiplier: env_or("HOLT_INACTIVITY_MULTIPLIER", 3),

            read_buf: env_or("HOLT_READ_BUF", 2048),
            write_buf: env_or("HOLT_WRITE_BUF", 1024),

            log_dir: PathBuf::from(env_or_string("HOLT_LOG_DIR", ".")),
            log_stem: env_or_string("HOLT_LOG_STEM", "server.log"),
            log_buf: env_or("HOLT_LOG_BUF", 2000),
            split_lines: env_or("HOLT_SPLIT_LINES", 800_000),
            log_queue_cap: env_or("HOLT_LOG_QUEUE_CAP", 8),
        }
    }

    /// Idle-connection timeout in seconds: `inactivity_multiplier * timeslot_seconds`.
    pub fn inactivity_timeout_secs(&self) -> u64 {
        self.timeslot_seconds * self.inactivity_multiplier as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        for key in [
            "HOLT_THREAD_COUNT", "HOLT_QUEUE_CAPACITY", "HOLT_DB_MAX_CONN",
            "HOLT_TIMESLOT_SECONDS", "HOLT_INACTIVITY_MULTIPLIER",
        ] {
            std::env::remove_var(key);
        }
        let cfg = Config::from_env(8080);
        assert_eq!(cfg.thread_count, 8);
        assert_eq!(cfg.queue_capacity, 10_000);
        assert_eq!(cfg.db_max_conn, 8);
        assert_eq!(cfg.inactivity_timeout_secs(), 15);
    }

    #[test]
    fn env_var_overrides_default() {
        std::env::set_var("HOLT_THREAD_COUNT", "16");
        let cfg = Config::from_env(8080);
        assert_eq!(cfg.thread_count, 16);
        std::env::remove_var("HOLT_THREAD_COUNT");
    }
}
