use crate::logger;
use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8888;
pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
/// Time granted to in-flight sends between the shutdown notice and force-close.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Enforced by callers before building a FileTransfer, not by the transport.
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;
/// Largest frame accepted on the wire: one maximal file plus headroom for the envelope.
pub const MAX_FRAME_SIZE: usize = MAX_FILE_SIZE + 1024 * 1024;

pub const TRANSFER_WORKERS: usize = 5;
pub const TRANSFER_TASK_TIMEOUT: Duration = Duration::from_secs(30);
pub const TRANSFER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub const PORT_ENV_VAR: &str = "STUDYLINK_PORT";
pub const SERVER_ENV_VAR: &str = "STUDYLINK_SERVER";
pub const USERNAME_ENV_VAR: &str = "STUDYLINK_USERNAME";
pub const CONNECT_TIMEOUT_ENV_VAR: &str = "STUDYLINK_CONNECT_TIMEOUT_SECS";
pub const HEARTBEAT_INTERVAL_ENV_VAR: &str = "STUDYLINK_HEARTBEAT_INTERVAL_SECS";
pub const HEARTBEAT_TIMEOUT_ENV_VAR: &str = "STUDYLINK_HEARTBEAT_TIMEOUT_SECS";
pub const MONITOR_INTERVAL_ENV_VAR: &str = "STUDYLINK_MONITOR_INTERVAL_SECS";
pub const TLS_CERT_PATH_ENV_VAR: &str = "STUDYLINK_TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV_VAR: &str = "STUDYLINK_TLS_KEY_PATH";

pub fn is_valid_port(port: u16) -> bool {
    (MIN_PORT..=MAX_PORT).contains(&port)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub monitor_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            port: DEFAULT_PORT,
            connect_timeout: CONNECT_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            monitor_interval: MONITOR_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

impl NetworkConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unparseable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = NetworkConfig::default();

        let port = match lookup(PORT_ENV_VAR).map(|raw| raw.trim().parse::<u16>()) {
            Some(Ok(port)) if is_valid_port(port) => port,
            Some(_) => {
                logger::log_warning(&format!(
                    "{} must be a port between {} and {}, using {}",
                    PORT_ENV_VAR, MIN_PORT, MAX_PORT, defaults.port
                ));
                defaults.port
            }
            None => defaults.port,
        };

        NetworkConfig {
            port,
            connect_timeout: secs_or(&lookup, CONNECT_TIMEOUT_ENV_VAR, defaults.connect_timeout),
            heartbeat_interval: secs_or(
                &lookup,
                HEARTBEAT_INTERVAL_ENV_VAR,
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: secs_or(
                &lookup,
                HEARTBEAT_TIMEOUT_ENV_VAR,
                defaults.heartbeat_timeout,
            ),
            monitor_interval: secs_or(&lookup, MONITOR_INTERVAL_ENV_VAR, defaults.monitor_interval),
            shutdown_grace: defaults.shutdown_grace,
        }
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|raw| raw.trim().parse::<u64>()) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            logger::log_warning(&format!(
                "{} must be a positive number of seconds, using {}s",
                key,
                default.as_secs()
            ));
            default
        }
        None => default,
    }
}
