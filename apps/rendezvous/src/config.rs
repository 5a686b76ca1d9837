use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;
use url::Url;

use crate::session::PeerRole;
use crate::telemetry::logging::{Area, LogConfig, LogLevel};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:3000/";
pub const DEFAULT_POLL_MS: u64 = 500;
/// Gives the caller's connectivity gathering time to begin before it offers.
pub const DEFAULT_SETTLE_MS: u64 = 1000;
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

pub const SERVER_ENV: &str = "RENDEZVOUS_SERVER";
pub const LOCAL_PEER_ENV: &str = "RENDEZVOUS_LOCAL_PEER";
pub const REMOTE_PEER_ENV: &str = "RENDEZVOUS_REMOTE_PEER";
pub const ROLE_ENV: &str = "RENDEZVOUS_ROLE";
pub const POLL_MS_ENV: &str = "RENDEZVOUS_POLL_MS";
pub const SETTLE_MS_ENV: &str = "RENDEZVOUS_SETTLE_MS";
pub const ICE_SERVERS_ENV: &str = "RENDEZVOUS_ICE_SERVERS";
pub const AUTO_RENEGOTIATE_ENV: &str = "RENDEZVOUS_AUTO_RENEGOTIATE";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("remote peer id is required (--remote-peer or {REMOTE_PEER_ENV})")]
    MissingRemotePeer,
    #[error("local peer id is required and could not be derived from the hostname")]
    MissingLocalPeer,
    #[error("local and remote peer ids are both {0:?}")]
    SamePeer(String),
    #[error("invalid signaling server {value:?}: {reason}")]
    InvalidServer { value: String, reason: String },
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rendezvous",
    about = "Negotiate a peer-to-peer session over a polling rendezvous server"
)]
pub struct Cli {
    #[arg(long, env = SERVER_ENV, default_value = DEFAULT_SERVER)]
    pub server: String,

    #[arg(long, env = LOCAL_PEER_ENV, help = "Mailbox id of this peer (defaults to the hostname)")]
    pub local_peer: Option<String>,

    #[arg(long, env = REMOTE_PEER_ENV, help = "Mailbox id of the other peer")]
    pub remote_peer: Option<String>,

    #[arg(long, value_enum, env = ROLE_ENV, default_value_t = PeerRole::Callee)]
    pub role: PeerRole,

    #[arg(long = "poll-ms", env = POLL_MS_ENV, default_value_t = DEFAULT_POLL_MS)]
    pub poll_ms: u64,

    #[arg(long = "settle-ms", env = SETTLE_MS_ENV, default_value_t = DEFAULT_SETTLE_MS)]
    pub settle_ms: u64,

    #[arg(long = "ice-server", env = ICE_SERVERS_ENV, value_delimiter = ',')]
    pub ice_servers: Vec<String>,

    #[arg(
        long,
        env = AUTO_RENEGOTIATE_ENV,
        value_parser = BoolishValueParser::new(),
        help = "Caller: offer again after the connection drops"
    )]
    pub auto_renegotiate: bool,

    #[arg(long, value_enum, env = "RENDEZVOUS_LOG_LEVEL", default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    #[arg(long, env = "RENDEZVOUS_LOG_FILE", help = "Write logs to a file instead of stderr")]
    pub log_file: Option<PathBuf>,

    #[arg(
        long = "log-area",
        value_enum,
        env = "RENDEZVOUS_LOG_AREAS",
        value_delimiter = ',',
        help = "Only log these areas at --log-level; the rest stay at warn"
    )]
    pub log_areas: Vec<Area>,

    #[arg(
        long,
        env = "RENDEZVOUS_TRACE_DEPS",
        value_parser = BoolishValueParser::new(),
        help = "Let webrtc and http internals log below info"
    )]
    pub trace_deps: bool,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
            areas: self.log_areas.clone(),
            trace_dependencies: self.trace_deps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: Url,
    pub local_peer: String,
    pub remote_peer: String,
    pub role: PeerRole,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub auto_renegotiate: bool,
    pub ice_servers: Vec<String>,
}

impl Config {
    /// Build from parsed command-line arguments (which already fold in the environment).
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let config = Self {
            server: parse_server(&cli.server)?,
            local_peer: cli
                .local_peer
                .clone()
                .filter(|peer| !peer.trim().is_empty())
                .or_else(default_local_peer)
                .unwrap_or_default(),
            remote_peer: cli.remote_peer.clone().unwrap_or_default(),
            role: cli.role,
            poll_interval: Duration::from_millis(cli.poll_ms),
            settle_delay: Duration::from_millis(cli.settle_ms),
            auto_renegotiate: cli.auto_renegotiate,
            ice_servers: ice_servers_or_default(cli.ice_servers.clone()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_peer.trim().is_empty() {
            return Err(ConfigError::MissingLocalPeer);
        }
        if self.remote_peer.trim().is_empty() {
            return Err(ConfigError::MissingRemotePeer);
        }
        if self.local_peer == self.remote_peer {
            return Err(ConfigError::SamePeer(self.local_peer.clone()));
        }
        if !matches!(self.server.scheme(), "http" | "https") || self.server.cannot_be_a_base() {
            return Err(ConfigError::InvalidServer {
                value: self.server.to_string(),
                reason: "expected an http(s) base url".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}

fn parse_server(value: &str) -> Result<Url, ConfigError> {
    // Normalize localhost to IPv4 to avoid an IPv6 (::1) preference.
    let value = value.trim().replacen("://localhost", "://127.0.0.1", 1);
    Url::parse(&value).map_err(|err| ConfigError::InvalidServer {
        value,
        reason: err.to_string(),
    })
}

fn default_local_peer() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

fn ice_servers_or_default(servers: Vec<String>) -> Vec<String> {
    if servers.is_empty() {
        vec![DEFAULT_ICE_SERVER.to_string()]
    } else {
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const ALL_VARS: &[&str] = &[
        SERVER_ENV,
        LOCAL_PEER_ENV,
        REMOTE_PEER_ENV,
        ROLE_ENV,
        POLL_MS_ENV,
        SETTLE_MS_ENV,
        ICE_SERVERS_ENV,
        AUTO_RENEGOTIATE_ENV,
        "RENDEZVOUS_LOG_LEVEL",
        "RENDEZVOUS_LOG_FILE",
        "RENDEZVOUS_LOG_AREAS",
        "RENDEZVOUS_TRACE_DEPS",
    ];

    /// Parse `args` with exactly `vars` set in the environment.
    fn parse_with_env(vars: &[(&str, &str)], args: &[&str]) -> Result<Cli, clap::Error> {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let saved: Vec<_> = ALL_VARS.iter().map(|var| (*var, env::var(var).ok())).collect();
        unsafe {
            for var in ALL_VARS {
                env::remove_var(var);
            }
            for (var, value) in vars {
                env::set_var(var, value);
            }
        }

        let parsed = Cli::try_parse_from(std::iter::once("rendezvous").chain(args.iter().copied()));

        unsafe {
            for (var, value) in saved {
                match value {
                    Some(value) => env::set_var(var, value),
                    None => env::remove_var(var),
                }
            }
        }
        parsed
    }

    fn config_with_env(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        Config::from_cli(&parse_with_env(vars, &[]).expect("parse"))
    }

    const PEERS: [(&str, &str); 2] = [(LOCAL_PEER_ENV, "laptop"), (REMOTE_PEER_ENV, "desktop")];

    #[test]
    fn defaults_fill_everything_but_the_remote_peer() {
        let config = config_with_env(&PEERS).expect("config");
        assert_eq!(config.server.as_str(), DEFAULT_SERVER);
        assert_eq!(config.role, PeerRole::Callee);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.settle_delay, Duration::from_millis(1000));
        assert_eq!(config.ice_servers, vec![DEFAULT_ICE_SERVER.to_string()]);
        assert!(!config.auto_renegotiate);
    }

    #[test]
    fn environment_values_override_defaults() {
        let config = config_with_env(&[
            (SERVER_ENV, "http://localhost:8080/signal/"),
            (LOCAL_PEER_ENV, "laptop"),
            (REMOTE_PEER_ENV, "desktop"),
            (ROLE_ENV, "caller"),
            (POLL_MS_ENV, "250"),
            (SETTLE_MS_ENV, "0"),
            (ICE_SERVERS_ENV, "stun:a.example:3478,turn:b.example:3478"),
            (AUTO_RENEGOTIATE_ENV, "1"),
        ])
        .expect("config");
        assert_eq!(config.server.as_str(), "http://127.0.0.1:8080/signal/");
        assert_eq!(config.role, PeerRole::Caller);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(
            config.ice_servers,
            vec!["stun:a.example:3478", "turn:b.example:3478"]
        );
        assert!(config.auto_renegotiate);
    }

    #[test]
    fn flags_take_precedence_over_environment() {
        let cli = parse_with_env(
            &[
                (SERVER_ENV, "http://env.example/"),
                (ROLE_ENV, "caller"),
                (REMOTE_PEER_ENV, "env-desktop"),
                (AUTO_RENEGOTIATE_ENV, "off"),
            ],
            &[
                "--server",
                "https://signal.example/",
                "--local-peer",
                "laptop",
                "--remote-peer",
                "desktop",
                "--role",
                "callee",
                "--poll-ms",
                "100",
                "--ice-server",
                "stun:one.example,stun:two.example",
            ],
        )
        .expect("parse");
        let config = Config::from_cli(&cli).expect("config");
        assert_eq!(config.server.as_str(), "https://signal.example/");
        assert_eq!(config.remote_peer, "desktop");
        assert_eq!(config.role, PeerRole::Callee);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.ice_servers.len(), 2);
        assert!(!config.auto_renegotiate);
        assert_eq!(cli.log_config().level, LogLevel::Warn);
    }

    #[test]
    fn logging_options_come_from_flags_and_environment() {
        let cli = parse_with_env(
            &[("RENDEZVOUS_LOG_AREAS", "session,native"), ("RENDEZVOUS_TRACE_DEPS", "yes")],
            &["--log-level", "trace"],
        )
        .expect("parse");
        let logging = cli.log_config();
        assert_eq!(logging.level, LogLevel::Trace);
        assert_eq!(logging.areas, vec![Area::Session, Area::Native]);
        assert!(logging.trace_dependencies);
        assert!(logging.directives().contains("rendezvous::native=trace"));
    }

    #[test]
    fn missing_remote_peer_is_fatal() {
        let err = config_with_env(&[(LOCAL_PEER_ENV, "laptop")]).expect_err("missing remote");
        assert_eq!(err, ConfigError::MissingRemotePeer);
    }

    #[test]
    fn malformed_values_are_rejected_by_the_parser() {
        let with = |extra: (&'static str, &'static str)| {
            let mut vars = PEERS.to_vec();
            vars.push(extra);
            parse_with_env(&vars, &[])
        };
        assert!(with((POLL_MS_ENV, "soon")).is_err());
        assert!(with((ROLE_ENV, "observer")).is_err());
        assert!(with((AUTO_RENEGOTIATE_ENV, "maybe")).is_err());
    }

    #[test]
    fn invalid_values_are_reported() {
        let with = |extra: (&'static str, &'static str)| {
            let mut vars = PEERS.to_vec();
            vars.push(extra);
            config_with_env(&vars)
        };

        assert_eq!(with((POLL_MS_ENV, "0")), Err(ConfigError::InvalidPollInterval));
        assert!(matches!(
            with((SERVER_ENV, "not a url")),
            Err(ConfigError::InvalidServer { .. })
        ));
        assert!(matches!(
            with((SERVER_ENV, "ftp://files.example/")),
            Err(ConfigError::InvalidServer { .. })
        ));
        assert_eq!(
            with((REMOTE_PEER_ENV, "laptop")),
            Err(ConfigError::SamePeer("laptop".into()))
        );
    }
}
