use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use wwtkdr_core::PollPolicy;

/// Runtime configuration for the `wwtkdr-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is honored), with defaults suitable for a single-user
/// deployment next to a notebook server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "wwtkdr-server",
    version,
    about = "Relays HTTP requests to data producers that claimed a WWTKDR key"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:8888"))]
    pub server_addr: String,

    /// Path prefix the relay routes are mounted under.
    ///
    /// `notebook` and `lab/base` are both accepted and normalized to
    /// `/notebook/` and `/lab/base/`.
    ///
    /// Environment variable: `BASE_URL`
    #[arg(long, env = "BASE_URL", default_value_t = String::from("/"))]
    pub base_url: String,

    /// How long one poll of a producer's reply channel may stay empty, in
    /// milliseconds.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Number of consecutive empty polls after which a request fails.
    ///
    /// Together with `POLL_INTERVAL_MS` this bounds how long a silent
    /// producer can hold a request open.
    ///
    /// Environment variable: `MAX_POLL_ATTEMPTS`
    #[arg(long, env = "MAX_POLL_ATTEMPTS", default_value_t = 30)]
    pub max_poll_attempts: u32,

    /// Capacity of each producer session's request and reply channels.
    ///
    /// Environment variable: `REQUEST_BUFFER_SIZE`
    #[arg(long, env = "REQUEST_BUFFER_SIZE", default_value_t = 32)]
    pub request_buffer_size: usize,

    /// Shared secret clients present to be treated as authenticated.
    ///
    /// Accepted as `Authorization: token <t>`, `Authorization: Bearer <t>`
    /// or a `token` query parameter. When unset every request counts as
    /// authenticated.
    ///
    /// Environment variable: `AUTH_TOKEN`
    #[arg(long, env = "AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Seconds to wait for in-flight relays to finish on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Key claimed by the built-in demo producer. Requires `DEMO_ROOT`.
    ///
    /// Environment variable: `DEMO_KEY`
    #[arg(long, env = "DEMO_KEY")]
    pub demo_key: Option<String>,

    /// Directory whose files the demo producer serves. Requires `DEMO_KEY`.
    ///
    /// Environment variable: `DEMO_ROOT`
    #[arg(long, env = "DEMO_ROOT")]
    pub demo_root: Option<PathBuf>,

    /// Bytes per reply fragment sent by the demo producer.
    ///
    /// Environment variable: `DEMO_CHUNK_SIZE`
    #[arg(long, env = "DEMO_CHUNK_SIZE", default_value_t = 65536)]
    pub demo_chunk_size: usize,
}

/// Settings for the optional in-process demo producer.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub key: String,
    pub root: PathBuf,
    pub chunk_size: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub base_url: String,
    pub poll_policy: PollPolicy,
    pub request_buffer_size: usize,
    pub auth_token: Option<String>,
    pub shutdown_timeout: Duration,
    pub demo: Option<DemoConfig>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be greater than 0");
        }

        if args.max_poll_attempts == 0 {
            bail!("MAX_POLL_ATTEMPTS must be greater than 0");
        }

        if args.request_buffer_size == 0 {
            bail!("REQUEST_BUFFER_SIZE must be greater than 0");
        }

        let demo = match (args.demo_key, args.demo_root) {
            (Some(key), Some(root)) => {
                if let Err(e) = wwtkdr_core::Key::parse(key.as_str()) {
                    bail!("DEMO_KEY is not a valid key: {e}");
                }
                if args.demo_chunk_size == 0 {
                    bail!("DEMO_CHUNK_SIZE must be greater than 0");
                }
                Some(DemoConfig {
                    key,
                    root,
                    chunk_size: args.demo_chunk_size,
                })
            }
            (None, None) => None,
            _ => bail!("DEMO_KEY and DEMO_ROOT must be set together"),
        };

        let auth_token = args.auth_token.filter(|token| !token.is_empty());

        Ok(Self {
            server_addr: args.server_addr,
            base_url: normalize_base_url(&args.base_url),
            poll_policy: PollPolicy::new(
                Duration::from_millis(args.poll_interval_ms),
                args.max_poll_attempts,
            ),
            request_buffer_size: args.request_buffer_size,
            auth_token,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            demo,
        })
    }
}

/// Returns `raw` with exactly one leading and one trailing `/`.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}
