//! Process configuration, read once from the environment (and `.env` if present).
//!
//! Every value is kept as the raw string so `var!` can hand out `&'static str`s; the typed
//! accessors at the bottom parse on demand.

use std::sync::LazyLock;

use chrono::FixedOffset;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::{DEFAULT_STARTING_POINTS, SERVER_PORT};

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

pub async fn env() -> EnvResult<&'static Env> {
    ENV_VARS.get_or_try_init(|| async { Env::new() }).await
}

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = env().await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::RedisUrl => &vars.redis_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::CorsAllowOrigins => &vars.cors_allow_origins,
        Var::InternalToken => &vars.internal_token,
        Var::LedgerUtcOffsetSecs => &vars.ledger_utc_offset_secs,
        Var::StartingPoints => &vars.starting_points,
        Var::OtelExporterEndpoint => &vars.otel_exporter_otlp_endpoint,
        Var::OtelExporterProto => &vars.otel_exporter_otlp_protocol,
        Var::ApiServiceName => &vars.api_service_name,
        Var::ApiTracerName => &vars.api_tracer_name,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub database_url: String,
    pub redis_url: String,
    #[serde(default = "default_port")]
    pub server_api_port: String,
    #[serde(default = "default_cors")]
    pub cors_allow_origins: String,
    pub internal_token: String,
    #[serde(default = "default_offset")]
    pub ledger_utc_offset_secs: String,
    #[serde(default = "default_starting_points")]
    pub starting_points: String,
    /// Empty means no collector; telemetry falls back to stdout
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: String,
    #[serde(default = "default_otel_proto")]
    pub otel_exporter_otlp_protocol: String,
    #[serde(default = "default_service_name")]
    pub api_service_name: String,
    #[serde(default = "default_tracer_name")]
    pub api_tracer_name: String,
}

fn default_port() -> String {
    SERVER_PORT.to_string()
}

fn default_cors() -> String {
    String::from("*")
}

fn default_offset() -> String {
    String::from("0")
}

fn default_starting_points() -> String {
    DEFAULT_STARTING_POINTS.to_string()
}

fn default_otel_proto() -> String {
    String::from("grpc")
}

fn default_service_name() -> String {
    String::from("rewards-ledger-api")
}

fn default_tracer_name() -> String {
    String::from("rewards-ledger-tracer")
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        // a missing .env file is fine, the process environment is authoritative
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e.into());
            }
        }

        from_iter(std::env::vars())
    }

    pub fn port(&self) -> EnvResult<u16> {
        parse_var("SERVER_API_PORT", &self.server_api_port)
    }

    pub fn starting_points(&self) -> EnvResult<i64> {
        let points: i64 = parse_var("STARTING_POINTS", &self.starting_points)?;
        if points < 0 {
            return Err(EnvErr::InvalidValue {
                name: "STARTING_POINTS",
                value: self.starting_points.clone(),
            });
        }

        Ok(points)
    }

    /// Offset used to decide where "midnight" falls for the daily counters
    pub fn ledger_offset(&self) -> EnvResult<FixedOffset> {
        let secs: i32 = parse_var("LEDGER_UTC_OFFSET_SECS", &self.ledger_utc_offset_secs)?;
        FixedOffset::east_opt(secs).ok_or_else(|| EnvErr::InvalidValue {
            name: "LEDGER_UTC_OFFSET_SECS",
            value: self.ledger_utc_offset_secs.clone(),
        })
    }
}

#[derive(Debug)]
pub enum Var {
    DatabaseUrl,
    RedisUrl,
    ServerApiPort,
    CorsAllowOrigins,
    InternalToken,
    LedgerUtcOffsetSecs,
    StartingPoints,
    OtelExporterEndpoint,
    OtelExporterProto,
    ApiServiceName,
    ApiTracerName,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

/// Deserializes `T` from `(NAME, value)` pairs; unrelated variables are ignored.
pub fn from_iter<Iter, T>(iter: Iter) -> EnvResult<T>
where
    T: serde::de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let map: Map<String, Value> = iter
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    Ok(serde_json::from_value(Value::Object(map))?)
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> EnvResult<T> {
    value.trim().parse::<T>().map_err(|_| EnvErr::InvalidValue {
        name,
        value: value.to_string(),
    })
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error("env deserialization error: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

#[cfg(test)]
mod test {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("REDIS_URL", "redis://localhost"),
            ("INTERNAL_TOKEN", "secret"),
            ("PATH", "/usr/bin"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults_fill_optional_vars() {
        let env: Env = from_iter(required()).unwrap();

        assert_eq!(env.port().unwrap(), SERVER_PORT);
        assert_eq!(env.cors_allow_origins, "*");
        assert_eq!(env.starting_points().unwrap(), DEFAULT_STARTING_POINTS);
        assert_eq!(env.ledger_offset().unwrap(), FixedOffset::east_opt(0).unwrap());
        assert!(env.otel_exporter_otlp_endpoint.is_empty());
        assert_eq!(env.api_service_name, "rewards-ledger-api");
    }

    #[test]
    fn test_missing_required_var() {
        let vars = required()
            .into_iter()
            .filter(|(k, _)| k != "DATABASE_URL");

        assert!(from_iter::<_, Env>(vars).is_err());
    }

    #[test]
    fn test_typed_accessors_reject_garbage() {
        let mut vars = required();
        vars.push(("LEDGER_UTC_OFFSET_SECS".into(), "36000".into()));
        vars.push(("STARTING_POINTS".into(), "-5".into()));
        vars.push(("SERVER_API_PORT".into(), "http".into()));

        let env: Env = from_iter(vars).unwrap();
        assert_eq!(
            env.ledger_offset().unwrap(),
            FixedOffset::east_opt(36000).unwrap()
        );
        assert!(env.starting_points().is_err());
        assert!(env.port().is_err());
    }
}
