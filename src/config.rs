use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Who receives `broadcast_to_admins` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAudience {
    /// Only connections registered with the admin role.
    AdminsOnly,
    /// Every live connection.
    AllConnections,
}

#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub gateway: Option<GatewayCredentials>,
    pub gateway_base_url: String,
    pub gateway_currency: String,
    pub gateway_timeout: Duration,
    pub assign_radius_m: f64,
    pub nearby_radius_m: f64,
    pub nearby_limit: usize,
    pub activity_buffer_size: usize,
    pub admin_audience: AdminAudience,
    pub store_conflict_retries: u32,
    pub store_read_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_id = lookup("GATEWAY_KEY_ID").filter(|v| !v.trim().is_empty());
        let key_secret = lookup("GATEWAY_KEY_SECRET").filter(|v| !v.trim().is_empty());
        let gateway = match (key_id, key_secret) {
            (Some(key_id), Some(key_secret)) => Some(GatewayCredentials {
                webhook_secret: lookup("GATEWAY_WEBHOOK_SECRET")
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| key_secret.clone()),
                key_id,
                key_secret,
            }),
            _ => None,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Configuration(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        let admin_audience = match lookup("ADMIN_BROADCAST").as_deref() {
            None | Some("admins") => AdminAudience::AdminsOnly,
            Some("all") => AdminAudience::AllConnections,
            Some(other) => {
                return Err(AppError::Configuration(format!(
                    "invalid ADMIN_BROADCAST: {other}, expected admins/all"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            gateway,
            gateway_base_url: lookup("GATEWAY_BASE_URL")
                .unwrap_or_else(|| "https://api.razorpay.com/v1".to_string()),
            gateway_currency: lookup("GATEWAY_CURRENCY").unwrap_or_else(|| "INR".to_string()),
            gateway_timeout: Duration::from_millis(parse_or_default(
                &lookup,
                "GATEWAY_TIMEOUT_MS",
                10_000,
            )?),
            assign_radius_m: parse_or_default(&lookup, "ASSIGN_RADIUS_M", 10_000.0)?,
            nearby_radius_m: parse_or_default(&lookup, "NEARBY_RADIUS_M", 5_000.0)?,
            nearby_limit: parse_or_default(&lookup, "NEARBY_LIMIT", 20)?,
            activity_buffer_size: parse_or_default(&lookup, "ACTIVITY_BUFFER_SIZE", 1000)?,
            admin_audience,
            store_conflict_retries: parse_or_default(&lookup, "STORE_CONFLICT_RETRIES", 8)?,
            store_read_retries: parse_or_default(&lookup, "STORE_READ_RETRIES", 3)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            gateway: None,
            gateway_base_url: "https://api.razorpay.com/v1".to_string(),
            gateway_currency: "INR".to_string(),
            gateway_timeout: Duration::from_secs(10),
            assign_radius_m: 10_000.0,
            nearby_radius_m: 5_000.0,
            nearby_limit: 20,
            activity_buffer_size: 1000,
            admin_audience: AdminAudience::AdminsOnly,
            store_conflict_retries: 8,
            store_read_retries: 3,
        }
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Configuration(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}
