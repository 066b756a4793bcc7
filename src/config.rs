//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::mail::SmtpSettings;
use crate::password::DEFAULT_ITERATIONS;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {0:?}")]
    Missing(Vec<&'static str>),
    #[error("SESSION_SECRET must be at least {MIN_SECRET_LEN} characters long")]
    WeakSecret,
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub session_secret: String,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub smtp: SmtpSettings,
    pub pbkdf2_iterations: u32,
    pub enable_hsts: bool,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let session_secret = vars.get(&["SESSION_SECRET"]);
        let mail_address = vars.get(&["MAIL_ADDRESS", "MY_EMAIL"]);
        let mail_password = vars.get(&["MAIL_PASSWORD", "MY_PASSWORD"]);

        let mut missing = Vec::new();
        if session_secret.is_none() { missing.push("SESSION_SECRET"); }
        if mail_address.is_none() { missing.push("MAIL_ADDRESS"); }
        if mail_password.is_none() { missing.push("MAIL_PASSWORD"); }
        let (Some(session_secret), Some(address), Some(password)) = (session_secret, mail_address, mail_password) else {
            return Err(ConfigError::Missing(missing));
        };
        if session_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let ttl_hours: u64 = vars.parse_or("SESSION_TTL_HOURS", 24)?;
        let smtp_timeout: u64 = vars.parse_or("SMTP_TIMEOUT_SECS", 30)?;

        Ok(Self {
            host: vars.get(&["HOST"]).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: vars.parse_or("PORT", 8080)?,
            database_url: vars.get(&["DATABASE_URL", "DB_URI"]),
            db_max_connections: vars.parse_or("DB_MAX_CONNECTIONS", 5)?,
            session_secret,
            session_ttl: Duration::from_secs(ttl_hours * 3600),
            cookie_secure: vars.flag("COOKIE_SECURE"),
            smtp: SmtpSettings {
                host: vars.get(&["SMTP_HOST"]).unwrap_or_else(|| "smtp.gmail.com".to_string()),
                port: vars.parse_or("SMTP_PORT", 587)?,
                address,
                password,
                timeout: Duration::from_secs(smtp_timeout),
            },
            pbkdf2_iterations: vars.parse_or("PBKDF2_ITERATIONS", DEFAULT_ITERATIONS)?,
            enable_hsts: vars.flag("ENABLE_HSTS"),
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// First non-empty value among `names` (preferred name first, legacy aliases after).
    fn get(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|n| (self.0)(n).filter(|v| !v.is_empty()))
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(&[name]) {
            None => Ok(default),
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        }
    }

    fn flag(&self, name: &str) -> bool {
        self.get(&[name]).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
    }
}
