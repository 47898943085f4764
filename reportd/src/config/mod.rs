//! Service configuration.
//!
//! Every option has a default and can be overridden with a `REPORTD_`
//! environment variable named after its dotted path, e.g. `collector.parallel`
//! is `REPORTD_COLLECTOR_PARALLEL`. Durations use humantime syntax (`15s`,
//! `5m`, `1h 30m`).

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::{Error, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "REPORTD_";

pub const DEFAULT_PARALLEL: usize = 32;
pub const DEFAULT_EVALUATOR_CACHE: usize = 15;
pub const DEFAULT_ORCHESTRATOR_CACHE: usize = 5;
pub const DEFAULT_BUFFER: usize = 15;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Maximum concurrent fetches across all collect calls.
    pub parallel: usize,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub cache_size: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cache_size: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity of every inter-stage channel.
    pub buffer: usize,
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EventConfig {
    pub load_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SmbConfig {
    /// `host` or `host:port`.
    pub address: String,
    pub user: String,
    pub password: String,
    pub domain: String,
    pub share: String,
    pub active: bool,
    pub monitor_interval: Duration,
    /// 0 means retry forever.
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Sender address, also used as the login.
    pub email: String,
    pub password: String,
    pub timeout: Duration,
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.email.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub retries: u32,
    pub initial_delay: Duration,
    pub delay_multiplier: f64,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub font_path: Option<PathBuf>,
    pub bold_font_path: Option<PathBuf>,
    pub font_size: f32,
    pub wkhtmltopdf_path: PathBuf,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    /// Filter directive applied after startup, overriding `RUST_LOG`.
    pub log_filter: Option<String>,
    pub collector: CollectorConfig,
    pub generator: GeneratorConfig,
    pub evaluator: EvaluatorConfig,
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
    pub job: JobConfig,
    pub event: EventConfig,
    pub smb: SmbConfig,
    pub smtp: SmtpConfig,
    pub telegram: TelegramConfig,
    pub fetch: FetchConfig,
    pub render: RenderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:reportd.db?mode=rwc".to_string(),
            log_dir: "logs".to_string(),
            log_filter: None,
            collector: CollectorConfig {
                parallel: DEFAULT_PARALLEL,
            },
            generator: GeneratorConfig { workers: 1 },
            evaluator: EvaluatorConfig {
                cache_size: DEFAULT_EVALUATOR_CACHE,
                timeout: Duration::from_secs(10),
            },
            orchestrator: OrchestratorConfig {
                cache_size: DEFAULT_ORCHESTRATOR_CACHE,
            },
            scheduler: SchedulerConfig {
                buffer: DEFAULT_BUFFER,
                timezone: Tz::UTC,
            },
            job: JobConfig {
                timeout: Duration::from_secs(5 * 60),
            },
            event: EventConfig {
                load_timeout: Duration::from_secs(15),
            },
            smb: SmbConfig {
                address: String::new(),
                user: String::new(),
                password: String::new(),
                domain: String::new(),
                share: String::new(),
                active: false,
                monitor_interval: Duration::from_secs(5 * 60),
                max_reconnect_attempts: 0,
            },
            smtp: SmtpConfig {
                host: String::new(),
                port: 465,
                email: String::new(),
                password: String::new(),
                timeout: Duration::from_secs(30),
            },
            telegram: TelegramConfig {
                token: String::new(),
                api_url: "https://api.telegram.org".to_string(),
            },
            fetch: FetchConfig {
                base_url: "http://localhost:3000".to_string(),
                retries: 3,
                initial_delay: Duration::from_secs(15),
                delay_multiplier: 3.0,
                request_timeout: Duration::from_secs(60),
            },
            render: RenderConfig {
                font_path: None,
                bold_font_path: None,
                font_size: 14.0,
                wkhtmltopdf_path: PathBuf::from("wkhtmltopdf"),
            },
        }
    }
}

/// Reads typed values out of a key lookup.
struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        let name = format!("{}{}", ENV_PREFIX, key.to_uppercase().replace('.', "_"));
        (self.lookup)(&name).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.raw(key) {
            *target = value;
        }
    }

    fn parse<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(value) = self.raw(key) {
            *target = value
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{key}: invalid value {value:?}: {e}")))?;
        }
        Ok(())
    }

    fn duration(&self, key: &str, target: &mut Duration) -> Result<()> {
        if let Some(value) = self.raw(key) {
            *target = humantime::parse_duration(value.trim())
                .map_err(|e| Error::config(format!("{key}: invalid duration {value:?}: {e}")))?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<()> {
        if let Some(value) = self.raw(key) {
            *target = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::config(format!("{key}: invalid flag {other:?}")));
                }
            };
        }
        Ok(())
    }

    fn path(&self, key: &str, target: &mut Option<PathBuf>) {
        if let Some(value) = self.raw(key) {
            *target = Some(PathBuf::from(value));
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source { lookup };
        let mut cfg = AppConfig::default();

        src.string("database_url", &mut cfg.database_url);
        src.string("log_dir", &mut cfg.log_dir);
        cfg.log_filter = src.raw("log_filter");

        src.parse("collector.parallel", &mut cfg.collector.parallel)?;
        src.parse("generator.workers", &mut cfg.generator.workers)?;
        src.parse("evaluator.cache_size", &mut cfg.evaluator.cache_size)?;
        src.duration("evaluator.timeout", &mut cfg.evaluator.timeout)?;
        src.parse("orchestrator.cache_size", &mut cfg.orchestrator.cache_size)?;
        src.parse("scheduler.buffer", &mut cfg.scheduler.buffer)?;
        src.parse("scheduler.timezone", &mut cfg.scheduler.timezone)?;
        src.duration("job.timeout", &mut cfg.job.timeout)?;
        src.duration("event.load_timeout", &mut cfg.event.load_timeout)?;

        src.string("smb.address", &mut cfg.smb.address);
        src.string("smb.user", &mut cfg.smb.user);
        src.string("smb.password", &mut cfg.smb.password);
        src.string("smb.domain", &mut cfg.smb.domain);
        src.string("smb.share", &mut cfg.smb.share);
        src.flag("smb.active", &mut cfg.smb.active)?;
        src.duration("smb.monitor_interval", &mut cfg.smb.monitor_interval)?;
        src.parse(
            "smb.max_reconnect_attempts",
            &mut cfg.smb.max_reconnect_attempts,
        )?;

        src.string("smtp.host", &mut cfg.smtp.host);
        src.parse("smtp.port", &mut cfg.smtp.port)?;
        src.string("smtp.email", &mut cfg.smtp.email);
        src.string("smtp.password", &mut cfg.smtp.password);
        src.duration("smtp.timeout", &mut cfg.smtp.timeout)?;

        src.string("telegram.token", &mut cfg.telegram.token);
        src.string("telegram.api_url", &mut cfg.telegram.api_url);

        src.string("fetch.base_url", &mut cfg.fetch.base_url);
        src.parse("fetch.retries", &mut cfg.fetch.retries)?;
        src.duration("fetch.initial_delay", &mut cfg.fetch.initial_delay)?;
        src.parse("fetch.delay_multiplier", &mut cfg.fetch.delay_multiplier)?;
        src.duration("fetch.request_timeout", &mut cfg.fetch.request_timeout)?;

        src.path("render.font_path", &mut cfg.render.font_path);
        src.path("render.bold_font_path", &mut cfg.render.bold_font_path);
        src.parse("render.font_size", &mut cfg.render.font_size)?;
        let mut wkhtmltopdf = None;
        src.path("render.wkhtmltopdf_path", &mut wkhtmltopdf);
        if let Some(path) = wkhtmltopdf {
            cfg.render.wkhtmltopdf_path = path;
        }

        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Replace zero values with their defaults.
    fn normalize(&mut self) {
        if self.collector.parallel == 0 {
            self.collector.parallel = DEFAULT_PARALLEL;
        }
        if self.generator.workers == 0 {
            self.generator.workers = 1;
        }
        if self.evaluator.cache_size == 0 {
            self.evaluator.cache_size = DEFAULT_EVALUATOR_CACHE;
        }
        if self.orchestrator.cache_size == 0 {
            self.orchestrator.cache_size = DEFAULT_ORCHESTRATOR_CACHE;
        }
        if self.scheduler.buffer == 0 {
            self.scheduler.buffer = DEFAULT_BUFFER;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fetch.delay_multiplier < 1.0 {
            return Err(Error::config("fetch.delay_multiplier must be >= 1"));
        }
        if self.smb.active && (self.smb.address.is_empty() || self.smb.share.is_empty()) {
            return Err(Error::config(
                "smb.address and smb.share are required when smb.active is set",
            ));
        }
        if self.job.timeout.is_zero() {
            return Err(Error::config("job.timeout must be positive"));
        }
        if self.smb.monitor_interval.is_zero() {
            return Err(Error::config("smb.monitor_interval must be positive"));
        }
        Ok(())
    }
}
