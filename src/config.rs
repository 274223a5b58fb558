use crate::services::object_store_client::{PollPolicy, S3Settings};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub s3: S3Settings,
    /// Base URL objects are publicly served from (e.g. a CDN in front of the bucket).
    pub public_base_url: Option<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    pub store_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Zero disables the reconciler.
    pub reconcile_interval: Duration,
    pub reconcile_grace: Duration,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Serve,
    Migrate,
    CreateAccount { display_name: String, domain: String },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "ShareX-compatible file and URL shortening service")]
pub struct Args {
    /// Host to bind to (overrides UPLOADER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOADER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides UPLOADER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// S3 bucket holding uploaded files (overrides UPLOADER_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// S3 region (overrides UPLOADER_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Custom S3-compatible endpoint (overrides UPLOADER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Public base URL for stored files (overrides UPLOADER_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Uploads admitted per client per window (overrides UPLOADER_RATE_LIMIT_MAX)
    #[arg(long)]
    pub rate_limit_max: Option<u32>,

    /// Rate limit window in seconds (overrides UPLOADER_RATE_LIMIT_WINDOW_SECS)
    #[arg(long)]
    pub rate_limit_window_secs: Option<u64>,

    /// Visibility checks after a write or delete (overrides UPLOADER_VERIFY_ATTEMPTS)
    #[arg(long)]
    pub verify_attempts: Option<u32>,

    /// Milliseconds between visibility checks (overrides UPLOADER_VERIFY_INTERVAL_MS)
    #[arg(long)]
    pub verify_interval_ms: Option<u64>,

    /// Per-call object store timeout in seconds (overrides UPLOADER_STORE_TIMEOUT_SECS)
    #[arg(long)]
    pub store_timeout_secs: Option<u64>,

    /// Largest accepted upload in bytes (overrides UPLOADER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Seconds between orphan reconciliation passes, 0 to disable
    /// (overrides UPLOADER_RECONCILE_INTERVAL_SECS)
    #[arg(long)]
    pub reconcile_interval_secs: Option<u64>,

    /// Minimum age in seconds before an unrecorded object is removed
    /// (overrides UPLOADER_RECONCILE_GRACE_SECS)
    #[arg(long)]
    pub reconcile_grace_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Create an account with this display name, print its key and exit
    #[arg(long, value_name = "DISPLAY_NAME", requires = "domain", conflicts_with = "migrate")]
    pub create_account: Option<String>,

    /// Domain for --create-account
    #[arg(long, requires = "create_account")]
    pub domain: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables visible through `lookup`, then validate.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, Mode)> {
        let mode = match (args.create_account, args.domain) {
            (Some(display_name), Some(domain)) => Mode::CreateAccount {
                display_name,
                domain,
            },
            _ if args.migrate => Mode::Migrate,
            _ => Mode::Serve,
        };

        let cfg = Self {
            host: pick(args.host, &lookup, "UPLOADER_HOST", "0.0.0.0".to_string())?,
            port: pick(args.port, &lookup, "UPLOADER_PORT", 3000)?,
            database_url: pick(
                args.database_url,
                &lookup,
                "UPLOADER_DATABASE_URL",
                "sqlite://./data/uploader.db".to_string(),
            )?,
            s3: S3Settings {
                bucket: pick(args.s3_bucket, &lookup, "UPLOADER_S3_BUCKET", String::new())?,
                region: pick(
                    args.s3_region,
                    &lookup,
                    "UPLOADER_S3_REGION",
                    "us-east-1".to_string(),
                )?,
                endpoint: args
                    .s3_endpoint
                    .or_else(|| lookup("UPLOADER_S3_ENDPOINT")),
                access_key_id: lookup("UPLOADER_S3_ACCESS_KEY_ID"),
                secret_access_key: lookup("UPLOADER_S3_SECRET_ACCESS_KEY"),
            },
            public_base_url: args
                .public_base_url
                .or_else(|| lookup("UPLOADER_PUBLIC_BASE_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            rate_limit_max: pick(args.rate_limit_max, &lookup, "UPLOADER_RATE_LIMIT_MAX", 5)?,
            rate_limit_window: Duration::from_secs(pick(
                args.rate_limit_window_secs,
                &lookup,
                "UPLOADER_RATE_LIMIT_WINDOW_SECS",
                30,
            )?),
            verify_attempts: pick(args.verify_attempts, &lookup, "UPLOADER_VERIFY_ATTEMPTS", 5)?,
            verify_interval: Duration::from_millis(pick(
                args.verify_interval_ms,
                &lookup,
                "UPLOADER_VERIFY_INTERVAL_MS",
                2000,
            )?),
            store_timeout: Duration::from_secs(pick(
                args.store_timeout_secs,
                &lookup,
                "UPLOADER_STORE_TIMEOUT_SECS",
                5,
            )?),
            max_upload_bytes: pick(
                args.max_upload_bytes,
                &lookup,
                "UPLOADER_MAX_UPLOAD_BYTES",
                100 * 1024 * 1024,
            )?,
            reconcile_interval: Duration::from_secs(pick(
                args.reconcile_interval_secs,
                &lookup,
                "UPLOADER_RECONCILE_INTERVAL_SECS",
                0,
            )?),
            reconcile_grace: Duration::from_secs(pick(
                args.reconcile_grace_secs,
                &lookup,
                "UPLOADER_RECONCILE_GRACE_SECS",
                3600,
            )?),
        };

        cfg.validate(&mode)?;
        Ok((cfg, mode))
    }

    fn validate(&self, mode: &Mode) -> Result<()> {
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if self.rate_limit_max == 0 || self.rate_limit_window.is_zero() {
            bail!("rate limit threshold and window must be non-zero");
        }
        if self.verify_attempts == 0 {
            bail!("verify attempts must be non-zero");
        }
        if self.store_timeout.is_zero() {
            bail!("store timeout must be non-zero");
        }
        if *mode == Mode::Serve && self.s3.bucket.trim().is_empty() {
            bail!("an S3 bucket is required (--s3-bucket or UPLOADER_S3_BUCKET)");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn verify_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.verify_attempts,
            interval: self.verify_interval,
        }
    }
}

/// CLI value, else parsed environment variable, else `default`.
fn pick<T>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, raw)),
        None => Ok(default),
    }
}
