use crate::blob::s3::S3Settings;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

const ENV_PREFIX: &str = "FILE_GATEWAY_";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Which blob backend serves object bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBackend {
    Local,
    S3,
}

impl FromStr for BlobBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(BlobBackend::Local),
            "s3" | "minio" => Ok(BlobBackend::S3),
            other => bail!("unknown blob backend `{}` (expected `local` or `s3`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub blob_backend: BlobBackend,

    /// Root directory for the local backend.
    pub storage_dir: String,

    pub s3: S3Settings,

    /// Base URL presigned links of the local backend point at.
    pub public_url: String,

    /// HMAC key for local presigned links. Generated per process when unset.
    pub presign_secret: Option<String>,

    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File gateway over a metadata catalog and a blob store")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FILE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend, `local` or `s3` (overrides FILE_GATEWAY_BLOB_BACKEND)
    #[arg(long)]
    pub blob_backend: Option<String>,

    /// Directory for the local backend (overrides FILE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// S3 endpoint, e.g. `http://minio:9000` (overrides FILE_GATEWAY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 region (overrides FILE_GATEWAY_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Use path-style S3 addressing (or FILE_GATEWAY_S3_FORCE_PATH_STYLE=true)
    #[arg(long)]
    pub s3_force_path_style: bool,

    /// Public base URL of this gateway (overrides FILE_GATEWAY_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Maximum upload size in bytes (overrides FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over values looked up by `env` (full variable names).
    ///
    /// Secrets are only read from the environment.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let var = |name: &str| env(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let env_port = match var("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing {ENV_PREFIX}PORT value `{}`", value))?,
            None => 3001,
        };
        let port = args.port.unwrap_or(env_port);

        let blob_backend = args
            .blob_backend
            .or_else(|| var("BLOB_BACKEND"))
            .map(|v| v.parse::<BlobBackend>())
            .transpose()?
            .unwrap_or(BlobBackend::Local);

        let max_upload_bytes = match args.max_upload_bytes {
            Some(bytes) => bytes,
            None => match var("MAX_UPLOAD_BYTES") {
                Some(value) => value.parse::<usize>().with_context(|| {
                    format!("parsing {ENV_PREFIX}MAX_UPLOAD_BYTES value `{}`", value)
                })?,
                None => DEFAULT_MAX_UPLOAD_BYTES,
            },
        };

        let force_path_style = args.s3_force_path_style
            || var("S3_FORCE_PATH_STYLE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false);

        let s3 = S3Settings {
            endpoint: args.s3_endpoint.or_else(|| var("S3_ENDPOINT")),
            region: args
                .s3_region
                .or_else(|| var("S3_REGION"))
                .or_else(|| Some("us-east-1".into())),
            access_key_id: var("S3_ACCESS_KEY"),
            secret_access_key: var("S3_SECRET_KEY"),
            force_path_style,
        };
        if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
            bail!(
                "{ENV_PREFIX}S3_ACCESS_KEY and {ENV_PREFIX}S3_SECRET_KEY must be set together"
            );
        }

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/file_gateway.db".into()),
            blob_backend,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            s3,
            public_url: args
                .public_url
                .or_else(|| var("PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            presign_secret: var("PRESIGN_SECRET"),
            max_upload_bytes,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
