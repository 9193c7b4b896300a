use crate::models::object::DEFAULT_STORAGE_CLASS;
use crate::services::format_service::FormatMode;
use crate::services::image_service::{DEFAULT_JPEG_QUALITY, ResizeFit};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr};

/// Where originals and derived artifacts are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    S3,
    /// SQLite metadata + on-disk payloads, for running without S3.
    Local,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::S3 => "s3",
            Self::Local => "local",
        })
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "unknown storage backend `{other}` (expected `s3` or `local`)"
            )),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub base_url: String,
    pub format_mode: FormatMode,
    pub resize_fit: ResizeFit,
    pub jpeg_quality: u8,
    pub storage_class: String,
    pub backend: StorageBackend,
    pub storage_dir: String,
    pub database_url: String,
}

/// One-shot maintenance work requested on the command line.
#[derive(Debug, Clone, Default)]
pub struct Maintenance {
    pub migrate: bool,
    pub imports: Vec<PathBuf>,
}

impl Maintenance {
    pub fn is_requested(&self) -> bool {
        self.migrate || !self.imports.is_empty()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "On-demand image resizing gateway")]
pub struct Args {
    /// Host to bind to (overrides RESIZE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RESIZE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket holding originals and derived images (overrides BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base URL for redirect locations (overrides URL)
    #[arg(long)]
    pub url: Option<String>,

    /// `adaptive` or `fixed-png` (overrides FORMAT_MODE)
    #[arg(long)]
    pub format_mode: Option<FormatMode>,

    /// `exact` or `cover` (overrides RESIZE_FIT)
    #[arg(long)]
    pub fit: Option<ResizeFit>,

    /// JPEG output quality, 1-100 (overrides JPEG_QUALITY)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Storage class hint for derived images (overrides STORAGE_CLASS)
    #[arg(long)]
    pub storage_class: Option<String>,

    /// `s3` or `local` (overrides STORAGE_BACKEND)
    #[arg(long)]
    pub backend: Option<StorageBackend>,

    /// Local backend payload directory (overrides RESIZE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Local backend database URL (overrides RESIZE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run local backend migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Store FILE as `original/<file name>` in the local backend and exit
    #[arg(long = "import", value_name = "FILE")]
    pub imports: Vec<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and any
    /// requested maintenance work.
    pub fn from_env_and_args() -> Result<(Self, Maintenance)> {
        Self::resolve(Args::parse(), |name| env::var(name))
    }

    /// Merge parsed arguments over values read through `lookup`.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<(Self, Maintenance)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_or = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {name}")),
            }
        };
        let parsed_env = |name: &str| -> Result<Option<String>> {
            Ok(env_or(name)?.filter(|v| !v.trim().is_empty()))
        };

        // --- Required ---
        let bucket = match args.bucket {
            Some(bucket) => bucket,
            None => parsed_env("BUCKET")?
                .context("BUCKET is not set (use --bucket or the BUCKET environment variable)")?,
        };
        let base_url = match args.url {
            Some(url) => url,
            None => parsed_env("URL")?
                .context("URL is not set (use --url or the URL environment variable)")?,
        };

        // --- Environment fallback ---
        let env_host = parsed_env("RESIZE_GATEWAY_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(parsed_env("RESIZE_GATEWAY_PORT")?, "RESIZE_GATEWAY_PORT", 3000)?;
        let env_format = parse_var(parsed_env("FORMAT_MODE")?, "FORMAT_MODE", FormatMode::default())?;
        let env_fit = parse_var(parsed_env("RESIZE_FIT")?, "RESIZE_FIT", ResizeFit::default())?;
        let env_quality = parse_var(parsed_env("JPEG_QUALITY")?, "JPEG_QUALITY", DEFAULT_JPEG_QUALITY)?;
        let env_class =
            parsed_env("STORAGE_CLASS")?.unwrap_or_else(|| DEFAULT_STORAGE_CLASS.into());
        let env_backend = parse_var(
            parsed_env("STORAGE_BACKEND")?,
            "STORAGE_BACKEND",
            StorageBackend::default(),
        )?;
        let env_storage = parsed_env("RESIZE_GATEWAY_STORAGE_DIR")?
            .unwrap_or_else(|| "./data/objects".into());
        let env_db = parsed_env("RESIZE_GATEWAY_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/objects.db".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            bucket,
            base_url,
            format_mode: args.format_mode.unwrap_or(env_format),
            resize_fit: args.fit.unwrap_or(env_fit),
            jpeg_quality: args.jpeg_quality.unwrap_or(env_quality),
            storage_class: args.storage_class.unwrap_or(env_class),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
        };

        if !(1..=100).contains(&cfg.jpeg_quality) {
            bail!("JPEG quality must be 1-100, got {}", cfg.jpeg_quality);
        }

        let maintenance = Maintenance {
            migrate: args.migrate,
            imports: args.imports,
        };

        Ok((cfg, maintenance))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {name} value `{raw}`: {err}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Maintenance)> {
        let args = Args::try_parse_from(std::iter::once("resize-gateway").chain(argv.iter().copied()))
            .unwrap();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| {
            vars.get(name).cloned().ok_or(env::VarError::NotPresent)
        })
    }

    #[test]
    fn test_defaults() {
        let (cfg, maintenance) =
            resolve(&[], &[("BUCKET", "images"), ("URL", "https://cdn.example.com")]).unwrap();

        assert_eq!(cfg.bucket, "images");
        assert_eq!(cfg.base_url, "https://cdn.example.com");
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.format_mode, FormatMode::Adaptive);
        assert_eq!(cfg.resize_fit, ResizeFit::Exact);
        assert_eq!(cfg.jpeg_quality, DEFAULT_JPEG_QUALITY);
        assert_eq!(cfg.storage_class, DEFAULT_STORAGE_CLASS);
        assert_eq!(cfg.backend, StorageBackend::S3);
        assert!(!maintenance.is_requested());
    }

    #[test]
    fn test_env_values() {
        let (cfg, _) = resolve(
            &[],
            &[
                ("BUCKET", "images"),
                ("URL", "http://localhost:9000/images"),
                ("FORMAT_MODE", "fixed-png"),
                ("RESIZE_FIT", "cover"),
                ("JPEG_QUALITY", "90"),
                ("STORAGE_CLASS", "STANDARD_IA"),
                ("STORAGE_BACKEND", "local"),
                ("RESIZE_GATEWAY_PORT", "8080"),
            ],
        )
        .unwrap();

        assert_eq!(cfg.format_mode, FormatMode::FixedPng);
        assert_eq!(cfg.resize_fit, ResizeFit::Cover);
        assert_eq!(cfg.jpeg_quality, 90);
        assert_eq!(cfg.storage_class, "STANDARD_IA");
        assert_eq!(cfg.backend, StorageBackend::Local);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn test_args_override_env() {
        let (cfg, maintenance) = resolve(
            &[
                "--bucket",
                "from-args",
                "--format-mode",
                "fixed-png",
                "--port",
                "4000",
                "--migrate",
                "--import",
                "cat.jpg",
            ],
            &[
                ("BUCKET", "from-env"),
                ("URL", "https://cdn.example.com"),
                ("FORMAT_MODE", "adaptive"),
                ("RESIZE_GATEWAY_PORT", "8080"),
            ],
        )
        .unwrap();

        assert_eq!(cfg.bucket, "from-args");
        assert_eq!(cfg.format_mode, FormatMode::FixedPng);
        assert_eq!(cfg.port, 4000);
        assert!(maintenance.migrate);
        assert_eq!(maintenance.imports, vec![PathBuf::from("cat.jpg")]);
    }

    #[test]
    fn test_missing_bucket_or_url() {
        assert!(resolve(&[], &[("URL", "https://cdn.example.com")]).is_err());
        assert!(resolve(&[], &[("BUCKET", "images")]).is_err());
        assert!(resolve(&[], &[("BUCKET", ""), ("URL", "https://cdn.example.com")]).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = [("BUCKET", "images"), ("URL", "https://cdn.example.com")];
        for bad in [
            ("FORMAT_MODE", "webp"),
            ("RESIZE_FIT", "contain"),
            ("JPEG_QUALITY", "0"),
            ("JPEG_QUALITY", "abc"),
            ("RESIZE_GATEWAY_PORT", "99999"),
            ("STORAGE_BACKEND", "gcs"),
        ] {
            let mut vars = base.to_vec();
            vars.push(bad);
            assert!(resolve(&[], &vars).is_err(), "accepted {bad:?}");
        }
    }
}
