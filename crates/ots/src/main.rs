use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use ots_client::{Attachment, Client, ClientConfig, Secret};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Attachments are secrets too.
#[cfg(unix)]
const STORE_FILE_MODE: u32 = 0o600;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "ots", about = "Share one-time secrets", version)]
struct Cli {
    /// Log filter, used when $OTS_LOG_LEVEL is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve(ServeArgs),
    /// Create a new encrypted secret on an instance
    Create(CreateArgs),
    /// Retrieve a secret by its URL
    Fetch(FetchArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address to listen on, `:port` binds all interfaces
    #[arg(long, env = "OTS_LISTEN")]
    listen: Option<String>,
    /// Storage backend: mem or redis
    #[arg(long, env = "OTS_STORAGE_TYPE")]
    storage_type: Option<String>,
    /// Default secret lifetime in seconds (0 keeps secrets until read)
    #[arg(long, env = "OTS_SECRET_EXPIRY")]
    secret_expiry: Option<u64>,
    /// TOML file with instance customizations
    #[arg(long, env = "OTS_CUSTOMIZE")]
    customize: Option<PathBuf>,
    /// How often the memory backend drops expired secrets, e.g. 1m
    #[arg(long, env = "OTS_PRUNE_INTERVAL", value_parser = parse_seconds)]
    prune_interval: Option<Duration>,
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
    /// Prefix for Redis keys
    #[arg(long, env = "REDIS_KEY")]
    redis_key: Option<String>,
    /// Bound for every Redis call, e.g. 5s
    #[arg(long, env = "OTS_REDIS_TIMEOUT", value_parser = parse_seconds)]
    redis_timeout: Option<Duration>,
}

#[derive(clap::Args)]
struct CreateArgs {
    /// File(s) to attach to the secret
    #[arg(short = 'f', long = "file")]
    files: Vec<PathBuf>,
    /// Instance to create the secret with
    #[arg(long, default_value = "https://ots.fyi/")]
    instance: String,
    /// File to read the secret content from ("-" for stdin)
    #[arg(long, default_value = "-")]
    secret_from: String,
    /// When to expire the secret, e.g. 1h (0 uses the server default)
    #[arg(long, default_value = "0s")]
    expire: humantime::Duration,
    /// Header to include in requests, e.g. 'Authorization: Token ...'
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Basic auth credentials as 'user:pass'
    #[arg(short = 'u', long)]
    user: Option<String>,
}

#[derive(clap::Args)]
struct FetchArgs {
    /// Secret URL including the #id|passphrase fragment
    url: String,
    /// Where to put files attached to the secret
    #[arg(long, default_value = ".")]
    file_dir: PathBuf,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let fallback = match cli.command {
        Commands::Serve(_) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_env("OTS_LOG_LEVEL").unwrap_or_else(|_| {
            EnvFilter::new(cli.log_level.as_deref().unwrap_or(fallback))
        }))
        .init();

    match cli.command {
        Commands::Serve(args) => cmd_serve(args).await,
        Commands::Create(args) => cmd_create(args).await,
        Commands::Fetch(args) => cmd_fetch(args).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let mut cfg = ots_server::ServerConfig::default();
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(kind) = args.storage_type {
        cfg.storage.kind = kind;
    }
    if let Some(expiry) = args.secret_expiry {
        cfg.secret_expiry = expiry;
    }
    if args.customize.is_some() {
        cfg.customize_path = args.customize;
    }
    if let Some(interval) = args.prune_interval {
        cfg.storage.prune_interval = interval;
    }
    if args.redis_url.is_some() {
        cfg.storage.redis_url = args.redis_url;
    }
    if args.redis_key.is_some() {
        cfg.storage.redis_key_prefix = args.redis_key;
    }
    if let Some(timeout) = args.redis_timeout {
        cfg.storage.redis_timeout = timeout;
    }

    ots_server::run(cfg).await
}

async fn cmd_create(args: CreateArgs) -> Result<()> {
    let client = Client::new(ClientConfig {
        default_headers: auth_headers(&args.headers, args.user.as_deref())?,
        ..Default::default()
    })
    .context("construct HTTP client")?;

    info!("reading secret content");
    let mut secret = Secret::new(read_secret(&args.secret_from)?);

    for path in &args.files {
        info!(file = %path.display(), "attaching file");
        secret = secret.with_attachment(read_attachment(path)?);
    }

    client
        .sanity_check(&args.instance, &secret)
        .await
        .context("sanity checking secret")?;

    let created = client
        .create(&args.instance, &secret, args.expire.into())
        .await
        .context("creating secret")?;

    match created.expires_at {
        Some(expires_at) => info!(%expires_at, "secret created, see URL below"),
        None => info!("secret created, see URL below"),
    }
    println!("{}", created.url);
    Ok(())
}

async fn cmd_fetch(args: FetchArgs) -> Result<()> {
    check_dir_writable(&args.file_dir)
        .with_context(|| format!("checking {} is writable", args.file_dir.display()))?;

    let client = Client::new(ClientConfig::default()).context("construct HTTP client")?;

    info!("fetching secret");
    let secret = client.fetch(&args.url).await.context("fetching secret")?;

    for attachment in &secret.attachments {
        let stored = store_attachment(&args.file_dir, attachment)
            .with_context(|| format!("saving {} to disk", attachment.name))?;
        info!(file = %stored.display(), "stored attachment");
    }

    println!("{}", secret.secret);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Non-zero duration given as plain seconds or in humantime notation.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let d = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => s
            .parse::<humantime::Duration>()
            .map(Into::into)
            .map_err(|e| format!("invalid duration {s:?}: {e}"))?,
    };
    if d.is_zero() {
        return Err("duration must be greater than zero".into());
    }
    Ok(d)
}

/// Headers sent with every request: `-H` values plus basic auth from `-u`.
/// Malformed header lines are skipped with a warning.
fn auth_headers(raw: &[String], user: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for line in raw {
        let Some((name, value)) = line.split_once(':') else {
            warn!(header = %line, "invalid header format, skipping");
            continue;
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name in {line:?}"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in {line:?}"))?;
        headers.append(name, value);
    }

    if let Some(creds) = user.filter(|c| c.contains(':')) {
        let mut value = HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(creds)))
            .context("invalid basic auth credentials")?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

fn read_secret(source: &str) -> Result<String> {
    let mut raw = Vec::new();
    if source == "-" {
        std::io::stdin()
            .read_to_end(&mut raw)
            .context("reading secret from stdin")?;
    } else {
        raw = std::fs::read(source).with_context(|| format!("reading secret from {source}"))?;
    }
    String::from_utf8(raw).context("secret content is not valid UTF-8")
}

fn read_attachment(path: &Path) -> Result<Attachment> {
    let content =
        std::fs::read(path).with_context(|| format!("reading attachment {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("attachment {} has no usable file name", path.display()))?;

    Ok(Attachment {
        name: name.to_owned(),
        mime_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned(),
        content,
    })
}

/// Create (or truncate a leftover) probe file in `dir`, then remove it.
fn check_dir_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(".ots-cli.tmp");
    private_file(&probe, false)
        .and_then(|mut f| f.write_all(b""))
        .context("writing probe file")?;
    if let Err(e) = std::fs::remove_file(&probe) {
        warn!(file = %probe.display(), error = %e, "removing probe file");
    }
    Ok(())
}

/// Write `attachment` into `dir` under its own name, or `stem (N).rest`
/// if that is taken. Returns the path written.
fn store_attachment(dir: &Path, attachment: &Attachment) -> Result<PathBuf> {
    // Never let a sender pick a path outside `dir`.
    let name = Path::new(&attachment.name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("attachment");

    let (stem, rest) = match name.split_once('.') {
        Some((stem, rest)) => (stem, Some(rest)),
        None => (name, None),
    };

    let mut candidate = dir.join(name);
    for n in 1u32.. {
        match write_new(&candidate, &attachment.content) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = dir.join(match rest {
                    Some(rest) => format!("{stem} ({n}).{rest}"),
                    None => format!("{stem} ({n})"),
                });
            }
            Err(e) => return Err(e).with_context(|| format!("writing {}", candidate.display())),
        }
    }
    anyhow::bail!("no free file name for {name}")
}

fn write_new(path: &Path, content: &[u8]) -> std::io::Result<()> {
    private_file(path, true)?.write_all(content)
}

/// Open `path` for writing with owner-only permissions. With `exclusive`
/// an existing file is an `AlreadyExists` error, otherwise it is truncated.
fn private_file(path: &Path, exclusive: bool) -> std::io::Result<std::fs::File> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if exclusive {
        opts.create_new(true);
    } else {
        opts.create(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(STORE_FILE_MODE);
    }
    opts.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str, content: &[u8]) -> Attachment {
        Attachment {
            name: name.into(),
            mime_type: "text/plain".into(),
            content: content.to_vec(),
        }
    }

    #[test]
    fn attachments_get_free_names() {
        let dir = tempfile::tempdir().unwrap();

        let first = store_attachment(dir.path(), &attachment("notes.tar.gz", b"1")).unwrap();
        let second = store_attachment(dir.path(), &attachment("notes.tar.gz", b"2")).unwrap();
        let third = store_attachment(dir.path(), &attachment("notes.tar.gz", b"3")).unwrap();

        assert_eq!(first, dir.path().join("notes.tar.gz"));
        assert_eq!(second, dir.path().join("notes (1).tar.gz"));
        assert_eq!(third, dir.path().join("notes (2).tar.gz"));
        assert_eq!(std::fs::read(&second).unwrap(), b"2");
    }

    #[test]
    fn names_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        store_attachment(dir.path(), &attachment("README", b"")).unwrap();
        let again = store_attachment(dir.path(), &attachment("README", b"")).unwrap();
        assert_eq!(again, dir.path().join("README (1)"));
    }

    #[test]
    fn attachment_names_cannot_escape_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stored = store_attachment(dir.path(), &attachment("../../etc/passwd", b"x")).unwrap();
        assert_eq!(stored, dir.path().join("passwd"));

        let stored = store_attachment(dir.path(), &attachment("..", b"x")).unwrap();
        assert_eq!(stored, dir.path().join("attachment"));
    }

    #[cfg(unix)]
    #[test]
    fn attachments_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let stored = store_attachment(dir.path(), &attachment("key.pem", b"x")).unwrap();
        let mode = std::fs::metadata(stored).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn writable_check_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        check_dir_writable(dir.path()).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(check_dir_writable(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn writable_check_tolerates_leftover_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".ots-cli.tmp"), b"stale").unwrap();
        check_dir_writable(dir.path()).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn headers_and_basic_auth() {
        let headers = auth_headers(
            &["X-Team: ops".into(), "garbage".into(), "X-Team:  sec ".into()],
            Some("alice:s3cret"),
        )
        .unwrap();

        let teams: Vec<_> = headers.get_all("x-team").iter().collect();
        assert_eq!(teams, ["ops", "sec"]);
        assert_eq!(headers[AUTHORIZATION], "Basic YWxpY2U6czNjcmV0");
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn basic_auth_requires_separator() {
        let headers = auth_headers(&[], Some("alice")).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn attachment_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let a = read_attachment(&path).unwrap();
        assert_eq!(a.name, "photo.png");
        assert_eq!(a.mime_type, "image/png");
        assert_eq!(a.content, b"\x89PNG");
    }

    #[test]
    fn durations_accept_seconds_or_humantime() {
        assert_eq!(parse_seconds("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_seconds("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_seconds("soon").is_err());
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("0s").is_err());
    }
}
