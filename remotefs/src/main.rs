use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::{SeekFrom, Write};

use remotefs::cadapter::http::{HttpConfig, HttpTransport};
use remotefs::cadapter::localfs::LocalDirTransport;
use remotefs::cadapter::Transport;
use remotefs::chuck::DEFAULT_CHUNK_SIZE;
use remotefs::meta::ListMode;
use remotefs::sched::scheduler::{DEFAULT_RETRY_BUDGET, DEFAULT_TICK_INTERVAL};
use remotefs::source::HttpIndexSource;
use remotefs::source::http::DEFAULT_INDEX_FILE;
use remotefs::source::index::write_index_tree;
use remotefs::vfs::config::DEFAULT_DATA_NAMESPACE;
use remotefs::{RemoteFs, RemoteFsConfig, RemoteReadStream};

#[derive(Parser)]
#[command(name = "remotefs", version, about = "Browse and read remote trees through a local chunk cache")]
struct Cli {
    #[command(flatten)]
    opts: SourceArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args)]
struct SourceArgs {
    /// Root of the remote tree: an http(s) URL, a file:// URL or a local directory.
    #[arg(long, env = "REMOTEFS_SOURCE", global = true, value_name = "URL")]
    source: Option<String>,

    /// Namespace the source is mounted at.
    #[arg(long, global = true, default_value = DEFAULT_DATA_NAMESPACE)]
    mount: String,

    /// Local cache directory (defaults to the user cache dir).
    #[arg(long, env = "REMOTEFS_CACHE_DIR", global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Chunk size in bytes.
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Scheduler tick period in milliseconds.
    #[arg(long, global = true, default_value_t = DEFAULT_TICK_INTERVAL.as_millis() as u64)]
    tick_ms: u64,

    /// Retries allowed per request after the first attempt.
    #[arg(long, global = true, default_value_t = DEFAULT_RETRY_BUDGET)]
    retries: u32,

    /// Name of the per-directory index file.
    #[arg(long, global = true, default_value = DEFAULT_INDEX_FILE)]
    index_file: String,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory.
    Ls(LsArgs),
    /// Show one entry.
    Stat { path: String },
    /// Write a file to stdout.
    Cat { path: String },
    /// Copy a byte range of a file into a local file.
    Fetch(FetchArgs),
    /// Write index files for every directory of a local tree.
    GenIndex {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(Args)]
struct LsArgs {
    #[arg(default_value = "/")]
    path: String,

    #[arg(long, conflicts_with = "dirs_only")]
    files_only: bool,

    #[arg(long)]
    dirs_only: bool,

    /// Include entries whose name starts with a dot.
    #[arg(long, short)]
    all: bool,
}

#[derive(Args)]
struct FetchArgs {
    path: String,

    output: PathBuf,

    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Bytes to copy; the rest of the file when omitted.
    #[arg(long)]
    length: Option<u64>,
}

const COPY_BUF: usize = 64 * 1024;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "remotefs=info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::GenIndex { dir } => {
            let written = write_index_tree(&dir, &cli.opts.index_file)
                .with_context(|| format!("indexing {}", dir.display()))?;
            println!("wrote {written} index files under {}", dir.display());
        }
        Command::Ls(args) => {
            let fs = build_fs(&cli.opts)?;
            let mode = match (args.files_only, args.dirs_only) {
                (true, _) => ListMode::FilesOnly,
                (_, true) => ListMode::DirectoriesOnly,
                _ => ListMode::All,
            };
            // surface the typed error before the never-failing filtered view
            fs.list(&args.path).await?;
            let listing = fs.children(&args.path, mode, args.all).await;
            for entry in listing.entries {
                println!("{entry}");
            }
        }
        Command::Stat { path } => {
            let fs = build_fs(&cli.opts)?;
            let entry = fs.stat(&path).await?;
            println!("{entry}");
            println!("path     {}", entry.path);
            println!("location {}", entry.location);
            if let Some(id) = &entry.remote_id {
                println!("id       {id}");
            }
        }
        Command::Cat { path } => {
            let fs = build_fs(&cli.opts)?;
            let mut stream = fs.open(&path).await?;
            let mut stdout = std::io::stdout().lock();
            copy_range(&mut stream, u64::MAX, |bytes| stdout.write_all(bytes)).await?;
            stdout.flush()?;
        }
        Command::Fetch(args) => {
            let fs = build_fs(&cli.opts)?;
            let mut stream = fs.open(&args.path).await?;
            stream.seek(SeekFrom::Start(args.offset))?;
            let mut file = std::fs::File::create(&args.output)
                .with_context(|| format!("creating {}", args.output.display()))?;
            let copied = copy_range(&mut stream, args.length.unwrap_or(u64::MAX), |bytes| {
                file.write_all(bytes)
            })
            .await?;
            file.sync_all()?;
            println!("{copied} bytes -> {}", args.output.display());
        }
    }
    Ok(())
}

fn build_fs(opts: &SourceArgs) -> anyhow::Result<RemoteFs> {
    let Some(source) = opts.source.as_deref() else {
        anyhow::bail!("no source given (use --source or REMOTEFS_SOURCE)");
    };

    let mut config = RemoteFsConfig::default()
        .chunk_size(opts.chunk_size)
        .tick_interval(Duration::from_millis(opts.tick_ms.max(1)))
        .retry_budget(opts.retries);
    if let Some(dir) = &opts.cache_dir {
        config = config.cache_root(dir);
    }

    let (transport, root): (Arc<dyn Transport>, String) =
        if source.starts_with("http://") || source.starts_with("https://") {
            let transport = HttpTransport::new(HttpConfig::default())?;
            (Arc::new(transport), source.to_string())
        } else {
            let dir = source.strip_prefix("file://").unwrap_or(source);
            let dir = std::fs::canonicalize(dir).with_context(|| format!("source directory {dir}"))?;
            let transport = LocalDirTransport::new(&dir);
            let root = transport.root_location();
            (Arc::new(transport), root)
        };

    let fs = RemoteFs::new(config)?;
    let source = HttpIndexSource::new(root, transport).with_index_file(opts.index_file.clone());
    fs.mount(&opts.mount, Arc::new(source));
    Ok(fs)
}

/// Copy up to `limit` bytes from the stream's cursor into `sink`.
async fn copy_range<F>(stream: &mut RemoteReadStream, limit: u64, mut sink: F) -> anyhow::Result<u64>
where
    F: FnMut(&[u8]) -> std::io::Result<()>,
{
    let mut buf = vec![0u8; COPY_BUF];
    let mut copied = 0u64;
    while copied < limit {
        let want = (limit - copied).min(COPY_BUF as u64) as usize;
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        sink(&buf[..n])?;
        copied += n as u64;
    }
    Ok(copied)
}
