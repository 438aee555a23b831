use std::path::PathBuf;

use anyhow::{bail, Context};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use remotefs::config::RemoteFsConfig;
use remotefs::{FileRecord, RemoteFs, SrcOptions};

const DEFAULT_CONFIG_PATH: &str = "remotefs.toml";

const USAGE: &str = "usage: remotefs [--config <file>] <command>

commands:
  ls <glob>...           list matching objects
  cat <path>             print an object to stdout
  put <path> <file>      upload a local file
  mkdir <path>           create a directory marker
  rm <path>              delete an object
  tree <path>            list every key under a path
  cp <dest> <glob>...    copy matching objects under dest
  sync <dest> <glob>...  stream matching objects to dest";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = std::env::var("REMOTEFS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    if args.first().map(|s| s.as_str()) == Some("--config") {
        if args.len() < 2 {
            bail!("--config requires a path\n\n{USAGE}");
        }
        config_path = PathBuf::from(args.remove(1));
        args.remove(0);
    }

    let Some(command) = args.first().cloned() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let rest = &args[1..];

    let config = RemoteFsConfig::load(&config_path)?;
    let fs = RemoteFs::from_config(&config)?;
    info!(context = %fs.context(), "remotefs ready");

    // Ctrl+C cancels in-flight listing and fetches
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    let options = SrcOptions { cancel: Some(cancel), ..Default::default() };

    match (command.as_str(), rest) {
        ("ls", globs) if !globs.is_empty() => {
            for file in list_all(&fs, globs, &options).await? {
                println!(
                    "{}",
                    serde_json::json!({
                        "path": file.path,
                        "size": file.stat.size,
                        "mtime": file.stat.mtime,
                    })
                );
            }
        }
        ("cat", [path]) => {
            let data = fs.read_file(path, &options).await?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
        ("put", [path, local]) => {
            let data = tokio::fs::read(local)
                .await
                .with_context(|| format!("Failed to read {}", local))?;
            fs.write_file(path, Some(Bytes::from(data))).await?;
            info!(path = %path, "Uploaded");
        }
        ("mkdir", [path]) => fs.mkdir(path).await?,
        ("rm", [path]) => fs.remove_file(path).await?,
        ("tree", [path]) => {
            for name in fs.readdirp(path).await? {
                println!("{}", name);
            }
        }
        ("cp", [dest, globs @ ..]) if !globs.is_empty() => {
            let files = list_all(&fs, globs, &options).await?;
            let copied = fs.copy_files_to(&files, dest, &options).await?;
            info!(copied, dest = %dest, "Copy finished");
        }
        ("sync", [dest, globs @ ..]) if !globs.is_empty() => {
            let mut page = options.clone();
            let mut written = 0;
            loop {
                let records = fs.src(globs.to_vec(), &page)?;
                let cursor = records.cursor();
                written += fs.write_through(records, dest, &options).await?;
                match cursor.get() {
                    Some(token) => page.continuation = Some(token.to_string()),
                    None => break,
                }
            }
            info!(written, dest = %dest, "Sync finished");
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

/// Every match for `globs`, following listing cursors page by page.
async fn list_all(fs: &RemoteFs, globs: &[String], options: &SrcOptions) -> anyhow::Result<Vec<FileRecord>> {
    let mut options = options.clone();
    let mut files = Vec::new();
    loop {
        let listing = fs.list_files(globs.to_vec(), &options).await?;
        files.extend(listing.files);
        match listing.next_continuation {
            Some(token) => options.continuation = Some(token),
            None => return Ok(files),
        }
    }
}
