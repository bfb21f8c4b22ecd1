//! CLI mode for offline-shell: install, inspect and serve a cache shell.

mod progress;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;
use reqwest::Url;

use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::manifest::AssetManifest;
use crate::request::CacheRequest;
use crate::script::{ScriptVars, parse_worker_script_with};
use crate::shell::{FetchSource, InstallProgress, OfflineShell};
use crate::storage::CacheStorage;

use progress::{BarProgress, format_size, print_install_summary, print_keys};

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Populate the cache bucket.
    Install,
    /// Run the HTTP front.
    Serve,
    /// Answer one request through the shell.
    Fetch {
        /// Path relative to the scope.
        path: String,
    },
    /// Validate the shell manifest and report install state.
    Check,
    /// List the keys stored in the bucket.
    Keys,
    /// Delete the bucket.
    Clear,
    /// Print a shell manifest extracted from a worker script.
    Import {
        /// The worker script.
        script: PathBuf,
        /// Variable names to read.
        vars: ScriptVars,
        /// Scope to write into the manifest.
        scope: Option<String>,
    },
    /// Print usage.
    Help,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// `-c/--config` override.
    pub config: Option<PathBuf>,
    /// The command to run.
    pub command: Command,
}

/// Prints usage to stderr.
pub fn print_usage() {
    eprintln!("Usage: offline-shell [OPTIONS] <COMMAND>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Fetch every asset and populate the cache bucket");
    eprintln!("  serve               Run the HTTP front (installs or resumes first)");
    eprintln!("  fetch <path>        Answer one request through the shell");
    eprintln!("  check               Validate the shell manifest and show install state");
    eprintln!("  keys                List the keys stored in the cache bucket");
    eprintln!("  clear               Delete the cache bucket");
    eprintln!("  import <script>     Print a shell manifest read from a worker script");
    eprintln!("      --name-var <V>      Cache name variable (default: CACHE_NAME)");
    eprintln!("      --assets-var <V>    Asset array variable (default: ASSETS_TO_CACHE)");
    eprintln!("      --scope <URL>       Scope to write into the manifest");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH> Shell manifest (default: $OFFLINE_SHELL_CONFIG or");
    eprintln!("                      <config dir>/offline-shell/offline-shell.toml)");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("Logging is controlled by RUST_LOG (default: info).");
}

fn usage_error(message: impl Into<String>) -> Error {
    Error::Config(message.into())
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| usage_error(format!("{flag} requires a value")))
}

/// Parses arguments (without the program name).
///
/// # Errors
///
/// Returns [`Error::Config`] for unknown options, missing values, or a
/// missing or unknown command.
pub fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let mut config = None;
    let mut positional = Vec::new();
    let mut vars = ScriptVars::default();
    let mut scope = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => config = Some(PathBuf::from(take_value(&args, &mut i, "--config")?)),
            "--name-var" => vars.name_var = take_value(&args, &mut i, "--name-var")?,
            "--assets-var" => vars.assets_var = take_value(&args, &mut i, "--assets-var")?,
            "--scope" => scope = Some(take_value(&args, &mut i, "--scope")?),
            "-h" | "--help" => {
                return Ok(CliArgs {
                    config,
                    command: Command::Help,
                });
            }
            arg if !arg.starts_with('-') => positional.push(arg.to_string()),
            other => return Err(usage_error(format!("unknown option: {other}"))),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None => Command::Help,
        Some("install") => Command::Install,
        Some("serve") => Command::Serve,
        Some("check") => Command::Check,
        Some("keys") => Command::Keys,
        Some("clear") => Command::Clear,
        Some("fetch") => Command::Fetch {
            path: positional
                .next()
                .ok_or_else(|| usage_error("fetch requires a path"))?,
        },
        Some("import") => Command::Import {
            script: positional
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| usage_error("import requires a script path"))?,
            vars,
            scope,
        },
        Some(other) => return Err(usage_error(format!("unknown command: {other}"))),
    };
    if let Some(extra) = positional.next() {
        return Err(usage_error(format!("unexpected argument: {extra}")));
    }

    Ok(CliArgs { config, command })
}

fn load_config(path: Option<&Path>) -> Result<ShellConfig> {
    let path = path.map_or_else(ShellConfig::default_path, Path::to_path_buf);
    if !path.exists() {
        return Err(Error::Config(format!(
            "shell manifest not found at {}",
            path.display()
        )));
    }
    ShellConfig::load(&path)
}

/// Runs a parsed command.
///
/// # Errors
///
/// Returns the first error the command hits.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Import { script, vars, scope } => import(&script, &vars, scope.as_deref()),
        command => {
            let config = load_config(args.config.as_deref())?;
            run_with_config(command, &config).await
        }
    }
}

async fn run_with_config(command: Command, config: &ShellConfig) -> Result<()> {
    match command {
        Command::Install => install(config).await,
        Command::Serve => serve(config).await,
        Command::Fetch { path } => fetch(config, &path).await,
        Command::Check => check(config).await,
        Command::Keys => keys(config).await,
        Command::Clear => clear(config).await,
        Command::Import { .. } | Command::Help => Ok(()),
    }
}

async fn install(config: &ShellConfig) -> Result<()> {
    let shell = OfflineShell::from_config(config).await?;
    println!(
        "Installing {} asset(s) from {} into {}...\n",
        shell.manifest().len(),
        shell.manifest().scope(),
        style(shell.cache_name()).bold()
    );
    let progress: Arc<dyn InstallProgress> = Arc::new(BarProgress::new());
    let report = shell.install(&progress).await?;
    print_install_summary(&report);
    Ok(())
}

#[cfg(feature = "server")]
async fn serve(config: &ShellConfig) -> Result<()> {
    use tokio_util::sync::CancellationToken;

    let shell = Arc::new(OfflineShell::from_config(config).await?);
    let listener = crate::server::bind(&config.server).await?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutting down");
        }
        ctrl_c.cancel();
    });

    let progress: Arc<dyn InstallProgress> = Arc::new(BarProgress::new());
    crate::server::serve(listener, shell, &config.server, progress, token).await
}

#[cfg(not(feature = "server"))]
async fn serve(_config: &ShellConfig) -> Result<()> {
    Err(Error::Config("HTTP front not compiled in (enable the `server` feature)".to_string()))
}

/// Resolves a command-line path against the manifest scope.
fn resolve_path(manifest: &AssetManifest, path: &str) -> Result<Url> {
    let url = manifest
        .scope()
        .join(&format!("./{}", path.trim_start_matches('/')))
        .map_err(|e| usage_error(format!("cannot resolve {path:?}: {e}")))?;
    Ok(url)
}

async fn fetch(config: &ShellConfig, path: &str) -> Result<()> {
    let shell = OfflineShell::from_config(config).await?;
    shell.resume().await?;
    let request = CacheRequest::get(resolve_path(shell.manifest(), path)?);

    let fetched = shell.fetch(&request).await?;
    let source = match fetched.source {
        FetchSource::Cache => style("cache").green(),
        FetchSource::Network => style("network").yellow(),
        FetchSource::Passthrough => style("passthrough").yellow(),
    };
    eprintln!(
        "{} {} from {source} ({})",
        fetched.response.status,
        request.url,
        format_size(fetched.response.body.len() as u64)
    );
    std::io::stdout().write_all(&fetched.response.body)?;
    Ok(())
}

async fn check(config: &ShellConfig) -> Result<()> {
    let manifest = AssetManifest::from_config(config)?;
    println!(
        "{} {} asset(s) under {}",
        style("ok").green().bold(),
        manifest.len(),
        manifest.scope()
    );
    for asset in manifest.assets() {
        println!("  {:<40} -> {}", asset.entry, asset.url);
    }

    let shell = OfflineShell::from_config(config).await?;
    if shell.resume().await? {
        println!("Cache {} is installed.", style(shell.cache_name()).bold());
    } else {
        println!(
            "Cache {} is {}; run `offline-shell install`.",
            style(shell.cache_name()).bold(),
            style("not installed").yellow()
        );
    }
    Ok(())
}

async fn keys(config: &ShellConfig) -> Result<()> {
    let shell = OfflineShell::from_config(config).await?;
    let storage = shell.storage();
    if !storage.has(shell.cache_name()).await? {
        println!("Cache {} does not exist.", style(shell.cache_name()).bold());
        return Ok(());
    }
    let keys = storage.keys(shell.cache_name()).await?;
    print_keys(shell.cache_name(), &keys);
    Ok(())
}

async fn clear(config: &ShellConfig) -> Result<()> {
    let shell = OfflineShell::from_config(config).await?;
    if shell.storage().delete(shell.cache_name()).await? {
        println!("Deleted cache {}.", style(shell.cache_name()).bold());
    } else {
        println!("Cache {} does not exist.", style(shell.cache_name()).bold());
    }
    Ok(())
}

fn import(script: &Path, vars: &ScriptVars, scope: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(script)?;
    let worker = parse_worker_script_with(&script.display().to_string(), &text, vars)?;
    let config = worker.into_config(scope)?;
    AssetManifest::from_config(&config)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        parse_args(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse(&[]).unwrap().command, Command::Help);
        assert_eq!(parse(&["install"]).unwrap().command, Command::Install);
        assert_eq!(parse(&["keys"]).unwrap().command, Command::Keys);
        assert_eq!(
            parse(&["fetch", "/index.html"]).unwrap().command,
            Command::Fetch {
                path: "/index.html".to_string()
            }
        );
    }

    #[test]
    fn parses_config_flag_anywhere() {
        let args = parse(&["serve", "-c", "/tmp/shell.toml"]).unwrap();
        assert_eq!(args.command, Command::Serve);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/shell.toml")));
        let args = parse(&["--config", "a.toml", "check"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("a.toml")));
    }

    #[test]
    fn parses_import_options() {
        let args = parse(&["import", "sw.js", "--name-var", "CACHE", "--scope", "http://localhost/"]).unwrap();
        match args.command {
            Command::Import { script, vars, scope } => {
                assert_eq!(script, PathBuf::from("sw.js"));
                assert_eq!(vars.name_var, "CACHE");
                assert_eq!(vars.assets_var, "ASSETS_TO_CACHE");
                assert_eq!(scope.as_deref(), Some("http://localhost/"));
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(parse(&["fetch"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["install", "--bogus"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["frobnicate"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["install", "extra"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["-c"]), Err(Error::Config(_))));
    }

    #[test]
    fn resolve_path_stays_under_scope() {
        let manifest = AssetManifest::new::<&str>("http://localhost:8501/app/", &[]).unwrap();
        assert_eq!(
            resolve_path(&manifest, "/pages/8_Notes.py").unwrap().as_str(),
            "http://localhost:8501/app/pages/8_Notes.py"
        );
        assert_eq!(
            resolve_path(&manifest, "index.html").unwrap().as_str(),
            "http://localhost:8501/app/index.html"
        );
    }

    #[test]
    fn missing_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("absent.toml")));
    }

    #[tokio::test]
    async fn clear_and_keys_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let config = ShellConfig::new("v1", vec!["./".to_string()]).with_storage_dir(dir.path());
        keys(&config).await.unwrap();
        clear(&config).await.unwrap();
        check(&config).await.unwrap();
    }
}
