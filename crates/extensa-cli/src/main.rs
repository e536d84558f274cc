//! Command-line interface for the Extensa extension manager.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use extensa_core::config::Config;
use extensa_core::extension::{classifier, Bundler, ModuleCompiler, PackageScanner, TypeTag};
use extensa_core::ExtensionWarning;

/// Extensa - discover, bundle and serve host extensions.
#[derive(Parser, Debug)]
#[command(name = "extensa")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file. Defaults apply when it does not exist.
    #[arg(short, long, global = true, env = "EXTENSA_CONFIG", default_value = "extensa.toml")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the delivery server.
    Serve {
        /// Address to bind to, overriding the configuration.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Scan extension directories and print the descriptors as JSON.
    Scan,
    /// Build the payload for one app type and print it.
    Build {
        /// App type, singular or plural (`panel`, `panels`).
        #[arg(required = true)]
        type_name: String,
        /// Write the payload here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate the configuration and print it with overrides applied.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n=== PANIC ===");
        if let Some(location) = panic_info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        }
        eprintln!("Message: {}", panic_info);
        eprintln!("==============\n");
    }));

    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Serve { bind } => {
            let mut config = load_config(&args.config)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            extensa_api::run(config).await
        }
        Command::Scan => run_scan(&load_config(&args.config)?),
        Command::Build { type_name, output } => {
            run_build(&load_config(&args.config)?, &type_name, output.as_deref())
        }
        Command::CheckConfig => {
            let config = load_config(&args.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("EXTENSA_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "extensa=debug" } else { "extensa=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Load `path` if present, else defaults; environment overrides apply either way.
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return Config::load(path).with_context(|| format!("loading {}", path.display()));
    }
    tracing::debug!(path = %path.display(), "No configuration file, using defaults");
    let mut config = Config::default();
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn report_warnings(warnings: &[ExtensionWarning]) {
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
}

fn run_scan(config: &Config) -> Result<()> {
    let report = PackageScanner::new(config.extensions.paths.iter().cloned())
        .with_disabled(config.extensions.disabled.iter().cloned())
        .scan()?;
    report_warnings(&report.warnings);
    println!("{}", serde_json::to_string_pretty(&report.descriptors)?);
    Ok(())
}

fn resolve_app_type(name: &str) -> Result<TypeTag> {
    let tag = classifier::depluralize_app(name).or_else(|| name.parse().ok());
    match tag {
        Some(tag) if classifier::is_app_type(tag) => Ok(tag),
        Some(tag) => bail!("'{}' is not an app extension type", tag),
        None => bail!("unknown extension type '{}'", name),
    }
}

fn run_build(config: &Config, type_name: &str, output: Option<&Path>) -> Result<()> {
    let tag = resolve_app_type(type_name)?;
    let report = PackageScanner::new(config.extensions.paths.iter().cloned())
        .with_disabled(config.extensions.disabled.iter().cloned())
        .scan()?;
    report_warnings(&report.warnings);

    let payload = Bundler::new(Arc::new(ModuleCompiler))
        .with_max_payload_bytes(config.extensions.max_payload_bytes)
        .build(tag, &report.descriptors)?;
    report_warnings(&payload.warnings);

    match output {
        Some(path) => {
            fs::write(path, &payload.source).with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "{} {} extension(s) -> {} ({})",
                payload.extensions.len(),
                tag,
                path.display(),
                payload.fingerprint
            );
        }
        None => print!("{}", payload.source),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_app_type() {
        assert_eq!(resolve_app_type("panels").unwrap(), TypeTag::Panel);
        assert_eq!(resolve_app_type("display").unwrap(), TypeTag::Display);
        assert!(resolve_app_type("hooks").is_err());
        assert!(resolve_app_type("widget").is_err());
    }

    #[test]
    fn test_build_writes_payload() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("themes").join("dark");
        fs::create_dir_all(&entry).unwrap();
        fs::write(entry.join("index.js"), "export default { id: 'dark' };").unwrap();

        let mut config = Config::default();
        config.extensions.paths = vec![dir.path().to_path_buf()];
        let out = dir.path().join("themes.js");
        run_build(&config, "themes", Some(&out)).unwrap();

        let source = fs::read_to_string(&out).unwrap();
        assert!(source.contains("register(\"dark\""));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["extensa", "build", "panels", "-o", "out.js"]);
        assert!(matches!(args.command, Command::Build { ref type_name, .. } if type_name == "panels"));
    }
}
