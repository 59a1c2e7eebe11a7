mod cmd;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::cmd::{BuildArgs, CacheCommand};

/// hammer builds a bunch of package specs at once
#[derive(Parser, Debug)]
#[command(name = "hammer")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// One of trace, debug, info, warn or error (RUST_LOG takes precedence)
  #[arg(long, global = true, default_value = "info", env = "HAMMER_LOG_LEVEL")]
  log_level: String,

  /// Log output format
  #[arg(long, global = true, value_enum, default_value = "text", env = "HAMMER_LOG_FORMAT")]
  log_format: LogFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
  Text,
  Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Build packages found under the search directory
  Build(BuildArgs),

  /// Render a template once per found package
  Query {
    /// Template to render, e.g. '$${name}-$${version}'
    template: String,

    /// Where to look for package specs
    #[arg(long, default_value = ".", env = "HAMMER_SEARCH")]
    search: std::path::PathBuf,
  },

  /// Manage the resource download cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

fn init_logging(level: &str, format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false);

  match format {
    LogFormat::Text => builder.init(),
    LogFormat::Json => builder.json().init(),
  }
}

fn main() {
  let cli = Cli::parse();
  init_logging(&cli.log_level, cli.log_format);

  let result = match cli.command {
    Commands::Build(args) => cmd::cmd_build(args),
    Commands::Query { template, search } => cmd::cmd_query(&template, &search).map(|()| true),
    Commands::Cache(command) => cmd::cmd_cache(command).map(|()| true),
  };

  match result {
    Ok(true) => {}
    Ok(false) => std::process::exit(1),
    Err(e) => {
      output::print_error(&format!("{e:#}"));
      std::process::exit(1);
    }
  }
}
