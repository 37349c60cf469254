//! Entry point for the mailingset daemon: loads configuration, builds the
//! list universe, and runs the SMTP receive-side server until it is
//! killed. Mirrors the shape of the teacher's smaller daemons (e.g.
//! `tsa-daemon`), minus the Lua policy engine and HTTP admin surface
//! this spec has no use for.

mod config;
mod loader;
mod relay;
mod server;

use clap::{Parser, ValueEnum};
use config::Config;
use std::path::PathBuf;
use std::sync::Arc;

/// Output layout for log lines, matching the teacher's own
/// `DiagnosticFormat` choices minus the `log_dir`/tokio-console
/// machinery this daemon has no use for.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "kebab_case")]
enum DiagFormat {
    Pretty,
    Full,
    Compact,
    Json,
}

/// Mailing Set: an SMTP server that treats mailing lists as sets.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Opt {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/mailingset/mailingset.toml")]
    config: PathBuf,

    /// Layout used for log lines written to stderr.
    #[arg(long, value_enum, default_value = "full")]
    diag_format: DiagFormat,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match opt.diag_format {
        DiagFormat::Pretty => builder.pretty().init(),
        DiagFormat::Full => builder.init(),
        DiagFormat::Compact => builder.compact().init(),
        DiagFormat::Json => builder.json().init(),
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(opt))
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let config = Config::load(&opt.config)?;
    tracing::info!(
        "loaded configuration for incoming domain {}",
        config.incoming.domain
    );

    let universe = loader::load_universe(&config.data.lists_dir, &config.data.symbols_file)?;
    tracing::info!(
        "loaded universe with {} lists",
        universe.list_names().count()
    );

    let relay = relay::SmtpRelayClient {
        server: config.outgoing.server.clone(),
        port: config.outgoing.port,
        connect_timeout: config.outgoing.connect_timeout,
    };

    server::serve(Arc::new(config), Arc::new(universe), Arc::new(relay)).await
}
