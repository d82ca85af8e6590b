use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use godot_config::{DebuggerConfig, CONFIG_ENV_VAR};
use godot_dap::session::DebugSessionConfig;

/// Debug adapter for the Godot engine's remote debugger.
///
/// Speaks DAP over stdio and listens for the engine's debugger connection on
/// the address given in the `launch`/`attach` request.
#[derive(Debug, Parser)]
#[command(name = "godot-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `GODOT_DAP_CONFIG` is used as a fallback. When neither are
    /// provided the adapter uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    godot_dap::hardening::init(&config, Arc::new(|message| eprintln!("{message}")));

    godot_dap::wire_server::run_stdio(DebugSessionConfig::from(&config.session)).await
}

fn load_config(cli_path: Option<PathBuf>) -> DebuggerConfig {
    let path = cli_path.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    let Some(path) = path else {
        return DebuggerConfig::default();
    };

    match DebuggerConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "godot-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            DebuggerConfig::default()
        }
    }
}
