use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use codemesh_host::config::LoaderConfig;
use codemesh_host::environment::Environment;
use codemesh_host::WasmRunner;

#[derive(Parser)]
#[command(name = "codemesh", about = "Code Mesh engine host. Runs the WASM build.")]
struct Cli {
    /// Verbose host logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Bundle root override (default: ./bundle, or host.yaml)
    #[arg(long, global = true)]
    bundle_root: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List available providers
    Providers,
    /// List models for a provider
    Models { provider: String },
    /// Interactive chat session
    Chat,
    /// Platform, feature, and memory report
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.debug {
        "codemesh_host=debug"
    } else {
        "codemesh_host=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    let environment = Environment::detect();
    if !environment.wasm_supported() {
        bail!("WebAssembly hosting is not supported in this environment");
    }

    let mut config = LoaderConfig::load(environment);
    config.debug |= cli.debug;
    if let Some(root) = cli.bundle_root {
        config.bundle_root = root;
    }

    info!(%environment, bundle_root = %config.bundle_root.display(), "starting Code Mesh");
    let runner = WasmRunner::with_environment(config.clone(), environment)?;

    info!("loading engine bundle");
    runner.load().await?;

    let platform = runner.platform_info().await?;
    let features = runner.feature_support().await?;
    info!(os = %platform.os, arch = %platform.arch, runtime = %platform.runtime, "platform");

    let interactive = environment == Environment::Interactive;
    let instance = runner
        .create_instance(Some(&json!({
            "useBrowserStorage": interactive && platform.persistent_storage,
            "enableOffline": interactive && config.enable_offline,
            "useWebWorkers": interactive && config.use_workers && features.threads,
        })))
        .await?;
    instance.initialize().await?;
    info!(session = %instance.session_id().await?, "engine ready");

    match cli.command {
        Some(Command::Providers) => {
            let providers = runner.providers().await?;
            println!("Available providers: {}", providers.join(", "));
        }
        Some(Command::Models { provider }) => {
            let models = runner.models(&provider).await?;
            println!("Models for {provider}: {}", models.join(", "));
        }
        Some(Command::Chat) => {
            println!("Interactive chat is not yet implemented in the WASM host");
        }
        Some(Command::Info) => {
            println!("Platform: {}", serde_json::to_string_pretty(&platform)?);
            println!("Features: {}", serde_json::to_string_pretty(&features)?);
            println!(
                "Memory: {}",
                serde_json::to_string_pretty(&instance.memory_usage().await?)?
            );
        }
        None => {
            println!("Try: codemesh --help");
        }
    }

    Ok(())
}
