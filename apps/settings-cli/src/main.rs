use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use module_settings::infra::storage::FileStorageProvider;
use module_settings::{
    Config, ModuleDefinition, ModuleRegistry, SettingValue, SettingsDocument, SettingsModule,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "settings-cli")]
#[command(about = "Inspect and edit module settings stored on disk")]
#[command(version)]
struct Cli {
    /// YAML file with a `modules:` list of definitions
    #[arg(short, long, env = "MODULE_SETTINGS_DEFINITIONS")]
    definitions: PathBuf,

    /// Settings config file (YAML)
    #[arg(short, long, env = "MODULE_SETTINGS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage directory
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List defined modules
    Modules,
    /// Show current values of a module (sensitive values masked)
    Show { module: String },
    /// Print one value
    Get {
        module: String,
        key: String,
        /// Print sensitive values instead of masking them
        #[arg(long)]
        reveal: bool,
    },
    /// Validate and store a value
    Set {
        module: String,
        key: String,
        value: String,
    },
    /// Reset one key to its default
    Remove { module: String, key: String },
    /// Reset a module to its defaults
    Reset { module: String },
    /// Write a module's values as a JSON document
    Export {
        module: String,
        /// Include sensitive keys; treat the output as secret
        #[arg(long)]
        include_sensitive: bool,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Apply a JSON document to a module
    Import { module: String, file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "module_settings=debug,settings_cli=debug"
    } else {
        "module_settings=warn,settings_cli=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;
    let registry = ModuleRegistry::new();
    for definition in load_definitions(&cli.definitions)? {
        registry.register(SettingsModule::new(definition))?;
    }

    if let Command::Modules = cli.command {
        for id in registry.module_ids() {
            let module = registry.get(&id)?;
            let identity = module.identity();
            println!("{}\t{}\t{}", identity.id, identity.category, identity.name);
        }
        return Ok(());
    }

    tracing::debug!(storage_dir = %config.storage_dir.display(), "Opening settings storage");
    let provider = Arc::new(FileStorageProvider::from_config(&config));
    let failed = registry.initialize_all(provider, config).await;

    let result = run(&registry, cli.command, &failed).await;
    registry.shutdown().await;
    result
}

async fn run(registry: &ModuleRegistry, command: Command, failed: &[String]) -> Result<()> {
    let open = |module_id: &str| -> Result<Arc<SettingsModule>> {
        if failed.iter().any(|id| id == module_id) {
            bail!("module '{}' failed to initialize; see log output", module_id);
        }
        Ok(registry.get(module_id)?)
    };

    match command {
        Command::Modules => {}
        Command::Show { module } => {
            let module = open(&module)?;
            for (key, value) in module.get_current_settings() {
                println!("{} = {}", key, display_value(&module, &key, &value, false));
            }
        }
        Command::Get { module, key, reveal } => {
            let module = open(&module)?;
            let value = module
                .get_setting(&key)
                .with_context(|| format!("unknown key '{}'", key))?;
            println!("{}", display_value(&module, &key, &value, reveal));
        }
        Command::Set { module, key, value } => {
            let module = open(&module)?;
            // Sent as a string; the validator coerces to the declared kind
            let stored = module.try_set_setting(&key, Some(SettingValue::String(value)))?;
            println!("{} = {}", key, display_value(&module, &key, &stored, false));
        }
        Command::Remove { module, key } => {
            let module = open(&module)?;
            let stored = module.remove_setting(&key)?;
            println!("{} = {}", key, display_value(&module, &key, &stored, false));
        }
        Command::Reset { module } => {
            let module = open(&module)?;
            module.reset_to_defaults()?;
            println!("{} reset to defaults", module.module_id());
        }
        Command::Export {
            module,
            include_sensitive,
            out,
        } => {
            let module = open(&module)?;
            let text = module.on_export(include_sensitive).to_json_string_pretty()?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, text)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Exported settings");
                }
                None => println!("{}", text),
            }
        }
        Command::Import { module, file } => {
            let module = open(&module)?;
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let document = SettingsDocument::from_json_str(&raw)?;
            let report = module.on_import(&document)?;

            println!("applied: {}", report.applied.join(", "));
            if !report.skipped_sensitive.is_empty() {
                println!("skipped (sensitive): {}", report.skipped_sensitive.join(", "));
            }
            for failure in &report.failures {
                println!("rejected {}: {}", failure.key, failure.reason);
            }
            if !report.is_clean() {
                bail!("{} entries rejected", report.failures.len());
            }
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    resolve_storage_dir(&mut config, cli.storage_dir.as_deref(), cli.config.is_some());
    Ok(config)
}

/// Apply `--storage-dir`, or move the built-in default under the user's
/// data directory when nothing else chose a location
fn resolve_storage_dir(config: &mut Config, override_dir: Option<&Path>, has_config_file: bool) {
    if let Some(dir) = override_dir {
        config.storage_dir = dir.to_path_buf();
    } else if !has_config_file && config.storage_dir == Config::default().storage_dir {
        if let Some(data_dir) = dirs::data_dir() {
            config.storage_dir = data_dir.join("module-settings");
        }
    }
}

fn load_definitions(path: &Path) -> Result<Vec<ModuleDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read definitions {}", path.display()))?;
    let definitions = ModuleDefinition::list_from_yaml_str(&raw)
        .with_context(|| format!("invalid definitions in {}", path.display()))?;
    Ok(definitions)
}

fn display_value(
    module: &SettingsModule,
    key: &str,
    value: &SettingValue,
    reveal: bool,
) -> String {
    if module.is_sensitive(key) && !reveal {
        return "********".to_string();
    }
    serde_json::to_string(&value.to_json()).unwrap_or_else(|_| value.to_string())
}
