//! CLI entry point for Blockhost.
//!
//! This binary provides the `blockhost` command with subcommands for running
//! a small in-process registry demo and for validating extension metadata
//! files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockhost_extensions::{
    BindContext, BlockArguments, BlockContext, BlockHandler, BuiltinLoader, Environment,
    Extension, ExtensionHandle, ExtensionRegistry, ExtensionSource, HostRuntime, LoadOutcome,
    MenuDescriptor, PaletteEntry, RawExtensionInfo, RegistryConfig, SimpleRuntime, Target,
};
use blockhost_rpc::{LoopbackRpc, RpcBoundary};

mod sample;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Blockhost — extension registry for a block-based programming runtime.
#[derive(Parser)]
#[command(
    name = "blockhost",
    version,
    about = "Extension registry for a block-based programming runtime"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the bundled sample extension and exercise its blocks and menus.
    Demo,

    /// Validate an extension metadata JSON file and print the normalized
    /// palette.
    Validate {
        /// Path to the metadata file.
        file: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => cmd_demo().await,
        Commands::Validate { file } => cmd_validate(&file).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: demo
// ---------------------------------------------------------------------------

async fn cmd_demo() -> Result<()> {
    init_tracing("info");

    let runtime = Arc::new(SimpleRuntime::new());
    runtime.add_target(Target {
        id: "stage".into(),
        name: "Stage".into(),
        is_stage: true,
    });
    runtime.add_target(Target {
        id: "cat".into(),
        name: "Cat".into(),
        is_stage: false,
    });
    runtime.set_editing_target("cat");

    let rpc = Arc::new(LoopbackRpc::new());
    let registry = ExtensionRegistry::new(
        RegistryConfig::default(),
        Arc::clone(&runtime) as Arc<dyn HostRuntime>,
        Arc::clone(&rpc) as Arc<dyn RpcBoundary>,
        Arc::new(BuiltinLoader::new()),
    )
    .context("failed to create registry")?;

    info!("registry ready; loading sample extension");
    let outcome = registry
        .load(
            ExtensionSource::Object(Arc::new(sample::GreeterExtension::new())),
            Environment::Unsandboxed,
        )
        .await
        .context("failed to load sample extension")?;

    let LoadOutcome::Registered { id, metadata } = outcome else {
        anyhow::bail!("sample extension did not register in-process");
    };

    println!();
    println!("  Loaded extension `{id}` ({})", metadata.name);
    print_palette(&metadata);

    // Invoke a block the way the runtime would.
    let block = metadata
        .block("greet")
        .and_then(|b| b.invoke.clone())
        .context("greet block is not bound")?;
    let out = block
        .invoke(
            BlockArguments::new().with("NAME", Value::String("Blockhost".into())),
            BlockContext::for_runtime(Arc::clone(&runtime) as Arc<dyn HostRuntime>),
        )
        .await
        .context("block invocation failed")?;
    println!("  greet(\"Blockhost\") -> {out}");

    // Open the dynamic menu for the editing target.
    if let Some(MenuDescriptor::Dynamic { generator, .. }) = metadata.menus.get("languages") {
        let items = generator
            .items(None)
            .await
            .context("dynamic menu failed")?;
        let labels: Vec<&str> = items.iter().map(|item| item.text.as_str()).collect();
        println!("  languages menu -> {labels:?}");
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: validate
// ---------------------------------------------------------------------------

/// Extension object standing in for the real implementation during metadata
/// validation; every function name resolves to a stub handler so binding
/// never warns about missing handlers.
struct InertExtension {
    info: RawExtensionInfo,
}

impl Extension for InertExtension {
    fn get_info(&self) -> RawExtensionInfo {
        self.info.clone()
    }

    fn handler(&self, _func: &str) -> Option<BlockHandler> {
        Some(Arc::new(|_args, _context, _info| Ok(Value::Null)))
    }
}

async fn cmd_validate(file: &PathBuf) -> Result<()> {
    init_tracing("warn");

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let raw: RawExtensionInfo = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid extension metadata", file.display()))?;

    let ctx = BindContext {
        handle: ExtensionHandle::Local(Arc::new(InertExtension { info: raw.clone() })),
        rpc: Arc::new(LoopbackRpc::new()),
        runtime: Arc::new(SimpleRuntime::new()),
    };
    let metadata = blockhost_extensions::normalize(&ctx, &raw)
        .with_context(|| format!("{} failed validation", file.display()))?;

    println!();
    println!("  {} is valid", file.display());
    println!("  id: {}  name: {}", metadata.id, metadata.name);
    print_palette(&metadata);
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_palette(metadata: &blockhost_extensions::ExtensionMetadata) {
    println!("  blocks:");
    for entry in &metadata.blocks {
        match entry {
            PaletteEntry::Separator => println!("    ----------------"),
            PaletteEntry::Block(block) => println!(
                "    [{}] {}  ({})",
                block.block_type,
                block.text,
                if block.opcode.is_empty() {
                    "button"
                } else {
                    &block.opcode
                }
            ),
        }
    }
    if !metadata.menus.is_empty() {
        println!("  menus:");
        let mut names: Vec<&String> = metadata.menus.keys().collect();
        names.sort();
        for name in names {
            match &metadata.menus[name] {
                MenuDescriptor::Static { items, .. } => {
                    println!("    {name}: {} fixed items", items.len());
                }
                MenuDescriptor::Dynamic { func, .. } => {
                    println!("    {name}: dynamic via `{func}`");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
