//! Brick Mosaic CLI
//!
//! Operator front-end for the mosaic engine: inspect and plan layouts,
//! run generations, view stock, finalize orders and drive replenishment.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use brick_mosaic::bom::aggregate;
use brick_mosaic::generation::{factory_balance, ReplenishCommand};
use brick_mosaic::pavage::{count_pieces, parse_layout};
use brick_mosaic::plan::project;
use brick_mosaic::pricing::{order_total, price_layout, Price};
use brick_mosaic::stock::LOW_STOCK_THRESHOLD;
use brick_mosaic::{GenerationOrchestrator, MosaicConfig, SqliteStore, StockLedger, StyleVariant};

const USAGE: &str = "usage: brick_mosaic <command>

commands:
  inspect <layout-file>                      pieces, price and bill of materials
  plan <layout-file>                         printable assembly plan
  generate <image-id> <image-file> [--save <style>]
  stock [--low]                              stock levels
  finalize <order-id> <mosaic-id>...         attach, compose and deduct stock
  buy <item-id> <quantity>                   buy bricks from the supplier
  factory <refill|order|proactive|restock>   run a factory command";

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging (stderr, so command output stays clean)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };
    let rest = &args[1..];

    match command.as_str() {
        "inspect" => inspect(arg(rest, 0, "layout-file")?),
        "plan" => plan(arg(rest, 0, "layout-file")?),
        "generate" => generate(rest).await,
        "stock" => stock(rest.iter().any(|a| a == "--low")).await,
        "finalize" => finalize(rest).await,
        "buy" => buy(rest).await,
        "factory" => factory(arg(rest, 0, "action")?).await,
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing <{name}>\n\n{USAGE}"))
}

fn read_layout(path: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read layout {path}"))
}

async fn open_store(config: &MosaicConfig) -> Result<SqliteStore> {
    SqliteStore::new(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))
}

// ──────────────────────────────────────────────────────────────────────────────
// LAYOUT COMMANDS
// ──────────────────────────────────────────────────────────────────────────────

fn inspect(path: &str) -> Result<()> {
    let text = read_layout(path)?;
    let layout = parse_layout(&text);
    let bill = aggregate(&layout.placements);

    println!("label:     {}", layout.label.as_deref().unwrap_or("-"));
    println!("raw cost:  {}", layout.raw_cost);
    println!("pieces:    {}", count_pieces(&text));
    println!("skipped:   {}", layout.skipped);
    match price_layout(&text) {
        Some(price) => println!("price:     {price}"),
        None => println!("price:     -"),
    }
    println!("\nbill of materials ({} bricks):", bill.total_pieces());
    for line in bill.lines() {
        println!("  {:>5} x {} {}", line.count, line.shape, line.color);
    }
    Ok(())
}

fn plan(path: &str) -> Result<()> {
    let text = read_layout(path)?;
    let projection = project(&parse_layout(&text).placements);
    if projection.grid_omitted {
        println!("plan too large to draw ({}x{}), legend only", projection.width, projection.height);
    }
    print!("{}", projection.to_text());
    Ok(())
}

// ──────────────────────────────────────────────────────────────────────────────
// GENERATION
// ──────────────────────────────────────────────────────────────────────────────

async fn generate(args: &[String]) -> Result<()> {
    let image_id: i64 = arg(args, 0, "image-id")?.parse().context("image-id must be an integer")?;
    let image_path = arg(args, 1, "image-file")?;
    let save_style = match args.iter().position(|a| a == "--save") {
        Some(i) => {
            let key = arg(args, i + 1, "style")?;
            Some(StyleVariant::from_key(key).ok_or_else(|| anyhow!("unknown style '{key}'"))?)
        }
        None => None,
    };

    let config = MosaicConfig::from_env()?;
    std::fs::create_dir_all(&config.input_dir)?;
    std::fs::create_dir_all(&config.output_dir)?;

    let store = open_store(&config).await?;
    let ledger: Arc<dyn StockLedger> = Arc::new(store.clone());
    let orchestrator = GenerationOrchestrator::from_config(config, ledger);

    let image = std::fs::read(image_path).with_context(|| format!("Failed to read image {image_path}"))?;
    let extension = Path::new(image_path)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    let report = orchestrator.generate(image_id, &image, &extension).await?;
    for offer in report.offers() {
        println!(
            "{:<15} {:>8}  {:>6} pieces  preview: {}",
            offer.style.as_key(),
            offer.price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            offer.pieces,
            if offer.preview.is_some() { "yes" } else { "no" }
        );
    }

    if let Some(style) = save_style {
        let layout = report
            .variant(style)
            .and_then(|v| v.layout.as_deref())
            .ok_or_else(|| anyhow!("style {style} produced no layout"))?;
        let mosaic_id = store.save_mosaic(image_id, layout, Some(style.as_key())).await?;
        info!("Saved {} layout for image {} as mosaic {}", style, image_id, mosaic_id);
        println!("saved mosaic {mosaic_id}");
    }
    Ok(())
}

// ──────────────────────────────────────────────────────────────────────────────
// STOCK AND ORDERS
// ──────────────────────────────────────────────────────────────────────────────

async fn stock(low_only: bool) -> Result<()> {
    let config = MosaicConfig::from_env()?;
    let store = open_store(&config).await?;
    let levels = if low_only { store.low_stock(LOW_STOCK_THRESHOLD).await? } else { store.stock_levels().await? };

    for level in levels {
        println!(
            "{:>4}  {:<8} {:<16} {:<8} {:>8.2} {:>7}{}",
            level.item_id,
            level.shape.to_string(),
            level.color_name,
            level.color.as_str(),
            level.unit_price,
            level.current_stock,
            if level.is_critical() { "  CRITICAL" } else { "" }
        );
    }
    Ok(())
}

async fn finalize(args: &[String]) -> Result<()> {
    let order_id: i64 = arg(args, 0, "order-id")?.parse().context("order-id must be an integer")?;
    let mosaic_ids = args[1..]
        .iter()
        .map(|a| a.parse::<i64>().with_context(|| format!("invalid mosaic id '{a}'")))
        .collect::<Result<Vec<_>>>()?;
    if mosaic_ids.is_empty() {
        bail!("missing <mosaic-id>\n\n{USAGE}");
    }

    let config = MosaicConfig::from_env()?;
    let store = open_store(&config).await?;
    let finalized = store.finalize_order(order_id, &mosaic_ids).await?;

    let mut prices: Vec<Price> = Vec::with_capacity(mosaic_ids.len());
    for report in &finalized {
        prices.push(store.mosaic_price(report.mosaic_id).await?);
        println!("{}", serde_json::to_string(report)?);
    }
    println!("order total: {}", order_total(&prices));

    for line in store.order_bricks(order_id).await? {
        println!("  {:>5} x {} {}", line.count, line.shape, line.color);
    }
    Ok(())
}

// ──────────────────────────────────────────────────────────────────────────────
// REPLENISHMENT
// ──────────────────────────────────────────────────────────────────────────────

async fn run_replenishment(command: ReplenishCommand) -> Result<()> {
    let config = MosaicConfig::from_env()?;
    let store = open_store(&config).await?;
    let orchestrator = GenerationOrchestrator::from_config(config, Arc::new(store));

    let message = orchestrator.replenish(&command).await?;
    println!("{message}");
    if let Some(balance) = factory_balance(&message) {
        println!("balance: {balance}");
    }
    Ok(())
}

async fn buy(args: &[String]) -> Result<()> {
    let item_id: i64 = arg(args, 0, "item-id")?.parse().context("item-id must be an integer")?;
    let quantity: u32 = arg(args, 1, "quantity")?.parse().context("quantity must be a positive integer")?;

    let config = MosaicConfig::from_env()?;
    let reference = open_store(&config).await?.item_reference(item_id).await?;
    run_replenishment(ReplenishCommand::Buy { reference, quantity }).await
}

async fn factory(action: &str) -> Result<()> {
    let command = ReplenishCommand::from_action(action).ok_or_else(|| anyhow!("unknown factory action '{action}'"))?;
    run_replenishment(command).await
}
