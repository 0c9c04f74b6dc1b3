use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::env;
use std::path::Path;

use par_stock_recon::{
    apply_catalog_mutation, confirm_matches, delete_composite, load_catalog_csv, load_catalogs,
    load_composites, load_history, load_sales, load_sales_csv, load_transfer_csv, load_transfers, logging,
    open_database, save_catalog, save_composite, save_confirmed_sales, save_daily_transfers, save_history,
    CatalogMutation, CompositeRegistry, MatchConfirmation, MatchHistoryStore, MatchSource, ReconConfig, ReconciliationEngine,
    ReconciliationLine, SaveOutcome, SubItem, TransferDirection,
};

const USAGE: &str = "\
Usage: par-stock-recon <command> [args]

Commands:
  import-catalog <csv> <start-date>          Upload a PAR stock period
  import-sales <csv> <date>                  Upload a day of sales (history matches applied)
  import-transfer <csv> <date> <in|out>      Upload a day of transfers
  compare <start-date> [date]                PAR period vs sales and transfers
  summary <start-date> <end-date>            Range summary incl. unmatched sales
  confirm <sale-name> <catalog-name> [rate]  Remember a sale → catalog match
  composite-add <name> <ingredient=qty>...   Register a composite item
  composite-remove <name>                    Remove a composite item
  history <sale-name>                        Show remembered matches

Add --json to compare/summary for JSON output.";

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let json = args.iter().any(|arg| arg == "--json");
    let args: Vec<&str> = args.iter().map(|arg| arg.as_str()).filter(|arg| *arg != "--json").collect();

    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = ReconConfig::load()?;
    let conn = open_database(&config.database_path)?;

    match (*command, rest) {
        ("import-catalog", [csv, start]) => run_import_catalog(&conn, csv, parse_date(start)?),
        ("import-sales", [csv, date]) => run_import_sales(&conn, &config, csv, parse_date(date)?),
        ("import-transfer", [csv, date, direction]) => {
            let direction = TransferDirection::parse(direction)
                .with_context(|| format!("Direction must be 'in' or 'out', got '{}'", direction))?;
            run_import_transfer(&conn, &config, csv, parse_date(date)?, direction)
        }
        ("compare", [start]) => run_compare(&conn, &config, parse_date(start)?, None, json),
        ("compare", [start, date]) => run_compare(&conn, &config, parse_date(start)?, Some(parse_date(date)?), json),
        ("summary", [start, end]) => run_summary(&conn, &config, parse_date(start)?, parse_date(end)?, json),
        ("confirm", [sale, catalog]) => run_confirm(&conn, sale, catalog, 1.0),
        ("confirm", [sale, catalog, rate]) => {
            let rate: f64 = rate.parse().with_context(|| format!("Invalid rate: {}", rate))?;
            run_confirm(&conn, sale, catalog, rate)
        }
        ("composite-add", [name, ingredients @ ..]) if !ingredients.is_empty() => {
            run_composite_add(&conn, name, ingredients)
        }
        ("composite-remove", [name]) => run_composite_remove(&conn, name),
        ("history", [sale]) => run_history(&conn, sale),
        _ => bail!("Unknown command or wrong arguments: {}\n\n{}", args.join(" "), USAGE),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("Invalid date (want YYYY-MM-DD): {}", value))
}

fn run_import_catalog(conn: &Connection, csv: &str, start: NaiveDate) -> Result<()> {
    println!("📂 Loading PAR stock from {}...", csv);
    let snapshot = load_catalog_csv(Path::new(csv), start)?;
    println!("✓ Loaded {} catalog items", snapshot.items.len());

    save_catalog(conn, &snapshot)?;
    println!("✓ PAR period {} saved", start);

    // composites registered before this period still need their placeholder
    for composite in load_composites(conn)? {
        let mutation = CatalogMutation::AddPlaceholder { name: composite.name };
        apply_catalog_mutation(conn, &mutation)?;
    }

    Ok(())
}

fn run_import_sales(conn: &Connection, config: &ReconConfig, csv: &str, date: NaiveDate) -> Result<()> {
    println!("📂 Loading sales from {}...", csv);
    let raw = load_sales_csv(Path::new(csv), date)?;
    println!("✓ Loaded {} sale records", raw.len());

    let catalogs = load_catalogs(conn)?;
    let history = MatchHistoryStore::from_map(load_history(conn)?);
    let engine = ReconciliationEngine::new(config.clone());

    let mut confirmations = Vec::new();
    match engine.preview_sales(date, &raw, &catalogs, &history)? {
        Some(preview) => {
            println!("\n🔍 Matching against PAR period {}", preview.catalog_start_date);
            for line in &preview.lines {
                let marker = match line.source {
                    MatchSource::History => "🧠",
                    MatchSource::Fuzzy => "≈ ",
                    MatchSource::Unmatched => "✗ ",
                };
                println!(
                    "  {} {:<40} → {} ({:.2})",
                    marker,
                    line.original_name,
                    line.suggested_name.as_deref().unwrap_or("-"),
                    line.score
                );

                if let (MatchSource::History, Some(catalog_name)) = (line.source, &line.suggested_name) {
                    confirmations.push(MatchConfirmation {
                        sale_name: line.original_name.clone(),
                        catalog_name: catalog_name.clone(),
                        conversion_rate: line.conversion_rate.unwrap_or(1.0),
                        unit: Some(line.unit.clone()),
                    });
                }
            }
            println!(
                "✓ {} from history, {} fuzzy suggestions, {} unmatched",
                preview.history_hits, preview.fuzzy_hits, preview.unmatched
            );
        }
        None => println!("⚠️  No PAR period active on {}, saving names as-is", date),
    }

    let composites = load_composites(conn)?;
    let outcome = save_confirmed_sales(
        conn,
        &history,
        date,
        &raw,
        &confirmations,
        &composites,
        config.composite_threshold,
    )?;

    match outcome {
        SaveOutcome::Saved { records } => println!("\n💾 Saved {} records for {}", records, date),
        SaveOutcome::Unchanged => println!("\n✓ Identical batch already saved for {}", date),
    }

    Ok(())
}

fn run_import_transfer(
    conn: &Connection,
    config: &ReconConfig,
    csv: &str,
    date: NaiveDate,
    direction: TransferDirection,
) -> Result<()> {
    let raw = load_transfer_csv(Path::new(csv))?;
    let catalogs = load_catalogs(conn)?;
    let engine = ReconciliationEngine::new(config.clone());

    let Some(records) = engine.resolve_transfers(date, &raw, direction, &catalogs) else {
        bail!("No PAR stock period covers {}. Upload a PAR period first.", date);
    };

    for record in &records {
        println!("  {:<40} → {:<40} {:+}", record.original_name, record.name, record.qty);
    }

    save_daily_transfers(conn, date, direction, &records)?;
    println!("💾 Saved {} transfer lines ({}) for {}", records.len(), direction.as_str(), date);
    Ok(())
}

fn print_lines(lines: &[ReconciliationLine]) {
    println!(
        "{:<40} {:>8} {:>8} {:>8} {:>8} {:>9} {:>7}",
        "Item", "PAR", "Sold", "Transfer", "Left", "Usage %", "Reorder"
    );
    println!("{}", "─".repeat(95));

    for line in lines {
        println!(
            "{:<40} {:>8.2} {:>8.2} {:>+8.2} {:>8.2} {:>8.1}% {:>7}",
            line.catalog_name,
            line.opening_stock,
            line.sold_qty_converted,
            line.transfer_qty,
            line.remaining,
            line.usage_percent,
            if line.needs_reorder { "⚠️" } else { "" }
        );
    }
}

fn run_compare(
    conn: &Connection,
    config: &ReconConfig,
    start: NaiveDate,
    specific_date: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let engine = ReconciliationEngine::new(config.clone());
    let report = engine.compare_one(
        &load_catalogs(conn)?,
        &load_sales(conn)?,
        &load_transfers(conn)?,
        start,
        specific_date,
    );

    let Some(report) = report else {
        println!("⚠️  No PAR stock period starts on {}", start);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("⚖️  PAR period {} ({} → {})", start, report.window.start, report.window.end);
    if let Some(date) = report.specific_date {
        println!("   narrowed to {}", date);
    }
    println!();
    print_lines(&report.lines);
    println!("\n✓ {} items, {} need reorder", report.total_catalog_items, report.reorder_count());
    Ok(())
}

fn run_summary(conn: &Connection, config: &ReconConfig, start: NaiveDate, end: NaiveDate, json: bool) -> Result<()> {
    let engine = ReconciliationEngine::new(config.clone());
    let summary = engine.summarize_range(
        &load_catalogs(conn)?,
        &load_sales(conn)?,
        &load_transfers(conn)?,
        start,
        end,
    )?;

    let Some(summary) = summary else {
        println!("⚠️  No PAR stock period starts on {}", start);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📊 Summary {} → {}\n", summary.window.start, summary.window.end);
    print_lines(&summary.lines);
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total sold:       {:.2}", summary.total_sold);
    println!("Total remaining:  {:.2}", summary.total_remaining);
    println!("Average usage:    {:.1}%", summary.avg_usage_percent);
    println!("Unmatched sales:  {}", summary.unmatched_sales_count);
    Ok(())
}

fn run_confirm(conn: &Connection, sale: &str, catalog: &str, rate: f64) -> Result<()> {
    let history = MatchHistoryStore::from_map(load_history(conn)?);
    let confirmation = MatchConfirmation {
        sale_name: sale.to_string(),
        catalog_name: catalog.to_string(),
        conversion_rate: rate,
        unit: None,
    };

    confirm_matches(&history, &[confirmation])?;
    save_history(conn, &history.snapshot())?;
    println!("🧠 '{}' → '{}' (rate {})", sale, catalog, rate);
    Ok(())
}

fn parse_ingredient(arg: &str) -> Result<SubItem> {
    let Some((name, qty)) = arg.rsplit_once('=') else {
        bail!("Ingredient must look like 'name=qty', got '{}'", arg);
    };
    let qty: f64 = qty.trim().parse().with_context(|| format!("Invalid ingredient quantity: {}", arg))?;

    Ok(SubItem {
        par_name: name.trim().to_string(),
        qty,
    })
}

fn run_composite_add(conn: &Connection, name: &str, ingredients: &[&str]) -> Result<()> {
    let sub_items = ingredients.iter().map(|arg| parse_ingredient(arg)).collect::<Result<Vec<_>>>()?;

    let mut registry = CompositeRegistry::from_items(load_composites(conn)?);
    let (item, mutation) = registry.register(name, sub_items)?;

    save_composite(conn, &item)?;
    let placed = apply_catalog_mutation(conn, &mutation)?;

    println!("🍸 Registered '{}' with {} ingredients", item.name, item.sub_items.len());
    if placed {
        println!("✓ Placeholder added to latest PAR period");
    }
    Ok(())
}

fn run_composite_remove(conn: &Connection, name: &str) -> Result<()> {
    let mut registry = CompositeRegistry::from_items(load_composites(conn)?);
    let Some(id) = registry.find_by_name(name).map(|item| item.id.clone()) else {
        bail!("No composite named '{}'", name);
    };

    let (item, mutation) = registry.remove(&id)?;
    delete_composite(conn, &item.id)?;
    apply_catalog_mutation(conn, &mutation)?;

    println!("🗑️  Removed '{}' and its PAR placeholder", item.name);
    Ok(())
}

fn run_history(conn: &Connection, sale: &str) -> Result<()> {
    let history = MatchHistoryStore::from_map(load_history(conn)?);
    let entries = history.entries(sale);

    if entries.is_empty() {
        println!("No remembered matches for '{}'", sale);
        return Ok(());
    }

    for entry in entries {
        println!(
            "  {:<40} rate {:<8.4} unit {:<12} used {}× (last {})",
            entry.catalog_name,
            entry.conversion_rate,
            entry.unit.as_deref().unwrap_or("-"),
            entry.use_count,
            entry.last_used.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
