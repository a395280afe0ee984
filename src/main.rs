// Rate Watch - operator CLI
//
//   rate-watch setup
//   rate-watch import <billtrack|provider_alerts> <file.csv>
//   rate-watch grant-admin <email> [name]
//   rate-watch revoke-admin <email>

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::Path;

use rate_watch::entities::admin::upsert_admin;
use rate_watch::entities::ContentKind;
use rate_watch::{db::table_count, init_logging, open_database, parse_rows, upsert_rows, Config, LogSettings};

const USAGE: &str = "usage:
  rate-watch setup
  rate-watch import <billtrack|provider_alerts> <file.csv>
  rate-watch grant-admin <email> [name]
  rate-watch revoke-admin <email>";

fn main() -> Result<()> {
    init_logging(&LogSettings::from_env());
    let config = Config::load();

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["setup"] => run_setup(&config),
        ["import", kind, file] => run_import(&config, kind, Path::new(file)),
        ["grant-admin", email] => run_admin(&config, email, None, true),
        ["grant-admin", email, name] => run_admin(&config, email, Some(*name), true),
        ["revoke-admin", email] => run_admin(&config, email, None, false),
        _ => {
            eprintln!("{USAGE}");
            bail!("unrecognized command");
        }
    }
}

fn run_setup(config: &Config) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    println!("✓ Database ready at {}", config.database_path.display());

    for table in ["admin_users", "users", "subscriptions", "bills", "provider_alerts", "community_posts"] {
        println!("  {table:<18} {:>6} rows", table_count(&conn, table)?);
    }
    Ok(())
}

fn run_import(config: &Config, kind: &str, file: &Path) -> Result<()> {
    let kind = ContentKind::parse(kind).with_context(|| format!("unknown upload type {kind:?}"))?;
    let body = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let parsed = parse_rows(&body, None)?;
    println!("📂 Loaded {} rows from {}", parsed.rows.len(), file.display());

    let conn = open_database(&config.database_path)?;
    let summary = upsert_rows(&conn, kind, parsed.rows, None)?;

    for line in &summary.logs {
        println!("  {line}");
    }
    println!(
        "✓ {}: {} inserted, {} updated, {} skipped",
        kind.table(),
        summary.inserted_count,
        summary.updated_count,
        summary.skipped_count
    );
    Ok(())
}

fn run_admin(config: &Config, email: &str, name: Option<&str>, active: bool) -> Result<()> {
    if !email.contains('@') {
        bail!("{email:?} is not an email address");
    }
    let conn = open_database(&config.database_path)?;
    let admin = upsert_admin(&conn, email, name, active)?;
    let verb = if admin.is_active { "granted" } else { "revoked" };
    println!("✓ Admin access {verb} for {}", admin.email);
    Ok(())
}
