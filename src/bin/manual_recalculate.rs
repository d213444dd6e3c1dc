// Small dev utility: recalculate every data entry that depends on one factor.
//
// Usage:
//   cargo run --bin manual_recalculate -- [db_path] <factor_id>
//
// Without db_path the default location (EMISSION_LEDGER_DB_PATH or the user data dir) is used.
// LOG_FORMAT=json switches log output to JSON lines.

use anyhow::{bail, Context};
use emission_ledger::app::{get_default_db_path, AppState};
use emission_ledger::logging;

fn main() -> anyhow::Result<()> {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => logging::init_json(),
        _ => logging::init(),
    }

    let args: Vec<String> = std::env::args()
        .skip(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let (db_path, factor_id) = match args.as_slice() {
        [factor_id] => (get_default_db_path(), factor_id.clone()),
        [db_path, factor_id] => (db_path.clone(), factor_id.clone()),
        _ => bail!("usage: manual_recalculate [db_path] <factor_id>"),
    };

    let state = AppState::new(db_path.clone())
        .with_context(|| format!("failed to open database at {}", db_path))?;

    let report = state
        .batch_service
        .recalculate_for_factor(&factor_id)
        .with_context(|| format!("recalculation for factor {} failed", factor_id))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        eprintln!("{} entries failed", report.failed.len());
    }
    Ok(())
}
