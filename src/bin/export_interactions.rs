//! Export logged interactions as JSON Lines for fine-tuning.
//!
//! Usage: cargo run --bin export_interactions [output.jsonl] [interactions.db]
//!
//! The database defaults to `DB_PATH` (from the environment or `.env`), then
//! `interactions.db`. The output defaults to a timestamped file in the
//! current directory.

use std::path::PathBuf;
use std::process::ExitCode;

use groqbot::chatbot::{Store, StoreOptions};
use groqbot::config::DEFAULT_DB_PATH;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 3 || args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [output.jsonl] [interactions.db]", args[0]);
        eprintln!();
        eprintln!("Write every logged interaction as one {{\"prompt\",\"completion\"}} line.");
        eprintln!("An existing output file is overwritten.");
        return ExitCode::FAILURE;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let _ = dotenvy::dotenv();

    let output = args.get(1).map(PathBuf::from).unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        PathBuf::from(format!("interactions-{stamp}.jsonl"))
    });
    let db_path = args
        .get(2)
        .cloned()
        .or_else(|| std::env::var("DB_PATH").ok().filter(|v| !v.is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

    if !db_path.exists() {
        eprintln!("ERROR: database {:?} not found", db_path);
        return ExitCode::FAILURE;
    }

    let store = match Store::open(&StoreOptions::at(&db_path)) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("ERROR: failed to open {:?}: {e}", db_path);
            return ExitCode::FAILURE;
        }
    };

    let code = match store.export_all(&output).await {
        Ok(written) => {
            println!("Exported {written} interactions from {:?} to {:?}", db_path, output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ERROR: export failed: {e}");
            ExitCode::FAILURE
        }
    };

    store.close();
    code
}
