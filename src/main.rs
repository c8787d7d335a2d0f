//! authgrant CLI
//!
//! Run with: cargo run --bin authgrant -- <command>

#[tokio::main]
async fn main() {
    // Environment overrides (issuer, DSN) may come from a .env file
    let _ = dotenvy::dotenv();

    if let Err(e) = authgrant::cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
