#[tokio::main]
async fn main() {
    if let Err(e) = gnap_cli::run().await {
        eprintln!("Error: {}", e);
        for hint in e.suggestions() {
            eprintln!("  hint: {hint}");
        }
        std::process::exit(1);
    }
}
