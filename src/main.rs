use clap::Parser;
use playout::app::App;
use playout::cli::Args;
use playout::config::Config;
use playout::logging::setup_logging;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let early_config = Config::load().expect("Failed to load config for logging setup");
    setup_logging(&early_config, args.tracing);

    // Log application startup context
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting playout"
    );

    // Create and initialize the application
    let app = App::new(early_config).await.expect("Failed to initialize application");
    app.run().await
}
