use clap::Parser;
use db_pacemaker::app::App;
use db_pacemaker::cli::Args;
use db_pacemaker::config::Config;
use db_pacemaker::logging::setup_logging;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let config = Config::load(args.config.as_deref()).expect("Failed to load config");
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting db-pacemaker"
    );

    let app = App::new(config).expect("Failed to initialize application");

    if args.once {
        app.awake_once().await
    } else {
        app.run().await
    }
}
