use clap::Parser;
use hubgate::cli::{
    Args, build_config, init_logging, load_token_secret, open_database, validate_frontend_url,
};
use hubgate::{init_cleanup, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(token_secret) = load_token_secret(args.token_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(frontend_url) = validate_frontend_url(&args.frontend_url) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let Some(config) = build_config(&args, db, token_secret, frontend_url) else {
        std::process::exit(1);
    };

    init_cleanup(&config.db, config.admission.clone()).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read local address");
        std::process::exit(1);
    });

    info!(address = %local_addr, env = %config.env, "Listening");

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
