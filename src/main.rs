use std::{
    path::Path,
    sync::{Arc, Weak},
    time::Duration,
};

use axum::body::Body as AxumBody;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use hyper::{Request, Response, header};
use tokio::runtime::Handle;
use trellis::{
    adapters::{HyperListener, RouteTable},
    config::{ServerConfig, ServerConfigValidator, load_config, load_validated_config},
    core::{RestServer, ServerSettings},
    ports::router::HandlerError,
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "trellis.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "trellis.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "trellis.toml")]
        config: String,
    },
    /// Start the server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "trellis.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn serve_command(config_path: &str) -> Result<()> {
    let config: ServerConfig = load_validated_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let settings = ServerSettings::from_config(&config)
        .with_context(|| format!("Invalid server settings in {config_path}"))?;

    let listener = HyperListener::with_handle(Handle::current());
    let tracker = listener.tracker().clone();
    let server = Arc::new(RestServer::with_listener(settings, listener));

    server
        .set_router(Arc::new(status_routes(Arc::downgrade(&server))?))
        .context("Failed to install routes")?;

    server.on_after_start(|server| {
        tracing::info!(
            prefix = %server.listener_prefix(),
            local_addr = ?server.local_addr(),
            "trellis is listening"
        );
        Ok(())
    });
    server.on_before_stop(|server| {
        tracing::info!(
            active_requests = server.active_requests(),
            "trellis is shutting down"
        );
        Ok(())
    });

    // bind and accept setup are blocking calls
    let starting = server.clone();
    tokio::task::spawn_blocking(move || starting.start())
        .await
        .context("Start task panicked")?
        .context("Failed to start server")?;

    println!(
        "trellis listening on {} ({})",
        server.listener_prefix(),
        server
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unbound".to_string())
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let reason = graceful_shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received: {:?}", reason);

    let stopping = server.thread_safe_stop();
    tokio::task::spawn_blocking(move || stopping.join())
        .await
        .context("Stop task panicked")?
        .map_err(|_| eyre!("Stop thread panicked"))?
        .context("Failed to stop server")?;

    let drain_timeout = Duration::from_secs(config.drain_timeout_secs);
    if tracker.wait_for_drain(drain_timeout).await {
        tracing::info!("Graceful shutdown completed");
    } else {
        tracing::warn!(
            "Exiting with {} requests still in flight",
            tracker.total_active_requests()
        );
    }
    Ok(())
}

/// Built-in routes of the binary
fn status_routes(server: Weak<RestServer>) -> Result<RouteTable> {
    let mut table = RouteTable::new();
    table.get("/status", move |_req: Request<AxumBody>| {
        let server = server.clone();
        async move {
            let server = server
                .upgrade()
                .ok_or_else(|| HandlerError::InternalError("server is gone".to_string()))?;
            let body = serde_json::json!({
                "state": server.state(),
                "listener_prefix": server.listener_prefix().as_str(),
                "active_requests": server.active_requests(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "application/json")
                .body(AxumBody::from(body.to_string()))
                .map_err(|e| HandlerError::InternalError(e.to_string()))
        }
    })?;
    Ok(table)
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listener Prefix: {}", config.listener_prefix);
            println!("   • Public Folders: {}", config.public_folders.len());
            println!(
                "   • Throwing Exceptions: {}",
                config.enable_throwing_exceptions
            );
            println!("   • Log Level: {}", config.logging.level);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Prefixes look like 'http://localhost:1234/' and end in '/'");
            println!("   • Check that public folder paths exist");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# trellis server configuration

# Where to listen. Use '*' or '+' as host to listen on every interface.
listener_prefix = "http://localhost:1234/"

# Return handler faults to the caller instead of logging them
enable_throwing_exceptions = false

# Seconds to wait for in-flight requests on shutdown
drain_timeout_secs = 10

# Static roots, tried in order after the router
[[public_folders]]
path = "./public"
prefix = "/"
default_documents = ["index.html"]

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'trellis serve --config {config_path}' to start the server");
    Ok(())
}
