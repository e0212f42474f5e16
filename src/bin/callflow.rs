use anyhow::Result;
use callflow::{
    app::{run, AppStateBuilder},
    config::Config,
    handler::middleware::request_log::AccessLogEventFormat,
    preflight, version,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Telephony callback flows: callback reservations and conference rooms",
    long_about = version::get_version_info()
)]
struct Cli {
    /// Path to the configuration file
    #[clap(
        long,
        global = true,
        help = "Path to the configuration file (TOML format)"
    )]
    conf: Option<String>,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit without starting the server
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.conf.as_deref() {
        Some(path) => {
            println!("Loading config from: {}", path);
            Config::load(path)?
        }
        None => {
            println!("Loading default config");
            Config::default()
        }
    };

    println!("Start at {}", Utc::now());
    println!("{}", version::get_version_info());

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        match preflight::validate_start(&config).await {
            Ok(_) => {
                println!("Configuration is valid; the HTTP address is available.");
                return Ok(());
            }
            Err(err) => {
                eprintln!("Configuration validation failed:");
                for issue in err.issues {
                    eprintln!("- {}: {}", issue.field, issue.message);
                }
                std::process::exit(1);
            }
        }
    }

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }

    let mut _guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _guard = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(AccessLogEventFormat::new(LocalTime::rfc_3339()))
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(AccessLogEventFormat::new(LocalTime::rfc_3339())),
            )
            .try_init()?;
    }

    let state = AppStateBuilder::new().config(config).build().await?;
    info!("starting callflow on {}", state.config.http_addr);
    let mut app_future = Box::pin(run(state.clone()));

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm_stream = signal(SignalKind::terminate())?;
        tokio::select! {
            result = &mut app_future => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
                state.token.cancel();
                app_future.await?;
            }
            _ = sigterm_stream.recv() => {
                info!("received SIGTERM, shutting down");
                state.token.cancel();
                app_future.await?;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = &mut app_future => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
                state.token.cancel();
                app_future.await?;
            }
        }
    }

    Ok(())
}
