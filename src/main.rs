use std::time::Duration;

use promsd::commands::RootCommand;
use promsd::config::Config;
use promsd::discovery;
use promsd::metrics::{self, Metrics};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let opts: RootCommand = argh::from_env();

    if opts.version {
        opts.show_version();
        return;
    }

    init_trace(&opts.log_level);

    let config = Config::from_command(&opts);
    if config.discoveries.is_empty() {
        error!("no (host, role) pair to discover, check --target-address and --roles");
        std::process::exit(exitcode::CONFIG);
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .thread_name("promsd-worker")
        .enable_io()
        .enable_time();
    if let Some(threads) = opts.threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.build().expect("build tokio runtime");

    let code = runtime.block_on(run(config));

    runtime.shutdown_timeout(Duration::from_secs(5));
    std::process::exit(code);
}

async fn run(config: Config) -> exitcode::ExitCode {
    let metrics = match Metrics::new() {
        Ok(metrics) => metrics,
        Err(err) => {
            error!(message = "build metrics registry failed", %err);
            return exitcode::SOFTWARE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(config.listen_address.as_str()).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(
                message = "bind listen address failed",
                address = %config.listen_address,
                %err
            );
            return exitcode::UNAVAILABLE;
        }
    };

    if let Err(err) = tokio::fs::create_dir_all(&config.output_path).await {
        error!(
            message = "create output directory failed",
            path = ?config.output_path,
            %err
        );
        return exitcode::IOERR;
    }

    let shutdown = CancellationToken::new();
    let tasks = discovery::spawn(&config, &metrics, &shutdown);
    let server = tokio::spawn(metrics::serve(listener, metrics, shutdown.clone()));

    info!(
        message = "start promsd",
        instances = config.discoveries.len(),
        listen = %config.listen_address,
        output = ?config.output_path
    );

    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();

    futures::future::join_all(tasks).await;
    let _ = server.await;

    exitcode::OK
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_trace(level: &str) {
    let directives =
        std::env::var("PROMSD_LOG").unwrap_or_else(|_| format!("promsd={level}"));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .init();
}
