//! netcheck - in-cluster network reachability checks

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use netcheck::client::{create_client, ClusterClient, KubeClusterClient};
use netcheck::config::{Options, Settings};
use netcheck::detective::Detective;
use netcheck::exec::{KubeExecutor, RemoteExecutor};
use netcheck::metrics::MetricsSink;
use netcheck::outcome::{ConsoleSink, FanoutSink, OutcomeSink};
use netcheck::telemetry::{init_telemetry, TelemetryConfig};
use netcheck::trigger::run_periodically;

/// netcheck - dial every pod, service and external IP path in a cluster
#[derive(Parser, Debug)]
#[command(name = "netcheck", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    options: Options,

    /// Re-run the check every N seconds instead of once
    #[arg(long, env = "NETCHECK_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// OTLP endpoint metrics are pushed to
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "NETCHECK_LOG_JSON")]
    log_json: bool,
}

/// Everything one run needs, shared across periodic runs
#[derive(Clone)]
struct RunContext {
    client: Arc<dyn ClusterClient>,
    executor: Arc<dyn RemoteExecutor>,
    sink: Arc<dyn OutcomeSink>,
    settings: Arc<Settings>,
}

impl RunContext {
    async fn run(&self, shutdown: &CancellationToken) -> netcheck::Result<()> {
        let detective = Detective::start(
            self.client.clone(),
            self.executor.clone(),
            self.sink.clone(),
            self.settings.clone(),
        );
        detective.wait_or_kill(shutdown).await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        service_name: "netcheck".to_string(),
        otlp_endpoint: cli.otlp_endpoint.clone(),
        json: cli.log_json,
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "welcome to netcheck");

    // configuration errors are reported before the cluster is touched
    let settings = Arc::new(cli.options.validate()?);
    let client = create_client(cli.options.kubeconfig.as_deref()).await?;

    let ctx = RunContext {
        client: Arc::new(KubeClusterClient::new(client.clone())),
        executor: Arc::new(KubeExecutor::new(client)),
        sink: Arc::new(
            FanoutSink::new()
                .with(Arc::new(ConsoleSink))
                .with(Arc::new(MetricsSink)),
        ),
        settings,
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let result = match cli.interval_secs {
        Some(secs) => {
            let interval = Duration::from_secs(secs.max(1));
            info!(interval_secs = interval.as_secs(), "running periodically");
            let token = shutdown.clone();
            run_periodically(interval, &shutdown, move || {
                let ctx = ctx.clone();
                let token = token.clone();
                async move {
                    match ctx.run(&token).await {
                        Ok(()) => info!("all paths healthy"),
                        Err(e) if e.is_interrupted() => warn!("run interrupted"),
                        Err(e) => error!(error = %e, "run failed"),
                    }
                }
            })
            .await;
            Ok(())
        }
        None => {
            let result = ctx.run(&shutdown).await;
            if result.is_ok() {
                info!("all paths healthy");
            }
            result
        }
    };

    telemetry.shutdown();

    if let Err(e) = result {
        error!(error = %e, "netcheck failed");
        return Err(e.into());
    }
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("received shutdown signal");
    shutdown.cancel();
}
