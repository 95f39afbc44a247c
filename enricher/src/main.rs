use std::{env, sync::Arc};

use anyhow::Context;
use channel_enricher::{
    delivery::{EmailDelivery, LogDelivery, ReportDelivery, SmtpSettings},
    enricher_config::cfg,
    error::EnricherError,
    pipeline::{BatchOrchestrator, Invocation, JsonFileInput, OrchestratorSettings},
    prompt::{OpenAiReasoner, PromptBuilder, RateLimitedClassifier},
    rate_limiters::RateLimiters,
    report::ReportPolicy,
    store::SeaOrmStore,
    youtube::{QuotaAwareFetcher, YouTubeSource},
    HttpClient,
};
use mimalloc::MiMalloc;
use tokio::{signal, time::Duration};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

type ProductionInvocation = Invocation<SeaOrmStore, YouTubeSource, OpenAiReasoner>;

fn required_env(name: &str) -> Result<String, EnricherError> {
    env::var(name).map_err(|_| EnricherError::Config(format!("{} is not set", name)))
}

fn init_tracing() {
    let fmt_layer = if env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::Layer::default()
            .with_ansi(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(fmt_layer)
        .init();
}

async fn build_invocation() -> anyhow::Result<ProductionInvocation> {
    let db_url = required_env("DATABASE_URL")?;
    let store = SeaOrmStore::connect(&db_url)
        .await
        .map_err(EnricherError::Store)?;

    let http_client = HttpClient::builder().use_rustls_tls().build()?;
    let source = YouTubeSource::new(
        http_client.clone(),
        required_env("YOUTUBE_API_KEY")?,
        &cfg.fetch,
    );
    let reasoner = OpenAiReasoner::new(http_client, required_env("OPENAI_API_KEY")?, &cfg.classify);

    let fetcher = QuotaAwareFetcher::new(
        source,
        cfg.fetch.retry.policy(),
        Duration::from_secs(cfg.fetch.timeout_secs),
    );
    let classifier = RateLimitedClassifier::new(
        reasoner,
        RateLimiters::from_config(&cfg.classify),
        PromptBuilder::from_config(&cfg.prompts)?,
        cfg.classify.retry.policy(),
        Duration::from_secs(cfg.classify.timeout_secs),
    );
    let orchestrator = BatchOrchestrator::new(
        Arc::new(store),
        fetcher,
        classifier,
        OrchestratorSettings::from_config(&cfg.orchestrator, &cfg.keywords),
    );

    let input = JsonFileInput::new(required_env("INPUT_PATH")?);
    let delivery: Arc<dyn ReportDelivery> = match SmtpSettings::from_env() {
        Some(smtp) => Arc::new(EmailDelivery::new(smtp, &cfg.delivery)),
        None => {
            tracing::info!("SMTP is not configured, writing reports to {}", cfg.delivery.output_dir);
            Arc::new(LogDelivery::from_config(&cfg.delivery))
        }
    };

    let reanalyze_stale = env::var("REANALYZE_STALE").is_ok_and(|v| v == "true");
    Ok(Invocation::new(
        orchestrator,
        Arc::new(input),
        delivery,
        ReportPolicy::from_config(&cfg.report),
        cfg.budget.clone(),
    )
    .with_reanalyze_stale(reanalyze_stale))
}

async fn run_logged(invocation: &ProductionInvocation, shutdown: &CancellationToken) {
    match invocation.run_once(shutdown).await {
        Ok(summary) => {
            tracing::info!(
                "Run {} ended {} ({}), {} channels pending",
                summary.run_id,
                summary.outcome,
                summary.stop_reason,
                summary.pending.len()
            );
        }
        Err(e) => {
            tracing::error!("Run failed: {:?}", e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    tracing::info!("{}", *cfg);

    let invocation = Arc::new(build_invocation().await?);
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let scheduled = env::var("RUN_MODE").is_ok_and(|v| v == "scheduled");
    if !scheduled {
        let summary = invocation.run_once(&shutdown).await?;
        tracing::info!(
            "Run {} ended {} ({})",
            summary.run_id,
            summary.outcome,
            summary.stop_reason
        );
        return Ok(());
    }

    let mut scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;

    {
        let invocation = invocation.clone();
        let shutdown = shutdown.clone();
        scheduler
            .add(Job::new_async(cfg.schedule.cron.as_str(), move |uuid, mut l| {
                let invocation = invocation.clone();
                let shutdown = shutdown.clone();
                Box::pin(async move {
                    tracing::info!("Running enrichment job {}", uuid);
                    run_logged(&invocation, &shutdown).await;

                    let next_tick = l.next_tick_for_job(uuid).await;
                    if let Ok(Some(ts)) = next_tick {
                        tracing::info!("Next enrichment run is {:?}", ts)
                    }
                })
            })?)
            .await?;
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    scheduler.start().await?;
    tracing::info!("Scheduler started with cron '{}'", cfg.schedule.cron);

    shutdown.cancelled().await;
    scheduler.shutdown().await?;
    tracing::info!("Cleanups done, shutting down");
    Ok(())
}

/// Cancels `shutdown` on Ctrl+C or SIGTERM. In-flight channels finish and
/// persist; no new ones start.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
