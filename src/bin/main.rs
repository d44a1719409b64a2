//! Ingestion service entry point: loads configuration, connects the DB pool and the two Kafka
//! consumer groups, runs the state and history pipelines to completion, and serves the
//! `/healthz`/`/readyz`/`/metrics` HTTP surface until shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bmp_rib_collector::broker::{commit_task, BrokerConsumer};
use bmp_rib_collector::config;
use bmp_rib_collector::http::{self, ReadinessCheck};
use bmp_rib_collector::pipeline::decode::decode_record;
use bmp_rib_collector::pipeline::history::HistoryPipeline;
use bmp_rib_collector::pipeline::state::StatePipeline;
use bmp_rib_collector::pipeline::RouterIdentityCache;
use bmp_rib_collector::writer::{PgHistoryWriter, PgStateWriter};

#[derive(Parser, Debug)]
#[clap(author, version, about = "BMP-to-relational-store ingestion service")]
struct Opts {
    /// Path to the layered YAML configuration file.
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(flatten)]
    verbosity: Verbosity<clap_verbosity_flag::InfoLevel>,
}

struct Readiness {
    db_pool: sqlx::PgPool,
    state_consumer: Arc<BrokerConsumer>,
    history_consumer: Arc<BrokerConsumer>,
    db_ready: Arc<AtomicBool>,
}

impl ReadinessCheck for Readiness {
    fn db_ready(&self) -> bool {
        self.db_ready.load(Ordering::SeqCst) && !self.db_pool.is_closed()
    }
    fn state_consumer_joined(&self) -> bool {
        self.state_consumer.is_joined()
    }
    fn history_consumer_joined(&self) -> bool {
        self.history_consumer.is_joined()
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(opts.verbosity.tracing_level_filter().into()))
        .init();

    let cfg = config::load(opts.config.as_deref()).context("loading configuration")?;

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run(cfg))
}

async fn run(cfg: config::AppConfig) -> anyhow::Result<()> {
    let metrics_handle = bmp_rib_collector::metrics::install().context("installing metrics recorder")?;
    let shutdown = CancellationToken::new();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(cfg.db.max_conns)
        .min_connections(cfg.db.min_conns)
        .connect(&cfg.db.dsn)
        .await
        .context("connecting to postgres")?;

    let state_consumer = Arc::new(
        BrokerConsumer::connect(&cfg.broker, &cfg.broker.state.group_id, &cfg.broker.state.topics)
            .context("connecting state broker consumer")?,
    );
    let history_consumer = Arc::new(
        BrokerConsumer::connect(&cfg.broker, &cfg.broker.history.group_id, &cfg.broker.history.topics)
            .context("connecting history broker consumer")?,
    );

    let db_ready = Arc::new(AtomicBool::new(true));
    let readiness = Arc::new(Readiness {
        db_pool: pool.clone(),
        state_consumer: state_consumer.clone(),
        history_consumer: history_consumer.clone(),
        db_ready,
    });

    let http_router = http::router(metrics_handle, readiness.clone());
    let http_addr: std::net::SocketAddr = cfg.service.http_listen.parse().context("parsing service.http_listen")?;

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn({
        let pool = pool.clone();
        let db_ready = readiness.db_ready.clone();
        let shutdown = shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ok = sqlx::query("SELECT 1").execute(&pool).await.is_ok();
                        db_ready.store(ok, Ordering::SeqCst);
                    }
                    () = shutdown.cancelled() => break,
                }
            }
        }
    });

    let (state_raw_tx, mut state_raw_rx) = mpsc::channel(cfg.ingest.channel_buffer_size);
    let (history_raw_tx, mut history_raw_rx) = mpsc::channel(cfg.ingest.channel_buffer_size);
    let (state_records_tx, state_records_rx) = mpsc::channel(cfg.ingest.channel_buffer_size);
    let (history_records_tx, history_records_rx) = mpsc::channel(cfg.ingest.channel_buffer_size);
    let (state_flushed_tx, state_flushed_rx) = mpsc::channel::<rdkafka::TopicPartitionList>(16);
    let (history_flushed_tx, history_flushed_rx) = mpsc::channel::<rdkafka::TopicPartitionList>(16);

    tasks.spawn({
        let consumer = state_consumer.clone();
        let shutdown = shutdown.clone();
        async move { consumer.poll_loop(state_raw_tx, shutdown).await }
    });
    tasks.spawn({
        let consumer = history_consumer.clone();
        let shutdown = shutdown.clone();
        async move { consumer.poll_loop(history_raw_tx, shutdown).await }
    });

    let ingest_cfg = cfg.ingest.clone();
    tasks.spawn(async move {
        let mut cache = RouterIdentityCache::new();
        while let Some(record) = state_raw_rx.recv().await {
            match decode_record(
                &record.payload,
                &record.topic,
                ingest_cfg.max_payload_bytes,
                false,
                &mut cache,
            ) {
                Ok(outcome) => {
                    if state_records_tx.send(outcome.state).await.is_err() {
                        break;
                    }
                    let mut offsets = rdkafka::TopicPartitionList::new();
                    offsets
                        .add_partition_offset(&record.topic, record.partition, rdkafka::Offset::Offset(record.offset + 1))
                        .ok();
                    let _ = state_flushed_tx.send(offsets).await;
                }
                Err(err) => {
                    tracing::warn!(%err, topic = %record.topic, "dropping unparseable state record");
                    bmp_rib_collector::metrics::record_parse_error("decode", "state");
                }
            }
        }
    });

    let ingest_cfg = cfg.ingest.clone();
    tasks.spawn(async move {
        let mut cache = RouterIdentityCache::new();
        while let Some(record) = history_raw_rx.recv().await {
            match decode_record(
                &record.payload,
                &record.topic,
                ingest_cfg.max_payload_bytes,
                ingest_cfg.store_raw_bytes,
                &mut cache,
            ) {
                Ok(outcome) => {
                    if history_records_tx.send(outcome.history).await.is_err() {
                        break;
                    }
                    let mut offsets = rdkafka::TopicPartitionList::new();
                    offsets
                        .add_partition_offset(&record.topic, record.partition, rdkafka::Offset::Offset(record.offset + 1))
                        .ok();
                    let _ = history_flushed_tx.send(offsets).await;
                }
                Err(err) => {
                    tracing::warn!(%err, topic = %record.topic, "dropping unparseable history record");
                    bmp_rib_collector::metrics::record_parse_error("decode", "history");
                }
            }
        }
    });

    tasks.spawn(commit_task(state_consumer.clone(), state_flushed_rx));
    tasks.spawn(commit_task(history_consumer.clone(), history_flushed_rx));

    let state_writer = PgStateWriter::new(pool.clone());
    let mut state_pipeline = StatePipeline::new(
        state_writer,
        cfg.ingest.batch_size,
        Duration::from_millis(cfg.ingest.flush_interval_ms),
    );
    let state_shutdown = shutdown.clone();
    tasks.spawn(async move { state_pipeline.run(state_records_rx, state_shutdown).await });

    let history_writer = PgHistoryWriter::new(pool.clone(), cfg.ingest.store_raw_bytes_compress);
    let mut history_pipeline = HistoryPipeline::new(
        history_writer,
        cfg.ingest.batch_size,
        Duration::from_millis(cfg.ingest.flush_interval_ms),
    );
    let history_shutdown = shutdown.clone();
    tasks.spawn(async move { history_pipeline.run(history_records_rx, history_shutdown).await });

    let http_shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(err) = http::serve(http_addr, http_router, http_shutdown).await {
            tracing::error!(%err, "http surface exited with error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }
    shutdown.cancel();

    let shutdown_timeout = Duration::from_secs(cfg.service.shutdown_timeout_seconds);
    if tokio::time::timeout(shutdown_timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tracing::warn!("graceful shutdown exceeded {shutdown_timeout:?}, some tasks may not have finished");
    }

    Ok(())
}
