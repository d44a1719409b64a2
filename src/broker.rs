/*!
The broker adapter (§4.9): a Kafka consumer group client with auto-commit disabled, a poll loop
that forwards records over a bounded channel, and a separate commit task that marks and commits
offsets only after a batch has been durably written — giving at-least-once delivery (§5).
*/
use anyhow::Context;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    CommitMode, Consumer, ConsumerContext, Rebalance, RebalanceProtocol, StreamConsumer,
};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::{ClientContext, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;

/// One record handed from the poll loop to a pipeline's batch/flush loop.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Set by the rebalance callback; `is_joined` reads it for the readiness probe (§6 "HTTP
/// surface"). A synchronous commit on `partitions_revoked` ensures marked offsets are durable
/// before partitions change hands (§4.9). `consumer_handle` is filled in right after the
/// `StreamConsumer` is constructed, since the context has to exist before the consumer it is
/// embedded in does.
struct RebalanceContext {
    joined: Arc<AtomicBool>,
    consumer_handle: Arc<OnceLock<Weak<StreamConsumer<RebalanceContext>>>>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Revoke(_) = rebalance {
            self.joined.store(false, Ordering::SeqCst);
            if let Some(consumer) = self.consumer_handle.get().and_then(Weak::upgrade) {
                if let Err(err) = consumer.commit_consumer_state(CommitMode::Sync) {
                    tracing::error!(%err, "synchronous commit on partition revoke failed");
                }
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(_) = rebalance {
            self.joined.store(true, Ordering::SeqCst);
        }
    }
}

pub struct BrokerConsumer {
    consumer: Arc<StreamConsumer<RebalanceContext>>,
    joined: Arc<AtomicBool>,
}

impl BrokerConsumer {
    pub fn connect(cfg: &BrokerConfig, group_id: &str, topics: &[String]) -> anyhow::Result<Self> {
        let joined = Arc::new(AtomicBool::new(false));
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("client.id", &cfg.client_id)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("fetch.message.max.bytes", cfg.fetch_max_bytes.to_string());

        if cfg.tls.enabled {
            client_config.set("security.protocol", "SSL");
            if let Some(ca) = &cfg.tls.ca_file {
                client_config.set("ssl.ca.location", ca);
            }
            if let Some(cert) = &cfg.tls.cert_file {
                client_config.set("ssl.certificate.location", cert);
            }
            if let Some(key) = &cfg.tls.key_file {
                client_config.set("ssl.key.location", key);
            }
        }
        if cfg.sasl.enabled {
            client_config
                .set("security.protocol", if cfg.tls.enabled { "SASL_SSL" } else { "SASL_PLAINTEXT" })
                .set("sasl.mechanisms", cfg.sasl.mechanism.as_deref().unwrap_or("PLAIN"));
            if let Some(user) = &cfg.sasl.username {
                client_config.set("sasl.username", user);
            }
            if let Some(pass) = &cfg.sasl.password {
                client_config.set("sasl.password", pass);
            }
        }

        let consumer_handle = Arc::new(OnceLock::new());
        let context = RebalanceContext {
            joined: joined.clone(),
            consumer_handle: consumer_handle.clone(),
        };
        let consumer: StreamConsumer<RebalanceContext> = client_config
            .create_with_context(context)
            .context("building rdkafka consumer")?;
        consumer
            .subscribe(&topics.iter().map(String::as_str).collect::<Vec<_>>())
            .context("subscribing to topics")?;
        let consumer = Arc::new(consumer);
        consumer_handle
            .set(Arc::downgrade(&consumer))
            .expect("consumer_handle set exactly once, right after construction");

        Ok(BrokerConsumer { consumer, joined })
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    /// Fetches records and forwards them over `tx` until `shutdown` fires. Fetch errors are
    /// logged, not raised (§4.9, §7).
    pub async fn poll_loop(&self, tx: mpsc::Sender<Record>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("broker poll loop received shutdown signal");
                    return;
                }
                result = self.consumer.recv() => {
                    match result {
                        Ok(msg) => {
                            let record = Record {
                                topic: msg.topic().to_string(),
                                partition: msg.partition(),
                                offset: msg.offset(),
                                payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
                            };
                            if tx.send(record).await.is_err() {
                                tracing::warn!("broker channel receiver dropped, stopping poll loop");
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "kafka fetch error");
                        }
                    }
                }
            }
        }
    }

    /// Marks and commits offsets for one acknowledged batch with a bounded timeout (§4.9).
    pub fn commit_batch(&self, offsets: &TopicPartitionList) -> KafkaResult<()> {
        self.consumer
            .commit(offsets, CommitMode::Sync)
    }

    pub fn assignment(&self) -> KafkaResult<TopicPartitionList> {
        self.consumer.assignment()
    }

    pub fn rebalance_protocol(&self) -> RebalanceProtocol {
        self.consumer.rebalance_protocol()
    }
}

/// Runs the commit task: drains the flushed channel and commits offsets for each acknowledged
/// batch, with a bounded commit timeout. Drains to completion on shutdown before returning so no
/// acknowledged record is left uncommitted (§4.9, §5 "Cancellation").
pub async fn commit_task(
    consumer: Arc<BrokerConsumer>,
    mut flushed_rx: mpsc::Receiver<TopicPartitionList>,
) {
    const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);
    while let Some(offsets) = flushed_rx.recv().await {
        let consumer = consumer.clone();
        let result = tokio::time::timeout(
            COMMIT_TIMEOUT,
            tokio::task::spawn_blocking(move || consumer.commit_batch(&offsets)),
        )
        .await;
        match result {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => tracing::error!(%err, "kafka commit failed"),
            Ok(Err(join_err)) => tracing::error!(%join_err, "commit task panicked"),
            Err(_) => tracing::error!("kafka commit timed out after {COMMIT_TIMEOUT:?}"),
        }
    }
    tracing::info!("commit task drained, exiting");
}
