/*!
The history pipeline (§4.7): derives per-prefix [`HistoryRow`]s from Route-Monitoring messages
and registers routers from Peer Up messages, batching rows for a single transactional flush
per trigger (§4.8), sharing the state pipeline's batch/flush/commit shape (§5).
*/
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use crate::models::{HistoryRow, RouterUpsert};

pub trait HistoryWriter: Send + Sync {
    fn flush_batch(
        &self,
        rows: &[HistoryRow],
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    fn upsert_router(
        &self,
        router: &RouterUpsert,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct HistoryRecord {
    pub rows: Vec<HistoryRow>,
    pub router_upsert: Option<RouterUpsert>,
}

pub struct HistoryPipeline<W: HistoryWriter> {
    writer: W,
    batch_size: usize,
    flush_interval: Duration,
    batch: Vec<HistoryRow>,
}

impl<W: HistoryWriter> HistoryPipeline<W> {
    pub fn new(writer: W, batch_size: usize, flush_interval: Duration) -> Self {
        HistoryPipeline {
            writer,
            batch_size,
            flush_interval,
            batch: Vec::new(),
        }
    }

    pub async fn ingest(&mut self, record: HistoryRecord) -> anyhow::Result<()> {
        if let Some(router) = &record.router_upsert {
            self.writer.upsert_router(router).await?;
        }
        self.batch.extend(record.rows);
        if self.batch.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> anyhow::Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.writer.flush_batch(&self.batch).await?;
        crate::metrics::record_batch_size("history", self.batch.len());
        self.batch.clear();
        Ok(())
    }

    fn oversized(&self) -> bool {
        self.batch.len() >= self.batch_size * 10
    }

    fn drop_batch(&mut self) {
        self.batch.clear();
        crate::metrics::record_batch_dropped("history");
    }

    pub async fn run(&mut self, mut records_rx: mpsc::Receiver<HistoryRecord>, shutdown: CancellationToken) {
        let mut ticker: Interval = tokio::time::interval(self.flush_interval);
        loop {
            tokio::select! {
                maybe_record = records_rx.recv() => {
                    match maybe_record {
                        Some(record) => {
                            if let Err(err) = self.ingest(record).await {
                                tracing::error!(%err, "history pipeline flush failed, batch retained");
                                if self.oversized() {
                                    tracing::error!("history batch exceeded 10x batch_size, dropping");
                                    self.drop_batch();
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.flush().await {
                        tracing::error!(%err, "history pipeline periodic flush failed");
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("history pipeline shutting down, final flush");
                    if let Err(err) = tokio::time::timeout(Duration::from_secs(5), self.flush()).await {
                        tracing::error!(%err, "history pipeline final flush timed out");
                    }
                    break;
                }
            }
        }
    }
}

/// Builds the per-prefix history rows for one Route-Monitoring message's decoded events
/// (§4.4, §4.7). `bmp_message_bytes` must be the bounded `[offset, offset+msg_len)` span recomputed
/// from the common header, never an alias into a growable receive buffer.
pub fn build_history_rows(
    events: &[crate::models::RouteEvent],
    bmp_message_bytes: &[u8],
    router_id: &str,
    table_name: &str,
    topic: &str,
    ingest_time: chrono::DateTime<chrono::Utc>,
    peer_address: Option<&str>,
    bmp_raw: Option<Vec<u8>>,
) -> Vec<HistoryRow> {
    events
        .iter()
        .map(|event| {
            let prefix_text = event.prefix_text();
            let action_char = event.action.as_char();
            let event_id = match peer_address {
                Some(peer) => {
                    crate::event_id::event_id_adj_rib_in(bmp_message_bytes, peer, &prefix_text, action_char)
                }
                None => crate::event_id::event_id(bmp_message_bytes, &prefix_text, action_char),
            };
            HistoryRow {
                event_id,
                ingest_time,
                router_id: router_id.to_string(),
                table_name: table_name.to_string(),
                event: event.clone(),
                topic: topic.to_string(),
                bmp_raw: bmp_raw.clone(),
            }
        })
        .collect()
}
