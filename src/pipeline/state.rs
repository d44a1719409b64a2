/*!
The state pipeline (§4.5): accumulates Loc-RIB and Adj-RIB-In batches independently, flushing on
whichever of batch-size / flush-interval / control-action fires first, with control actions for
Adj-RIB-In processed ahead of Loc-RIB within the same record (§4.5 "Control-action ordering").
*/
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use crate::models::{AdjRibInRow, CurrentRouteRow};
use crate::pipeline::{ControlAction, ProcessedRecord};

/// The transactional sink the state writer (§4.6) implements. Kept as a trait so the pipeline's
/// accumulation/flush logic is independently testable against an in-memory fake.
pub trait StateWriter: Send + Sync {
    fn flush_batch(
        &self,
        routes: &[CurrentRouteRow],
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    fn flush_adj_rib_in_batch(
        &self,
        routes: &[AdjRibInRow],
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    fn handle_control_action(
        &self,
        action: &ControlAction,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

pub struct StatePipeline<W: StateWriter> {
    writer: W,
    batch_size: usize,
    flush_interval: Duration,
    loc_batch: Vec<CurrentRouteRow>,
    adj_batch: Vec<AdjRibInRow>,
}

impl<W: StateWriter> StatePipeline<W> {
    pub fn new(writer: W, batch_size: usize, flush_interval: Duration) -> Self {
        StatePipeline {
            writer,
            batch_size,
            flush_interval,
            loc_batch: Vec::new(),
            adj_batch: Vec::new(),
        }
    }

    /// Accepts one decoded record, flushing first if it carries a control action or either batch
    /// has reached `batch_size`, then accumulating its route rows.
    pub async fn ingest(&mut self, record: ProcessedRecord) -> anyhow::Result<()> {
        if record.adj_action.is_some() || record.loc_action.is_some() {
            self.flush().await?;
        }

        // Adj-RIB-In control action before Loc-RIB (§4.5): a Loc-RIB Peer Down's Adj-RIB-In purge
        // must not race a not-yet-executed Adj-RIB-In control action from the same record.
        if let Some(action) = &record.adj_action {
            self.writer.handle_control_action(action).await?;
        }
        if let Some(action) = &record.loc_action {
            self.writer.handle_control_action(action).await?;
        }

        self.loc_batch.extend(record.loc_routes);
        self.adj_batch.extend(record.adj_routes);

        if self.loc_batch.len() >= self.batch_size || self.adj_batch.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> anyhow::Result<()> {
        if !self.loc_batch.is_empty() {
            self.writer.flush_batch(&self.loc_batch).await?;
            crate::metrics::record_batch_size("state", self.loc_batch.len());
            self.loc_batch.clear();
        }
        if !self.adj_batch.is_empty() {
            self.writer.flush_adj_rib_in_batch(&self.adj_batch).await?;
            self.adj_batch.clear();
        }
        Ok(())
    }

    /// Oversized-batch safety (§4.5): drop the in-memory buffer instead of flushing when either
    /// batch reaches 10x `batch_size`, so sustained writer failure doesn't grow memory unbounded.
    fn oversized(&self) -> bool {
        self.loc_batch.len() >= self.batch_size * 10 || self.adj_batch.len() >= self.batch_size * 10
    }

    fn drop_batches(&mut self) {
        self.loc_batch.clear();
        self.adj_batch.clear();
        crate::metrics::record_batch_dropped("state");
    }

    pub fn flush_ticker(&self) -> Interval {
        tokio::time::interval(self.flush_interval)
    }

    /// Runs the batch/flush loop until `shutdown` fires, then performs a final flush with its own
    /// bounded context (§5 "Cancellation") before returning.
    pub async fn run(
        &mut self,
        mut records_rx: mpsc::Receiver<ProcessedRecord>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = self.flush_ticker();
        loop {
            tokio::select! {
                maybe_record = records_rx.recv() => {
                    match maybe_record {
                        Some(record) => {
                            if let Err(err) = self.ingest(record).await {
                                tracing::error!(%err, "state pipeline flush failed, batch retained");
                                if self.oversized() {
                                    tracing::error!("state batch exceeded 10x batch_size, dropping");
                                    self.drop_batches();
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.flush().await {
                        tracing::error!(%err, "state pipeline periodic flush failed");
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("state pipeline shutting down, final flush");
                    if let Err(err) = tokio::time::timeout(Duration::from_secs(5), self.flush()).await {
                        tracing::error!(%err, "state pipeline final flush timed out");
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingWriter {
        loc_flushes: Arc<AtomicUsize>,
        adj_flushes: Arc<AtomicUsize>,
        control_actions: Arc<AtomicUsize>,
    }

    impl StateWriter for CountingWriter {
        async fn flush_batch(&self, _routes: &[CurrentRouteRow]) -> anyhow::Result<()> {
            self.loc_flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn flush_adj_rib_in_batch(&self, _routes: &[AdjRibInRow]) -> anyhow::Result<()> {
            self.adj_flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn handle_control_action(&self, _action: &ControlAction) -> anyhow::Result<()> {
            self.control_actions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flushes_on_batch_size() {
        let writer = CountingWriter::default();
        let mut pipeline = StatePipeline::new(writer.clone(), 2, Duration::from_secs(3600));
        for _ in 0..2 {
            let record = ProcessedRecord {
                loc_routes: vec![dummy_loc_row()],
                ..Default::default()
            };
            pipeline.ingest(record).await.unwrap();
        }
        assert_eq!(writer.loc_flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_control_action_flushes_pending_batch_first() {
        let writer = CountingWriter::default();
        let mut pipeline = StatePipeline::new(writer.clone(), 100, Duration::from_secs(3600));
        let record = ProcessedRecord {
            loc_routes: vec![dummy_loc_row()],
            loc_action: Some(ControlAction::PeerDown {
                router_id: "10.0.0.1".to_string(),
                table_name: None,
            }),
            ..Default::default()
        };
        pipeline.ingest(record).await.unwrap();
        assert_eq!(writer.control_actions.load(Ordering::SeqCst), 1);
    }

    fn dummy_loc_row() -> CurrentRouteRow {
        use crate::models::{Afi, NetworkPrefix, RouteAction, RouteEvent};
        use ipnet::{IpNet, Ipv4Net};
        use std::net::Ipv4Addr;

        CurrentRouteRow {
            router_id: "10.0.0.1".to_string(),
            table_name: "locrib".to_string(),
            event: RouteEvent {
                afi: Afi::Ipv4,
                prefix: NetworkPrefix::new(
                    IpNet::V4(Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 24).unwrap()),
                    None,
                ),
                path_id: 0,
                action: RouteAction::Announce,
                nexthop: None,
                as_path: None,
                origin: None,
                origin_asn: None,
                local_pref: None,
                med: None,
                communities_std: vec![],
                communities_ext: vec![],
                communities_large: vec![],
                unknown_attrs: Default::default(),
            },
        }
    }
}
