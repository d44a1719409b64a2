/*!
The history writer (§4.8): a single transaction per flush, `ON CONFLICT (event_id, ingest_time)
DO NOTHING` for dedup, optional zstd compression of the raw BMP bytes, and a
`rib_sync_status.last_raw_msg_time` refresh for every (router, table, afi) touched by the batch.
*/
use std::collections::HashSet;
use std::time::Instant;

use sqlx::PgPool;

use crate::models::HistoryRow;
use crate::pipeline::{afi_label, history::HistoryWriter};

pub struct PgHistoryWriter {
    pool: PgPool,
    compress_raw: bool,
}

impl PgHistoryWriter {
    pub fn new(pool: PgPool, compress_raw: bool) -> Self {
        PgHistoryWriter { pool, compress_raw }
    }

    fn encode_raw(&self, raw: &Option<Vec<u8>>) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(bytes) = raw else { return Ok(None) };
        if !self.compress_raw {
            return Ok(Some(bytes.clone()));
        }
        let compressed = zstd::stream::encode_all(bytes.as_slice(), 0)?;
        Ok(Some(compressed))
    }
}

impl HistoryWriter for PgHistoryWriter {
    async fn flush_batch(&self, rows: &[HistoryRow]) -> anyhow::Result<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut touched: HashSet<(String, String, &'static str)> = HashSet::new();

        for row in rows {
            let event = &row.event;
            let raw = self.encode_raw(&row.bmp_raw)?;
            let result = sqlx::query(
                "INSERT INTO route_events \
                   (event_id, ingest_time, router_id, table_name, afi, prefix, path_id, action, \
                    nexthop, as_path, origin, localpref, med, communities_std, communities_ext, \
                    communities_large, attrs, bmp_raw) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
                 ON CONFLICT (event_id, ingest_time) DO NOTHING",
            )
            .bind(row.event_id.as_slice())
            .bind(row.ingest_time)
            .bind(&row.router_id)
            .bind(&row.table_name)
            .bind(afi_label(event.afi))
            .bind(event.prefix_text())
            .bind(event.path_id as i64)
            .bind(event.action.as_char().to_string())
            .bind(&event.nexthop)
            .bind(&event.as_path)
            .bind(&event.origin)
            .bind(event.local_pref.map(|v| v as i64))
            .bind(event.med.map(|v| v as i64))
            .bind(&event.communities_std)
            .bind(&event.communities_ext)
            .bind(&event.communities_large)
            .bind(event.attrs_json())
            .bind(raw)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                crate::metrics::record_history_dedup_conflict(&row.topic);
            } else {
                touched.insert((row.router_id.clone(), row.table_name.clone(), afi_label(event.afi)));
            }
        }

        let touch_time = chrono::Utc::now();
        for (router_id, table_name, afi) in &touched {
            sqlx::query(
                "UPDATE rib_sync_status SET last_raw_msg_time = now() \
                 WHERE router_id = $1 AND table_name = $2 AND afi = $3",
            )
            .bind(router_id)
            .bind(table_name)
            .bind(*afi)
            .execute(&mut *tx)
            .await?;
            crate::metrics::set_last_msg_timestamp(
                "history",
                router_id,
                table_name,
                afi,
                touch_time.timestamp() as f64,
            );
        }

        tx.commit().await?;
        crate::metrics::record_db_write("history", "flush_batch", start.elapsed());
        crate::metrics::record_rows_affected("history", "route_events", "insert", rows.len() as u64);
        Ok(())
    }

    async fn upsert_router(&self, router: &crate::models::RouterUpsert) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO routers (router_id, router_ip, as_number, first_seen, last_seen) \
             VALUES ($1, $2, $3, now(), now()) \
             ON CONFLICT (router_id) DO UPDATE SET \
               router_ip = COALESCE(excluded.router_ip, routers.router_ip), \
               as_number = COALESCE(excluded.as_number, routers.as_number), \
               last_seen = now()",
        )
        .bind(&router.router_id)
        .bind(&router.router_ip)
        .bind(router.asn.map(|a| a as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Afi, NetworkPrefix, RouteAction, RouteEvent};
    use chrono::Utc;
    use ipnet::{IpNet, Ipv4Net};

    fn dummy_row(event_id: [u8; 32]) -> HistoryRow {
        let net: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        HistoryRow {
            event_id,
            ingest_time: Utc::now(),
            router_id: "10.0.0.1".to_string(),
            table_name: "locrib".to_string(),
            event: RouteEvent {
                afi: Afi::Ipv4,
                prefix: NetworkPrefix::new(IpNet::V4(net), None),
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
            topic: "bmp-raw".to_string(),
            bmp_raw: None,
        }
    }

    // Property #8 / scenario S5 (§8): a repeat of the same event_id+ingest_time is a no-op, not
    // a second row, and is counted as a dedup hit rather than an error.
    #[sqlx::test(migrations = "migrations")]
    #[ignore = "requires a live Postgres database"]
    async fn duplicate_event_id_is_deduplicated(pool: PgPool) -> anyhow::Result<()> {
        let writer = PgHistoryWriter::new(pool, false);
        let row = dummy_row([7u8; 32]);
        writer.flush_batch(&[row.clone()]).await?;
        writer.flush_batch(&[row]).await?;

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM route_events WHERE event_id = $1")
            .bind([7u8; 32].as_slice())
            .fetch_one(&writer.pool)
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }
}
