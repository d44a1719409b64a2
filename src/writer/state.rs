/*!
The state writer (§4.6): transactional upsert/delete against `current_routes`/`adj_rib_in` and
their sync-status tables, implementing [`crate::pipeline::state::StateWriter`] over `sqlx::PgPool`.
*/
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{AdjRibInRow, CurrentRouteRow, RouteAction, RouterUpsert};
use crate::pipeline::{afi_label, state::StateWriter, ControlAction};

pub struct PgStateWriter {
    pool: PgPool,
}

impl PgStateWriter {
    pub fn new(pool: PgPool) -> Self {
        PgStateWriter { pool }
    }

    async fn flush_batch_tx(&self, routes: &[CurrentRouteRow]) -> anyhow::Result<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;
        for row in routes {
            match row.event.action {
                RouteAction::Announce => upsert_current_route(&mut tx, row).await?,
                RouteAction::Withdraw => delete_current_route(&mut tx, row).await?,
            }
            touch_sync_status(&mut tx, &row.router_id, &row.table_name, row.event.afi).await?;
        }
        tx.commit().await?;
        crate::metrics::record_db_write("state", "flush_batch", start.elapsed());
        crate::metrics::record_rows_affected("state", "current_routes", "flush", routes.len() as u64);
        Ok(())
    }

    async fn flush_adj_rib_in_batch_tx(&self, routes: &[AdjRibInRow]) -> anyhow::Result<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;
        for row in routes {
            match row.event.action {
                RouteAction::Announce => upsert_adj_rib_in(&mut tx, row).await?,
                RouteAction::Withdraw => delete_adj_rib_in(&mut tx, row).await?,
            }
        }
        tx.commit().await?;
        crate::metrics::record_db_write("state", "flush_adj_rib_in_batch", start.elapsed());
        crate::metrics::record_rows_affected("state", "adj_rib_in", "flush", routes.len() as u64);
        Ok(())
    }

    pub async fn handle_eor(&self, router_id: &str, table_name: &str, afi: crate::models::Afi) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE rib_sync_status SET eor_seen = true, eor_time = now(), updated_at = now() \
             WHERE router_id = $1 AND table_name = $2 AND afi = $3",
        )
        .bind(router_id)
        .bind(table_name)
        .bind(afi_label(afi))
        .execute(&mut *tx)
        .await?;

        let purged = sqlx::query(
            "DELETE FROM current_routes WHERE router_id = $1 AND table_name = $2 AND afi = $3 \
             AND updated_at < (SELECT session_start_time FROM rib_sync_status \
                                WHERE router_id = $1 AND table_name = $2 AND afi = $3)",
        )
        .bind(router_id)
        .bind(table_name)
        .bind(afi_label(afi))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        crate::metrics::record_routes_purged("eor_stale", purged.rows_affected());
        crate::metrics::set_eor_seen(router_id, table_name, afi_label(afi));
        Ok(())
    }

    pub async fn handle_adj_rib_in_eor(
        &self,
        router_id: &str,
        peer_address: &str,
        table_name: &str,
        afi: crate::models::Afi,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let status = sqlx::query(
            "UPDATE adj_rib_in_sync_status SET eor_seen = true, eor_time = now(), updated_at = now() \
             WHERE router_id = $1 AND peer_address = $2 AND afi = $3",
        )
        .bind(router_id)
        .bind(peer_address)
        .bind(afi_label(afi))
        .execute(&mut *tx)
        .await?;

        if status.rows_affected() == 0 {
            tracing::warn!(router_id, peer_address, "adj-rib-in eor with no sync-status row, skipping purge");
            tx.commit().await?;
            return Ok(());
        }

        let purged = sqlx::query(
            "DELETE FROM adj_rib_in WHERE router_id = $1 AND peer_address = $2 AND table_name = $3 AND afi = $4 \
             AND updated_at < (SELECT session_start_time FROM adj_rib_in_sync_status \
                                WHERE router_id = $1 AND peer_address = $2 AND afi = $4)",
        )
        .bind(router_id)
        .bind(peer_address)
        .bind(table_name)
        .bind(afi_label(afi))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        crate::metrics::record_routes_purged("eor_stale", purged.rows_affected());
        Ok(())
    }

    pub async fn handle_session_termination(&self, router_id: &str, table_name: Option<&str>) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        match table_name {
            Some(table) => {
                sqlx::query("DELETE FROM current_routes WHERE router_id = $1 AND table_name = $2")
                    .bind(router_id)
                    .bind(table)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM rib_sync_status WHERE router_id = $1 AND table_name = $2")
                    .bind(router_id)
                    .bind(table)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM current_routes WHERE router_id = $1")
                    .bind(router_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM rib_sync_status WHERE router_id = $1")
                    .bind(router_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        // The monitoring session is gone; the Adj-RIB-In side is purged too (§4.6).
        self.handle_adj_rib_in_session_termination(router_id).await
    }

    pub async fn handle_adj_rib_in_peer_down(&self, router_id: &str, peer_address: &str) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM adj_rib_in WHERE router_id = $1 AND peer_address = $2")
            .bind(router_id)
            .bind(peer_address)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM adj_rib_in_sync_status WHERE router_id = $1 AND peer_address = $2")
            .bind(router_id)
            .bind(peer_address)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn handle_adj_rib_in_session_termination(&self, router_id: &str) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM adj_rib_in WHERE router_id = $1")
            .bind(router_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM adj_rib_in_sync_status WHERE router_id = $1")
            .bind(router_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_session_start(&self, router_id: &str, table_name: &str, afi: crate::models::Afi, start: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO rib_sync_status (router_id, table_name, afi, session_start_time, eor_seen, eor_time, updated_at) \
             VALUES ($1, $2, $3, $4, false, NULL, now()) \
             ON CONFLICT (router_id, table_name, afi) DO UPDATE SET \
               session_start_time = excluded.session_start_time, eor_seen = false, eor_time = NULL, updated_at = now()",
        )
        .bind(router_id)
        .bind(table_name)
        .bind(afi_label(afi))
        .bind(start)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_adj_rib_in_session_start(
        &self,
        router_id: &str,
        peer_address: &str,
        afi: crate::models::Afi,
        start: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO adj_rib_in_sync_status (router_id, peer_address, afi, session_start_time, eor_seen, eor_time, updated_at) \
             VALUES ($1, $2, $3, $4, false, NULL, now()) \
             ON CONFLICT (router_id, peer_address, afi) DO UPDATE SET \
               session_start_time = excluded.session_start_time, eor_seen = false, eor_time = NULL, updated_at = now()",
        )
        .bind(router_id)
        .bind(peer_address)
        .bind(afi_label(afi))
        .bind(start)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// COALESCE semantics (§4.6): a field already populated on `routers` is never overwritten
    /// with NULL by a later, less-informed upsert.
    pub async fn upsert_router(&self, router: &RouterUpsert) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO routers (router_id, router_ip, hostname, as_number, description, display_name, location, first_seen, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now()) \
             ON CONFLICT (router_id) DO UPDATE SET \
               router_ip = COALESCE(excluded.router_ip, routers.router_ip), \
               hostname = COALESCE(excluded.hostname, routers.hostname), \
               as_number = COALESCE(excluded.as_number, routers.as_number), \
               description = COALESCE(excluded.description, routers.description), \
               display_name = COALESCE(excluded.display_name, routers.display_name), \
               location = COALESCE(excluded.location, routers.location), \
               last_seen = now()",
        )
        .bind(&router.router_id)
        .bind(&router.router_ip)
        .bind(&router.hostname)
        .bind(router.asn.map(|a| a as i64))
        .bind(&router.description)
        .bind(&router.display_name)
        .bind(&router.location)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl StateWriter for PgStateWriter {
    async fn flush_batch(&self, routes: &[CurrentRouteRow]) -> anyhow::Result<()> {
        self.flush_batch_tx(routes).await
    }

    async fn flush_adj_rib_in_batch(&self, routes: &[AdjRibInRow]) -> anyhow::Result<()> {
        self.flush_adj_rib_in_batch_tx(routes).await
    }

    async fn handle_control_action(&self, action: &ControlAction) -> anyhow::Result<()> {
        match action {
            ControlAction::Eor { router_id, table_name, afi } => {
                self.handle_eor(router_id, table_name, *afi).await
            }
            ControlAction::AdjRibInEor { router_id, peer_address, table_name, afi } => {
                self.handle_adj_rib_in_eor(router_id, peer_address, table_name, *afi).await
            }
            ControlAction::PeerUp { router, table_name } => {
                self.upsert_router(router).await?;
                let now = Utc::now();
                self.update_session_start(&router.router_id, table_name, crate::models::Afi::Ipv4, now).await?;
                self.update_session_start(&router.router_id, table_name, crate::models::Afi::Ipv6, now).await
            }
            ControlAction::AdjRibInPeerUp { router_id, peer_address, peer_asn: _ } => {
                let now = Utc::now();
                self.update_adj_rib_in_session_start(router_id, peer_address, crate::models::Afi::Ipv4, now).await?;
                self.update_adj_rib_in_session_start(router_id, peer_address, crate::models::Afi::Ipv6, now).await
            }
            ControlAction::PeerDown { router_id, table_name } => {
                self.handle_session_termination(router_id, table_name.as_deref()).await
            }
            ControlAction::AdjRibInPeerDown { router_id, peer_address } => {
                self.handle_adj_rib_in_peer_down(router_id, peer_address).await
            }
        }
    }
}

async fn upsert_current_route(tx: &mut Transaction<'_, Postgres>, row: &CurrentRouteRow) -> anyhow::Result<()> {
    let event = &row.event;
    sqlx::query(
        "INSERT INTO current_routes \
           (router_id, table_name, afi, prefix, path_id, nexthop, as_path, origin, localpref, med, \
            origin_asn, communities_std, communities_ext, communities_large, attrs, first_seen, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, now(), now()) \
         ON CONFLICT (router_id, table_name, afi, prefix, path_id) DO UPDATE SET \
           nexthop = excluded.nexthop, as_path = excluded.as_path, origin = excluded.origin, \
           localpref = excluded.localpref, med = excluded.med, origin_asn = excluded.origin_asn, \
           communities_std = excluded.communities_std, communities_ext = excluded.communities_ext, \
           communities_large = excluded.communities_large, attrs = excluded.attrs, updated_at = now()",
    )
    .bind(&row.router_id)
    .bind(&row.table_name)
    .bind(afi_label(event.afi))
    .bind(event.prefix_text())
    .bind(event.path_id as i64)
    .bind(&event.nexthop)
    .bind(&event.as_path)
    .bind(&event.origin)
    .bind(event.local_pref.map(|v| v as i64))
    .bind(event.med.map(|v| v as i64))
    .bind(event.origin_asn.map(|v| v as i64))
    .bind(&event.communities_std)
    .bind(&event.communities_ext)
    .bind(&event.communities_large)
    .bind(event.attrs_json())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn delete_current_route(tx: &mut Transaction<'_, Postgres>, row: &CurrentRouteRow) -> anyhow::Result<()> {
    let event = &row.event;
    sqlx::query(
        "DELETE FROM current_routes WHERE router_id = $1 AND table_name = $2 AND afi = $3 AND prefix = $4 AND path_id = $5",
    )
    .bind(&row.router_id)
    .bind(&row.table_name)
    .bind(afi_label(event.afi))
    .bind(event.prefix_text())
    .bind(event.path_id as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_adj_rib_in(tx: &mut Transaction<'_, Postgres>, row: &AdjRibInRow) -> anyhow::Result<()> {
    let event = &row.event;
    sqlx::query(
        "INSERT INTO adj_rib_in \
           (router_id, peer_address, peer_asn, peer_bgp_id, is_post_policy, table_name, afi, prefix, path_id, \
            nexthop, as_path, origin, localpref, med, origin_asn, communities_std, communities_ext, communities_large, \
            attrs, first_seen, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, now(), now()) \
         ON CONFLICT (router_id, peer_address, is_post_policy, table_name, afi, prefix, path_id) DO UPDATE SET \
           nexthop = excluded.nexthop, as_path = excluded.as_path, origin = excluded.origin, \
           localpref = excluded.localpref, med = excluded.med, origin_asn = excluded.origin_asn, \
           communities_std = excluded.communities_std, communities_ext = excluded.communities_ext, \
           communities_large = excluded.communities_large, attrs = excluded.attrs, updated_at = now()",
    )
    .bind(&row.router_id)
    .bind(&row.peer_address)
    .bind(row.peer_asn.map(|v| v as i64))
    .bind(&row.peer_bgp_id)
    .bind(row.is_post_policy)
    .bind(&row.table_name)
    .bind(afi_label(event.afi))
    .bind(event.prefix_text())
    .bind(event.path_id as i64)
    .bind(&event.nexthop)
    .bind(&event.as_path)
    .bind(&event.origin)
    .bind(event.local_pref.map(|v| v as i64))
    .bind(event.med.map(|v| v as i64))
    .bind(event.origin_asn.map(|v| v as i64))
    .bind(&event.communities_std)
    .bind(&event.communities_ext)
    .bind(&event.communities_large)
    .bind(event.attrs_json())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn delete_adj_rib_in(tx: &mut Transaction<'_, Postgres>, row: &AdjRibInRow) -> anyhow::Result<()> {
    let event = &row.event;
    sqlx::query(
        "DELETE FROM adj_rib_in WHERE router_id = $1 AND peer_address = $2 AND is_post_policy = $3 \
         AND table_name = $4 AND afi = $5 AND prefix = $6 AND path_id = $7",
    )
    .bind(&row.router_id)
    .bind(&row.peer_address)
    .bind(row.is_post_policy)
    .bind(&row.table_name)
    .bind(afi_label(event.afi))
    .bind(event.prefix_text())
    .bind(event.path_id as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn touch_sync_status(tx: &mut Transaction<'_, Postgres>, router_id: &str, table_name: &str, afi: crate::models::Afi) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO rib_sync_status (router_id, table_name, afi, last_parsed_msg_time, updated_at) \
         VALUES ($1, $2, $3, now(), now()) \
         ON CONFLICT (router_id, table_name, afi) DO UPDATE SET last_parsed_msg_time = now(), updated_at = now()",
    )
    .bind(router_id)
    .bind(table_name)
    .bind(afi_label(afi))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Afi, NetworkPrefix, RouteAction, RouteEvent};
    use ipnet::{IpNet, Ipv4Net};
    use std::net::Ipv4Addr;

    fn dummy_row(router_id: &str, prefix: &str, action: RouteAction) -> CurrentRouteRow {
        let net: Ipv4Net = prefix.parse().unwrap();
        CurrentRouteRow {
            router_id: router_id.to_string(),
            table_name: "locrib".to_string(),
            event: RouteEvent {
                afi: Afi::Ipv4,
                prefix: NetworkPrefix::new(IpNet::V4(net), None),
                path_id: 0,
                action,
                nexthop: Some("192.168.1.1".to_string()),
                as_path: Some("65001 65002".to_string()),
                origin: Some("IGP".to_string()),
                origin_asn: Some(65002),
                local_pref: None,
                med: None,
                communities_std: vec![],
                communities_ext: vec![],
                communities_large: vec![],
                unknown_attrs: Default::default(),
            },
        }
    }

    // Property #6 (§8): after `handle_eor`, no surviving current_routes row for the scoped
    // (router, table, afi) has updated_at earlier than session_start_time.
    #[sqlx::test(migrations = "migrations")]
    #[ignore = "requires a live Postgres database"]
    async fn eor_purges_stale_rows(pool: PgPool) -> anyhow::Result<()> {
        let writer = PgStateWriter::new(pool);
        writer
            .update_session_start("10.0.0.1", "locrib", Afi::Ipv4, Utc::now())
            .await?;
        writer.flush_batch(&[dummy_row("10.0.0.1", "10.0.0.0/24", RouteAction::Announce)]).await?;

        // Bump session_start_time forward so the row inserted above is now stale.
        writer
            .update_session_start("10.0.0.1", "locrib", Afi::Ipv4, Utc::now() + chrono::Duration::seconds(60))
            .await?;
        writer.handle_eor("10.0.0.1", "locrib", Afi::Ipv4).await?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM current_routes WHERE router_id = $1 AND table_name = 'locrib' AND afi = '4'",
        )
        .bind("10.0.0.1")
        .fetch_one(&writer.pool)
        .await?;
        assert_eq!(remaining, 0);
        Ok(())
    }

    // Property #7 (§8): a Loc-RIB Peer Down removes current-route, sync-status, and Adj-RIB-In
    // rows for the router atomically.
    #[sqlx::test(migrations = "migrations")]
    #[ignore = "requires a live Postgres database"]
    async fn peer_down_removes_all_scoped_rows(pool: PgPool) -> anyhow::Result<()> {
        let writer = PgStateWriter::new(pool);
        writer
            .update_session_start("10.0.0.1", "locrib", Afi::Ipv4, Utc::now())
            .await?;
        writer.flush_batch(&[dummy_row("10.0.0.1", "10.0.0.0/24", RouteAction::Announce)]).await?;
        writer.handle_session_termination("10.0.0.1", Some("locrib")).await?;

        let routes: i64 = sqlx::query_scalar("SELECT count(*) FROM current_routes WHERE router_id = $1")
            .bind("10.0.0.1")
            .fetch_one(&writer.pool)
            .await?;
        let sync: i64 = sqlx::query_scalar("SELECT count(*) FROM rib_sync_status WHERE router_id = $1")
            .bind("10.0.0.1")
            .fetch_one(&writer.pool)
            .await?;
        assert_eq!(routes, 0);
        assert_eq!(sync, 0);
        Ok(())
    }
}
