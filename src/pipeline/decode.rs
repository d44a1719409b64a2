/*!
Bridges the wire parsers (§4.1-§4.3) to the two pipelines: for each broker record, unwraps the
OpenBMP envelope, decodes the BMP message(s), and turns each one into a [`ProcessedRecord`] for
the state pipeline and a [`HistoryRecord`] for the history pipeline.
*/
use chrono::Utc;

use crate::models::{AdjRibInRow, CurrentRouteRow, RouteAction, RouterUpsert};
use crate::parser::bmp::{decode_bmp_messages, BmpMessage};
use crate::parser::{bgp::parse_update, frame::decode_frame};
use crate::pipeline::history::HistoryRecord;
use crate::pipeline::{afi_label, ControlAction, ProcessedRecord, RouterIdentityCache};

fn action_label(action: RouteAction) -> &'static str {
    match action {
        RouteAction::Announce => "announce",
        RouteAction::Withdraw => "withdraw",
    }
}

pub struct DecodeOutcome {
    pub state: ProcessedRecord,
    pub history: HistoryRecord,
}

const ROUTE_MONITORING_TABLE: &str = "locrib";

/// Decodes one raw broker payload, updating `cache` as non-Loc-RIB Peer Ups are observed
/// (§4.5 "the pipeline maintains an in-memory map"), and returns the rows/control actions both
/// pipelines need. `topic`/`max_payload_bytes`/`store_raw` come from the ingest configuration.
pub fn decode_record(
    payload: &[u8],
    topic: &str,
    max_payload_bytes: usize,
    store_raw: bool,
    cache: &mut RouterIdentityCache,
) -> anyhow::Result<DecodeOutcome> {
    let frame = decode_frame(payload, max_payload_bytes)?;
    let ingest_time = Utc::now();
    let mut outcome = DecodeOutcome {
        state: ProcessedRecord::default(),
        history: HistoryRecord::default(),
    };

    let messages = decode_bmp_messages(frame.bmp_bytes.clone())?;
    for message in messages {
        match message {
            BmpMessage::RouteMonitoring(rm) => {
                let router_id = resolve_router_id(&rm.peer_header, &frame.router_ip, &frame.router_hash, cache);
                let has_add_path = rm.peer_header.has_add_path;
                let outcome_update = parse_update(&rm.bgp_message_raw, has_add_path)?;
                let table_name = rm.table_name.clone().unwrap_or_else(|| ROUTE_MONITORING_TABLE.to_string());

                if rm.peer_header.is_loc_rib {
                    for event in &outcome_update.events {
                        crate::metrics::record_kafka_message(
                            "state",
                            topic,
                            afi_label(event.afi),
                            action_label(event.action),
                        );
                        outcome.state.loc_routes.push(CurrentRouteRow {
                            router_id: router_id.clone(),
                            table_name: table_name.clone(),
                            event: event.clone(),
                        });
                    }
                    if outcome_update.events.is_empty() && outcome_update.eor_afi.is_some() {
                        outcome.state.loc_action = Some(ControlAction::Eor {
                            router_id: router_id.clone(),
                            table_name: table_name.clone(),
                            afi: outcome_update.eor_afi.unwrap(),
                        });
                    }
                } else {
                    let peer_address = rm
                        .peer_header
                        .peer_address
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| rm.peer_header.peer_bgp_id.to_string());
                    for event in &outcome_update.events {
                        crate::metrics::record_kafka_message(
                            "adj_rib_in",
                            topic,
                            afi_label(event.afi),
                            action_label(event.action),
                        );
                        outcome.state.adj_routes.push(AdjRibInRow {
                            router_id: router_id.clone(),
                            peer_address: peer_address.clone(),
                            peer_asn: Some(u32::from(rm.peer_header.peer_as)),
                            peer_bgp_id: rm.peer_header.peer_bgp_id.to_string(),
                            is_post_policy: rm.peer_header.is_post_policy,
                            table_name: table_name.clone(),
                            event: event.clone(),
                        });
                    }
                    if outcome_update.events.is_empty() && outcome_update.eor_afi.is_some() {
                        outcome.state.adj_action = Some(ControlAction::AdjRibInEor {
                            router_id: router_id.clone(),
                            peer_address,
                            table_name: table_name.clone(),
                            afi: outcome_update.eor_afi.unwrap(),
                        });
                    }
                }

                let raw = if store_raw {
                    Some(rm.bgp_message_raw.to_vec())
                } else {
                    None
                };
                let peer_for_history = if rm.peer_header.is_loc_rib {
                    None
                } else {
                    Some(
                        rm.peer_header
                            .peer_address
                            .map(|ip| ip.to_string())
                            .unwrap_or_else(|| rm.peer_header.peer_bgp_id.to_string()),
                    )
                };
                let rows = crate::pipeline::history::build_history_rows(
                    &outcome_update.events,
                    &rm.bgp_message_raw,
                    &router_id,
                    &table_name,
                    topic,
                    ingest_time,
                    peer_for_history.as_deref(),
                    raw,
                );
                outcome.history.rows.extend(rows);
            }
            BmpMessage::PeerUp(pu) => {
                if pu.peer_header.is_loc_rib {
                    let router = RouterUpsert {
                        router_id: pu.local_bgp_id.to_string(),
                        router_ip: Some(pu.local_bgp_id.to_string()),
                        asn: None,
                        ..Default::default()
                    };
                    outcome.state.loc_action = Some(ControlAction::PeerUp {
                        router: router.clone(),
                        table_name: ROUTE_MONITORING_TABLE.to_string(),
                    });
                    outcome.history.router_upsert = Some(router);
                } else {
                    if let Some(hash) = frame.router_hash {
                        cache.remember(hash, pu.local_bgp_id.to_string());
                    }
                    let asn = u32::from(pu.local_asn);
                    let router_id = pu.local_bgp_id.to_string();
                    let is_new_asn = cache.note_asn(&router_id, asn);
                    let peer_address = pu
                        .peer_header
                        .peer_address
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| pu.peer_header.peer_bgp_id.to_string());
                    outcome.state.adj_action = Some(ControlAction::AdjRibInPeerUp {
                        router_id: router_id.clone(),
                        peer_address,
                        peer_asn: Some(asn),
                    });
                    if is_new_asn {
                        outcome.history.router_upsert = Some(RouterUpsert {
                            router_id,
                            asn: Some(asn),
                            ..Default::default()
                        });
                    }
                }
            }
            BmpMessage::PeerDown(pd) => {
                let router_id = resolve_router_id(&pd.peer_header, &frame.router_ip, &frame.router_hash, cache);
                if pd.peer_header.is_loc_rib {
                    let table_name = pd.table_name.clone().unwrap_or_else(|| ROUTE_MONITORING_TABLE.to_string());
                    outcome.state.loc_action = Some(ControlAction::PeerDown {
                        router_id,
                        table_name: Some(table_name),
                    });
                } else {
                    let peer_address = pd
                        .peer_header
                        .peer_address
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| pd.peer_header.peer_bgp_id.to_string());
                    outcome.state.adj_action = Some(ControlAction::AdjRibInPeerDown {
                        router_id,
                        peer_address,
                    });
                }
            }
            BmpMessage::Initiation(_)
            | BmpMessage::Termination
            | BmpMessage::StatisticsReport(_)
            | BmpMessage::RouteMirroring(_) => {
                // Acknowledged, no routes produced (§4.2).
            }
        }
    }

    Ok(outcome)
}

fn resolve_router_id(
    peer_header: &crate::parser::bmp::headers::BmpPerPeerHeader,
    router_ip: &Option<std::net::IpAddr>,
    router_hash: &Option<[u8; 16]>,
    cache: &RouterIdentityCache,
) -> String {
    if peer_header.is_loc_rib {
        return peer_header.identity_text();
    }
    if let Some(hash) = router_hash {
        if let Some(id) = cache.resolve(hash) {
            return id.clone();
        }
    }
    router_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| peer_header.identity_text())
}
