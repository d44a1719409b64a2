/*!
`bmp-rib-collector` decodes OpenBMP-wrapped BMP/BGP-UPDATE wire data read from a message broker
and materializes two relational views over Postgres: current Loc-RIB/Adj-RIB-In route state, and
an append-only, deduplicated history of route events.

The crate is split along the same boundary the service itself runs with two concerns:

- The `parser` feature (default-on) is a pure decoding/materialization engine with no broker, DB,
  or HTTP runtime attached — [`parser::frame`] unwraps the OpenBMP envelope, [`parser::bmp`]
  decodes the BMP message layer, [`parser::bgp::update`] decodes BGP UPDATE path attributes and
  NLRI into flat [`models::bgp::RouteEvent`] rows, and [`event_id`] derives the stable per-prefix
  identity attached to every history row.
- The `cli` feature layers the runnable ingestion service on top: [`pipeline`] turns decoded
  events into current-route and history batches, [`writer`] flushes those batches to Postgres,
  [`broker`] owns the Kafka consumer groups, [`http`] serves `/healthz`/`/readyz`/`/metrics`, and
  [`config`] loads the layered YAML/env configuration. `src/bin/main.rs` wires them together.
*/

pub mod error;
#[cfg(feature = "parser")]
pub mod event_id;
pub mod models;
#[cfg(feature = "parser")]
pub mod parser;

#[cfg(feature = "cli")]
pub mod broker;
#[cfg(feature = "cli")]
pub mod config;
#[cfg(feature = "cli")]
pub mod http;
#[cfg(feature = "cli")]
pub mod metrics;
#[cfg(feature = "cli")]
pub mod pipeline;
#[cfg(feature = "cli")]
pub mod writer;

#[cfg(feature = "parser")]
pub use parser::{BgpParseError, BmpParseError, FrameError, ParserError};
