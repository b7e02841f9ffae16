//! # BitVoice server
//!
//! The HTTP face of the BitVoice invoice gateway. It is responsible for:
//! * the BitPay-compatible merchant API (invoice creation, token-gated status queries, chronological listing),
//! * ingesting the wallet daemon's observation callbacks and forwarding them onto the payment watcher's feed,
//! * wiring the engine together at startup: storage, watcher, sweep worker and notification dispatcher.
//!
//! ## Configuration
//! The server is configured via `BVG_*` environment variables. See [config](config/index.html).
//!
//! ## Routes
//! * `GET /health`: liveness check.
//! * `POST /invoices`: create an invoice; the response includes the access token.
//! * `GET /invoices/{id}?token=`: current invoice state; the token must match.
//! * `GET /invoices?cursor=&limit=`: chronological listing.
//! * `POST /wallet/tx`, `POST /wallet/reorg`: wallet daemon callbacks.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod routes;
pub mod server;
pub mod wallet;
