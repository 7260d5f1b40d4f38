//! Kraken exchange integration.
//!
//! - Public order books through `Depth`
//! - Private methods signed with the base64-decoded secret
//! - Withdrawals go to pre-registered keys named `"<Destination>-<CURRENCY>"`
//!
//! Kraken prefixes asset codes (`XXBT`, `XZEC`, `ZEUR`); balances are
//! translated back to plain codes.

mod client;
mod types;

pub use client::{KrakenClient, EXCHANGE_NAME};
