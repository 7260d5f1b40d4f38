//! Hitbtc exchange integration (api/1).
//!
//! Hitbtc keeps two accounts per user:
//! - the **trading** account, which orders draw from
//! - the **main** account, which receives deposits and sends payouts
//!
//! Withdrawals therefore move funds trading → main before the payout, and
//! arriving deposits are moved main → trading once they land.
//! Order quantities are expressed in lots (see [`HitbtcClient::lot_size`]).

mod client;
mod types;

pub use client::{HitbtcClient, EXCHANGE_NAME};
