//! Static validation limits.
//!
//! A live-reloadable settings source layered over a DB `Config` table would
//! be out of proportion with this crate's scope; these are plain constants
//! fixed at compile time instead.

/// Max size of an `mls_relay`/`cpace_relay` payload.
pub const RELAY_PAYLOAD_MAX: usize = 16 * 1024;

pub const USERNAME_MIN: usize = 1;
pub const USERNAME_MAX: usize = 32;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 128;
pub const DISPLAY_NAME_MAX: usize = 64;

pub const MESSAGE_BODY_MAX: usize = 4000;

pub const CHANNEL_NAME_MIN: usize = 1;
pub const CHANNEL_NAME_MAX: usize = 64;
pub const TOPIC_MAX: usize = 256;

pub const ROLE_NAME_MIN: usize = 1;
pub const ROLE_NAME_MAX: usize = 64;

pub const SERVER_NAME_MAX: usize = 64;

pub const FEDERATION_ADDRESS_MAX: usize = 256;

/// Cap on a buffered inbound federation request body (the verification
/// middleware must read the whole body into memory to check its signature).
pub const FEDERATION_BODY_MAX: usize = 1024 * 1024;

pub const PAGE_LIMIT_MESSAGES: i64 = 100;
pub const PAGE_LIMIT_MEMBERS: i64 = 200;
pub const PAGE_LIMIT_SYNC: i64 = 250;
