//!
//! +--------------+------------------------------+-------------------------------+
//! | KeyPrefix::  | Key::                        | Value::                       |
//! +--------------+------------------------------+-------------------------------+
//! | 0            | ChannelId                    | Channel                       |
//! | 1            | ChannelId                    | SignedState                   |
//! | 16           | sha256(Principal) | ChannelId | ()                            |
//! | 32           | ChannelId                    | PendingConditionalUpdate      |
//! | 33           | SecretHash | ChannelId       | ()                            |
//! | 64           | ChannelId | ClaimedNonce     | DisputeRecord                 |
//! | 96           | -                            | u64 (event cursor height)     |
//! +--------------+------------------------------+-------------------------------+

pub const CHANNEL_PREFIX: u8 = 0;
pub const SIGNED_STATE_PREFIX: u8 = 1;
pub const PRINCIPAL_CHANNEL_PREFIX: u8 = 16;
pub const PENDING_CONDITIONAL_PREFIX: u8 = 32;
pub const SECRET_HASH_CHANNEL_PREFIX: u8 = 33;
pub const DISPUTE_RECORD_PREFIX: u8 = 64;
pub const EVENT_CURSOR_PREFIX: u8 = 96;
