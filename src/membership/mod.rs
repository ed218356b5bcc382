//! Channel membership: trait seam and the bot-API client

pub mod api;
pub mod channel;

pub use api::{MemberState, Membership};
pub use channel::{ChannelClient, Sender, Update};
