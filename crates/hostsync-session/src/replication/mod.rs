//! Authoritative state replication.
//!
//! A [`StateChannel`] holds one replicated value. Exactly one process (the
//! authority) may change it; every other participant holds the last copy the
//! authority sent. Authority-side fan-out goes through [`Egress`], replica
//! requests go up the single [`Uplink`] to the host.

mod channel;
mod egress;
mod peers;
mod types;

pub use channel::{Initializer, Replicable, StateChannel};
pub use egress::{Egress, Uplink};
pub use peers::{Peer, PeerRegistry};
pub use types::{ChannelIdentity, ChannelState, Snapshot, Subscription, ValueChange};
