// ── Domain model ──
//
// Canonical types the reconciler keeps in its entity maps. Wire payloads
// deserialize straight into these; derived fields are skipped on input.

mod adapter;
mod server;
mod summary;

pub use adapter::{
    Adapter, AdapterStatus, Message, MessageLevel, Pipe, Receiver, RunState, TransactionalStore,
    adapter_key,
};
pub use server::{ClusterMember, Configuration, ConfigurationMessageLog};
pub use summary::{LevelCounts, StateCounts, Summary};
