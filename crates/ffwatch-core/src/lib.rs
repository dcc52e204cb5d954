//! Live-state sync engine between `ffwatch-api` and console consumers.
//!
//! This crate keeps a client-resident model of a framework console
//! (adapters, receivers, configuration message logs, cluster members)
//! consistent with a backend that pushes or is polled for partial updates:
//!
//! - **[`Console`]**: facade over one backend. [`connect()`](Console::connect)
//!   performs a full fetch, then feeds push-channel or poller updates
//!   through a single merge task.
//!
//! - **[`Reconciler`]**: the canonical store. Deep-merges partial JSON
//!   (`null` deletes), derives adapter status and counters, caps message
//!   lists and debounces summary recomputation.
//!
//! - **[`Poller`]**: per-URI polling tasks with adaptive pacing and a
//!   circuit breaker.
//!
//! - **[`Notifier`]**: one notification per adapter or receiver that stops.
//!
//! - **[`EntityStream<T>`]**: versioned snapshots + change subscription for readers.

pub mod config;
pub mod console;
pub mod error;
pub mod kv;
pub mod model;
pub mod notifier;
pub mod poller;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConsoleConfig, Credentials, DebounceConfig, TlsVerification};
pub use console::{AdapterAction, Console, ConnectionState, Update};
pub use error::CoreError;
pub use kv::{KeyValueStore, MemoryStore};
pub use notifier::{NavigationTarget, Notification, NotificationIcon, Notifier};
pub use poller::{Fetch, PollMode, Poller, PollerEvent, TaskHandle, TaskInfo};
pub use store::{Delta, DeltaKind, MergeReport, Reconciler};
pub use stream::{EntityStream, Snapshot};

pub use model::{
    Adapter, AdapterStatus, ClusterMember, Configuration, ConfigurationMessageLog, LevelCounts,
    Message, MessageLevel, Pipe, Receiver, RunState, StateCounts, Summary, TransactionalStore,
};

pub use ffwatch_api::{ConnectivityAlert, ProtocolState, ReconnectConfig};
