// ── Canonical state store ──
//
// Deep merge, derived status, debounced summaries and the reactive
// collections readers subscribe to.

mod collection;
mod debounce;
mod merge;
mod reconciler;
mod status;
mod summary;

pub use debounce::{Debouncer, Trigger};
pub use merge::deep_merge;
pub use reconciler::{Delta, DeltaKind, MergeReport, Reconciler};
pub use status::{derive_counters, derive_status, normalize_messages};
pub use summary::compute_summary;
