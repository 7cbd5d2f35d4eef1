//! The per-node envelope store.
//!
//! [`Store`] keeps a bounded, time-ordered index per source id plus a global
//! oldest-first structure used for pruning. A [`pruner::Pruner`] decides how
//! much to evict per cycle; the default [`pruner::PruneConsultant`] reacts to
//! the process's share of system memory as sampled by
//! [`memory::MemoryAnalyzer`]. All state is volatile by design.

pub mod memory;
pub mod pruner;
pub mod store;

pub use memory::{MemoryAnalyzer, MemoryReader, MemoryUsage};
pub use pruner::{PruneConsultant, Pruner, StaticPruner};
pub use store::Store;
