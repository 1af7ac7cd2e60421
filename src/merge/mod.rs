//! Merge module : reconciling two replicas of one vault.
//!
//! - `edit_state`: the snapshot both replicas agreed on at the last sync
//! - `engine`: the three-way merge itself

pub mod edit_state;
pub mod engine;

pub use edit_state::{EditState, EntityState};
pub use engine::{merge, MergeConflict, MergeOutcome, MergeReport, NodeKind, Side};
