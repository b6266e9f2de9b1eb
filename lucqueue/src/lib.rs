//! # lucqueue - Ordre de lecture
//!
//! File de lecture à identifiants stables avec deux ordres parallèles
//! (lecture et brassage) et un générateur pseudo-aléatoire dédié.

mod queue;
mod rng;

pub use queue::{Queue, QueueItem, RepeatMode};
pub use rng::Rng;
