pub mod engine;
pub mod sweep;

pub use engine::RolloverEngine;
pub use sweep::RolloverSweep;
