pub mod layers;
pub mod runner;

pub use layers::{JsonLayerStore, MemoryLayerStore};
pub use runner::{RecordingRunner, SystemRunner};
