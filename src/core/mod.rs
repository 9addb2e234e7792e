pub mod dockerfile;
pub mod env;
pub mod fingerprint;
pub mod image_ref;
pub mod launcher;
pub mod layout;
pub mod manifest;
pub mod phases;
pub mod port;
pub mod sequencer;
pub mod toolcheck;

pub use crate::domain::model::{BootState, ImageRecord, PhaseKind};
pub use crate::domain::ports::{CommandRunner, LayerStore};
pub use crate::utils::error::Result;
