pub mod bootstrap;

pub use bootstrap::{BootOptions, Bootstrapper, ImageLaunch, RecipeSource};
