//! Image loading, visualization, and saving utilities.

mod load;
mod save;
mod visualize;

pub use load::load_seed_image;
pub use save::save_image;
pub use visualize::{inception_to_bytes, raw_inception_to_bytes, DEFAULT_COLORFULNESS};

/// Size inceptions are usually displayed at.
pub const DISPLAY_SIZE: u32 = 512;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
