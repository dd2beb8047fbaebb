//! # netception
//!
//! Activation maximization for image networks: starting from noise or a seed
//! image, repeatedly nudge the input along the gradient of one internal target
//! (a filter of a layer) until the target stops improving. The result shows
//! what that filter responds to.
//!
//! ## Example
//!
//! ```no_run
//! use netception::image::{inception_to_bytes, save_image, DISPLAY_SIZE};
//! use netception::model::{FilterTarget, Sequential};
//! use netception::{Inceptor, InceptorConfig};
//!
//! # fn main() -> netception::Result<()> {
//! let model = Sequential::vgg_like(64, 64, Some(0))?;
//! let target = FilterTarget::new("block3_conv1", 7);
//!
//! let inceptor = Inceptor::new(&model, target, InceptorConfig::default())?;
//! let (inception, score) = inceptor.incept(None)?.into_parts();
//!
//! let bytes = inception_to_bytes(&inception, 0.15)?;
//! save_image(&bytes, "inception.png", Some((DISPLAY_SIZE, DISPLAY_SIZE)), 95)?;
//! println!("score {score}");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod inception;
pub mod model;

pub use error::{Error, Result};
pub use inception::{Inception, Inceptor, InceptorConfig};
pub use model::{Model, Target, Tensor};
