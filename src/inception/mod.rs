//! Activation maximization by gradient ascent on the model input.

mod inceptor;
mod stopping;

pub use inceptor::{
    normalize_gradient, Inception, Inceptor, InceptorConfig, GRADIENT_EPSILON, NOISE_AMPLITUDE,
};
pub use stopping::ScoreHistory;
