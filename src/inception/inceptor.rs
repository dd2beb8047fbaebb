//! Gradient ascent on the model input.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::IxDyn;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::model::{Model, Target, Tensor};

use super::stopping::ScoreHistory;

/// Added to the gradient RMS before normalizing.
pub const GRADIENT_EPSILON: f32 = 1e-5;

/// Half-width of the uniform noise a working tensor starts from.
pub const NOISE_AMPLITUDE: f32 = 0.1;

/// Configuration for the inception loop.
#[derive(Debug, Clone)]
pub struct InceptorConfig {
    /// Scale of each ascent step, applied to the RMS-normalized gradient.
    pub inception_rate: f32,

    /// Hard cap on the number of ascent steps.
    pub max_steps: usize,

    /// Number of steps per improvement window.
    pub improvement_check_interval: usize,

    /// Minimum fractional improvement between consecutive windows to keep
    /// going. Zero disables early stopping.
    pub improvement_threshold: f32,

    /// Random seed for the initial noise. None for random.
    pub seed: Option<u64>,

    /// Whether to draw a progress bar while ascending.
    pub show_progress: bool,
}

impl Default for InceptorConfig {
    fn default() -> Self {
        Self {
            inception_rate: 0.5,
            max_steps: 200,
            improvement_check_interval: 5,
            improvement_threshold: 0.05,
            seed: None,
            show_progress: false,
        }
    }
}

impl InceptorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if !self.inception_rate.is_finite() || self.inception_rate <= 0.0 {
            return Err(Error::invalid_parameter(
                "inception_rate",
                "must be a positive finite number",
            ));
        }

        if self.max_steps == 0 {
            return Err(Error::invalid_parameter("max_steps", "must be greater than 0"));
        }

        if self.improvement_check_interval == 0 {
            return Err(Error::invalid_parameter(
                "improvement_check_interval",
                "must be greater than 0",
            ));
        }

        if !self.improvement_threshold.is_finite() || self.improvement_threshold < 0.0 {
            return Err(Error::invalid_parameter(
                "improvement_threshold",
                "must be a non-negative finite number",
            ));
        }

        Ok(())
    }
}

/// Result of one [`Inceptor::incept`] call.
#[derive(Debug, Clone)]
pub struct Inception {
    /// The optimized tensor, with the model's input shape.
    pub tensor: Tensor,

    /// Target score recorded at the last step, evaluated before that step's update.
    pub score: f32,

    /// Number of ascent steps taken.
    pub steps: usize,

    /// Whether the improvement check ended the ascent before `max_steps`.
    pub stopped_early: bool,
}

impl Inception {
    #[must_use]
    pub fn into_parts(self) -> (Tensor, f32) {
        (self.tensor, self.score)
    }
}

/// Runs gradient ascent on a model input to maximize a target inside the model.
pub struct Inceptor<'m, M: Model + ?Sized, T: Target> {
    model: &'m M,
    target: T,
    config: InceptorConfig,
}

impl<'m, M: Model + ?Sized, T: Target> Inceptor<'m, M, T> {
    /// Create a new inceptor for `target` inside `model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is invalid and
    /// [`Error::InvalidTarget`] if the model has no layer named by the target.
    pub fn new(model: &'m M, target: T, config: InceptorConfig) -> Result<Self> {
        config.validate()?;

        if !model.has_layer(target.layer()) {
            return Err(Error::invalid_target(
                target.layer(),
                format!("model has no such layer, expected one of {:?}", model.layer_names()),
            ));
        }

        Ok(Self {
            model,
            target,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &InceptorConfig {
        &self.config
    }

    #[must_use]
    pub const fn target(&self) -> &T {
        &self.target
    }

    /// Run the inception, starting from `seed` or from random noise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `seed` does not have the model's input
    /// shape, [`Error::InvalidInput`] if it holds non-finite values, and
    /// [`Error::InvalidTarget`] if the target does not depend on the input.
    pub fn incept(&self, seed: Option<&Tensor>) -> Result<Inception> {
        let mut tensor = self.initial_tensor(seed)?;

        tracing::info!(
            "Incepting {} for at most {} steps",
            self.target.layer(),
            self.config.max_steps
        );

        let (history, stopped_early) = self.ascend(&mut tensor)?;
        let score = history
            .last()
            .ok_or_else(|| Error::invalid_parameter("max_steps", "must be greater than 0"))?;

        tracing::info!("Inception finished after {} steps with score {score}", history.len());

        Ok(Inception {
            tensor,
            score,
            steps: history.len(),
            stopped_early,
        })
    }

    fn initial_tensor(&self, seed: Option<&Tensor>) -> Result<Tensor> {
        let shape = self.model.input_shape();

        if let Some(seed) = seed {
            if seed.shape() != shape {
                return Err(Error::shape_mismatch(shape, seed.shape()));
            }
            if seed.iter().any(|v| !v.is_finite()) {
                return Err(Error::InvalidInput {
                    reason: "seed contains non-finite values".to_string(),
                });
            }
            return Ok(seed.clone());
        }

        let mut rng = self
            .config
            .seed
            .map_or_else(rand::rngs::StdRng::from_os_rng, rand::rngs::StdRng::seed_from_u64);

        Ok(Tensor::from_shape_fn(IxDyn(shape), |_| {
            rng.random::<f32>().mul_add(2.0 * NOISE_AMPLITUDE, -NOISE_AMPLITUDE)
        }))
    }

    /// Ascend until `max_steps` or until the improvement check fails.
    ///
    /// Returns the recorded scores and whether the ascent stopped early.
    fn ascend(&self, tensor: &mut Tensor) -> Result<(ScoreHistory, bool)> {
        let config = &self.config;
        let mut history = ScoreHistory::new(config.improvement_check_interval);

        let pb = if config.show_progress {
            let pb = ProgressBar::new(config.max_steps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Incepting [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .expect("valid template")
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        for step in 0..config.max_steps {
            let (score, gradient) = self.model.score_and_gradient(&self.target, tensor)?;
            self.check_gradient(step, score, &gradient)?;

            tensor.scaled_add(config.inception_rate, &normalize_gradient(&gradient));

            history.push(score);
            pb.inc(1);
            pb.set_message(format!("score {score:.4}"));

            let Some(improvement) = history.improvement() else {
                continue;
            };

            tracing::debug!("Step {}: score {score}, improvement {improvement}", step + 1);

            if config.improvement_threshold > 0.0 && improvement < config.improvement_threshold {
                tracing::info!(
                    "Stopping early at step {}: improvement {improvement} below {}",
                    step + 1,
                    config.improvement_threshold
                );
                pb.finish_with_message("Inception stopped early");
                return Ok((history, true));
            }
        }

        pb.finish_with_message("Inception complete");
        Ok((history, false))
    }

    #[allow(clippy::float_cmp)]
    fn check_gradient(&self, step: usize, score: f32, gradient: &Tensor) -> Result<()> {
        if !score.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return Err(Error::invalid_target(
                self.target.layer(),
                format!("non-finite score or gradient at step {}", step + 1),
            ));
        }

        if step == 0 && gradient.iter().all(|&g| g == 0.0) {
            return Err(Error::invalid_target(
                self.target.layer(),
                "gradient with respect to the input is zero everywhere",
            ));
        }

        Ok(())
    }
}

/// Divide a gradient by its root mean square so the step size only depends on
/// the inception rate.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn normalize_gradient(gradient: &Tensor) -> Tensor {
    // Squares of large f32 gradients overflow, so accumulate in f64.
    let sum_sq: f64 = gradient.iter().map(|&g| f64::from(g).powi(2)).sum();
    let rms = (sum_sq / gradient.len().max(1) as f64).sqrt() as f32;
    gradient / (rms + GRADIENT_EPSILON)
}
