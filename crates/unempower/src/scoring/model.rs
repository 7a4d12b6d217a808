//! Logistic-regression default model trained on a seeded synthetic population.
//!
//! Two behavioural populations are sampled with a fixed seed: 700 "good" workers
//! (label 0) and 300 "risky" workers (label 1) over the five scoring features
//! `[shifts 7d, shifts 30d, avg rating, earnings consistency, recency days]`.
//! Features are standardised and the model is fitted with full-batch gradient
//! descent and a small L2 penalty, so training is reproducible bit for bit.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

pub const FEATURE_COUNT: usize = 5;
pub const TRAINING_SEED: u64 = 42;
const GOOD_SAMPLES: usize = 700;
const RISKY_SAMPLES: usize = 300;
const LEARNING_RATE: f64 = 0.1;
const ITERATIONS: usize = 2_000;
const MIN_ACCURACY: f64 = 0.5;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("untrainable model: {0}")]
    Degenerate(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditModel {
    pub seed: u64,
    pub samples: usize,
    pub means: [f64; FEATURE_COUNT],
    pub scales: [f64; FEATURE_COUNT],
    pub weights: [f64; FEATURE_COUNT],
    pub intercept: f64,
    pub training_accuracy: f64,
}

/// Knuth's multiplication method; fine for the small rates used here.
fn poisson(rng: &mut StdRng, lambda: f64) -> f64 {
    let limit = (-lambda).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= limit {
            return f64::from(k);
        }
        k += 1;
    }
}

fn synthetic_dataset(seed: u64) -> (Vec<[f64; FEATURE_COUNT]>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut xs = Vec::with_capacity(GOOD_SAMPLES + RISKY_SAMPLES);
    let mut ys = Vec::with_capacity(GOOD_SAMPLES + RISKY_SAMPLES);
    for _ in 0..GOOD_SAMPLES {
        xs.push([
            poisson(&mut rng, 5.0),
            poisson(&mut rng, 20.0),
            rng.gen_range(3.5..5.0),
            rng.gen_range(0.6..1.0),
            rng.gen_range(0.0..3.0),
        ]);
        ys.push(0.0);
    }
    for _ in 0..RISKY_SAMPLES {
        xs.push([
            poisson(&mut rng, 2.0),
            poisson(&mut rng, 8.0),
            rng.gen_range(2.0..4.0),
            rng.gen_range(0.2..0.7),
            rng.gen_range(5.0..30.0),
        ]);
        ys.push(1.0);
    }
    (xs, ys)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl CreditModel {
    /// Train on the synthetic population for `seed`.
    pub fn train(seed: u64) -> Result<Self, ModelError> {
        let (xs, ys) = synthetic_dataset(seed);
        let n = xs.len() as f64;

        let mut means = [0.0; FEATURE_COUNT];
        let mut scales = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            means[j] = xs.iter().map(|x| x[j]).sum::<f64>() / n;
            let var = xs.iter().map(|x| (x[j] - means[j]).powi(2)).sum::<f64>() / n;
            scales[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }
        let zs: Vec<[f64; FEATURE_COUNT]> = xs
            .iter()
            .map(|x| {
                let mut z = [0.0; FEATURE_COUNT];
                for j in 0..FEATURE_COUNT {
                    z[j] = (x[j] - means[j]) / scales[j];
                }
                z
            })
            .collect();

        let l2 = 1.0 / n;
        let mut w = [0.0; FEATURE_COUNT];
        let mut b = 0.0;
        for _ in 0..ITERATIONS {
            let mut gw = [0.0; FEATURE_COUNT];
            let mut gb = 0.0;
            for (z, y) in zs.iter().zip(&ys) {
                let err = sigmoid(dot(&w, z) + b) - y;
                for j in 0..FEATURE_COUNT {
                    gw[j] += err * z[j];
                }
                gb += err;
            }
            for j in 0..FEATURE_COUNT {
                w[j] -= LEARNING_RATE * (gw[j] / n + l2 * w[j]);
            }
            b -= LEARNING_RATE * gb / n;
        }

        let mut model = Self {
            seed,
            samples: xs.len(),
            means,
            scales,
            weights: w,
            intercept: b,
            training_accuracy: 0.0,
        };
        let correct = xs
            .iter()
            .zip(&ys)
            .filter(|(x, y)| (model.predict(x) >= 0.5) == (**y >= 0.5))
            .count();
        model.training_accuracy = correct as f64 / n;
        model.validate()?;
        info!(
            seed,
            accuracy = model.training_accuracy,
            "credit model trained"
        );
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let finite = self
            .weights
            .iter()
            .chain(&self.means)
            .chain(&self.scales)
            .all(|v| v.is_finite())
            && self.intercept.is_finite();
        if !finite {
            return Err(ModelError::Degenerate("non-finite parameters".into()));
        }
        if self.scales.iter().any(|s| *s <= 0.0) {
            return Err(ModelError::Degenerate("non-positive feature scale".into()));
        }
        if self.training_accuracy < MIN_ACCURACY {
            return Err(ModelError::Degenerate(format!(
                "training accuracy {:.3} below {}",
                self.training_accuracy, MIN_ACCURACY
            )));
        }
        Ok(())
    }

    /// Probability of default in [0, 1].
    pub fn predict(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mut z = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            z[j] = (x[j] - self.means[j]) / self.scales[j];
        }
        sigmoid(dot(&self.weights, &z) + self.intercept).clamp(0.0, 1.0)
    }

    /// Load the model at `path`, or train and persist one. A corrupt or invalid
    /// file is replaced. Failing to write the file is logged, not fatal.
    pub fn load_or_train(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<CreditModel>(&raw) {
                Ok(model) if model.validate().is_ok() => {
                    info!(path = %path.display(), "credit model loaded");
                    return Ok(model);
                }
                Ok(_) => warn!(path = %path.display(), "stored model invalid; retraining"),
                Err(e) => warn!(path = %path.display(), error = %e, "stored model unreadable; retraining"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let model = Self::train(TRAINING_SEED)?;
        if let Err(e) = model.save(path) {
            warn!(path = %path.display(), error = %e, "could not persist credit model");
        }
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn dot(a: &[f64; FEATURE_COUNT], b: &[f64; FEATURE_COUNT]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
