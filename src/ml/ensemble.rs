use anyhow::{anyhow, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::features::{Dataset, FeatureRow};

const MIN_TRAINING_SAMPLES: usize = 40;
const MIN_VALIDATION_SAMPLES: usize = 5;
const VALIDATION_FRACTION: f64 = 0.2;
const MSE_EPSILON: f64 = 1e-6;

/// Training report after an ensemble fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub validation_samples: usize,
    pub member_mse: [f64; 3],
    pub member_weights: [f64; 3],
    pub validation_mse: f64,
}

/// Z-score scaler fitted on the training split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Scaler {
    fn fit(features: &Array2<f64>) -> Result<Self> {
        let means = features
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow!("empty feature matrix"))?;
        let stds = features.std_axis(Axis(0), 1.0);
        Ok(Self {
            means: means.to_vec(),
            stds: stds.to_vec(),
        })
    }

    fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(self.stds.iter()))
            .map(|(&v, (&mean, &std))| {
                if std > 1e-10 {
                    (v - mean) / std
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Linear regression fit by gradient descent with L2 regularisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegressor {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl RidgeRegressor {
    fn fit(x: &[Vec<f64>], y: &[f64]) -> Self {
        let n = x.len();
        let num_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut coefficients = vec![0.0; num_features];
        let mut intercept = 0.0;

        let learning_rate = 0.01;
        let lambda = 0.1;
        let max_iter = 1000;

        for _ in 0..max_iter {
            let mut grad_coef = vec![0.0; num_features];
            let mut grad_intercept = 0.0;

            for i in 0..n {
                let mut pred = intercept;
                for j in 0..num_features {
                    pred += coefficients[j] * x[i][j];
                }
                let error = pred - y[i];
                grad_intercept += error;
                for j in 0..num_features {
                    grad_coef[j] += error * x[i][j];
                }
            }

            intercept -= learning_rate * grad_intercept / n as f64;
            for j in 0..num_features {
                coefficients[j] -= learning_rate
                    * (grad_coef[j] / n as f64 + lambda * coefficients[j] / n as f64);
            }
        }

        Self {
            coefficients,
            intercept,
        }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut pred = self.intercept;
        for (j, &v) in row.iter().enumerate() {
            pred += self.coefficients[j] * v;
        }
        pred
    }
}

/// Distance-weighted k-nearest-neighbour regressor in z-scored space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnRegressor {
    k: usize,
    train_x: Vec<Vec<f64>>,
    train_y: Vec<f64>,
}

impl KnnRegressor {
    fn fit(x: &[Vec<f64>], y: &[f64], k: usize) -> Self {
        Self {
            k: k.min(x.len()).max(1),
            train_x: x.to_vec(),
            train_y: y.to_vec(),
        }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        if self.train_x.is_empty() {
            return 0.0;
        }

        let mut distances: Vec<(f64, f64)> = self
            .train_x
            .iter()
            .zip(self.train_y.iter())
            .map(|(x, &y)| {
                let d2: f64 = x
                    .iter()
                    .zip(row.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (d2.sqrt(), y)
            })
            .collect();
        distances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (dist, target) in distances.iter().take(self.k) {
            let weight = 1.0 / (dist + 1e-6);
            weighted_sum += weight * target;
            weight_total += weight;
        }
        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        }
    }
}

/// One depth-1 regression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stump {
    feature: usize,
    threshold: f64,
    left_value: f64,
    right_value: f64,
}

impl Stump {
    fn predict(&self, row: &[f64]) -> f64 {
        if row[self.feature] <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

/// Gradient boosting over depth-1 trees with shrinkage, fit to residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StumpBoostRegressor {
    base: f64,
    shrinkage: f64,
    stumps: Vec<Stump>,
}

impl StumpBoostRegressor {
    fn fit(x: &[Vec<f64>], y: &[f64], rounds: usize, shrinkage: f64) -> Self {
        let n = x.len();
        let base = y.iter().sum::<f64>() / n.max(1) as f64;
        let mut residuals: Vec<f64> = y.iter().map(|&v| v - base).collect();
        let mut stumps = Vec::with_capacity(rounds);

        for _ in 0..rounds {
            let stump = match best_stump(x, &residuals) {
                Some(s) => s,
                None => break,
            };
            for (i, row) in x.iter().enumerate() {
                residuals[i] -= shrinkage * stump.predict(row);
            }
            stumps.push(stump);
        }

        Self {
            base,
            shrinkage,
            stumps,
        }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut pred = self.base;
        for stump in &self.stumps {
            pred += self.shrinkage * stump.predict(row);
        }
        pred
    }
}

/// Best single split over quantile candidate thresholds per feature.
fn best_stump(x: &[Vec<f64>], residuals: &[f64]) -> Option<Stump> {
    let n = x.len();
    if n < 4 {
        return None;
    }
    let num_features = x.first()?.len();
    let mut best: Option<(f64, Stump)> = None;

    for feature in 0..num_features {
        let mut values: Vec<f64> = x.iter().map(|row| row[feature]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        for q in 1..16 {
            let idx = (n - 1) * q / 16;
            let threshold = values[idx];

            let mut left_sum = 0.0;
            let mut left_n = 0usize;
            let mut right_sum = 0.0;
            let mut right_n = 0usize;
            for (row, &r) in x.iter().zip(residuals.iter()) {
                if row[feature] <= threshold {
                    left_sum += r;
                    left_n += 1;
                } else {
                    right_sum += r;
                    right_n += 1;
                }
            }
            if left_n == 0 || right_n == 0 {
                continue;
            }
            let left_value = left_sum / left_n as f64;
            let right_value = right_sum / right_n as f64;

            let sse: f64 = x
                .iter()
                .zip(residuals.iter())
                .map(|(row, &r)| {
                    let pred = if row[feature] <= threshold {
                        left_value
                    } else {
                        right_value
                    };
                    (r - pred) * (r - pred)
                })
                .sum();

            if best.as_ref().map(|(b, _)| sse < *b).unwrap_or(true) {
                best = Some((
                    sse,
                    Stump {
                        feature,
                        threshold,
                        left_value,
                        right_value,
                    },
                ));
            }
        }
    }
    best.map(|(_, stump)| stump)
}

/// Ensemble of the three base regressors, weighted by inverse validation MSE
/// on a chronological hold-out tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleModel {
    scaler: Scaler,
    ridge: RidgeRegressor,
    knn: KnnRegressor,
    boost: StumpBoostRegressor,
    weights: [f64; 3],
    pub validation_mse: f64,
    pub feature_names: Vec<String>,
}

impl EnsembleModel {
    pub const KIND: &'static str = "ridge+knn+stumpboost";

    pub fn train(dataset: &Dataset) -> Result<(Self, TrainingReport)> {
        let n = dataset.len();
        if n < MIN_TRAINING_SAMPLES {
            return Err(anyhow!(
                "not enough training samples: {} < {}",
                n,
                MIN_TRAINING_SAMPLES
            ));
        }

        let val_n = ((n as f64 * VALIDATION_FRACTION) as usize).max(MIN_VALIDATION_SAMPLES);
        let train_n = n - val_n;

        let num_features = FeatureRow::NUM_FEATURES;
        let mut matrix = Array2::<f64>::zeros((train_n, num_features));
        for (i, row) in dataset.features[..train_n].iter().enumerate() {
            for (j, &v) in row.to_array().iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }
        let scaler = Scaler::fit(&matrix)?;

        let train_x: Vec<Vec<f64>> = dataset.features[..train_n]
            .iter()
            .map(|r| scaler.transform_row(&r.to_array()))
            .collect();
        let train_y = dataset.targets[..train_n].to_vec();
        let val_x: Vec<Vec<f64>> = dataset.features[train_n..]
            .iter()
            .map(|r| scaler.transform_row(&r.to_array()))
            .collect();
        let val_y = &dataset.targets[train_n..];

        let ridge = RidgeRegressor::fit(&train_x, &train_y);
        let knn = KnnRegressor::fit(&train_x, &train_y, 7);
        let boost = StumpBoostRegressor::fit(&train_x, &train_y, 50, 0.1);

        let mse = |preds: &[f64]| -> f64 {
            preds
                .iter()
                .zip(val_y.iter())
                .map(|(p, t)| (p - t) * (p - t))
                .sum::<f64>()
                / val_y.len() as f64
        };

        let ridge_preds: Vec<f64> = val_x.iter().map(|r| ridge.predict(r)).collect();
        let knn_preds: Vec<f64> = val_x.iter().map(|r| knn.predict(r)).collect();
        let boost_preds: Vec<f64> = val_x.iter().map(|r| boost.predict(r)).collect();

        let member_mse = [mse(&ridge_preds), mse(&knn_preds), mse(&boost_preds)];
        let raw: Vec<f64> = member_mse.iter().map(|m| 1.0 / (m + MSE_EPSILON)).collect();
        let total: f64 = raw.iter().sum();
        let weights = [raw[0] / total, raw[1] / total, raw[2] / total];

        let ensemble_mse = val_x
            .iter()
            .zip(val_y.iter())
            .map(|(r, &t)| {
                let p = weights[0] * ridge.predict(r)
                    + weights[1] * knn.predict(r)
                    + weights[2] * boost.predict(r);
                (p - t) * (p - t)
            })
            .sum::<f64>()
            / val_y.len() as f64;

        info!(
            samples = n,
            validation = val_n,
            validation_mse = ensemble_mse,
            "ensemble trained"
        );

        let report = TrainingReport {
            samples: n,
            validation_samples: val_n,
            member_mse,
            member_weights: weights,
            validation_mse: ensemble_mse,
        };
        let model = Self {
            scaler,
            ridge,
            knn,
            boost,
            weights,
            validation_mse: ensemble_mse,
            feature_names: FeatureRow::feature_names(),
        };
        Ok((model, report))
    }

    /// Weighted-average predicted pct return for one feature row.
    pub fn predict(&self, row: &FeatureRow) -> f64 {
        let x = self.scaler.transform_row(&row.to_array());
        self.weights[0] * self.ridge.predict(&x)
            + self.weights[1] * self.knn.predict(&x)
            + self.weights[2] * self.boost.predict(&x)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_dataset(n: usize) -> Dataset {
        // Target is a noiseless linear function of two features; the rest is
        // structured filler.
        let mut dataset = Dataset::default();
        for i in 0..n {
            let t = i as f64;
            let ret_1 = (t * 0.7).sin();
            let ret_5 = (t * 0.3).cos();
            dataset.features.push(FeatureRow {
                ret_1,
                ret_5,
                rsi_14: 50.0 + 10.0 * (t * 0.1).sin(),
                macd_hist_pct: 0.1 * (t * 0.2).cos(),
                percent_b: 0.5 + 0.3 * (t * 0.15).sin(),
                volume_ratio: 1.0,
                atr_pct: 2.0,
                adx_14: 20.0,
                sma20_ratio: 1.0,
                sma50_ratio: 1.0,
                day_of_week: (i % 5) as f64,
            });
            dataset.targets.push(2.0 * ret_1 - 1.5 * ret_5);
        }
        dataset
    }

    #[test]
    fn rejects_tiny_datasets() {
        let dataset = linear_dataset(10);
        assert!(EnsembleModel::train(&dataset).is_err());
    }

    #[test]
    fn learns_linear_relationship() {
        let dataset = linear_dataset(200);
        let (model, report) = EnsembleModel::train(&dataset).unwrap();

        assert_eq!(report.samples, 200);
        assert!(report.validation_mse < 1.0, "mse {}", report.validation_mse);
        let weight_sum: f64 = report.member_weights.iter().sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);

        // Direction must be right on a fresh in-distribution row.
        let row = &dataset.features[150];
        let expected = dataset.targets[150];
        let predicted = model.predict(row);
        assert!((predicted - expected).abs() < 1.5);
    }

    #[test]
    fn json_round_trip_preserves_predictions() {
        let dataset = linear_dataset(120);
        let (model, _) = EnsembleModel::train(&dataset).unwrap();
        let json = model.to_json().unwrap();
        let restored = EnsembleModel::from_json(&json).unwrap();

        for row in dataset.features.iter().take(10) {
            assert!((model.predict(row) - restored.predict(row)).abs() < 1e-12);
        }
    }

    #[test]
    fn boosting_fits_a_step_function() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64 / 100.0, 0.0]).collect();
        let y: Vec<f64> = (0..100).map(|i| if i < 50 { -1.0 } else { 1.0 }).collect();
        let model = StumpBoostRegressor::fit(&x, &y, 30, 0.3);
        assert!(model.predict(&[0.1, 0.0]) < -0.5);
        assert!(model.predict(&[0.9, 0.0]) > 0.5);
    }

    #[test]
    fn knn_recovers_exact_neighbour() {
        let x = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![10.0, 10.0]];
        let y = vec![5.0, 7.0, 100.0];
        let knn = KnnRegressor::fit(&x, &y, 1);
        assert!((knn.predict(&[0.01, 0.01]) - 5.0).abs() < 1e-6);
        assert!((knn.predict(&[9.9, 9.9]) - 100.0).abs() < 1e-6);
    }
}
