//! Noise groups.
//!
//! A noise model picks a subset of the tagged residual groups of all
//! model errors and treats them as i.i.d. Gaussian with one unknown
//! precision. `vector_contribution` and `jacobian_contribution` share
//! the same row selection, so row `i` of the vector always belongs to
//! row `i` of the Jacobian.

use crate::errors::BayesError;
use crate::model_error::{GroupTag, JacobianGroups, ModelResponses};
use crate::parameters::ParameterList;
use matrix_util::dmatrix_util::concat_vectors;
use matrix_util::traits::BlockOps;
use nalgebra::{DMatrix, DVector};

pub const PRECISION: &str = "precision";

#[derive(Debug, Clone)]
pub enum NoiseModel {
    SingleSensor(SingleSensorNoise),
    UncorrelatedTerm(UncorrelatedNoiseTerm),
    UncorrelatedSensor(UncorrelatedSensorNoise),
}

/// One precision for every residual of every model error and sensor
#[derive(Debug, Clone, Default)]
pub struct SingleSensorNoise;

/// Exactly the listed `(sensor, model error key)` outputs, in order
#[derive(Debug, Clone, Default)]
pub struct UncorrelatedNoiseTerm {
    terms: Vec<(String, String)>,
}

/// Every output of any model error whose sensor is in the set
#[derive(Debug, Clone, Default)]
pub struct UncorrelatedSensorNoise {
    sensors: Vec<String>,
}

impl SingleSensorNoise {
    pub fn new() -> Self {
        Self
    }
}

impl UncorrelatedNoiseTerm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sensor: &str, model_key: &str) {
        self.terms.push((sensor.to_string(), model_key.to_string()));
    }

    pub fn with(mut self, sensor: &str, model_key: &str) -> Self {
        self.add(sensor, model_key);
        self
    }

    pub fn terms(&self) -> &[(String, String)] {
        &self.terms
    }
}

impl UncorrelatedSensorNoise {
    pub fn new(sensors: &[&str]) -> Self {
        Self {
            sensors: sensors.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn sensors(&self) -> &[String] {
        &self.sensors
    }
}

impl From<SingleSensorNoise> for NoiseModel {
    fn from(n: SingleSensorNoise) -> Self {
        Self::SingleSensor(n)
    }
}

impl From<UncorrelatedNoiseTerm> for NoiseModel {
    fn from(n: UncorrelatedNoiseTerm) -> Self {
        Self::UncorrelatedTerm(n)
    }
}

impl From<UncorrelatedSensorNoise> for NoiseModel {
    fn from(n: UncorrelatedSensorNoise) -> Self {
        Self::UncorrelatedSensor(n)
    }
}

impl NoiseModel {
    /// The parameter list this noise model starts with; the uncorrelated
    /// variants carry a scalar `precision`
    pub fn initial_parameters(&self) -> anyhow::Result<ParameterList> {
        let mut ret = ParameterList::new();
        match self {
            Self::SingleSensor(_) => {}
            Self::UncorrelatedTerm(_) | Self::UncorrelatedSensor(_) => {
                ret.define_with_dim(PRECISION, 1)?;
            }
        }
        Ok(ret)
    }

    /// Indexes into `tags`, in the order rows are stacked
    pub fn select(&self, tags: &[&GroupTag]) -> anyhow::Result<Vec<usize>> {
        match self {
            Self::SingleSensor(_) => {
                if let Some(flat) = tags.iter().find(|t| t.sensor.is_none()) {
                    anyhow::bail!(BayesError::Configuration(format!(
                        "SingleSensorNoise assumes every model error returns residuals \
                         keyed by sensor, but model error `{}` returned a flat vector; \
                         use an UncorrelatedNoiseTerm or key its output by sensor",
                        flat.model_key
                    )));
                }
                Ok((0..tags.len()).collect())
            }
            Self::UncorrelatedTerm(noise) if noise.terms.is_empty() => {
                anyhow::bail!(BayesError::Configuration(
                    "UncorrelatedNoiseTerm without any (sensor, model error) term".to_string()
                ))
            }
            Self::UncorrelatedTerm(noise) => noise
                .terms
                .iter()
                .map(|(sensor, model_key)| {
                    tags.iter()
                        .position(|t| {
                            t.model_key == *model_key
                                && t.sensor.as_deref() == Some(sensor.as_str())
                        })
                        .ok_or_else(|| {
                            anyhow::Error::from(BayesError::Lookup(format!(
                                "model error `{}` has no output for sensor `{}`",
                                model_key, sensor
                            )))
                        })
                })
                .collect(),
            Self::UncorrelatedSensor(noise) => {
                let ret = tags
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| {
                        t.sensor
                            .as_ref()
                            .is_some_and(|s| noise.sensors.contains(s))
                    })
                    .map(|(i, _)| i)
                    .collect::<Vec<_>>();
                if ret.is_empty() {
                    anyhow::bail!(BayesError::Lookup(format!(
                        "the model error responses contain no contributions from sensors {:?}",
                        noise.sensors
                    )));
                }
                Ok(ret)
            }
        }
    }

    /// Residuals of this group, concatenated
    pub fn vector_contribution(&self, responses: &ModelResponses) -> anyhow::Result<DVector<f64>> {
        let selected = self.select(&responses.tags())?;
        let parts = selected
            .into_iter()
            .map(|i| responses.values(i).clone())
            .collect::<Vec<_>>();
        Ok(concat_vectors(&parts))
    }

    /// Jacobian rows of this group, row-aligned with
    /// [`Self::vector_contribution`]
    pub fn jacobian_contribution(
        &self,
        jacobians: &JacobianGroups,
    ) -> anyhow::Result<DMatrix<f64>> {
        let selected = self.select(&jacobians.tags())?;
        let blocks = selected
            .into_iter()
            .map(|i| jacobians.matrix(i).clone())
            .collect::<Vec<_>>();
        <DMatrix<f64> as BlockOps>::vstack(&blocks)
            .map_err(|e| anyhow::Error::from(BayesError::Dimension(e.to_string())))
    }

    /// Gaussian log-likelihood of the group at the precision stored in
    /// `parameters`
    pub fn loglike_contribution(
        &self,
        responses: &ModelResponses,
        parameters: &ParameterList,
    ) -> anyhow::Result<f64> {
        if let Self::SingleSensor(_) = self {
            anyhow::bail!(BayesError::Configuration(
                "SingleSensorNoise has no precision parameter of its own; \
                 it can't contribute a log-likelihood"
                    .to_string()
            ));
        }
        let error = self.vector_contribution(responses)?;
        let precision = parameters.scalar(PRECISION)?;
        if !(precision > 0.0) {
            anyhow::bail!(BayesError::Numerical(format!(
                "noise precision must be positive, got {}",
                precision
            )));
        }
        Ok(loglike_term(&error, 1.0 / precision.sqrt()))
    }
}

/// `-½ (n ln(2πσ²) + Σ (e/σ²)²)`
pub fn loglike_term(error: &DVector<f64>, sigma: f64) -> f64 {
    let sigma2 = sigma * sigma;
    let n = error.len() as f64;
    let ss = error.iter().map(|e| (e / sigma2).powi(2)).sum::<f64>();
    -0.5 * (n * (2.0 * std::f64::consts::PI * sigma2).ln() + ss)
}
