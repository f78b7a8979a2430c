use crate::errors::BayesError;
use crate::parameters::ParameterList;
use matrix_util::dmatrix_util::as_column;
use nalgebra::{DMatrix, DVector};

/// A model error maps a parameter assignment to
/// `forward_model(parameters) - data`
///
/// `jacobian` returns `d(model error) / d(local parameter)` for the
/// requested local names, or asks the caller to fall back to finite
/// differences (the default).
pub trait ModelError: Send {
    fn evaluate(&self, parameters: &ParameterList) -> anyhow::Result<ModelOutput>;

    fn jacobian(
        &self,
        _parameters: &ParameterList,
        _local_names: &[&str],
    ) -> anyhow::Result<JacobianOutput> {
        Ok(JacobianOutput::UseFiniteDifference)
    }
}

impl<F> ModelError for F
where
    F: Fn(&ParameterList) -> anyhow::Result<ModelOutput> + Send,
{
    fn evaluate(&self, parameters: &ParameterList) -> anyhow::Result<ModelOutput> {
        self(parameters)
    }
}

/// What one model error returns
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// ordered sensor -> residual vector
    Sensors(SensorOutputs),
    /// a single residual vector without sensor keys
    Flat(DVector<f64>),
}

impl ModelOutput {
    /// `(sensor, residuals)` blocks; a flat output is one block
    /// without sensor
    pub fn into_blocks(self) -> Vec<(Option<String>, DVector<f64>)> {
        match self {
            Self::Flat(values) => vec![(None, values)],
            Self::Sensors(sensors) => sensors
                .entries
                .into_iter()
                .map(|(s, v)| (Some(s), v))
                .collect(),
        }
    }
}

impl From<SensorOutputs> for ModelOutput {
    fn from(sensors: SensorOutputs) -> Self {
        Self::Sensors(sensors)
    }
}

impl From<DVector<f64>> for ModelOutput {
    fn from(values: DVector<f64>) -> Self {
        Self::Flat(values)
    }
}

/// Builder for sensor-keyed residuals
#[derive(Debug, Clone, Default)]
pub struct SensorOutputs {
    entries: Vec<(String, DVector<f64>)>,
}

impl SensorOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sensor: &str, values: DVector<f64>) -> Self {
        self.push(sensor, values);
        self
    }

    pub fn push(&mut self, sensor: &str, values: DVector<f64>) {
        self.entries.push((sensor.to_string(), values));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DVector<f64>)> {
        self.entries.iter().map(|(s, v)| (s.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A partial derivative block; a per-element vector is promoted to a
/// single column
#[derive(Debug, Clone)]
pub enum DerivativeBlock {
    Column(DVector<f64>),
    Matrix(DMatrix<f64>),
}

impl DerivativeBlock {
    pub fn to_matrix(&self) -> DMatrix<f64> {
        match self {
            Self::Column(v) => as_column(v),
            Self::Matrix(m) => m.clone(),
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Column(v) => v.len(),
            Self::Matrix(m) => m.nrows(),
        }
    }
}

impl From<DVector<f64>> for DerivativeBlock {
    fn from(v: DVector<f64>) -> Self {
        Self::Column(v)
    }
}

impl From<DMatrix<f64>> for DerivativeBlock {
    fn from(m: DMatrix<f64>) -> Self {
        Self::Matrix(m)
    }
}

/// Sensor -> local parameter -> derivative block
///
/// A `None` sensor stands for the output of a [`ModelOutput::Flat`]
/// model error.
#[derive(Debug, Clone, Default)]
pub struct SensorJacobians {
    entries: Vec<(Option<String>, Vec<(String, DerivativeBlock)>)>,
}

impl SensorJacobians {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        sensor: &str,
        local_name: &str,
        block: impl Into<DerivativeBlock>,
    ) -> Self {
        self.push(Some(sensor), local_name, block.into());
        self
    }

    pub fn with_flat(mut self, local_name: &str, block: impl Into<DerivativeBlock>) -> Self {
        self.push(None, local_name, block.into());
        self
    }

    pub fn push(&mut self, sensor: Option<&str>, local_name: &str, block: DerivativeBlock) {
        let pos = self
            .entries
            .iter()
            .position(|(s, _)| s.as_deref() == sensor);
        let idx = match pos {
            Some(idx) => idx,
            None => {
                self.entries.push((sensor.map(str::to_string), vec![]));
                self.entries.len() - 1
            }
        };
        self.entries[idx].1.push((local_name.to_string(), block));
    }

    pub fn get(&self, sensor: Option<&str>, local_name: &str) -> Option<&DerivativeBlock> {
        self.entries
            .iter()
            .find(|(s, _)| s.as_deref() == sensor)
            .and_then(|(_, blocks)| {
                blocks
                    .iter()
                    .find(|(n, _)| n == local_name)
                    .map(|(_, b)| b)
            })
    }
}

/// Analytic Jacobian, or a request for finite differences
#[derive(Debug, Clone)]
pub enum JacobianOutput {
    Analytic(SensorJacobians),
    UseFiniteDifference,
}

/// Which model error and which sensor a block of rows came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupTag {
    pub model_key: String,
    pub sensor: Option<String>,
}

impl std::fmt::Display for GroupTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sensor {
            Some(sensor) => write!(f, "sensor `{}` of model error `{}`", sensor, self.model_key),
            None => write!(f, "flat output of model error `{}`", self.model_key),
        }
    }
}

/// Residuals of every model error, flattened into tagged groups in
/// (model registration, sensor) order
#[derive(Debug, Clone, Default)]
pub struct ModelResponses {
    groups: Vec<(GroupTag, DVector<f64>)>,
}

impl ModelResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the output of one model error
    pub fn push(&mut self, model_key: &str, output: ModelOutput) -> anyhow::Result<()> {
        match output {
            ModelOutput::Flat(values) => self.push_group(model_key, None, values),
            ModelOutput::Sensors(sensors) => {
                for (sensor, values) in sensors.entries {
                    self.push_group(model_key, Some(sensor), values)?;
                }
                Ok(())
            }
        }
    }

    fn push_group(
        &mut self,
        model_key: &str,
        sensor: Option<String>,
        values: DVector<f64>,
    ) -> anyhow::Result<()> {
        let tag = GroupTag {
            model_key: model_key.to_string(),
            sensor,
        };
        if self.groups.iter().any(|(t, _)| *t == tag) {
            anyhow::bail!(BayesError::Configuration(format!(
                "{} is reported twice",
                tag
            )));
        }
        self.groups.push((tag, values));
        Ok(())
    }

    pub fn tags(&self) -> Vec<&GroupTag> {
        self.groups.iter().map(|(t, _)| t).collect()
    }

    pub fn values(&self, idx: usize) -> &DVector<f64> {
        &self.groups[idx].1
    }

    pub fn get(&self, model_key: &str, sensor: Option<&str>) -> Option<&DVector<f64>> {
        self.groups
            .iter()
            .find(|(t, _)| t.model_key == model_key && t.sensor.as_deref() == sensor)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupTag, &DVector<f64>)> {
        self.groups.iter().map(|(t, v)| (t, v))
    }

    /// Residuals of one model error, concatenated over its sensors
    pub fn model_vector(&self, model_key: &str) -> DVector<f64> {
        let parts = self
            .groups
            .iter()
            .filter(|(t, _)| t.model_key == model_key)
            .map(|(_, v)| v.clone())
            .collect::<Vec<_>>();
        matrix_util::dmatrix_util::concat_vectors(&parts)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Globally aligned Jacobians with the same tags as [`ModelResponses`]
#[derive(Debug, Clone, Default)]
pub struct JacobianGroups {
    groups: Vec<(GroupTag, DMatrix<f64>)>,
}

impl JacobianGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: GroupTag, jacobian: DMatrix<f64>) {
        self.groups.push((tag, jacobian));
    }

    pub fn tags(&self) -> Vec<&GroupTag> {
        self.groups.iter().map(|(t, _)| t).collect()
    }

    pub fn matrix(&self, idx: usize) -> &DMatrix<f64> {
        &self.groups[idx].1
    }

    pub fn get(&self, model_key: &str, sensor: Option<&str>) -> Option<&DMatrix<f64>> {
        self.groups
            .iter()
            .find(|(t, _)| t.model_key == model_key && t.sensor.as_deref() == sensor)
            .map(|(_, m)| m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupTag, &DMatrix<f64>)> {
        self.groups.iter().map(|(t, m)| (t, m))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
