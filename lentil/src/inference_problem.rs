use crate::errors::BayesError;
use crate::jacobian::{model_error_jacobian, DEFAULT_FD_STEP};
use crate::latent::{LatentLayout, LatentParameters, Owner};
use crate::model_error::{GroupTag, JacobianGroups, JacobianOutput, ModelError, ModelResponses};
use crate::noise::NoiseModel;
use crate::parameters::{ParameterArena, ParameterList};
use log::{debug, info};
use matrix_util::traits::BlockOps;
use nalgebra::{DMatrix, DVector};

/// Model errors, noise models and the latent parameters that tie
/// them to one global parameter vector
///
/// Evaluation writes the global vector into the local parameter lists
/// first, so it needs `&mut self`; one problem instance serves one
/// evaluation at a time.
pub struct InferenceProblem {
    latent: LatentParameters,
    model_errors: Vec<(String, Box<dyn ModelError>)>,
    noise_models: Vec<(String, NoiseModel)>,
    arena: ParameterArena,
    fd_step: f64,
}

impl Default for InferenceProblem {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceProblem {
    pub fn new() -> Self {
        Self {
            latent: LatentParameters::new(),
            model_errors: vec![],
            noise_models: vec![],
            arena: ParameterArena::new(),
            fd_step: DEFAULT_FD_STEP,
        }
    }

    /// Relative step of the finite-difference fallback
    pub fn set_fd_step(&mut self, eps: f64) {
        self.fd_step = eps;
    }

    /// Register a model error together with its parameter list
    ///
    /// * `key` - defaults to the number of model errors registered so far
    ///
    /// Returns the key.
    pub fn add_model_error<M>(
        &mut self,
        model_error: M,
        parameters: ParameterList,
        key: Option<&str>,
    ) -> anyhow::Result<String>
    where
        M: ModelError + 'static,
    {
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| self.model_errors.len().to_string());

        if self.model_errors.iter().any(|(k, _)| *k == key) {
            anyhow::bail!(BayesError::Configuration(format!(
                "model error key `{}` is already taken",
                key
            )));
        }

        self.arena.insert(Owner::model_error(&key), parameters)?;
        self.model_errors.push((key.clone(), Box::new(model_error)));
        debug!("added model error `{}`", key);
        Ok(key)
    }

    /// Register a noise model
    ///
    /// * `key` - defaults to `noise{n}`, n = number of noise models so far
    pub fn add_noise_model(
        &mut self,
        noise_model: impl Into<NoiseModel>,
        key: Option<&str>,
    ) -> anyhow::Result<String> {
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| format!("noise{}", self.noise_models.len()));

        if self.noise_models.iter().any(|(k, _)| *k == key) {
            anyhow::bail!(BayesError::Configuration(format!(
                "noise model key `{}` is already taken",
                key
            )));
        }

        let noise_model = noise_model.into();
        self.arena
            .insert(Owner::noise(&key), noise_model.initial_parameters()?)?;
        self.noise_models.push((key.clone(), noise_model));
        debug!("added noise model `{}`", key);
        Ok(key)
    }

    /// Link `local_name` of `owner` to the global latent `global_name`
    pub fn add_latent(
        &mut self,
        global_name: &str,
        owner: Owner,
        local_name: &str,
    ) -> anyhow::Result<()> {
        let list = self.arena.get(&owner)?;
        self.latent.add(global_name, owner, local_name, list)
    }

    /// Shorthand for a model error's parameter
    pub fn add_latent_to_model_error(
        &mut self,
        global_name: &str,
        model_key: &str,
        local_name: &str,
    ) -> anyhow::Result<()> {
        self.add_latent(global_name, Owner::model_error(model_key), local_name)
    }

    /// Link `name` of every model error that defines it to one shared
    /// latent parameter `name`
    pub fn define_shared_latent_parameter_by_name(&mut self, name: &str) -> anyhow::Result<()> {
        let owners = self
            .model_errors
            .iter()
            .map(|(k, _)| Owner::model_error(k))
            .collect::<Vec<_>>();

        let mut nlinks = 0;
        for owner in owners {
            if self.arena.get(&owner)?.contains(name) {
                self.add_latent(name, owner, name)?;
                nlinks += 1;
            }
        }

        if nlinks == 0 {
            anyhow::bail!(BayesError::Configuration(format!(
                "no model error defines a parameter `{}`",
                name
            )));
        }
        Ok(())
    }

    pub fn latent(&self) -> &LatentParameters {
        &self.latent
    }

    /// Freeze and return the latent layout, sizing each latent parameter
    /// from the current local parameter lists
    pub fn finalize(&mut self) -> anyhow::Result<&LatentLayout> {
        self.latent.finalize(&self.arena)
    }

    pub fn total_dim(&mut self) -> anyhow::Result<usize> {
        self.latent.total_dim(&self.arena)
    }

    pub fn parameters(&self, owner: &Owner) -> anyhow::Result<&ParameterList> {
        self.arena.get(owner)
    }

    /// Direct access, e.g. to fix non-latent model parameters or a noise
    /// precision for [`Self::loglike`]
    pub fn parameters_mut(&mut self, owner: &Owner) -> anyhow::Result<&mut ParameterList> {
        self.arena.get_mut(owner)
    }

    pub fn model_error_keys(&self) -> impl Iterator<Item = &str> {
        self.model_errors.iter().map(|(k, _)| k.as_str())
    }

    pub fn noise_models(&self) -> impl Iterator<Item = (&str, &NoiseModel)> {
        self.noise_models.iter().map(|(k, n)| (k.as_str(), n))
    }

    pub fn noise_keys(&self) -> impl Iterator<Item = &str> {
        self.noise_models.iter().map(|(k, _)| k.as_str())
    }

    pub fn contains_noise_model(&self, key: &str) -> bool {
        self.noise_models.iter().any(|(k, _)| k == key)
    }

    /// Push `vector` into the local parameter lists
    pub fn update(&mut self, vector: &DVector<f64>) -> anyhow::Result<()> {
        self.latent.update(vector, &mut self.arena)
    }

    /// Update, then evaluate every model error in registration order
    pub fn evaluate(&mut self, vector: &DVector<f64>) -> anyhow::Result<ModelResponses> {
        self.update(vector)?;
        let mut ret = ModelResponses::new();
        for (key, me) in self.model_errors.iter() {
            let prm = self.arena.get(&Owner::model_error(key))?;
            ret.push(key, me.evaluate(prm)?)?;
        }
        Ok(ret)
    }

    /// Jacobians of every (model error, sensor) output with respect to
    /// the global vector
    ///
    /// Columns of latent parameters a model error does not use stay
    /// zero. Blocks are negated: the solver works with
    /// `-d(residual)/d(parameter)`.
    pub fn jacobian(&mut self, vector: &DVector<f64>) -> anyhow::Result<JacobianGroups> {
        self.update(vector)?;
        let total_dim = vector.len();
        let mut ret = JacobianGroups::new();

        for (key, me) in self.model_errors.iter() {
            let owner = Owner::model_error(key);
            let prm = self.arena.get(&owner)?;

            let latent_names = self.latent.latent_names(&owner);
            let local_names = latent_names
                .iter()
                .map(|(l, _)| l.as_str())
                .collect::<Vec<_>>();

            let sensors = me.evaluate(prm)?.into_blocks();

            let local_jac = match me.jacobian(prm, &local_names)? {
                JacobianOutput::Analytic(jac) => jac,
                JacobianOutput::UseFiniteDifference => {
                    model_error_jacobian(me.as_ref(), prm, &local_names, self.fd_step)?
                }
            };

            for (sensor, values) in sensors {
                let nrows = values.len();
                let mut stacked = DMatrix::<f64>::zeros(nrows, total_dim);

                for (local_name, global_name) in latent_names.iter() {
                    let block = local_jac
                        .get(sensor.as_deref(), local_name)
                        .ok_or_else(|| {
                            BayesError::Dimension(format!(
                                "model error `{}` gave no derivative of sensor {:?} \
                                 with respect to `{}`",
                                key, sensor, local_name
                            ))
                        })?
                        .to_matrix();

                    let range = self.latent.global_index_range(global_name)?;
                    if block.shape() != (nrows, range.len()) {
                        anyhow::bail!(BayesError::Dimension(format!(
                            "derivative of sensor {:?} of model error `{}` with respect to `{}` \
                             is {:?}, expected {:?}",
                            sensor,
                            key,
                            local_name,
                            block.shape(),
                            (nrows, range.len())
                        )));
                    }
                    stacked.paste_columns(&(-block), range.start)?;
                }

                ret.push(
                    GroupTag {
                        model_key: key.clone(),
                        sensor,
                    },
                    stacked,
                );
            }
        }
        Ok(ret)
    }

    /// Sum of the log-likelihood contributions of all noise models at
    /// their current precision
    pub fn loglike(&mut self, vector: &DVector<f64>) -> anyhow::Result<f64> {
        let responses = self.evaluate(vector)?;
        let mut ret = 0.0;
        for (key, noise) in self.noise_models.iter() {
            let prm = self.arena.get(&Owner::noise(key))?;
            ret += noise.loglike_contribution(&responses, prm)?;
        }
        Ok(ret)
    }

    pub(crate) fn log_summary(&mut self) -> anyhow::Result<()> {
        let total_dim = self.latent.total_dim(&self.arena)?;
        info!(
            "{} model error(s), {} noise model(s), {} latent parameter(s) of total length {}",
            self.model_errors.len(),
            self.noise_models.len(),
            self.latent.len(),
            total_dim
        );
        Ok(())
    }
}
