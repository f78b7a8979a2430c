use crate::errors::BayesError;
use crate::inference_problem::InferenceProblem;
use crate::vb::{
    mvn_prior, NoiseMap, VariationalBayesInterface, VariationalBayesSolver, VbJacobian, VbOptions,
    VbResult,
};
use log::debug;
use matrix_param::{Gamma, Mvn};
use nalgebra::{DMatrix, DVector};
use std::ops::{Deref, DerefMut};

/// An [`InferenceProblem`] with a normal prior per latent parameter and
/// a Gamma prior per noise model
///
/// Registration goes through the wrapped problem (`Deref`).
#[derive(Default)]
pub struct VariationalBayesProblem {
    problem: InferenceProblem,
    prm_prior: Vec<(String, (f64, f64))>,
    noise_prior: Vec<(String, Gamma)>,
}

impl Deref for VariationalBayesProblem {
    type Target = InferenceProblem;

    fn deref(&self) -> &InferenceProblem {
        &self.problem
    }
}

impl DerefMut for VariationalBayesProblem {
    fn deref_mut(&mut self) -> &mut InferenceProblem {
        &mut self.problem
    }
}

impl From<InferenceProblem> for VariationalBayesProblem {
    fn from(problem: InferenceProblem) -> Self {
        Self {
            problem,
            prm_prior: vec![],
            noise_prior: vec![],
        }
    }
}

impl VariationalBayesProblem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> InferenceProblem {
        self.problem
    }

    /// `N(mean, sd²)` on every component of a latent parameter
    pub fn set_normal_prior(
        &mut self,
        latent_name: &str,
        mean: f64,
        sd: f64,
    ) -> anyhow::Result<()> {
        if !self.problem.latent().contains(latent_name) {
            anyhow::bail!(BayesError::Configuration(format!(
                "can't set a prior on `{}`: no such latent parameter",
                latent_name
            )));
        }
        if !(sd > 0.0 && sd.is_finite()) || !mean.is_finite() {
            anyhow::bail!(BayesError::Configuration(format!(
                "prior of `{}` needs a finite mean and a positive sd: mean = {}, sd = {}",
                latent_name, mean, sd
            )));
        }
        match self.prm_prior.iter_mut().find(|(n, _)| n == latent_name) {
            Some((_, prior)) => *prior = (mean, sd),
            None => self.prm_prior.push((latent_name.to_string(), (mean, sd))),
        }
        debug!("prior of `{}`: N({}, {}²)", latent_name, mean, sd);
        Ok(())
    }

    pub fn normal_prior(&self, latent_name: &str) -> Option<(f64, f64)> {
        self.prm_prior
            .iter()
            .find(|(n, _)| n == latent_name)
            .map(|(_, p)| *p)
    }

    pub fn set_noise_prior(&mut self, noise_key: &str, prior: Gamma) -> anyhow::Result<()> {
        if !self.problem.contains_noise_model(noise_key) {
            anyhow::bail!(BayesError::Configuration(format!(
                "can't set a prior on noise model `{}`: no such noise model",
                noise_key
            )));
        }
        match self.noise_prior.iter_mut().find(|(k, _)| k == noise_key) {
            Some((_, p)) => *p = prior,
            None => self.noise_prior.push((noise_key.to_string(), prior)),
        }
        debug!("prior of noise model `{}`: {}", noise_key, prior);
        Ok(())
    }

    /// Gamma prior whose mean precision is `1/sd²`
    ///
    /// * `shape` - defaults to 1
    pub fn set_noise_prior_sd(
        &mut self,
        noise_key: &str,
        sd: f64,
        shape: Option<f64>,
    ) -> anyhow::Result<()> {
        let prior = Gamma::from_sd(sd, shape.unwrap_or(1.0))
            .map_err(|e| BayesError::Configuration(format!("noise model `{}`: {}", noise_key, e)))?;
        self.set_noise_prior(noise_key, prior)
    }

    pub fn noise_prior(&self, noise_key: &str) -> Option<&Gamma> {
        self.noise_prior
            .iter()
            .find(|(k, _)| k == noise_key)
            .map(|(_, g)| g)
    }

    /// Diagonal normal prior over the global vector, each latent's
    /// `(mean, 1/sd²)` repeated over its components in layout order
    pub fn prior_mvn(&mut self) -> anyhow::Result<Mvn> {
        let layout = self.problem.finalize()?;
        let mut mean = Vec::with_capacity(layout.total_dim());
        let mut precision = Vec::with_capacity(layout.total_dim());

        for (name, range) in layout.iter() {
            let (m, sd) = self
                .prm_prior
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, p)| *p)
                .ok_or_else(|| {
                    BayesError::Configuration(format!("no prior for latent parameter `{}`", name))
                })?;
            for _ in range {
                mean.push(m);
                precision.push(1.0 / (sd * sd));
            }
        }

        mvn_prior(
            DVector::from_vec(mean),
            DMatrix::from_diagonal(&DVector::from_vec(precision)),
        )
    }

    /// Noise priors in noise model registration order; empty when none
    /// was set
    pub fn noise_priors(&self) -> anyhow::Result<NoiseMap<Gamma>> {
        let mut ret = NoiseMap::new();
        for key in self.problem.noise_keys() {
            if let Some(prior) = self.noise_prior(key) {
                ret.insert(key, *prior)?;
            }
        }
        Ok(ret)
    }

    /// Assemble the priors and run the solver
    ///
    /// Afterwards the local parameter lists hold the posterior mean.
    pub fn run(&mut self, options: &VbOptions) -> anyhow::Result<VbResult> {
        if self.problem.model_error_keys().next().is_none() {
            anyhow::bail!(BayesError::Configuration(
                "no model error registered".to_string()
            ));
        }
        if self.problem.noise_keys().next().is_none() {
            anyhow::bail!(BayesError::Configuration(
                "no noise model registered".to_string()
            ));
        }

        let prior = self.prior_mvn()?;
        let noise_prior = self.noise_priors()?;
        self.problem.set_fd_step(options.fd_step);
        self.problem.log_summary()?;

        let solver = VariationalBayesSolver::new(options.clone());
        let result = solver.run(&mut *self, &prior, &noise_prior)?;
        self.problem.update(result.mean())?;
        Ok(result)
    }
}

impl VariationalBayesInterface for VariationalBayesProblem {
    fn evaluate(&mut self, theta: &DVector<f64>) -> anyhow::Result<NoiseMap<DVector<f64>>> {
        let responses = self.problem.evaluate(theta)?;
        let mut ret = NoiseMap::new();
        for (key, noise) in self.problem.noise_models() {
            ret.insert(key, noise.vector_contribution(&responses)?)?;
        }
        Ok(ret)
    }

    fn jacobian(&mut self, theta: &DVector<f64>) -> anyhow::Result<VbJacobian> {
        let jacobians = self.problem.jacobian(theta)?;
        let mut ret = NoiseMap::new();
        for (key, noise) in self.problem.noise_models() {
            ret.insert(key, noise.jacobian_contribution(&jacobians)?)?;
        }
        Ok(VbJacobian::Analytic(ret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::bayes_error;
    use crate::model_error::{ModelOutput, SensorOutputs};
    use crate::noise::UncorrelatedSensorNoise;
    use crate::parameters::ParameterList;

    fn problem() -> anyhow::Result<VariationalBayesProblem> {
        let mut vb = VariationalBayesProblem::new();
        let model = |prm: &ParameterList| -> anyhow::Result<ModelOutput> {
            let a = prm.scalar("a")?;
            let b = prm.get("b")?;
            Ok(SensorOutputs::new()
                .with("y", DVector::from_vec(vec![a + b[0], a - b[1]]))
                .into())
        };
        let mut prm = ParameterList::with_names(&["a"])?;
        prm.define_with_dim("b", 2)?;
        let key = vb.add_model_error(model, prm, None)?;
        vb.add_latent_to_model_error("a", &key, "a")?;
        vb.add_latent_to_model_error("b", &key, "b")?;
        vb.add_noise_model(UncorrelatedSensorNoise::new(&["y"]), None)?;
        Ok(vb)
    }

    #[test]
    fn prior_is_broadcast_over_components() -> anyhow::Result<()> {
        let mut vb = problem()?;
        vb.set_normal_prior("b", 1.0, 2.0)?;
        vb.set_normal_prior("a", -1.0, 0.5)?;

        let prior = vb.prior_mvn()?;
        assert_eq!(prior.mean().as_slice(), &[-1.0, 1.0, 1.0]);
        assert_eq!(prior.precision()[(0, 0)], 4.0);
        assert_eq!(prior.precision()[(2, 2)], 0.25);
        assert_eq!(prior.precision()[(0, 2)], 0.0);
        Ok(())
    }

    #[test]
    fn missing_and_unknown_priors() -> anyhow::Result<()> {
        let mut vb = problem()?;
        vb.set_normal_prior("a", 0.0, 1.0)?;

        let err = vb.prior_mvn().unwrap_err();
        assert!(bayes_error(&err).is_some_and(|e| e.is_configuration()));

        let err = vb.set_normal_prior("c", 0.0, 1.0).unwrap_err();
        assert!(bayes_error(&err).is_some_and(|e| e.is_configuration()));

        let err = vb.set_normal_prior("a", 0.0, 0.0).unwrap_err();
        assert!(bayes_error(&err).is_some_and(|e| e.is_configuration()));

        let err = vb.set_noise_prior_sd("noise7", 0.1, None).unwrap_err();
        assert!(bayes_error(&err).is_some_and(|e| e.is_configuration()));

        vb.set_noise_prior_sd("noise0", 0.5, None)?;
        assert_eq!(vb.noise_prior("noise0").map(|g| g.mean()), Some(4.0));
        Ok(())
    }

    #[test]
    fn groups_follow_noise_models() -> anyhow::Result<()> {
        let mut vb = problem()?;
        let theta = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        let k = VariationalBayesInterface::evaluate(&mut vb, &theta)?;
        assert_eq!(k.get("noise0").map(|v| v.as_slice().to_vec()), Some(vec![3.0, -2.0]));

        let jac = match VariationalBayesInterface::jacobian(&mut vb, &theta)? {
            VbJacobian::Analytic(jac) => jac,
            VbJacobian::UseFiniteDifference => anyhow::bail!("expected assembled Jacobians"),
        };
        let jac = jac.get("noise0").cloned().unwrap_or_else(|| DMatrix::zeros(0, 0));
        assert_eq!(jac.shape(), (2, 3));
        // negated derivative
        assert!((jac[(0, 0)] + 1.0).abs() < 1e-6);
        assert!((jac[(1, 2)] - 1.0).abs() < 1e-6);
        assert!(jac[(0, 2)].abs() < 1e-6);
        Ok(())
    }
}
