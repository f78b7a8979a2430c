//! Mean-field variational Bayes with a Gaussian posterior over the
//! parameter vector and one Gamma posterior per noise group
//!
//! The model is linearized at the current mean in every iteration:
//!
//! $$k(\theta) \approx k(m) - J (\theta - m), \quad J = -\partial k / \partial \theta$$
//!
//! so that both updates are in closed form (Chappell, Groves, Whitcher,
//! Woolrich 2009).

use crate::errors::BayesError;
use crate::jacobian::{central_difference_blocks, DEFAULT_FD_STEP};
use log::{debug, info, warn};
use matrix_param::traits::Inference;
use matrix_param::{Gamma, Mvn};
use matrix_util::dmatrix_util::{all_finite, symmetrize};
use matrix_util::traits::SpdInverseOps;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Key of the only noise group of a [`ClosureModel`]
pub const DEFAULT_NOISE_KEY: &str = "noise0";

/// Insertion-ordered `noise key -> T`
///
/// Serializes as a map, `{"noise0": ..., "noise1": ...}`, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseMap<T> {
    entries: Vec<(String, T)>,
}

impl<T: Serialize> Serialize for NoiseMap<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in self.entries.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NoiseMap<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(NoiseMapVisitor(std::marker::PhantomData))
    }
}

struct NoiseMapVisitor<T>(std::marker::PhantomData<T>);

impl<'de, T: Deserialize<'de>> serde::de::Visitor<'de> for NoiseMapVisitor<T> {
    type Value = NoiseMap<T>;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "a map from noise keys to values")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut ret = NoiseMap::new();
        while let Some((key, value)) = access.next_entry::<String, T>()? {
            ret.insert(&key, value).map_err(<A::Error as serde::de::Error>::custom)?;
        }
        Ok(ret)
    }
}

impl<T> Default for NoiseMap<T> {
    fn default() -> Self {
        Self { entries: vec![] }
    }
}

impl<T> NoiseMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: &str, value: T) -> Self {
        Self {
            entries: vec![(key.to_string(), value)],
        }
    }

    /// Fails on a key that is already present
    pub fn insert(&mut self, key: &str, value: T) -> anyhow::Result<()> {
        if self.contains_key(key) {
            anyhow::bail!(BayesError::Configuration(format!(
                "noise key `{}` appears twice",
                key
            )));
        }
        self.entries.push((key.to_string(), value));
        Ok(())
    }

    pub fn with(mut self, key: &str, value: T) -> anyhow::Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Analytic `-d(residual)/d(parameter)` per noise key, or a request
/// for central differences
#[derive(Debug, Clone)]
pub enum VbJacobian {
    Analytic(NoiseMap<DMatrix<f64>>),
    UseFiniteDifference,
}

/// What the solver needs from a model
pub trait VariationalBayesInterface {
    /// Residuals `model(theta) - data` of every noise group
    fn evaluate(&mut self, theta: &DVector<f64>) -> anyhow::Result<NoiseMap<DVector<f64>>>;

    /// `-d(residual)/d(theta)` of every noise group, one row per
    /// residual and one column per component of `theta`
    fn jacobian(&mut self, _theta: &DVector<f64>) -> anyhow::Result<VbJacobian> {
        Ok(VbJacobian::UseFiniteDifference)
    }
}

/// A residual closure over the flat parameter vector, with one noise
/// group [`DEFAULT_NOISE_KEY`]
///
/// ```
/// use lentil::{ClosureModel, DVector};
///
/// let data = DVector::from_vec(vec![1.0, 2.0]);
/// let mut model = ClosureModel::new(move |theta: &DVector<f64>| {
///     Ok(DVector::from_element(2, theta[0]) - &data)
/// });
/// # use lentil::VariationalBayesInterface;
/// # let k = model.evaluate(&DVector::from_vec(vec![1.0])).unwrap();
/// # assert_eq!(k.get("noise0").map(|v| v[1]), Some(-1.0));
/// ```
pub struct ClosureModel<F, G = fn(&DVector<f64>) -> anyhow::Result<DMatrix<f64>>> {
    residual: F,
    jacobian: Option<G>,
}

impl<F> ClosureModel<F> {
    pub fn new(residual: F) -> Self
    where
        F: FnMut(&DVector<f64>) -> anyhow::Result<DVector<f64>>,
    {
        Self {
            residual,
            jacobian: None,
        }
    }
}

impl<F, G> ClosureModel<F, G> {
    /// Attach an analytic Jacobian; it must return
    /// `-d(residual)/d(theta)`
    pub fn with_jacobian<H>(self, jacobian: H) -> ClosureModel<F, H>
    where
        H: FnMut(&DVector<f64>) -> anyhow::Result<DMatrix<f64>>,
    {
        ClosureModel {
            residual: self.residual,
            jacobian: Some(jacobian),
        }
    }
}

impl<F, G> VariationalBayesInterface for ClosureModel<F, G>
where
    F: FnMut(&DVector<f64>) -> anyhow::Result<DVector<f64>>,
    G: FnMut(&DVector<f64>) -> anyhow::Result<DMatrix<f64>>,
{
    fn evaluate(&mut self, theta: &DVector<f64>) -> anyhow::Result<NoiseMap<DVector<f64>>> {
        Ok(NoiseMap::single(DEFAULT_NOISE_KEY, (self.residual)(theta)?))
    }

    fn jacobian(&mut self, theta: &DVector<f64>) -> anyhow::Result<VbJacobian> {
        match self.jacobian.as_mut() {
            Some(jac) => Ok(VbJacobian::Analytic(NoiseMap::single(
                DEFAULT_NOISE_KEY,
                jac(theta)?,
            ))),
            None => Ok(VbJacobian::UseFiniteDifference),
        }
    }
}

/// Solver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VbOptions {
    /// upper bound on the number of iterations
    pub max_iter: usize,
    /// relative change of the free energy (or of the mean) that counts
    /// as converged
    pub tolerance: f64,
    /// stop after this many consecutive iterations without a better
    /// free energy
    pub n_trials_max: usize,
    /// relative step of the finite-difference Jacobian
    pub fd_step: f64,
    /// first diagonal jitter tried on a singular posterior precision
    pub jitter: f64,
}

impl Default for VbOptions {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tolerance: 1e-5,
            n_trials_max: 10,
            fd_step: DEFAULT_FD_STEP,
            jitter: 1e-10,
        }
    }
}

impl VbOptions {
    /// Missing fields take their default
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let ret: Self = serde_json::from_str(json)
            .map_err(|e| BayesError::Configuration(format!("invalid solver options: {}", e)))?;
        ret.validate()?;
        Ok(ret)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_iter == 0 {
            anyhow::bail!(BayesError::Configuration(
                "max_iter must be at least 1".to_string()
            ));
        }
        if !(self.tolerance > 0.0) || !(self.fd_step > 0.0) || !(self.jitter >= 0.0) {
            anyhow::bail!(BayesError::Configuration(format!(
                "tolerance and fd_step must be positive, jitter non-negative: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Posterior approximation returned by the solver
#[derive(Debug, Clone, Serialize)]
pub struct VbResult {
    param: Mvn,
    noise: NoiseMap<Gamma>,
    nit: usize,
    converged: bool,
    free_energy: f64,
    free_energy_trace: Vec<f64>,
}

impl VbResult {
    /// `q(θ)`
    pub fn param(&self) -> &Mvn {
        &self.param
    }

    /// `q(φ_i)` per noise key
    pub fn noise(&self) -> &NoiseMap<Gamma> {
        &self.noise
    }

    /// Iterations performed
    pub fn nit(&self) -> usize {
        self.nit
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Free energy of the returned state
    pub fn free_energy(&self) -> f64 {
        self.free_energy
    }

    /// Free energy after every iteration
    pub fn free_energy_trace(&self) -> &[f64] {
        &self.free_energy_trace
    }

    pub fn mean(&self) -> &DVector<f64> {
        self.param.mean()
    }

    pub fn std_diag(&self) -> DVector<f64> {
        self.param.std_diag()
    }
}

impl std::fmt::Display for VbResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "VB: nit = {}, converged = {}, F = {:.6e}",
            self.nit, self.converged, self.free_energy
        )?;
        let sd = self.std_diag();
        for (i, m) in self.mean().iter().enumerate() {
            writeln!(f, "  θ[{}] = {:.6e} ± {:.3e}", i, m, sd[i])?;
        }
        for (key, gamma) in self.noise.iter() {
            writeln!(f, "  {}: {}, noise sd = {:.4e}", key, gamma, gamma.noise_sd())?;
        }
        Ok(())
    }
}

/// Residuals and Jacobians at one expansion point, in noise key order
struct Linearization {
    residuals: Vec<DVector<f64>>,
    jacobians: Vec<DMatrix<f64>>,
}

impl Linearization {
    fn is_finite(&self) -> bool {
        self.residuals.iter().all(|k| k.iter().all(|x| x.is_finite()))
            && self.jacobians.iter().all(all_finite)
    }
}

#[derive(Clone)]
struct VbState {
    param: Mvn,
    noise: Vec<Gamma>,
    free_energy: f64,
    nit: usize,
}

pub struct VariationalBayesSolver {
    options: VbOptions,
}

impl VariationalBayesSolver {
    pub fn new(options: VbOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &VbOptions {
        &self.options
    }

    /// Run the iterations from the prior
    ///
    /// * `model` - residuals and Jacobians per noise group
    /// * `param_prior` - Gaussian prior over the whole parameter vector
    /// * `noise_prior` - Gamma prior per noise key; empty gives every
    ///   noise key [`Gamma::noninformative`]
    pub fn run<M>(
        &self,
        model: &mut M,
        param_prior: &Mvn,
        noise_prior: &NoiseMap<Gamma>,
    ) -> anyhow::Result<VbResult>
    where
        M: VariationalBayesInterface + ?Sized,
    {
        self.options.validate()?;

        let m0 = param_prior.mean();
        let l0 = param_prior.precision();
        let dd = m0.len();

        let first = model.evaluate(m0)?;
        let keys = first.keys().map(str::to_string).collect::<Vec<_>>();
        if keys.is_empty() {
            anyhow::bail!(BayesError::Configuration(
                "the model reports no noise group".to_string()
            ));
        }
        let priors = resolve_noise_prior(&keys, noise_prior)?;

        let mut lin = self.linearize(model, &keys, m0, Some(first))?;
        if !lin.is_finite() {
            anyhow::bail!(BayesError::Numerical(
                "non-finite residuals or Jacobian at the prior mean".to_string()
            ));
        }

        info!(
            "VB over {} parameter(s) and {} noise group(s) {:?}",
            dd,
            keys.len(),
            keys
        );

        let mut best = VbState {
            param: param_prior.clone(),
            noise: priors.clone(),
            free_energy: f64::NEG_INFINITY,
            nit: 0,
        };
        let mut current = best.clone();
        let mut trace = vec![];
        let mut n_trials = 0;
        let mut converged = false;
        let mut regularized = false;
        let mut failed = false;

        loop {
            let m_old = current.param.mean().clone();

            // parameter update
            let mut precision = l0.clone();
            let mut rhs = l0 * m0;
            for ((k, jac), noise) in lin
                .residuals
                .iter()
                .zip(lin.jacobians.iter())
                .zip(current.noise.iter())
            {
                let weight = noise.mean();
                let jt = jac.transpose();
                precision += (&jt * jac) * weight;
                rhs += (&jt * (k + jac * &m_old)) * weight;
            }
            let precision = symmetrize(&precision);

            let inverse = match precision.spd_inverse(self.options.jitter) {
                Ok(inverse) => inverse,
                Err(e) => {
                    warn!("iteration {}: {}", current.nit + 1, e);
                    failed = true;
                    break;
                }
            };
            regularized |= inverse.is_regularized();
            let mean = &inverse.inverse * &rhs;
            if !mean.iter().all(|x| x.is_finite()) {
                warn!("iteration {}: non-finite parameter mean", current.nit + 1);
                failed = true;
                break;
            }

            // linearize at the new mean
            let next = self.linearize(model, &keys, &mean, None)?;
            if !next.is_finite() {
                warn!(
                    "iteration {}: non-finite residuals or Jacobian",
                    current.nit + 1
                );
                failed = true;
                break;
            }

            let param = Mvn::with_covariance(mean, precision, inverse.inverse)?;

            // noise update
            let mut noise = Vec::with_capacity(keys.len());
            for ((k, jac), prior) in next
                .residuals
                .iter()
                .zip(next.jacobians.iter())
                .zip(priors.iter())
            {
                let shape = 0.5 * k.len() as f64 + prior.shape;
                let rate = 1.0 / prior.scale
                    + 0.5 * k.dot(k)
                    + 0.5 * trace_product(param.covariance(), jac);
                noise.push(Gamma::new(shape, 1.0 / rate)?);
            }

            lin = next;
            let free_energy = free_energy(param_prior, &priors, &param, &noise, &lin);
            let nit = current.nit + 1;
            trace.push(free_energy);
            debug!("iteration {}: F = {:.8e}", nit, free_energy);

            let rel_f = relative_change(free_energy, current.free_energy);
            let rel_m = (param.mean() - &m_old).norm() / param.mean().norm().max(1.0);

            current = VbState {
                param,
                noise,
                free_energy,
                nit,
            };

            if free_energy > best.free_energy {
                best = current.clone();
                n_trials = 0;
            } else {
                n_trials += 1;
                debug!(
                    "iteration {}: F went down from {:.8e}, trial {}",
                    nit, best.free_energy, n_trials
                );
            }

            if nit > 1 && rel_f <= self.options.tolerance && rel_m <= self.options.tolerance {
                converged = true;
                break;
            }
            if n_trials >= self.options.n_trials_max {
                warn!(
                    "F did not improve in {} iterations, keeping the state of iteration {}",
                    n_trials, best.nit
                );
                break;
            }
            if nit >= self.options.max_iter {
                warn!("no convergence after {} iterations", nit);
                break;
            }
        }

        if regularized {
            warn!("the posterior precision had to be regularized");
        }
        let converged = converged && !regularized && !failed;

        // on success the last state is the best one up to round-off
        let state = if converged { current } else { best };
        info!(
            "VB stopped after {} iteration(s): converged = {}, F = {:.8e}",
            trace.len(),
            converged,
            state.free_energy
        );

        let mut noise = NoiseMap::new();
        for (key, gamma) in keys.iter().zip(state.noise) {
            noise.insert(key, gamma)?;
        }

        Ok(VbResult {
            param: state.param,
            noise,
            nit: trace.len(),
            converged,
            free_energy: state.free_energy,
            free_energy_trace: trace,
        })
    }

    /// Residuals and Jacobians in the order of `keys`
    fn linearize<M>(
        &self,
        model: &mut M,
        keys: &[String],
        theta: &DVector<f64>,
        residuals: Option<NoiseMap<DVector<f64>>>,
    ) -> anyhow::Result<Linearization>
    where
        M: VariationalBayesInterface + ?Sized,
    {
        let residuals = match residuals {
            Some(r) => r,
            None => model.evaluate(theta)?,
        };
        let residuals = in_key_order(keys, residuals, "residuals")?;

        let jacobians = match model.jacobian(theta)? {
            VbJacobian::Analytic(jac) => in_key_order(keys, jac, "Jacobians")?,
            VbJacobian::UseFiniteDifference => {
                let blocks = central_difference_blocks(
                    |x| in_key_order(keys, model.evaluate(x)?, "residuals"),
                    theta,
                    self.options.fd_step,
                )?;
                blocks.into_iter().map(|b| -b).collect()
            }
        };

        for ((key, k), jac) in keys.iter().zip(residuals.iter()).zip(jacobians.iter()) {
            if jac.shape() != (k.len(), theta.len()) {
                anyhow::bail!(BayesError::Dimension(format!(
                    "Jacobian of noise group `{}` is {} x {}, expected {} x {}",
                    key,
                    jac.nrows(),
                    jac.ncols(),
                    k.len(),
                    theta.len()
                )));
            }
        }

        Ok(Linearization {
            residuals,
            jacobians,
        })
    }
}

/// Run [`VariationalBayesSolver`] once
pub fn variational_bayes<M>(
    model: &mut M,
    param_prior: &Mvn,
    noise_prior: &NoiseMap<Gamma>,
    options: &VbOptions,
) -> anyhow::Result<VbResult>
where
    M: VariationalBayesInterface + ?Sized,
{
    VariationalBayesSolver::new(options.clone()).run(model, param_prior, noise_prior)
}

/// Gaussian prior `N(mean, precision⁻¹)`; a precision that is not
/// `d x d` for a mean of length `d` is a [`BayesError::Dimension`]
pub fn mvn_prior(mean: DVector<f64>, precision: DMatrix<f64>) -> anyhow::Result<Mvn> {
    let dd = mean.len();
    if precision.shape() != (dd, dd) {
        anyhow::bail!(BayesError::Dimension(format!(
            "prior mean has {} elements, but the precision matrix is {} x {}",
            dd,
            precision.nrows(),
            precision.ncols()
        )));
    }
    Mvn::new(mean, precision)
}

fn in_key_order<T>(keys: &[String], map: NoiseMap<T>, what: &str) -> anyhow::Result<Vec<T>> {
    if map.len() != keys.len() || map.keys().zip(keys.iter()).any(|(a, b)| a != b) {
        if let Some(extra) = map.keys().find(|k| !keys.iter().any(|x| x.as_str() == *k)) {
            anyhow::bail!(BayesError::Lookup(format!(
                "{} for unknown noise group `{}`",
                what, extra
            )));
        }
        if let Some(missing) = keys.iter().find(|k| !map.contains_key(k)) {
            anyhow::bail!(BayesError::Lookup(format!(
                "no {} for noise group `{}`",
                what, missing
            )));
        }
    }
    let mut entries = map.entries;
    let mut ret = Vec::with_capacity(keys.len());
    for key in keys {
        let pos = entries
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(|| BayesError::Lookup(format!("no {} for `{}`", what, key)))?;
        ret.push(entries.swap_remove(pos).1);
    }
    Ok(ret)
}

fn resolve_noise_prior(
    keys: &[String],
    noise_prior: &NoiseMap<Gamma>,
) -> anyhow::Result<Vec<Gamma>> {
    if noise_prior.is_empty() {
        return Ok(vec![Gamma::noninformative(); keys.len()]);
    }
    if let Some(unknown) = noise_prior
        .keys()
        .find(|k| !keys.iter().any(|x| x.as_str() == *k))
    {
        anyhow::bail!(BayesError::Configuration(format!(
            "noise prior for `{}`, which is not a noise group of the model",
            unknown
        )));
    }
    keys.iter()
        .map(|key| {
            noise_prior.get(key).copied().ok_or_else(|| {
                anyhow::Error::from(BayesError::Configuration(format!(
                    "no prior for noise group `{}`",
                    key
                )))
            })
        })
        .collect()
}

/// `tr(Σ JᵀJ)` without forming `JᵀJ Σ`
fn trace_product(covariance: &DMatrix<f64>, jac: &DMatrix<f64>) -> f64 {
    (jac * covariance).component_mul(jac).sum()
}

fn relative_change(new: f64, old: f64) -> f64 {
    if !old.is_finite() {
        return f64::INFINITY;
    }
    (new - old).abs() / new.abs().max(f64::MIN_POSITIVE)
}

/// `F = E_q[ln p(k | θ, φ)] + E_q[ln p(θ)] + Σ E_q[ln p(φ_i)] + H[q(θ)] + Σ H[q(φ_i)]`
fn free_energy(
    param_prior: &Mvn,
    noise_prior: &[Gamma],
    param: &Mvn,
    noise: &[Gamma],
    lin: &Linearization,
) -> f64 {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();

    let mut ret = param_prior.expected_ln_pdf(param) + param.entropy();

    for (((k, jac), q), p) in lin
        .residuals
        .iter()
        .zip(lin.jacobians.iter())
        .zip(noise.iter())
        .zip(noise_prior.iter())
    {
        let nn = k.len() as f64;
        let sq = k.dot(k) + trace_product(param.covariance(), jac);
        ret += 0.5 * nn * (q.log_mean() - ln_2pi) - 0.5 * q.mean() * sq;
        ret += p.expected_ln_pdf(q) + q.entropy();
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn noise_map_rejects_duplicates() {
        let mut map = NoiseMap::single("a", 1.0);
        assert!(map.insert("b", 2.0).is_ok());
        let err = map.insert("a", 3.0).unwrap_err();
        assert!(crate::errors::bayes_error(&err).is_some_and(|e| e.is_configuration()));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn noise_map_as_json_object() -> anyhow::Result<()> {
        let map = NoiseMap::single("b", 2.0).with("a", 1.0)?;
        let js = serde_json::to_string(&map)?;
        assert_eq!(js, r#"{"b":2.0,"a":1.0}"#);

        let back: NoiseMap<f64> = serde_json::from_str(&js)?;
        assert_eq!(back, map);
        assert!(serde_json::from_str::<NoiseMap<f64>>(r#"{"a":1.0,"a":2.0}"#).is_err());
        Ok(())
    }

    #[test]
    fn options_from_partial_json() -> anyhow::Result<()> {
        let opt = VbOptions::from_json(r#"{"max_iter": 20}"#)?;
        assert_eq!(opt.max_iter, 20);
        assert_eq!(opt.n_trials_max, 10);
        assert_eq!(opt.tolerance, 1e-5);
        assert!(VbOptions::from_json(r#"{"max_iter": 0}"#).is_err());
        assert!(VbOptions::from_json("[1, 2]").is_err());
        Ok(())
    }

    #[test]
    fn trace_product_matches_definition() {
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let jac = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 0.0, 1.0, -1.0, 3.0]);
        let expected = (&cov * jac.transpose() * &jac).trace();
        assert_relative_eq!(trace_product(&cov, &jac), expected, max_relative = 1e-12);
    }

    #[test]
    fn scalar_mean_with_known_noise() -> anyhow::Result<()> {
        // residual θ - y_i; the mean of q(θ) is the precision-weighted
        // average of the prior mean and the data mean
        let data = DVector::from_vec(vec![1.0, 3.0, 1.5, 2.5]);
        let ys = data.clone();
        let mut model = ClosureModel::new(move |theta: &DVector<f64>| {
            Ok(DVector::from_element(ys.len(), theta[0]) - &ys)
        })
        .with_jacobian(|_: &DVector<f64>| Ok(DMatrix::from_element(4, 1, -1.0)));

        let prior = Mvn::from_mean_sd(&[0.0], &[1e3])?;
        let noise = NoiseMap::single(DEFAULT_NOISE_KEY, Gamma::from_sd(0.5, 1.0)?);
        let result = variational_bayes(&mut model, &prior, &noise, &VbOptions::default())?;

        assert!(result.converged());
        assert_relative_eq!(result.mean()[0], 2.0, max_relative = 1e-4);
        assert_eq!(result.free_energy_trace().len(), result.nit());
        Ok(())
    }

    #[test]
    fn unknown_noise_prior_fails() -> anyhow::Result<()> {
        let mut model = ClosureModel::new(|theta: &DVector<f64>| Ok(theta.clone()));
        let prior = Mvn::from_mean_sd(&[0.0], &[1.0])?;
        let noise = NoiseMap::single("other", Gamma::noninformative());
        let err = variational_bayes(&mut model, &prior, &noise, &VbOptions::default()).unwrap_err();
        assert!(crate::errors::bayes_error(&err).is_some_and(|e| e.is_configuration()));
        Ok(())
    }

    #[test]
    fn prior_shape_mismatch_is_a_dimension_error() -> anyhow::Result<()> {
        let err = mvn_prior(DVector::zeros(2), DMatrix::identity(3, 3)).unwrap_err();
        assert!(crate::errors::bayes_error(&err).is_some_and(|e| e.is_dimension()));

        let prior = mvn_prior(DVector::zeros(2), DMatrix::identity(2, 2) * 4.0)?;
        assert_relative_eq!(prior.covariance()[(1, 1)], 0.25);
        Ok(())
    }

    #[test]
    fn wrong_jacobian_shape_fails() -> anyhow::Result<()> {
        let mut model = ClosureModel::new(|theta: &DVector<f64>| Ok(theta.clone()))
            .with_jacobian(|_: &DVector<f64>| Ok(DMatrix::zeros(2, 2)));
        let prior = Mvn::from_mean_sd(&[0.0], &[1.0])?;
        let err =
            variational_bayes(&mut model, &prior, &NoiseMap::new(), &VbOptions::default())
                .unwrap_err();
        assert!(crate::errors::bayes_error(&err).is_some_and(|e| e.is_dimension()));
        Ok(())
    }
}
