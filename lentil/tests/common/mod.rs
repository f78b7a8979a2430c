#![allow(dead_code)]

use lentil::*;
use matrix_util::dmatrix_util::linspace;
use matrix_util::traits::SampleOps;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Gaussian noise, `n_rep` replicates of `nx` points, rep-major
///
/// The second half of the replicates negates the first, and the whole
/// set is rescaled to an RMS of exactly `sd`. Least squares on a linear
/// model then recovers the true coefficients without error.
pub fn antithetic_noise(n_rep: usize, nx: usize, sd: f64, seed: u64) -> Vec<f64> {
    assert_eq!(n_rep % 2, 0);
    let mut rng = StdRng::seed_from_u64(seed);

    // one column per replicate
    let half = DMatrix::<f64>::rnorm_with(nx, n_rep / 2, &mut rng);

    let mut ret = half.iter().copied().collect::<Vec<f64>>();
    ret.extend(half.iter().map(|e| -e));

    let rms = (ret.iter().map(|e| e * e).sum::<f64>() / ret.len() as f64).sqrt();
    ret.iter().map(|e| e * sd / rms).collect()
}

/// `y = slope * x + intercept + noise`, x = linspace(0.01, 0.1, 10)
/// repeated `n_rep` times
pub struct LinearData {
    pub x: DVector<f64>,
    pub y: DVector<f64>,
}

pub fn linear_data(slope: f64, intercept: f64, sd: f64, n_rep: usize, seed: u64) -> LinearData {
    let xs = linspace(0.01, 0.1, 10);
    let noise = antithetic_noise(n_rep, xs.len(), sd, seed);

    let x = DVector::from_iterator(
        n_rep * xs.len(),
        (0..n_rep).flat_map(|_| xs.iter().copied()),
    );
    let y = DVector::from_iterator(
        x.len(),
        x.iter()
            .zip(noise.iter())
            .map(|(x, e)| slope * x + intercept + e),
    );
    LinearData { x, y }
}

/// `m * x + c - y` under one sensor, local parameters `m` and `c`
pub struct LinearModelError {
    pub data: LinearData,
    pub sensor: String,
    pub analytic: bool,
}

impl LinearModelError {
    pub fn new(data: LinearData, sensor: &str, analytic: bool) -> Self {
        Self {
            data,
            sensor: sensor.to_string(),
            analytic,
        }
    }

    pub fn parameters() -> ParameterList {
        ParameterList::with_names(&["m", "c"]).unwrap()
    }
}

impl ModelError for LinearModelError {
    fn evaluate(&self, parameters: &ParameterList) -> anyhow::Result<ModelOutput> {
        let m = parameters.scalar("m")?;
        let c = parameters.scalar("c")?;
        let u = self.data.x.map(|x| m * x + c) - &self.data.y;
        Ok(SensorOutputs::new().with(&self.sensor, u).into())
    }

    fn jacobian(
        &self,
        _parameters: &ParameterList,
        local_names: &[&str],
    ) -> anyhow::Result<JacobianOutput> {
        if !self.analytic {
            return Ok(JacobianOutput::UseFiniteDifference);
        }
        let nn = self.data.x.len();
        let mut jac = SensorJacobians::new();
        for &name in local_names {
            let block = match name {
                "m" => self.data.x.clone(),
                "c" => DVector::from_element(nn, 1.0),
                _ => anyhow::bail!("unknown parameter `{}`", name),
            };
            jac.push(Some(self.sensor.as_str()), name, DerivativeBlock::Column(block));
        }
        Ok(JacobianOutput::Analytic(jac))
    }
}

pub fn assert_within_two_sd(result: &VbResult, truth: &[f64]) {
    let mean = result.mean();
    let sd = result.std_diag();
    for (i, &t) in truth.iter().enumerate() {
        assert!(
            (mean[i] - t).abs() <= 2.0 * sd[i],
            "θ[{}] = {} ± {}, truth {}",
            i,
            mean[i],
            sd[i],
            t
        );
    }
}

pub fn assert_noise_sd(result: &VbResult, key: &str, sd: f64) {
    let gamma = result.noise().get(key).unwrap();
    let rel = (gamma.noise_sd() - sd).abs() / sd;
    assert!(rel < 0.01, "noise sd of `{}`: {} vs {}", key, gamma.noise_sd(), sd);
}

/// Non-decreasing up to round-off
pub fn assert_monotone(trace: &[f64]) {
    for w in trace.windows(2) {
        assert!(w[1] >= w[0] - 1e-9 * w[0].abs(), "F went down: {:?}", trace);
    }
}
