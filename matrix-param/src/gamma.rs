extern crate special;

use crate::traits::*;
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;

/// Gamma distribution over a scalar precision
///
/// $$p(\phi|c,s) = \frac{\phi^{c-1} e^{-\phi/s}}{\Gamma(c) s^c}$$
///
/// with shape `c` and scale `s`, so that `E[φ] = c·s`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gamma {
    pub shape: f64,
    pub scale: f64,
}

impl Gamma {
    /// # Arguments
    /// * `shape` - shape c > 0
    /// * `scale` - scale s > 0 (rate = 1/s)
    pub fn new(shape: f64, scale: f64) -> anyhow::Result<Self> {
        if !(shape > 0.0 && shape.is_finite()) || !(scale > 0.0 && scale.is_finite()) {
            anyhow::bail!(
                "Gamma needs positive, finite shape and scale: shape = {}, scale = {}",
                shape,
                scale
            );
        }
        Ok(Self { shape, scale })
    }

    /// A Gamma prior whose mean precision is `1/sd²`
    ///
    /// `scale = 1 / (sd² · shape)`, hence `shape · scale = 1/sd²`
    ///
    /// * `sd` - expected noise standard deviation
    /// * `shape` - shape parameter (1 gives an exponential prior)
    pub fn from_sd(sd: f64, shape: f64) -> anyhow::Result<Self> {
        if !(sd > 0.0 && sd.is_finite()) {
            anyhow::bail!("noise sd must be positive and finite: {}", sd);
        }
        Self::new(shape, 1.0 / (sd * sd * shape))
    }

    /// Moment matching: `mean = c·s`, `sd = sqrt(c)·s`
    pub fn from_mean_sd(mean: f64, sd: f64) -> anyhow::Result<Self> {
        if !(mean > 0.0) || !(sd > 0.0) {
            anyhow::bail!("mean and sd must be positive: mean = {}, sd = {}", mean, sd);
        }
        Self::new(mean * mean / (sd * sd), sd * sd / mean)
    }

    /// Vague prior with unit mean
    pub fn noninformative() -> Self {
        Self {
            shape: 1e-6,
            scale: 1e6,
        }
    }

    pub fn mean(&self) -> f64 {
        self.shape * self.scale
    }

    pub fn sd(&self) -> f64 {
        self.shape.sqrt() * self.scale
    }

    pub fn variance(&self) -> f64 {
        self.shape * self.scale * self.scale
    }

    /// `E[ln φ] = ψ(c) + ln s`
    pub fn log_mean(&self) -> f64 {
        self.shape.digamma() + self.scale.ln()
    }

    /// Noise standard deviation implied by the mean precision
    pub fn noise_sd(&self) -> f64 {
        1.0 / self.mean().sqrt()
    }

    /// `E_q[ln p(φ)]` of this density under another Gamma `q`
    pub fn expected_ln_pdf(&self, q: &Gamma) -> f64 {
        (self.shape - 1.0) * q.log_mean()
            - q.mean() / self.scale
            - ln_gamma(self.shape)
            - self.shape * self.scale.ln()
    }

    pub fn ln_pdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return f64::NEG_INFINITY;
        }
        (self.shape - 1.0) * x.ln()
            - x / self.scale
            - ln_gamma(self.shape)
            - self.shape * self.scale.ln()
    }
}

impl Inference for Gamma {
    type Mat = f64;

    fn posterior_mean(&self) -> f64 {
        self.mean()
    }

    fn posterior_sd(&self) -> f64 {
        self.sd()
    }

    /// `c + ln s + ln Γ(c) + (1 - c) ψ(c)`
    fn entropy(&self) -> f64 {
        self.shape
            + self.scale.ln()
            + ln_gamma(self.shape)
            + (1.0 - self.shape) * self.shape.digamma()
    }

    fn dim(&self) -> usize {
        1
    }
}

pub(crate) fn ln_gamma(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

impl std::fmt::Display for Gamma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gamma(shape = {:.4e}, scale = {:.4e}, mean = {:.4e})",
            self.shape,
            self.scale,
            self.mean()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn from_sd_round_trip() -> anyhow::Result<()> {
        for sd in [0.1, 0.3, 1.0, 2.5, 1e-3] {
            let g = Gamma::from_sd(sd, 1.0)?;
            assert_eq!(g.mean(), 1.0 / (sd * sd));
            assert_relative_eq!(g.noise_sd(), sd, max_relative = 1e-12);
        }
        for shape in [0.5, 2.0, 10.0] {
            let g = Gamma::from_sd(0.3, shape)?;
            assert_relative_eq!(g.mean(), 1.0 / 0.09, max_relative = 1e-12);
            assert_eq!(g.shape, shape);
        }
        Ok(())
    }

    #[test]
    fn moments() -> anyhow::Result<()> {
        let g = Gamma::from_mean_sd(4.0, 2.0)?;
        assert_relative_eq!(g.mean(), 4.0, max_relative = 1e-12);
        assert_relative_eq!(g.sd(), 2.0, max_relative = 1e-12);
        assert_relative_eq!(g.variance(), 4.0, max_relative = 1e-12);

        // E[ln φ] <= ln E[φ]
        assert!(g.log_mean() < g.mean().ln());
        Ok(())
    }

    #[test]
    fn exponential_special_case() -> anyhow::Result<()> {
        // shape 1, scale 2: Exp with mean 2
        let g = Gamma::new(1.0, 2.0)?;
        assert_relative_eq!(g.ln_pdf(1.0), -0.5 - 2f64.ln(), max_relative = 1e-12);
        assert_relative_eq!(g.entropy(), 1.0 + 2f64.ln(), max_relative = 1e-12);
        Ok(())
    }

    #[test]
    fn cross_entropy_bounds_entropy() -> anyhow::Result<()> {
        // -E_q[ln p] >= H[q], with equality at p = q
        let q = Gamma::new(3.0, 0.5)?;
        let p = Gamma::new(1.0, 2.0)?;
        assert!(-p.expected_ln_pdf(&q) > q.entropy());
        assert_relative_eq!(-q.expected_ln_pdf(&q), q.entropy(), max_relative = 1e-12);
        Ok(())
    }

    #[test]
    fn rejects_bad_hyper_parameters() {
        assert!(Gamma::new(0.0, 1.0).is_err());
        assert!(Gamma::new(1.0, -1.0).is_err());
        assert!(Gamma::from_sd(0.0, 1.0).is_err());
        assert!(Gamma::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn serde_round_trip() -> anyhow::Result<()> {
        let g = Gamma::new(3.0, 0.5)?;
        let js = serde_json::to_string(&g)?;
        let h: Gamma = serde_json::from_str(&js)?;
        assert_eq!(g, h);
        Ok(())
    }
}
