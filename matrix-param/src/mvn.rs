use crate::traits::*;
use matrix_util::traits::SpdInverseOps;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Multivariate normal distribution kept in both the precision and
/// the covariance parameterization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mvn {
    mean: DVector<f64>,
    precision: DMatrix<f64>,
    covariance: DMatrix<f64>,
}

impl Mvn {
    /// # Arguments
    /// * `mean` - mean vector (d)
    /// * `precision` - precision matrix (d x d), symmetric positive definite
    pub fn new(mean: DVector<f64>, precision: DMatrix<f64>) -> anyhow::Result<Self> {
        check_dims(&mean, &precision)?;
        let covariance = precision.spd_inverse(0.0)?.inverse;
        Ok(Self {
            mean,
            precision,
            covariance,
        })
    }

    /// Independent components `N(mean[i], sd[i]²)`
    pub fn from_mean_sd(mean: &[f64], sd: &[f64]) -> anyhow::Result<Self> {
        if mean.len() != sd.len() {
            anyhow::bail!("{} means but {} standard deviations", mean.len(), sd.len());
        }
        if let Some(bad) = sd.iter().find(|&&s| !(s > 0.0)) {
            anyhow::bail!("standard deviations must be positive: {}", bad);
        }
        let precision = DVector::from_iterator(sd.len(), sd.iter().map(|s| 1.0 / (s * s)));
        Self::new(DVector::from_column_slice(mean), DMatrix::from_diagonal(&precision))
    }

    /// When the caller already holds the inverse of `precision`
    pub fn with_covariance(
        mean: DVector<f64>,
        precision: DMatrix<f64>,
        covariance: DMatrix<f64>,
    ) -> anyhow::Result<Self> {
        check_dims(&mean, &precision)?;
        if covariance.shape() != precision.shape() {
            anyhow::bail!(
                "covariance {:?} and precision {:?} differ in shape",
                covariance.shape(),
                precision.shape()
            );
        }
        Ok(Self {
            mean,
            precision,
            covariance,
        })
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Marginal standard deviations, `sqrt(diag(Σ))`
    pub fn std_diag(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
    }

    /// `E_q[ln p(θ)]` of this density under another normal `q`
    pub fn expected_ln_pdf(&self, q: &Mvn) -> f64 {
        let dd = self.mean.len() as f64;
        let delta = &q.mean - &self.mean;
        let quad = delta.dot(&(&self.precision * &delta));
        let trace = (&self.precision * &q.covariance).trace();
        -0.5 * dd * (2.0 * std::f64::consts::PI).ln() + 0.5 * self.ln_det_precision()
            - 0.5 * (quad + trace)
    }

    /// `ln |Λ|`, falling back to `-ln |Σ|` through the LU
    /// determinant when Λ is not numerically positive definite
    pub fn ln_det_precision(&self) -> f64 {
        match self.precision.clone().cholesky() {
            Some(chol) => 2.0 * chol.l().diagonal().map(|x| x.ln()).sum(),
            None => -self.covariance.determinant().abs().ln(),
        }
    }
}

impl Inference for Mvn {
    type Mat = DVector<f64>;

    fn posterior_mean(&self) -> DVector<f64> {
        self.mean.clone()
    }

    fn posterior_sd(&self) -> DVector<f64> {
        self.std_diag()
    }

    /// `½ (d (1 + ln 2π) - ln |Λ|)`
    fn entropy(&self) -> f64 {
        let dd = self.mean.len() as f64;
        0.5 * (dd * (1.0 + (2.0 * std::f64::consts::PI).ln()) - self.ln_det_precision())
    }

    fn dim(&self) -> usize {
        self.mean.len()
    }
}

fn check_dims(mean: &DVector<f64>, precision: &DMatrix<f64>) -> anyhow::Result<()> {
    let dd = mean.len();
    if precision.shape() != (dd, dd) {
        anyhow::bail!(
            "mean has {} elements, but the precision matrix is {} x {}",
            dd,
            precision.nrows(),
            precision.ncols()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn diagonal_prior() -> anyhow::Result<()> {
        let prior = Mvn::from_mean_sd(&[6.0, 11.0], &[3.0, 3.0])?;
        assert_relative_eq!(prior.precision()[(0, 0)], 1.0 / 9.0);
        assert_relative_eq!(prior.covariance()[(1, 1)], 9.0, max_relative = 1e-12);
        assert_relative_eq!(prior.std_diag()[0], 3.0, max_relative = 1e-12);
        assert_eq!(prior.dim(), 2);
        Ok(())
    }

    #[test]
    fn entropy_of_standard_normal() -> anyhow::Result<()> {
        let std_normal = Mvn::new(DVector::zeros(3), DMatrix::identity(3, 3))?;
        let expected = 1.5 * (1.0 + (2.0 * std::f64::consts::PI).ln());
        assert_relative_eq!(std_normal.entropy(), expected, max_relative = 1e-12);
        Ok(())
    }

    #[test]
    fn cross_entropy_at_itself() -> anyhow::Result<()> {
        let q = Mvn::from_mean_sd(&[1.0, -1.0], &[0.5, 2.0])?;
        assert_relative_eq!(-q.expected_ln_pdf(&q), q.entropy(), max_relative = 1e-12);

        let p = Mvn::from_mean_sd(&[0.0, 0.0], &[1.0, 1.0])?;
        assert!(-p.expected_ln_pdf(&q) > q.entropy());
        Ok(())
    }

    #[test]
    fn dimension_mismatch() {
        assert!(Mvn::new(DVector::zeros(2), DMatrix::identity(3, 3)).is_err());
        assert!(Mvn::from_mean_sd(&[1.0], &[1.0, 2.0]).is_err());
        assert!(Mvn::from_mean_sd(&[1.0], &[0.0]).is_err());
    }
}
