use crate::traits::*;
use log::warn;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

type Mat = DMatrix<f64>;
type Vec64 = DVector<f64>;

/// maximum number of jitter escalations before the pseudo-inverse
const MAX_JITTER_STEPS: usize = 8;

impl BlockOps for Mat {
    type Mat = Mat;
    type Scalar = f64;

    fn vstack(blocks: &[Mat]) -> anyhow::Result<Mat> {
        let ncols = match blocks.first() {
            Some(b) => b.ncols(),
            None => return Ok(Mat::zeros(0, 0)),
        };

        if let Some(bad) = blocks.iter().find(|b| b.ncols() != ncols) {
            anyhow::bail!(
                "can't stack blocks with {} and {} columns",
                ncols,
                bad.ncols()
            );
        }

        let nrows = blocks.iter().map(|b| b.nrows()).sum::<usize>();
        let mut ret = Mat::zeros(nrows, ncols);
        let mut lb = 0;
        for b in blocks {
            ret.view_mut((lb, 0), (b.nrows(), ncols)).copy_from(b);
            lb += b.nrows();
        }
        Ok(ret)
    }

    fn paste_columns(&mut self, block: &Mat, start: usize) -> anyhow::Result<()> {
        if block.nrows() != self.nrows() {
            anyhow::bail!(
                "block has {} rows, but the target has {}",
                block.nrows(),
                self.nrows()
            );
        }
        let end = start + block.ncols();
        if end > self.ncols() {
            anyhow::bail!(
                "columns [{}, {}) out of range for {} columns",
                start,
                end,
                self.ncols()
            );
        }
        self.view_mut((0, start), (self.nrows(), block.ncols()))
            .copy_from(block);
        Ok(())
    }
}

impl SpdInverseOps for Mat {
    type Mat = Mat;
    type Scalar = f64;

    fn spd_inverse(&self, jitter: f64) -> anyhow::Result<SpdInverse<Mat>> {
        if !self.is_square() {
            anyhow::bail!(
                "can't invert a non-square {} x {} matrix",
                self.nrows(),
                self.ncols()
            );
        }

        if let Some(chol) = self.clone().cholesky() {
            let inverse = chol.inverse();
            if all_finite(&inverse) {
                return Ok(SpdInverse {
                    inverse,
                    method: InverseMethod::Cholesky,
                });
            }
        }

        let dd = self.nrows();
        let mut lambda = jitter.max(f64::EPSILON);
        for _ in 0..MAX_JITTER_STEPS {
            let regularized = self + Mat::identity(dd, dd) * lambda;
            if let Some(chol) = regularized.cholesky() {
                let inverse = chol.inverse();
                if all_finite(&inverse) {
                    warn!("regularized inverse with jitter {:.3e}", lambda);
                    return Ok(SpdInverse {
                        inverse,
                        method: InverseMethod::Regularized(lambda),
                    });
                }
            }
            lambda *= 100.0;
        }

        let inverse = self
            .clone()
            .pseudo_inverse(f64::EPSILON.sqrt())
            .map_err(anyhow::Error::msg)?;

        if !all_finite(&inverse) {
            anyhow::bail!("pseudo-inverse produced non-finite values");
        }

        warn!("fell back to the pseudo-inverse of a {} x {} matrix", dd, dd);
        Ok(SpdInverse {
            inverse,
            method: InverseMethod::PseudoInverse,
        })
    }
}

impl SampleOps for Mat {
    type Mat = Mat;
    type Scalar = f64;

    fn runif_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Mat {
        Mat::from_fn(dd, nn, |_, _| rng.random::<f64>())
    }

    fn rnorm_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Mat {
        Mat::from_fn(dd, nn, |_, _| rng.sample::<f64, _>(StandardNormal))
    }
}

/// Concatenate vectors end to end
pub fn concat_vectors(vectors: &[Vec64]) -> Vec64 {
    let ntot = vectors.iter().map(|v| v.len()).sum::<usize>();
    let mut ret = Vec64::zeros(ntot);
    let mut lb = 0;
    for v in vectors {
        ret.rows_mut(lb, v.len()).copy_from(v);
        lb += v.len();
    }
    ret
}

/// Promote a vector to a single-column matrix
pub fn as_column(v: &Vec64) -> Mat {
    Mat::from_column_slice(v.len(), 1, v.as_slice())
}

/// `n` evenly spaced points over `[lb, ub]`
pub fn linspace(lb: f64, ub: f64, n: usize) -> Vec64 {
    if n < 2 {
        return Vec64::from_element(n, lb);
    }
    let step = (ub - lb) / (n - 1) as f64;
    Vec64::from_fn(n, |i, _| lb + step * i as f64)
}

/// `(X + X') / 2`
pub fn symmetrize(xx: &Mat) -> Mat {
    (xx + xx.transpose()) * 0.5
}

pub fn all_finite(xx: &Mat) -> bool {
    xx.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn vstack_keeps_row_order() -> anyhow::Result<()> {
        let a = Mat::from_element(2, 3, 1.0);
        let b = Mat::from_element(1, 3, 2.0);
        let c = Mat::vstack(&[a, b])?;
        assert_eq!(c.shape(), (3, 3));
        assert_eq!(c[(1, 2)], 1.0);
        assert_eq!(c[(2, 0)], 2.0);

        let bad = Mat::vstack(&[Mat::zeros(1, 2), Mat::zeros(1, 3)]);
        assert!(bad.is_err());
        Ok(())
    }

    #[test]
    fn paste_columns_leaves_the_rest_zero() -> anyhow::Result<()> {
        let mut xx = Mat::zeros(2, 5);
        xx.paste_columns(&Mat::from_element(2, 2, 3.0), 1)?;
        assert_eq!(xx.column(0).sum(), 0.0);
        assert_eq!(xx.column(1).sum(), 6.0);
        assert_eq!(xx.column(2).sum(), 6.0);
        assert_eq!(xx.columns(3, 2).sum(), 0.0);

        assert!(xx.paste_columns(&Mat::zeros(2, 2), 4).is_err());
        assert!(xx.paste_columns(&Mat::zeros(3, 1), 0).is_err());
        Ok(())
    }

    #[test]
    fn spd_inverse_routes() -> anyhow::Result<()> {
        let xx = Mat::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = xx.spd_inverse(1e-10)?;
        assert_eq!(inv.method, InverseMethod::Cholesky);
        assert_abs_diff_eq!(&xx * &inv.inverse, Mat::identity(2, 2), epsilon = 1e-12);

        let singular = Mat::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let inv = singular.spd_inverse(1e-10)?;
        assert!(inv.is_regularized());
        assert!(all_finite(&inv.inverse));
        Ok(())
    }

    #[test]
    fn concat_and_promote() {
        let v = concat_vectors(&[Vec64::from_vec(vec![1.0, 2.0]), Vec64::from_vec(vec![3.0])]);
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);
        let col = as_column(&v);
        assert_eq!(col.shape(), (3, 1));
        assert_eq!(col[(2, 0)], 3.0);
    }

    #[test]
    fn seeded_sampling_repeats() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let a = Mat::rnorm_with(3, 400, &mut StdRng::seed_from_u64(1));
        let b = Mat::rnorm_with(3, 400, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert!(a.mean().abs() < 0.2);

        let u = Mat::runif_with(10, 10, &mut StdRng::seed_from_u64(2));
        assert!(u.iter().all(|&x| (0.0..1.0).contains(&x)));
    }

    #[test]
    fn linspace_endpoints() {
        let xs = linspace(0.01, 0.1, 10);
        assert_abs_diff_eq!(xs[0], 0.01);
        assert_abs_diff_eq!(xs[9], 0.1, epsilon = 1e-15);
        assert_abs_diff_eq!(xs[1] - xs[0], 0.01, epsilon = 1e-15);
    }
}
