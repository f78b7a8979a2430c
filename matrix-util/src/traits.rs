use rand::Rng;

/// Stack, paste and reshape dense blocks
pub trait BlockOps {
    type Mat;
    type Scalar;

    /// Stack matrices on top of each other; all blocks must share the
    /// number of columns.
    fn vstack(blocks: &[Self::Mat]) -> anyhow::Result<Self::Mat>;

    /// `self[:, start..start + block.ncols()] = block`
    /// * `block` - must have `self.nrows()` rows
    /// * `start` - first column to overwrite
    fn paste_columns(&mut self, block: &Self::Mat, start: usize) -> anyhow::Result<()>;
}

/// Inverse of a symmetric positive (semi-)definite matrix
pub trait SpdInverseOps {
    type Mat;
    type Scalar;

    /// Invert with Cholesky first, then with an increasing diagonal
    /// jitter, and finally with the SVD pseudo-inverse.
    ///
    /// * `jitter` - first diagonal regularization tried when the Cholesky
    ///   factorization fails
    fn spd_inverse(&self, jitter: Self::Scalar) -> anyhow::Result<SpdInverse<Self::Mat>>;
}

/// Which route produced an inverse
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InverseMethod {
    Cholesky,
    Regularized(f64),
    PseudoInverse,
}

#[derive(Debug, Clone)]
pub struct SpdInverse<M> {
    pub inverse: M,
    pub method: InverseMethod,
}

impl<M> SpdInverse<M> {
    /// `true` unless a plain Cholesky inverse was possible
    pub fn is_regularized(&self) -> bool {
        self.method != InverseMethod::Cholesky
    }
}

/// Operations to sample random matrices with a caller-provided
/// random number generator
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize) -> Self::Mat {
        Self::runif_with(dd, nn, &mut rand::rng())
    }

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize) -> Self::Mat {
        Self::rnorm_with(dd, nn, &mut rand::rng())
    }
}
