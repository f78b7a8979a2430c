/// Summary statistics of a fitted (or prior) distribution
pub trait Inference {
    type Mat;

    fn posterior_mean(&self) -> Self::Mat;
    fn posterior_sd(&self) -> Self::Mat;

    /// differential entropy of the distribution
    fn entropy(&self) -> f64;

    fn dim(&self) -> usize;
}
