//! Mean-field variational Bayes for one or more coupled model errors
//! that share latent parameters.
//!
//! An [`InferenceProblem`] owns the model errors, their parameter lists
//! and the noise groups; [`LatentParameters`] translates one flat global
//! parameter vector to and from every local view. The
//! [`VariationalBayesProblem`] adds priors and drives
//! [`variational_bayes`].

pub mod errors;
pub mod inference_problem;
pub mod jacobian;
pub mod latent;
pub mod model_error;
pub mod noise;
pub mod parameters;
pub mod vb;
pub mod vb_problem;

pub use errors::BayesError;
pub use inference_problem::InferenceProblem;
pub use latent::{LatentLayout, LatentParameter, LatentParameters, Owner};
pub use model_error::{
    DerivativeBlock, GroupTag, JacobianGroups, JacobianOutput, ModelError, ModelOutput,
    ModelResponses, SensorJacobians, SensorOutputs,
};
pub use noise::{NoiseModel, SingleSensorNoise, UncorrelatedNoiseTerm, UncorrelatedSensorNoise};
pub use parameters::{ParameterArena, ParameterList};
pub use vb::{
    mvn_prior, variational_bayes, ClosureModel, NoiseMap, VariationalBayesInterface,
    VariationalBayesSolver, VbJacobian, VbOptions, VbResult, DEFAULT_NOISE_KEY,
};
pub use vb_problem::VariationalBayesProblem;

pub use matrix_param::{Gamma, Mvn};
pub use nalgebra::{DMatrix, DVector};
