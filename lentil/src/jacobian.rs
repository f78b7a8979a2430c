//! Central finite differences, used whenever a model answers
//! [`JacobianOutput::UseFiniteDifference`](crate::JacobianOutput).

use crate::errors::BayesError;
use crate::model_error::{DerivativeBlock, ModelError, SensorJacobians};
use crate::parameters::ParameterList;
use nalgebra::{DMatrix, DVector};

pub const DEFAULT_FD_STEP: f64 = 1e-6;

/// Step for a component currently at `x`
pub fn fd_step(x: f64, eps: f64) -> f64 {
    eps * x.abs().max(1.0)
}

/// Derivatives of a function returning several vector blocks
///
/// Returns one matrix per block, `rows = block length`,
/// `cols = theta.len()`.
///
/// * `func` - evaluated at `theta ± h e_j` for every component `j`
/// * `theta` - expansion point
/// * `eps` - relative step size
pub fn central_difference_blocks<F>(
    mut func: F,
    theta: &DVector<f64>,
    eps: f64,
) -> anyhow::Result<Vec<DMatrix<f64>>>
where
    F: FnMut(&DVector<f64>) -> anyhow::Result<Vec<DVector<f64>>>,
{
    let dd = theta.len();
    let mut jacobians: Vec<DMatrix<f64>> = vec![];
    let mut x = theta.clone();

    for j in 0..dd {
        let h = fd_step(theta[j], eps);

        x[j] = theta[j] + h;
        let upper = func(&x)?;
        x[j] = theta[j] - h;
        let lower = func(&x)?;
        x[j] = theta[j];

        if j == 0 {
            jacobians = upper.iter().map(|b| DMatrix::zeros(b.len(), dd)).collect();
        }

        if upper.len() != jacobians.len() || lower.len() != jacobians.len() {
            anyhow::bail!(BayesError::Dimension(format!(
                "the number of output blocks changed between evaluations: {}, {}, {}",
                jacobians.len(),
                upper.len(),
                lower.len()
            )));
        }

        for ((jac, up), lo) in jacobians.iter_mut().zip(upper.iter()).zip(lower.iter()) {
            if up.len() != jac.nrows() || lo.len() != jac.nrows() {
                anyhow::bail!(BayesError::Dimension(format!(
                    "output length changed between evaluations: {} vs {} / {}",
                    jac.nrows(),
                    up.len(),
                    lo.len()
                )));
            }
            jac.column_mut(j).copy_from(&((up - lo) / (2.0 * h)));
        }
    }

    Ok(jacobians)
}

/// `d func / d theta` of a single vector function
pub fn central_difference<F>(
    mut func: F,
    theta: &DVector<f64>,
    eps: f64,
) -> anyhow::Result<DMatrix<f64>>
where
    F: FnMut(&DVector<f64>) -> anyhow::Result<DVector<f64>>,
{
    let nn = func(theta)?.len();
    let mut blocks = central_difference_blocks(|x| Ok(vec![func(x)?]), theta, eps)?;
    Ok(blocks.pop().unwrap_or_else(|| DMatrix::zeros(nn, 0)))
}

/// Finite-difference Jacobian of a model error with respect to its
/// local parameters, in the shape an analytic Jacobian would have
///
/// * `model` - the model error
/// * `parameters` - current local values; every name must be set
/// * `local_names` - parameters to differentiate
/// * `eps` - relative step size
pub fn model_error_jacobian(
    model: &dyn ModelError,
    parameters: &ParameterList,
    local_names: &[&str],
    eps: f64,
) -> anyhow::Result<SensorJacobians> {
    let sensors = model
        .evaluate(parameters)?
        .into_blocks()
        .into_iter()
        .map(|(s, _)| s)
        .collect::<Vec<_>>();

    let mut perturbed = parameters.clone();
    let mut ret = SensorJacobians::new();

    for &name in local_names {
        let value = parameters.get(name)?.clone();

        let blocks = central_difference_blocks(
            |x| {
                perturbed.assign_slice(name, x.as_slice())?;
                let out = model.evaluate(&perturbed)?.into_blocks();
                Ok(out.into_iter().map(|(_, v)| v).collect())
            },
            &value,
            eps,
        )?;
        perturbed.assign_slice(name, value.as_slice())?;

        if blocks.len() != sensors.len() {
            anyhow::bail!(BayesError::Dimension(format!(
                "model error reported {} sensors, but {} while perturbing `{}`",
                sensors.len(),
                blocks.len(),
                name
            )));
        }

        for (sensor, block) in sensors.iter().zip(blocks) {
            ret.push(sensor.as_deref(), name, DerivativeBlock::Matrix(block));
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_error::{ModelOutput, SensorOutputs};
    use approx::assert_abs_diff_eq;

    #[test]
    fn quadratic() -> anyhow::Result<()> {
        let theta = DVector::from_vec(vec![1.0, -2.0]);
        let jac = central_difference(
            |x| Ok(DVector::from_vec(vec![x[0] * x[0], x[0] * x[1], 3.0 * x[1]])),
            &theta,
            DEFAULT_FD_STEP,
        )?;
        let expected = DMatrix::from_row_slice(3, 2, &[2.0, 0.0, -2.0, 1.0, 0.0, 3.0]);
        assert_abs_diff_eq!(jac, expected, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn local_model_error() -> anyhow::Result<()> {
        let xs = DVector::from_vec(vec![0.0, 1.0, 2.0]);
        let xs_model = xs.clone();
        let model = move |prm: &ParameterList| -> anyhow::Result<ModelOutput> {
            let a = prm.scalar("a")?;
            let b = prm.get("b")?;
            let u = xs_model.map(|x| a * x + b[0] + b[1] * x * x);
            Ok(SensorOutputs::new().with("u", u).into())
        };

        let mut prm = ParameterList::new();
        prm.set_scalar("a", 2.0)?;
        prm.set("b", DVector::from_vec(vec![1.0, 0.5]))?;

        let jac = model_error_jacobian(&model, &prm, &["b", "a"], DEFAULT_FD_STEP)?;
        let d_a = jac.get(Some("u"), "a").map(|b| b.to_matrix());
        let d_b = jac.get(Some("u"), "b").map(|b| b.to_matrix());

        let expected = DMatrix::from_column_slice(3, 1, xs.as_slice());
        assert_abs_diff_eq!(d_a.unwrap(), expected, epsilon = 1e-6);
        let d_b = d_b.unwrap();
        assert_eq!(d_b.shape(), (3, 2));
        assert_abs_diff_eq!(d_b[(2, 1)], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(d_b[(1, 0)], 1.0, epsilon = 1e-6);

        // the caller's list is untouched
        assert_eq!(prm.scalar("a")?, 2.0);
        Ok(())
    }
}
