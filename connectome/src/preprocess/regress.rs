use crate::error::{ConnectivityError, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Axis};
use tracing::{debug, warn};

/// QR分解中对角元低于此值（相对原列范数）的回归量视为与已有回归量共线，丢弃。
const COLLINEAR_TOL: f64 = 1e-8;

/// 干扰回归的结果。
#[derive(Clone, Debug)]
pub struct Regression {
    /// 回归后的残差（T×V）。
    pub residual: Array2<f64>,
    /// 实际进入设计矩阵的`nuisance`列下标（升序）。
    pub kept: Vec<usize>,
}

/// 用最小二乘从“时间×体素”矩阵中回归掉`nuisance`（T×K）的各列与截距。
///
/// 设计矩阵逐列做QR分解：全零、含非有限值或与已有列共线的回归量会被丢弃，
/// 因此不会因设计矩阵奇异而失败。保留的回归量（含截距）个数必须小于帧数。
pub fn regress_out(matrix: &Array2<f64>, nuisance: &Array2<f64>) -> Result<Regression> {
    let n_frames = matrix.nrows();
    if nuisance.nrows() != n_frames {
        return Err(ConnectivityError::shape(
            "nuisance matrix",
            &[n_frames, nuisance.ncols()],
            &[nuisance.nrows(), nuisance.ncols()],
        ));
    }
    if n_frames == 0 {
        return Ok(Regression {
            residual: matrix.clone(),
            kept: Vec::new(),
        });
    }

    let (kept, q) = design_basis(nuisance);
    if q.ncols() >= n_frames {
        return Err(ConnectivityError::InvalidParameter(format!(
            "{} regressors leave no degrees of freedom for {n_frames} frames",
            q.ncols()
        )));
    }
    let dropped = nuisance.ncols() - kept.len();
    if dropped > 0 {
        warn!(dropped, "丢弃了常数或共线的干扰回归量");
    }

    // residual = Y - Q (Qᵀ Y)
    let coef = q.t().dot(matrix);
    let residual = matrix - &q.dot(&coef);
    debug!(regressors = q.ncols(), "干扰回归完成");
    Ok(Regression { residual, kept })
}

/// 截距列与`nuisance`中可用各列构成的设计矩阵的正交基Q（T×r），以及被保留的列下标。
fn design_basis(nuisance: &Array2<f64>) -> (Vec<usize>, Array2<f64>) {
    let n = nuisance.nrows();
    let mut columns = vec![DVector::from_element(n, 1.0)];
    let mut kept = Vec::new();
    for (j, column) in nuisance.axis_iter(Axis(1)).enumerate() {
        if columns.len() >= n {
            break;
        }
        let v = DVector::from_iterator(n, column.iter().copied());
        let norm = v.norm();
        if !(norm > 0.0 && norm.is_finite()) {
            continue;
        }
        columns.push(v);
        let k = columns.len() - 1;
        let r = DMatrix::from_columns(&columns).qr().r();
        if r[(k, k)].abs() > COLLINEAR_TOL * norm {
            kept.push(j);
        } else {
            columns.pop();
        }
    }
    let q = DMatrix::from_columns(&columns).qr().q();
    let q = Array2::from_shape_fn((n, q.ncols()), |(i, k)| q[(i, k)]);
    (kept, q)
}
