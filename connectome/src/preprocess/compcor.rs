use crate::error::{ConnectivityError, Result};
use crate::prep::{Mask, Volume};
use nalgebra::{DMatrix, SVD};
use ndarray::{Array2, Axis};
use tracing::{debug, warn};

/// 奇异值平方占总和的比例低于此值的成分视为数值噪声。
const RANK_TOL: f64 = 1e-10;

/// CompCor噪声区域的选取方式。
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NoiseRoi {
    /// 时间方差位于前`1 - quantile`的掩膜内体素（tCompCor）。
    HighVariance { quantile: f64 },
    /// 分割图像中标签属于`labels`的体素，先腐蚀一次（aCompCor）。
    Segmentation { labels: Vec<u32> },
}

impl Default for NoiseRoi {
    fn default() -> Self {
        NoiseRoi::HighVariance { quantile: 0.98 }
    }
}

/// 返回“时间×体素”矩阵中属于噪声区域的列下标（升序）。
pub fn noise_columns(
    matrix: &Array2<f64>,
    mask: &Mask,
    roi: &NoiseRoi,
    segmentation: Option<&Volume>,
) -> Result<Vec<usize>> {
    match roi {
        NoiseRoi::HighVariance { quantile } => {
            if !(0.0..1.0).contains(quantile) {
                return Err(ConnectivityError::InvalidParameter(format!(
                    "noise quantile must be in [0, 1), but got {quantile}"
                )));
            }
            let var = matrix.var_axis(Axis(0), 0.0);
            let mut sorted = var.to_vec();
            sorted.sort_by(f64::total_cmp);
            let k = ((sorted.len() as f64 - 1.0) * quantile).ceil() as usize;
            let thr = sorted.get(k).copied().unwrap_or(f64::INFINITY);
            Ok((0..var.len()).filter(|&j| var[j] >= thr && var[j] > 0.0).collect())
        }
        NoiseRoi::Segmentation { labels } => {
            let seg = segmentation.ok_or_else(|| {
                ConnectivityError::InvalidParameter(
                    "segmentation noise ROI requires a segmentation image".to_string(),
                )
            })?;
            mask.check_same_grid("segmentation image", seg.spatial_shape())?;
            let grid = seg
                .frame(0)
                .map(|&v| v >= 0.5 && labels.contains(&(v.round() as u32)));
            let tissue = match Mask::from_grid(grid) {
                Ok(t) => t,
                Err(ConnectivityError::EmptyMask) => {
                    warn!(?labels, "分割图像中没有噪声组织");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };
            let eroded = match tissue.erode() {
                Ok(e) => e,
                Err(_) => {
                    warn!("噪声组织腐蚀后为空，改用未腐蚀的区域");
                    tissue
                }
            };
            let noise = match eroded.intersect(mask) {
                Ok(n) => n,
                Err(ConnectivityError::EmptyMask) => {
                    warn!("噪声组织不在脑掩膜内");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };
            Ok(mask
                .voxels()
                .iter()
                .enumerate()
                .filter(|(_, v)| noise.contains(**v))
                .map(|(j, _)| j)
                .collect())
        }
    }
}

/// 噪声体素时间序列的前`n_components`个主成分（T×n，每列单位范数）。
///
/// 各列先去均值并除以标准差，常数列被忽略。主成分是标准化矩阵的左奇异向量，
/// 按奇异值降序排列，符号约定为绝对值最大的元素为正，因此结果是确定的。
/// 噪声信号不足时返回的列数可能少于`n_components`。
pub fn compcor(noise: &Array2<f64>, n_components: usize) -> Array2<f64> {
    let n_frames = noise.nrows();
    if n_components == 0 || n_frames < 2 || noise.ncols() == 0 {
        return Array2::zeros((n_frames, 0));
    }
    let mut x = noise.clone();
    for mut column in x.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / n_frames as f64;
        column -= mean;
        let sd = (column.dot(&column) / n_frames as f64).sqrt();
        if sd > 1e-12 {
            column /= sd;
        } else {
            column.fill(0.0);
        }
    }

    let x = DMatrix::from_fn(n_frames, x.ncols(), |i, j| x[[i, j]]);
    let SVD {
        u, singular_values, ..
    } = x.svd(true, false);
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    let u = match u {
        Some(u) if total > 0.0 && total.is_finite() => u,
        _ => return Array2::zeros((n_frames, 0)),
    };
    let mut order: Vec<usize> = (0..singular_values.len()).collect();
    order.sort_by(|&a, &b| singular_values[b].total_cmp(&singular_values[a]));
    let picked: Vec<usize> = order
        .into_iter()
        .take(n_components)
        .take_while(|&k| singular_values[k].powi(2) > RANK_TOL * total)
        .collect();
    if picked.len() < n_components {
        warn!(
            requested = n_components,
            found = picked.len(),
            "CompCor成分不足"
        );
    }

    let mut out = Array2::<f64>::zeros((n_frames, picked.len()));
    for (mut column, &k) in out.axis_iter_mut(Axis(1)).zip(&picked) {
        for (t, v) in column.iter_mut().enumerate() {
            *v = u[(t, k)];
        }
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |a, b| if b.abs() > a.abs() { b } else { a });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }
    debug!(components = out.ncols(), "CompCor完成");
    out
}
