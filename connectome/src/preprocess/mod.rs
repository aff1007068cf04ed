//! BOLD序列预处理：运动校正、干扰回归、带通滤波与空间平滑。

pub mod compcor;
pub mod filter;
pub mod motion;
pub mod quality;
pub mod regress;
pub mod smooth;

pub use compcor::{compcor, noise_columns, NoiseRoi};
pub use filter::band_pass;
pub use motion::{correct_motion, MotionParameters};
pub use quality::{censor, dvars, global_signal};
pub use regress::{regress_out, Regression};
pub use smooth::smooth;

use crate::error::{ConnectivityError, Result};
use crate::prep::{matrix_to_time_series, time_series_to_matrix, Mask, StageTimer, Volume};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// 运动参数列名。
const MOTION_NAMES: [&str; 6] = ["tx", "ty", "tz", "rx", "ry", "rz"];

/// 预处理选项。所有字段都有默认值，可直接作为配置文件中的`[preprocess]`节。
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessOptions {
    /// 是否做运动校正。
    pub motion_correction: bool,
    /// 外部计算的运动参数文件（T行×6列）；给出时替代质心估计。
    pub motion_parameters: Option<PathBuf>,
    /// CompCor成分个数；0表示不做CompCor。
    pub compcor_components: usize,
    pub noise_roi: NoiseRoi,
    /// 是否把6个运动参数作为干扰回归量。
    pub regress_motion: bool,
    /// 是否回归全局信号。
    pub regress_global_signal: bool,
    /// 带通频带`[low, high]`（Hz）；`None`表示不滤波。
    pub band_pass: Option<[f64; 2]>,
    /// 高斯平滑核的FWHM（毫米）；0表示不平滑。
    pub smoothing_fwhm: f64,
    /// FD超过此值（毫米）的帧被标记。
    pub fd_threshold: f64,
    /// 是否在计算相关前删除被标记的帧。
    pub scrub: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            motion_correction: true,
            motion_parameters: None,
            compcor_components: 6,
            noise_roi: NoiseRoi::default(),
            regress_motion: true,
            regress_global_signal: false,
            band_pass: Some([0.01, 0.1]),
            smoothing_fwhm: 6.0,
            fd_threshold: 0.5,
            scrub: false,
        }
    }
}

impl PreprocessOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some([low, high]) = self.band_pass {
            if !(low >= 0.0 && low < high) {
                return Err(ConnectivityError::InvalidParameter(format!(
                    "band-pass edges must satisfy 0 <= low < high, but got [{low}, {high}]"
                )));
            }
        }
        if !(self.smoothing_fwhm >= 0.0 && self.smoothing_fwhm.is_finite()) {
            return Err(ConnectivityError::InvalidParameter(format!(
                "smoothing FWHM must be non-negative, but got {}",
                self.smoothing_fwhm
            )));
        }
        if !(self.fd_threshold > 0.0) {
            return Err(ConnectivityError::InvalidParameter(format!(
                "FD threshold must be positive, but got {}",
                self.fd_threshold
            )));
        }
        if let NoiseRoi::HighVariance { quantile } = self.noise_roi {
            if !(0.0..1.0).contains(&quantile) {
                return Err(ConnectivityError::InvalidParameter(format!(
                    "noise quantile must be in [0, 1), but got {quantile}"
                )));
            }
        }
        Ok(())
    }
}

/// 预处理结果。
#[derive(Clone, Debug)]
pub struct PreprocessOutput {
    /// 清洗后的4D图像，掩膜外为0。
    pub cleaned: Volume,
    /// 清洗后的“时间×体素”矩阵。
    pub matrix: Array2<f64>,
    pub framewise_displacement: Vec<f64>,
    pub dvars: Vec<f64>,
    pub global_signal: Vec<f64>,
    /// 实际回归掉的干扰矩阵（T×K）及各列名称。
    pub nuisance: Array2<f64>,
    pub nuisance_names: Vec<String>,
    pub motion: MotionParameters,
    /// FD超过阈值的帧。
    pub censored: Vec<bool>,
}

impl PreprocessOutput {
    pub fn n_censored(&self) -> usize {
        self.censored.iter().filter(|&&c| c).count()
    }
}

/// 对4D BOLD图像做完整的预处理。
///
/// 顺序为：运动估计与校正 → FD/DVARS/全局信号 → 干扰回归（运动参数、CompCor、
/// 可选全局信号）→ 带通滤波 → 掩膜内平滑。`segmentation`只在噪声区域取
/// `NoiseRoi::Segmentation`时需要。
pub fn preprocess_bold(
    image: &Volume,
    mask: &Mask,
    options: &PreprocessOptions,
    segmentation: Option<&Volume>,
) -> Result<PreprocessOutput> {
    if image.ndim() != 4 {
        return Err(ConnectivityError::DimensionMismatch {
            expected: 4,
            found: image.ndim(),
        });
    }
    options.validate()?;
    mask.check_same_grid("BOLD image", image.spatial_shape())?;
    if let Some(seg) = segmentation {
        mask.check_same_grid("segmentation image", seg.spatial_shape())?;
    }
    let n_frames = image.n_frames();
    let mut timer = StageTimer::new();

    info!("运动校正");
    let motion = match &options.motion_parameters {
        Some(path) => MotionParameters::read(path)?,
        None if options.motion_correction => MotionParameters::estimate(image, mask)?,
        None => MotionParameters::from_array(Array2::zeros((n_frames, 6)))?,
    };
    let corrected = if options.motion_correction {
        correct_motion(image, &motion)?
    } else if motion.n_frames() != n_frames {
        return Err(ConnectivityError::InvalidMotionParameters(format!(
            "{} rows for an image with {n_frames} frames",
            motion.n_frames()
        )));
    } else {
        image.clone()
    };
    timer.finish("motion");

    timer.start();
    let raw = time_series_to_matrix(&corrected, mask)?;
    let framewise_displacement = motion.framewise_displacement();
    let dvars = dvars(&raw);
    let global_signal = global_signal(&raw);
    let censored = censor(&framewise_displacement, options.fd_threshold);

    info!("干扰回归");
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut nuisance_names = Vec::new();
    if options.regress_motion {
        for (j, name) in MOTION_NAMES.iter().enumerate() {
            let column = motion.matrix().column(j).to_vec();
            if varies(&column) {
                columns.push(column);
                nuisance_names.push(name.to_string());
            } else {
                debug!(parameter = name, "运动参数恒定或含非有限值，不参与回归");
            }
        }
    }
    if options.compcor_components > 0 {
        let noise_idx = noise_columns(&raw, mask, &options.noise_roi, segmentation)?;
        let noise = raw.select(Axis(1), &noise_idx);
        let comps = compcor(&noise, options.compcor_components);
        for (k, c) in comps.axis_iter(Axis(1)).enumerate() {
            columns.push(c.to_vec());
            nuisance_names.push(format!("compcor{}", k + 1));
        }
    }
    if options.regress_global_signal {
        columns.push(global_signal.clone());
        nuisance_names.push("global_signal".to_string());
    }
    let mut nuisance = Array2::<f64>::zeros((n_frames, columns.len()));
    for (k, c) in columns.iter().enumerate() {
        for (t, v) in c.iter().enumerate() {
            nuisance[[t, k]] = *v;
        }
    }
    let regression = regress_out(&raw, &nuisance)?;
    let nuisance = nuisance.select(Axis(1), &regression.kept);
    let nuisance_names: Vec<String> = regression
        .kept
        .iter()
        .map(|&k| nuisance_names[k].clone())
        .collect();
    let mut matrix = regression.residual;
    timer.finish("nuisance");

    if let Some([low, high]) = options.band_pass {
        info!(low, high, "带通滤波");
        timer.start();
        matrix = band_pass(&matrix, image.repetition_time(), low, high)?;
        timer.finish("band-pass");
    }

    let mut cleaned = matrix_to_time_series(&matrix, mask, &corrected)?;
    if options.smoothing_fwhm > 0.0 {
        info!(fwhm = options.smoothing_fwhm, "空间平滑");
        timer.start();
        cleaned = smooth(&cleaned, mask, options.smoothing_fwhm)?;
        matrix = time_series_to_matrix(&cleaned, mask)?;
        timer.finish("smoothing");
    }
    info!(
        frames = n_frames,
        voxels = mask.len(),
        regressors = nuisance.ncols(),
        censored = censored.iter().filter(|&&c| c).count(),
        ms = timer.get_total_ms(),
        "预处理完成"
    );

    Ok(PreprocessOutput {
        cleaned,
        matrix,
        framewise_displacement,
        dvars,
        global_signal,
        nuisance,
        nuisance_names,
        motion,
        censored,
    })
}

/// 列中全部为有限值且不全相等。
fn varies(column: &[f64]) -> bool {
    match column.first() {
        Some(&first) => {
            column.iter().all(|v| v.is_finite()) && column.iter().any(|&v| v != first)
        }
        None => false,
    }
}
