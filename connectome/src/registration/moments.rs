use super::{AffineTransform, Registration, TransformList, TransformModel};
use crate::error::{ConnectivityError, Result};
use crate::prep::{Volume, VoxelIter};
use tracing::debug;

/// 基于图像矩的配准初始化器。
///
/// 前景为大于`fraction × max`的体素（二值化，不按强度加权），
/// 平移对齐两幅图像前景的质心，仿射模型再按各轴二阶中心矩之比缩放。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MomentRegistration {
    /// 固定图像（通常为平均BOLD）的前景阈值比例。
    pub fixed_fraction: f32,
    /// 运动图像（通常为图谱或模板）的前景阈值比例；0表示所有非零体素。
    pub moving_fraction: f32,
}

impl Default for MomentRegistration {
    fn default() -> Self {
        Self {
            fixed_fraction: 0.1,
            moving_fraction: 0.0,
        }
    }
}

/// 前景的质心与各轴标准差（物理坐标，毫米）。
#[derive(Copy, Clone, Debug)]
struct Moments {
    centroid: [f64; 3],
    spread: [f64; 3],
}

fn moments(image: &Volume, fraction: f32) -> Result<Moments> {
    let frame = image.frame(0);
    let max = frame.iter().copied().filter(|v| v.is_finite()).fold(0.0_f32, f32::max);
    let thr = max * fraction;
    let mut n = 0.0;
    let mut sum = [0.0; 3];
    let mut sq = [0.0; 3];
    for v in VoxelIter::new(image.spatial_shape()) {
        let value = frame[[v.x, v.y, v.z]];
        if value.is_finite() && value > thr && value != 0.0 {
            let p = image.world(v.to_f64());
            n += 1.0;
            for i in 0..3 {
                sum[i] += p[i];
                sq[i] += p[i] * p[i];
            }
        }
    }
    if n == 0.0 {
        return Err(ConnectivityError::EmptyMask);
    }
    let centroid = sum.map(|s| s / n);
    let spread = [0, 1, 2].map(|i| (sq[i] / n - centroid[i] * centroid[i]).max(0.0).sqrt());
    Ok(Moments { centroid, spread })
}

impl Registration for MomentRegistration {
    fn register(
        &self,
        fixed: &Volume,
        moving: &Volume,
        model: TransformModel,
    ) -> Result<TransformList> {
        let f = moments(fixed, self.fixed_fraction)?;
        let m = moments(moving, self.moving_fraction)?;
        let shift = [0, 1, 2].map(|i| m.centroid[i] - f.centroid[i]);
        let forward = match model {
            TransformModel::Identity => AffineTransform::identity(),
            TransformModel::Translation => AffineTransform::translation(shift),
            TransformModel::Affine => {
                let scale = [0, 1, 2].map(|i| {
                    if f.spread[i] > 0.0 && m.spread[i] > 0.0 {
                        m.spread[i] / f.spread[i]
                    } else {
                        1.0
                    }
                });
                AffineTransform::scaling_about(f.centroid, scale, shift)
            }
        };
        debug!(%model, ?shift, "矩配准完成");
        TransformList::from_forward(model, forward)
    }
}
