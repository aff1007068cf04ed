//! 把图谱配准到BOLD空间。
//!
//! 变换采用“固定图像物理坐标 → 运动图像物理坐标”的方向：
//! `apply_transform`在固定图像网格的每个体素中心求出它在运动图像中的位置并采样。

mod interp;
mod moments;

pub use interp::Interpolation;
pub use moments::MomentRegistration;

pub(crate) use interp::sample_linear;

use crate::error::{ConnectivityError, Result};
use crate::prep::{Volume, VoxelIter};
use ndarray::{Array3, Array4, Axis};
use tracing::debug;

/// 变换模型。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformModel {
    Identity,
    /// 只做平移。
    Translation,
    /// 各轴独立缩放加平移。
    Affine,
}

impl TransformModel {
    pub fn name(self) -> &'static str {
        match self {
            TransformModel::Identity => "identity",
            TransformModel::Translation => "translation",
            TransformModel::Affine => "affine",
        }
    }
}

impl std::fmt::Display for TransformModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TransformModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "identity" => Ok(TransformModel::Identity),
            "translation" => Ok(TransformModel::Translation),
            "affine" => Ok(TransformModel::Affine),
            _ => Err(format!("unknown transform model `{s}`")),
        }
    }
}

/// 仿射变换`p -> linear * p + offset`，坐标单位为毫米。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AffineTransform {
    pub linear: [[f64; 3]; 3],
    pub offset: [f64; 3],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub const fn identity() -> Self {
        Self {
            linear: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            offset: [0.0; 3],
        }
    }

    pub const fn translation(t: [f64; 3]) -> Self {
        Self {
            linear: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            offset: t,
        }
    }

    /// 以`center`为不动点、各轴缩放`scale`，再平移`shift`。
    pub fn scaling_about(center: [f64; 3], scale: [f64; 3], shift: [f64; 3]) -> Self {
        let mut linear = [[0.0; 3]; 3];
        let mut offset = [0.0; 3];
        for i in 0..3 {
            linear[i][i] = scale[i];
            offset[i] = center[i] - scale[i] * center[i] + shift[i];
        }
        Self { linear, offset }
    }

    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.linear;
        [0, 1, 2].map(|i| m[i][0] * p[0] + m[i][1] * p[1] + m[i][2] * p[2] + self.offset[i])
    }

    /// 先做`first`再做`self`。
    pub fn after(&self, first: &AffineTransform) -> AffineTransform {
        let a = &self.linear;
        let b = &first.linear;
        let mut linear = [[0.0; 3]; 3];
        for (i, row) in linear.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        let offset = self.apply(first.offset);
        AffineTransform { linear, offset }
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.linear;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// 逆变换。线性部分奇异时返回`SingularMatrix`。
    pub fn inverse(&self) -> Result<AffineTransform> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return Err(ConnectivityError::SingularMatrix);
        }
        let m = &self.linear;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        let inv = [
            [cof(1, 2, 1, 2), -cof(0, 2, 1, 2), cof(0, 1, 1, 2)],
            [-cof(1, 2, 0, 2), cof(0, 2, 0, 2), -cof(0, 1, 0, 2)],
            [cof(1, 2, 0, 1), -cof(0, 2, 0, 1), cof(0, 1, 0, 1)],
        ]
        .map(|row| row.map(|v| v / det));
        let linear_only = AffineTransform {
            linear: inv,
            offset: [0.0; 3],
        };
        let t = linear_only.apply(self.offset);
        Ok(AffineTransform {
            linear: inv,
            offset: t.map(|v| -v),
        })
    }
}

/// 一次配准的结果：正向变换（固定 → 运动）与逆向变换（运动 → 固定）。
///
/// 两个列表都按应用顺序排列。
#[derive(Clone, Debug, PartialEq)]
pub struct TransformList {
    pub model: TransformModel,
    pub forward: Vec<AffineTransform>,
    pub inverse: Vec<AffineTransform>,
}

impl TransformList {
    /// 由单个正向变换构造，逆向列表自动求出。
    pub fn from_forward(model: TransformModel, forward: AffineTransform) -> Result<Self> {
        let inverse = forward.inverse()?;
        Ok(Self {
            model,
            forward: vec![forward],
            inverse: vec![inverse],
        })
    }

    /// 把正向列表合成为一个变换。
    pub fn composed(&self) -> AffineTransform {
        compose(&self.forward)
    }
}

fn compose(transforms: &[AffineTransform]) -> AffineTransform {
    transforms
        .iter()
        .fold(AffineTransform::identity(), |acc, t| t.after(&acc))
}

/// 配准算法的接口：求把`fixed`物理坐标映射到`moving`物理坐标的变换。
pub trait Registration {
    fn register(
        &self,
        fixed: &Volume,
        moving: &Volume,
        model: TransformModel,
    ) -> Result<TransformList>;
}

/// 按`transforms`（依次应用）把`moving`重采样到`fixed`的网格上。
///
/// 运动图像为4D时逐帧重采样；视野外的体素取0。
pub fn apply_transform(
    fixed: &Volume,
    moving: &Volume,
    transforms: &[AffineTransform],
    interpolation: Interpolation,
) -> Result<Volume> {
    let t = compose(transforms);
    let shape = fixed.spatial_shape();
    let n_frames = moving.n_frames();
    let mut data = Array4::<f32>::zeros((shape[0], shape[1], shape[2], n_frames));
    let positions: Vec<_> = VoxelIter::new(shape)
        .map(|v| (v, moving.continuous_index(t.apply(fixed.world(v.to_f64())))))
        .collect();
    for f in 0..n_frames {
        let src = moving.frame(f);
        let mut dst = data.index_axis_mut(Axis(3), f);
        for (v, q) in positions.iter() {
            dst[[v.x, v.y, v.z]] = interpolation.sample(&src, *q);
        }
    }
    debug!(?interpolation, frames = n_frames, "重采样完成");
    if moving.ndim() == 3 {
        let data: Array3<f32> = data.index_axis_move(Axis(3), 0);
        Ok(fixed.like3(data))
    } else {
        let mut out = fixed.like4(data);
        out.set_repetition_time(moving.repetition_time());
        Ok(out)
    }
}

/// 两张同网格图像非零区域的Dice系数。两者都为空时为0。
pub fn overlap(a: &Volume, b: &Volume) -> Result<f64> {
    if a.spatial_shape() != b.spatial_shape() {
        return Err(ConnectivityError::shape(
            "overlap operands",
            &a.spatial_shape(),
            &b.spatial_shape(),
        ));
    }
    let (fa, fb) = (a.frame(0), b.frame(0));
    let (mut na, mut nb, mut both) = (0_usize, 0_usize, 0_usize);
    ndarray::Zip::from(&fa).and(&fb).for_each(|&x, &y| {
        let (ia, ib) = (x != 0.0, y != 0.0);
        na += ia as usize;
        nb += ib as usize;
        both += (ia && ib) as usize;
    });
    if na + nb == 0 {
        return Ok(0.0);
    }
    Ok(2.0 * both as f64 / (na + nb) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inverse() {
        let t = AffineTransform {
            linear: [[2.0, 0.5, 0.0], [0.0, 1.5, 0.0], [0.3, 0.0, 0.8]],
            offset: [1.0, -2.0, 3.5],
        };
        let inv = t.inverse().unwrap();
        let p = [4.0, -1.0, 7.0];
        let q = inv.apply(t.apply(p));
        for i in 0..3 {
            assert_relative_eq!(q[i], p[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_singular() {
        let t = AffineTransform {
            linear: [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            offset: [0.0; 3],
        };
        assert!(matches!(t.inverse(), Err(ConnectivityError::SingularMatrix)));
    }

    #[test]
    fn test_compose_order() {
        let scale = AffineTransform::scaling_about([0.0; 3], [2.0; 3], [0.0; 3]);
        let shift = AffineTransform::translation([1.0, 0.0, 0.0]);
        // 先缩放再平移
        let t = compose(&[scale, shift]);
        assert_eq!(t.apply([1.0, 1.0, 1.0]), [3.0, 2.0, 2.0]);
    }

    #[test]
    fn test_apply_translation() {
        let moving = Array3::from_shape_fn((6, 6, 6), |(x, y, z)| {
            if (2..4).contains(&x) && (2..4).contains(&y) && (2..4).contains(&z) {
                5.0
            } else {
                0.0
            }
        });
        let moving = Volume::from_array3(moving, [1.0; 3]);
        let fixed = Volume::from_array3(Array3::zeros((6, 6, 6)), [1.0; 3]);
        let t = AffineTransform::translation([1.0, 0.0, 0.0]);
        let warped = apply_transform(&fixed, &moving, &[t], Interpolation::NearestNeighbor).unwrap();
        assert_eq!(warped.get((1, 2, 2).into()), Some(5.0));
        assert_eq!(warped.get((3, 2, 2).into()), Some(0.0));
        // 视野外
        assert_eq!(warped.get((5, 0, 0).into()), Some(0.0));
    }

    #[test]
    fn test_overlap() {
        let a = Volume::from_array3(
            Array3::from_shape_vec((4, 1, 1), vec![1.0, 1.0, 0.0, 0.0]).unwrap(),
            [1.0; 3],
        );
        let b = Volume::from_array3(
            Array3::from_shape_vec((4, 1, 1), vec![0.0, 3.0, 3.0, 0.0]).unwrap(),
            [1.0; 3],
        );
        assert_relative_eq!(overlap(&a, &b).unwrap(), 0.5);
        assert_relative_eq!(overlap(&a, &a).unwrap(), 1.0);
    }
}
