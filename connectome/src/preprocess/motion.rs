use crate::error::{ConnectivityError, Result};
use crate::prep::{Mask, Volume, VoxelIter};
use crate::registration::{sample_linear, AffineTransform};
use ndarray::{Array2, Array4, Axis};
use std::path::Path;
use tracing::debug;

/// Power等人计算FD时，把旋转角（弧度）换算为位移所用的头部半径（毫米）。
pub const HEAD_RADIUS_MM: f64 = 50.0;

/// 逐帧刚体运动参数：T行×6列，依次为`tx ty tz`（毫米）与`rx ry rz`（弧度）。
#[derive(Clone, Debug, PartialEq)]
pub struct MotionParameters {
    params: Array2<f64>,
}

impl MotionParameters {
    pub fn from_array(params: Array2<f64>) -> Result<Self> {
        if params.ncols() != 6 {
            return Err(ConnectivityError::InvalidMotionParameters(format!(
                "expected 6 columns, but got {}",
                params.ncols()
            )));
        }
        if params.iter().any(|v| !v.is_finite()) {
            return Err(ConnectivityError::InvalidMotionParameters(
                "non-finite value".to_string(),
            ));
        }
        Ok(Self { params })
    }

    /// 读取文本格式的运动参数文件（空白或逗号分隔，`#`开头的行为注释）。
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_text(&std::fs::read_to_string(path)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut values = Vec::new();
        let mut rows = 0;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
                .collect();
            if fields.len() != 6 {
                return Err(ConnectivityError::InvalidMotionParameters(format!(
                    "line {}: expected 6 values, but got {}",
                    lineno + 1,
                    fields.len()
                )));
            }
            for f in fields {
                let v: f64 = f.parse().map_err(|_| {
                    ConnectivityError::InvalidMotionParameters(format!(
                        "line {}: `{f}` is not a number",
                        lineno + 1
                    ))
                })?;
                values.push(v);
            }
            rows += 1;
        }
        let params = Array2::from_shape_vec((rows, 6), values)
            .map_err(|e| ConnectivityError::InvalidMotionParameters(e.to_string()))?;
        Self::from_array(params)
    }

    /// 以第0帧为参考，用掩膜内强度质心的位移估计每帧平移；旋转记为0。
    pub fn estimate(image: &Volume, mask: &Mask) -> Result<Self> {
        mask.check_same_grid("motion estimation image", image.spatial_shape())?;
        let n_frames = image.n_frames();
        let mut params = Array2::<f64>::zeros((n_frames, 6));
        let mut reference = None;
        for t in 0..n_frames {
            let frame = image.frame(t);
            let mut w_sum = 0.0;
            let mut c = [0.0; 3];
            for v in mask.voxels() {
                let w = frame[[v.x, v.y, v.z]] as f64;
                if w > 0.0 && w.is_finite() {
                    let p = image.world(v.to_f64());
                    w_sum += w;
                    for i in 0..3 {
                        c[i] += w * p[i];
                    }
                }
            }
            let c = if w_sum > 0.0 {
                c.map(|s| s / w_sum)
            } else {
                *reference.get_or_insert([0.0; 3])
            };
            let r = *reference.get_or_insert(c);
            for i in 0..3 {
                params[[t, i]] = c[i] - r[i];
            }
        }
        debug!(frames = n_frames, "质心运动估计完成");
        Ok(Self { params })
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.params.nrows()
    }

    /// T×6矩阵。
    #[inline]
    pub fn matrix(&self) -> &Array2<f64> {
        &self.params
    }

    #[inline]
    pub fn translation(&self, t: usize) -> [f64; 3] {
        [self.params[[t, 0]], self.params[[t, 1]], self.params[[t, 2]]]
    }

    #[inline]
    pub fn rotation(&self, t: usize) -> [f64; 3] {
        [self.params[[t, 3]], self.params[[t, 4]], self.params[[t, 5]]]
    }

    /// 第`t`帧的刚体变换：参考帧物理坐标 → 第`t`帧物理坐标，旋转中心为`center`。
    pub fn rigid(&self, t: usize, center: [f64; 3]) -> AffineTransform {
        let [rx, ry, rz] = self.rotation(t);
        let (sx, cx) = rx.sin_cos();
        let (sy, cy) = ry.sin_cos();
        let (sz, cz) = rz.sin_cos();
        // R = Rz * Ry * Rx
        let linear = [
            [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
            [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
            [-sy, cy * sx, cy * cx],
        ];
        let d = self.translation(t);
        let rotated = AffineTransform {
            linear,
            offset: [0.0; 3],
        }
        .apply(center);
        let offset = [0, 1, 2].map(|i| center[i] - rotated[i] + d[i]);
        AffineTransform { linear, offset }
    }

    /// 逐帧位移（Power FD）：平移差的绝对值之和加上`HEAD_RADIUS_MM`乘以旋转差的绝对值之和。
    /// 第0帧为0。
    pub fn framewise_displacement(&self) -> Vec<f64> {
        let mut fd = vec![0.0; self.n_frames()];
        for t in 1..self.n_frames() {
            let prev = self.params.row(t - 1);
            let cur = self.params.row(t);
            fd[t] = (0..6)
                .map(|j| {
                    let d = (cur[j] - prev[j]).abs();
                    if j < 3 {
                        d
                    } else {
                        HEAD_RADIUS_MM * d
                    }
                })
                .sum();
        }
        fd
    }
}

/// 按运动参数把每一帧重采样回参考帧空间（三线性插值）。
pub fn correct_motion(image: &Volume, motion: &MotionParameters) -> Result<Volume> {
    if motion.n_frames() != image.n_frames() {
        return Err(ConnectivityError::InvalidMotionParameters(format!(
            "{} rows for an image with {} frames",
            motion.n_frames(),
            image.n_frames()
        )));
    }
    let shape = image.spatial_shape();
    let center = image.world([0, 1, 2].map(|i| (shape[i] as f64 - 1.0) / 2.0));
    let mut data = Array4::<f32>::zeros(image.data().raw_dim());
    for t in 0..image.n_frames() {
        let rigid = motion.rigid(t, center);
        let src = image.frame(t);
        let mut dst = data.index_axis_mut(Axis(3), t);
        if rigid == AffineTransform::identity() {
            dst.assign(&src);
            continue;
        }
        for v in VoxelIter::new(shape) {
            let q = image.continuous_index(rigid.apply(image.world(v.to_f64())));
            dst[[v.x, v.y, v.z]] = sample_linear(&src, q);
        }
    }
    Ok(image.like4(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn test_parse() {
        let text = "# tx ty tz rx ry rz\n0 0 0 0 0 0\n0.1,0,0,0,0,0.002\n\n";
        let m = MotionParameters::from_text(text).unwrap();
        assert_eq!(m.n_frames(), 2);
        assert_eq!(m.rotation(1), [0.0, 0.0, 0.002]);
        assert!(MotionParameters::from_text("1 2 3\n").is_err());
        assert!(MotionParameters::from_text("1 2 3 4 5 x\n").is_err());
    }

    #[test]
    fn test_fd() {
        let m = MotionParameters::from_text(
            "0 0 0 0 0 0\n0.1 -0.2 0 0 0 0.01\n0.1 -0.2 0 0 0 0.01\n",
        )
        .unwrap();
        let fd = m.framewise_displacement();
        assert_eq!(fd[0], 0.0);
        assert_relative_eq!(fd[1], 0.3 + 0.5, epsilon = 1e-12);
        assert_relative_eq!(fd[2], 0.0);
    }

    fn shifted_series() -> Volume {
        // 一个2×2×2的亮块在第1帧沿x平移1个体素
        let data = Array4::from_shape_fn((8, 8, 8, 2), |(x, y, z, t)| {
            let lo = 3 + t;
            if (lo..lo + 2).contains(&x) && (3..5).contains(&y) && (3..5).contains(&z) {
                100.0
            } else {
                1.0
            }
        });
        Volume::from_array4(data, [2.0; 3], 2.0)
    }

    #[test]
    fn test_estimate_and_correct() {
        let bold = shifted_series();
        let mask = Mask::from_grid(Array3::from_elem((8, 8, 8), true)).unwrap();
        let m = MotionParameters::estimate(&bold, &mask).unwrap();
        assert_eq!(m.translation(0), [0.0; 3]);
        assert!(m.translation(1)[0] > 0.0);
        assert_relative_eq!(m.translation(1)[1], 0.0, epsilon = 1e-9);

        let exact = MotionParameters::from_text("0 0 0 0 0 0\n2 0 0 0 0 0\n").unwrap();
        let fixed = correct_motion(&bold, &exact).unwrap();
        assert_eq!(fixed.data()[[3, 3, 3, 1]], 100.0);
        assert_eq!(fixed.data()[[5, 3, 3, 1]], 1.0);
    }

    #[test]
    fn test_row_mismatch() {
        let bold = shifted_series();
        let m = MotionParameters::from_text("0 0 0 0 0 0\n").unwrap();
        assert!(matches!(
            correct_motion(&bold, &m),
            Err(ConnectivityError::InvalidMotionParameters(_))
        ));
    }
}
