use ndarray::ArrayView3;

/// 插值方式。
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpolation {
    /// 最近邻；用于标签图像。
    NearestNeighbor,
    /// 三线性。
    Linear,
}

impl Interpolation {
    /// 在连续体素索引`q`处采样`frame`。视野外返回0。
    #[inline]
    pub fn sample(self, frame: &ArrayView3<f32>, q: [f64; 3]) -> f32 {
        match self {
            Interpolation::NearestNeighbor => sample_nearest(frame, q),
            Interpolation::Linear => sample_linear(frame, q),
        }
    }
}

impl std::str::FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "nearest-neighbor" | "genericlabel" => Ok(Interpolation::NearestNeighbor),
            "linear" => Ok(Interpolation::Linear),
            _ => Err(format!("unknown interpolation `{s}`")),
        }
    }
}

/// 判断连续索引是否落在`[-0.5, n - 0.5)`的体素范围内，并返回最近邻整数索引。
#[inline]
fn nearest_index(q: f64, n: usize) -> Option<usize> {
    let r = q.round();
    (r >= 0.0 && r < n as f64).then_some(r as usize)
}

pub(crate) fn sample_nearest(frame: &ArrayView3<f32>, q: [f64; 3]) -> f32 {
    let (nx, ny, nz) = frame.dim();
    match (
        nearest_index(q[0], nx),
        nearest_index(q[1], ny),
        nearest_index(q[2], nz),
    ) {
        (Some(x), Some(y), Some(z)) => frame[[x, y, z]],
        _ => 0.0,
    }
}

/// 一维线性插值的两个邻点及权重；越界时返回`None`。
#[inline]
fn linear_support(q: f64, n: usize) -> Option<(usize, usize, f64)> {
    const EPS: f64 = 1e-6;
    if n == 0 || q < -EPS || q > (n - 1) as f64 + EPS {
        return None;
    }
    let q = q.clamp(0.0, (n - 1) as f64);
    let lo = q.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    Some((lo, hi, q - lo as f64))
}

pub(crate) fn sample_linear(frame: &ArrayView3<f32>, q: [f64; 3]) -> f32 {
    let (nx, ny, nz) = frame.dim();
    let (Some((x0, x1, fx)), Some((y0, y1, fy)), Some((z0, z1, fz))) = (
        linear_support(q[0], nx),
        linear_support(q[1], ny),
        linear_support(q[2], nz),
    ) else {
        return 0.0;
    };
    let v = |x: usize, y: usize, z: usize| frame[[x, y, z]] as f64;
    let c00 = v(x0, y0, z0) * (1.0 - fx) + v(x1, y0, z0) * fx;
    let c10 = v(x0, y1, z0) * (1.0 - fx) + v(x1, y1, z0) * fx;
    let c01 = v(x0, y0, z1) * (1.0 - fx) + v(x1, y0, z1) * fx;
    let c11 = v(x0, y1, z1) * (1.0 - fx) + v(x1, y1, z1) * fx;
    let c0 = c00 * (1.0 - fy) + c10 * fy;
    let c1 = c01 * (1.0 - fy) + c11 * fy;
    (c0 * (1.0 - fz) + c1 * fz) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_linear_midpoint() {
        let a = Array3::from_shape_fn((2, 2, 2), |(x, y, z)| (x + 2 * y + 4 * z) as f32);
        let v = a.view();
        assert!((sample_linear(&v, [0.5, 0.5, 0.5]) - 3.5).abs() < 1e-6);
        assert_eq!(sample_linear(&v, [1.0, 1.0, 1.0]), 7.0);
        assert_eq!(sample_linear(&v, [1.5, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_nearest() {
        let a = Array3::from_shape_fn((3, 1, 1), |(x, _, _)| x as f32 + 1.0);
        let v = a.view();
        assert_eq!(sample_nearest(&v, [1.4, 0.0, 0.0]), 2.0);
        assert_eq!(sample_nearest(&v, [2.4, 0.2, -0.3]), 3.0);
        assert_eq!(sample_nearest(&v, [2.6, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "genericLabel".parse::<Interpolation>(),
            Ok(Interpolation::NearestNeighbor)
        );
        assert!("cubic".parse::<Interpolation>().is_err());
    }
}
