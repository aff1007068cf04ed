use super::tdist::correlation_p;
use crate::atlas::RegionSeries;
use crate::error::{ConnectivityError, Result};
use ndarray::{Array1, Array2, Axis};

/// 标准差低于此值的列视为常数列。
const CONSTANT_TOL: f64 = 1e-12;

/// `a`与`b`各列之间的Pearson相关系数（`a.ncols() × b.ncols()`）。
///
/// 两者行数（样本数）必须一致；任一侧为常数列时相关系数记为0。
pub fn correlate(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    if a.nrows() != b.nrows() {
        return Err(ConnectivityError::shape(
            "correlation operands",
            &[a.nrows(), b.ncols()],
            &[b.nrows(), b.ncols()],
        ));
    }
    let (za, _) = standardize(a);
    let (zb, _) = standardize(b);
    let mut r = za.t().dot(&zb);
    r.mapv_inplace(|v| v.clamp(-1.0, 1.0));
    Ok(r)
}

/// 每列去均值并缩放到单位范数；常数列置0。同时返回各列是否为常数。
fn standardize(m: &Array2<f64>) -> (Array2<f64>, Vec<bool>) {
    let n = m.nrows().max(1) as f64;
    let mut z = m.clone();
    let mut constant = Vec::with_capacity(m.ncols());
    for mut column in z.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / n;
        column -= mean;
        let norm = column.dot(&column).sqrt();
        if norm / n.sqrt() > CONSTANT_TOL {
            column /= norm;
            constant.push(false);
        } else {
            column.fill(0.0);
            constant.push(true);
        }
    }
    (z, constant)
}

/// 脑区×脑区相关矩阵及其显著性。
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationMatrix {
    r: Array2<f64>,
    p: Array2<f64>,
    n_samples: usize,
    labels: Vec<u32>,
    names: Vec<String>,
}

impl CorrelationMatrix {
    /// 由“时间×脑区”矩阵计算相关矩阵。
    ///
    /// 结果对称、对角线为1；常数脑区的行和列（含对角线）为0。p值由n-2个自由度的
    /// t分布求双侧概率，无定义时为1；对角线上有定义的p值为0。
    pub fn from_series(series: &RegionSeries) -> Result<Self> {
        let n_samples = series.n_frames();
        let (z, constant) = standardize(series.matrix());
        let mut r = z.t().dot(&z);
        let k = r.nrows();
        for i in 0..k {
            for j in 0..i {
                let v = r[[i, j]].clamp(-1.0, 1.0);
                r[[i, j]] = v;
                r[[j, i]] = v;
            }
            r[[i, i]] = if constant[i] { 0.0 } else { 1.0 };
        }
        let p = Array2::from_shape_fn((k, k), |(i, j)| {
            if constant[i] || constant[j] {
                1.0
            } else if i == j {
                0.0
            } else {
                correlation_p(r[[i, j]], n_samples)
            }
        });
        Ok(Self {
            r,
            p,
            n_samples,
            labels: series.labels().to_vec(),
            names: series.names().to_vec(),
        })
    }

    /// 相关系数矩阵。
    #[inline]
    pub fn r(&self) -> &Array2<f64> {
        &self.r
    }

    /// p值矩阵。
    #[inline]
    pub fn p_values(&self) -> &Array2<f64> {
        &self.p
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 名为`name`的脑区所在的行号。
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// 按名称取相关系数。
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.r[[self.index_of(a)?, self.index_of(b)?]])
    }

    /// `p < alpha`的位置。
    pub fn significant(&self, alpha: f64) -> Array2<bool> {
        self.p.map(|&p| p < alpha)
    }

    /// 每行除对角线外的平均相关系数。
    pub fn mean_connectivity(&self) -> Array1<f64> {
        let k = self.dim();
        if k < 2 {
            return Array1::zeros(k);
        }
        Array1::from_shape_fn(k, |i| {
            (0..k).filter(|&j| j != i).map(|j| self.r[[i, j]]).sum::<f64>() / (k - 1) as f64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series() -> RegionSeries {
        let n = 30;
        let m = Array2::from_shape_fn((n, 4), |(t, j)| {
            let s = (t as f64 * 0.5).sin();
            match j {
                0 => s,
                1 => 2.0 * s + 1.0,
                2 => -s + 0.01 * (t as f64 * 2.3).cos(),
                _ => 4.0,
            }
        });
        RegionSeries::new(
            m,
            vec![1, 2, 3, 4],
            ["A", "B", "C", "D"].map(String::from).to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_properties() {
        let c = CorrelationMatrix::from_series(&series()).unwrap();
        assert_eq!(c.dim(), 4);
        assert_eq!(c.r(), &c.r().t().to_owned());
        for i in 0..3 {
            assert_eq!(c.r()[[i, i]], 1.0);
        }
        assert_eq!(c.r()[[3, 3]], 0.0);
        assert!(c.r().row(3).iter().all(|&v| v == 0.0));
        assert!(c.p_values().row(3).iter().all(|&v| v == 1.0));
        assert_relative_eq!(c.get("A", "B").unwrap(), 1.0, epsilon = 1e-12);
        assert!(c.get("A", "C").unwrap() < -0.99);
        assert!(c.get("A", "Z").is_none());
    }

    #[test]
    fn test_significance() {
        let c = CorrelationMatrix::from_series(&series()).unwrap();
        let sig = c.significant(0.05);
        assert!(sig[[0, 1]]);
        assert!(sig[[0, 2]]);
        assert!(!sig[[0, 3]]);
    }

    #[test]
    fn test_correlate_columns() {
        let a = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Array2::from_shape_vec((4, 2), vec![2.0, 1.0, 4.0, 1.0, 6.0, 1.0, 8.0, 1.0]).unwrap();
        let r = correlate(&a, &b).unwrap();
        assert_eq!(r.dim(), (1, 2));
        assert_relative_eq!(r[[0, 0]], 1.0, epsilon = 1e-12);
        assert_eq!(r[[0, 1]], 0.0);
        assert!(correlate(&a, &Array2::zeros((3, 1))).is_err());
    }
}
