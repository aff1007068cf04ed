use ndarray::{Array2, Axis};

/// DVARS：相邻帧差值在所有体素上的均方根。第0帧为0。
pub fn dvars(matrix: &Array2<f64>) -> Vec<f64> {
    let n_frames = matrix.nrows();
    let n_voxels = matrix.ncols().max(1) as f64;
    let mut out = vec![0.0; n_frames];
    for t in 1..n_frames {
        let ss: f64 = matrix
            .row(t)
            .iter()
            .zip(matrix.row(t - 1).iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        out[t] = (ss / n_voxels).sqrt();
    }
    out
}

/// 全局信号：每帧在所有体素上的均值。
pub fn global_signal(matrix: &Array2<f64>) -> Vec<f64> {
    match matrix.mean_axis(Axis(1)) {
        Some(mean) => mean.to_vec(),
        None => vec![0.0; matrix.nrows()],
    }
}

/// FD超过`threshold`的帧标记为`true`。
pub fn censor(fd: &[f64], threshold: f64) -> Vec<bool> {
    fd.iter().map(|&d| d > threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dvars() {
        let m = Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 3.0, 4.0, 3.0, 4.0]).unwrap();
        let d = dvars(&m);
        assert_eq!(d[0], 0.0);
        assert!((d[1] - (12.5_f64).sqrt()).abs() < 1e-12);
        assert_eq!(d[2], 0.0);
    }

    #[test]
    fn test_global_signal() {
        let m = Array2::from_shape_vec((2, 2), vec![1.0, 3.0, 5.0, 5.0]).unwrap();
        assert_eq!(global_signal(&m), vec![2.0, 5.0]);
    }

    #[test]
    fn test_censor() {
        assert_eq!(censor(&[0.0, 0.6, 0.5], 0.5), vec![false, true, false]);
    }
}
