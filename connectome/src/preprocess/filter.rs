use crate::error::{ConnectivityError, Result};
use ndarray::{s, Array2, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::sync::mpsc::channel;
use threadpool::ThreadPool;
use tracing::debug;

/// 每个任务至少处理的体素列数。
const MIN_CHUNK: usize = 64;

/// 对“时间×体素”矩阵的每一列做理想带通滤波，保留`[low, high]`（Hz）内的频率成分。
///
/// `tr`为重复时间（秒）。直流分量总会被去除（除非`low`为0）。
pub fn band_pass(matrix: &Array2<f64>, tr: f64, low: f64, high: f64) -> Result<Array2<f64>> {
    check_band(tr, low, high)?;
    let (n_frames, n_voxels) = matrix.dim();
    if n_frames < 2 || n_voxels == 0 {
        return Ok(matrix.clone());
    }

    let chunks: Vec<(usize, usize)> = {
        let cpus = num_cpus::get().max(1);
        let size = (n_voxels + cpus - 1) / cpus;
        let size = size.max(MIN_CHUNK);
        (0..n_voxels)
            .step_by(size)
            .map(|lo| (lo, (lo + size).min(n_voxels)))
            .collect()
    };

    let filtered: Vec<(usize, Array2<f64>)> = match (num_cpus::get(), chunks.len()) {
        (1, _) | (_, 1) => chunks
            .iter()
            .enumerate()
            .map(|(i, &(lo, hi))| {
                let block = matrix.slice(s![.., lo..hi]).to_owned();
                (i, filter_block(block, tr, low, high))
            })
            .collect(),
        (cpus, n_chunks) => {
            let pool = ThreadPool::new(cpus);
            let (tx, rx) = channel();
            for (i, &(lo, hi)) in chunks.iter().enumerate() {
                let tx = tx.clone();
                let block = matrix.slice(s![.., lo..hi]).to_owned();
                pool.execute(move || {
                    let _ = tx.send((i, filter_block(block, tr, low, high)));
                });
            }
            drop(tx);
            let mut parts: Vec<_> = rx.iter().take(n_chunks).collect();
            if parts.len() != n_chunks {
                return Err(ConnectivityError::InvalidParameter(
                    "band-pass worker terminated unexpectedly".to_string(),
                ));
            }
            parts.sort_by_key(|(i, _)| *i);
            parts
        }
    };

    let mut out = Array2::<f64>::zeros((n_frames, n_voxels));
    for (i, block) in filtered {
        let (lo, hi) = chunks[i];
        out.slice_mut(s![.., lo..hi]).assign(&block);
    }
    debug!(chunks = chunks.len(), low, high, "带通滤波完成");
    Ok(out)
}

pub(crate) fn check_band(tr: f64, low: f64, high: f64) -> Result<()> {
    if !(tr > 0.0 && tr.is_finite()) {
        return Err(ConnectivityError::InvalidParameter(format!(
            "repetition time must be positive, but got {tr}"
        )));
    }
    if !(low >= 0.0 && low < high) {
        return Err(ConnectivityError::InvalidParameter(format!(
            "band-pass edges must satisfy 0 <= low < high, but got [{low}, {high}]"
        )));
    }
    Ok(())
}

fn filter_block(mut block: Array2<f64>, tr: f64, low: f64, high: f64) -> Array2<f64> {
    let n = block.nrows();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);
    let keep: Vec<bool> = (0..n)
        .map(|k| {
            let k = k.min(n - k);
            let f = k as f64 / (n as f64 * tr);
            f >= low && f <= high
        })
        .collect();

    let mut buffer = vec![Complex::new(0.0, 0.0); n];
    for mut column in block.axis_iter_mut(Axis(1)) {
        for (b, &v) in buffer.iter_mut().zip(column.iter()) {
            *b = Complex::new(v, 0.0);
        }
        fft.process(&mut buffer);
        for (b, &k) in buffer.iter_mut().zip(&keep) {
            if !k {
                *b = Complex::new(0.0, 0.0);
            }
        }
        ifft.process(&mut buffer);
        for (c, b) in column.iter_mut().zip(&buffer) {
            *c = b.re / n as f64;
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    /// 由低频（0.05Hz）与高频（0.2Hz）正弦叠加而成的列。
    fn mixture(n_frames: usize, n_voxels: usize, tr: f64) -> (Array2<f64>, Vec<f64>) {
        let slow: Vec<f64> = (0..n_frames)
            .map(|t| (2.0 * PI * 0.05 * t as f64 * tr).sin())
            .collect();
        let m = Array2::from_shape_fn((n_frames, n_voxels), |(t, v)| {
            let fast = (2.0 * PI * 0.2 * t as f64 * tr).sin();
            (v as f64 + 1.0) * slow[t] + fast + 3.0
        });
        (m, slow)
    }

    #[test]
    fn test_keeps_pass_band() {
        // 200帧×TR=2s：0.05Hz与0.2Hz都恰好落在频率格点上
        let (m, slow) = mixture(200, 150, 2.0);
        let f = band_pass(&m, 2.0, 0.01, 0.1).unwrap();
        for v in [0, 77, 149] {
            for t in 0..200 {
                let expected = (v as f64 + 1.0) * slow[t];
                assert!((f[[t, v]] - expected).abs() < 1e-8, "v={v} t={t}");
            }
        }
    }

    #[test]
    fn test_removes_mean() {
        let m = Array2::from_elem((50, 3), 7.0);
        let f = band_pass(&m, 2.0, 0.01, 0.1).unwrap();
        assert!(f.iter().all(|v| v.abs() < 1e-10));
    }

    #[test]
    fn test_bad_band() {
        let m = Array2::zeros((10, 2));
        assert!(band_pass(&m, 2.0, 0.1, 0.01).is_err());
        assert!(band_pass(&m, 0.0, 0.01, 0.1).is_err());
    }
}
