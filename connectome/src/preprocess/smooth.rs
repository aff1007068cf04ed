use crate::error::{ConnectivityError, Result};
use crate::prep::{Mask, Volume};
use ndarray::{Array3, Array4, Axis, Zip};

/// FWHM与高斯标准差之比：`2·sqrt(2·ln2)`。
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// 掩膜内的高斯空间平滑，`fwhm`单位为毫米。
///
/// 采用掩膜归一化：`G*(f·m) / G*m`，因此掩膜外的体素既不参与平滑，
/// 也保持为0。`fwhm`为0时原样返回。
pub fn smooth(image: &Volume, mask: &Mask, fwhm: f64) -> Result<Volume> {
    if !(fwhm >= 0.0 && fwhm.is_finite()) {
        return Err(ConnectivityError::InvalidParameter(format!(
            "smoothing FWHM must be non-negative, but got {fwhm}"
        )));
    }
    mask.check_same_grid("smoothing image", image.spatial_shape())?;
    if fwhm == 0.0 {
        return Ok(image.clone());
    }
    let spacing = image.spacing();
    let kernels: Vec<Vec<f64>> = (0..3)
        .map(|i| gaussian_kernel(fwhm / FWHM_PER_SIGMA / spacing[i]))
        .collect();

    let weight = mask.grid().map(|&b| if b { 1.0 } else { 0.0 });
    let norm = convolve3(&weight, &kernels);

    let mut data = Array4::<f32>::zeros(image.data().raw_dim());
    for (src, mut dst) in image
        .data()
        .axis_iter(Axis(3))
        .zip(data.axis_iter_mut(Axis(3)))
    {
        let masked = Zip::from(&src)
            .and(&weight)
            .map_collect(|&v, &w| v as f64 * w);
        let num = convolve3(&masked, &kernels);
        Zip::from(&mut dst)
            .and(&num)
            .and(&norm)
            .and(mask.grid())
            .for_each(|d, &n, &z, &inside| {
                *d = if inside && z > 0.0 { (n / z) as f32 } else { 0.0 };
            });
    }
    let mut out = image.like4(data);
    if image.ndim() == 3 {
        out = out.like3(out.frame(0).to_owned());
    }
    Ok(out)
}

/// 离散高斯核，半径为`ceil(3σ)`，归一化使和为1。`sigma`为体素单位。
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma < 1e-3 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let mut k: Vec<f64> = (-radius..=radius)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k
}

/// 可分离三维卷积，边界外视为0。
fn convolve3(input: &Array3<f64>, kernels: &[Vec<f64>]) -> Array3<f64> {
    let mut current = input.clone();
    for (axis, kernel) in kernels.iter().enumerate() {
        if kernel.len() == 1 {
            continue;
        }
        let radius = (kernel.len() / 2) as isize;
        let mut next = Array3::<f64>::zeros(current.raw_dim());
        for (src, mut dst) in current
            .lanes(Axis(axis))
            .into_iter()
            .zip(next.lanes_mut(Axis(axis)))
        {
            let n = src.len() as isize;
            for i in 0..n {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let j = i + k as isize - radius;
                    if (0..n).contains(&j) {
                        acc += w * src[j as usize];
                    }
                }
                dst[i as usize] = acc;
            }
        }
        current = next;
    }
    current
}
