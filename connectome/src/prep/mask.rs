use super::iter::VoxelIter;
use super::volume::Volume;
use super::voxel::Voxel;
use crate::error::{ConnectivityError, Result};
use ndarray::{Array2, Array3, Array4};

/// 脑掩膜：布尔网格与按存储顺序排列的掩膜内体素列表。
#[derive(Clone, Debug)]
pub struct Mask {
    grid: Array3<bool>,
    voxels: Vec<Voxel>,
}

impl Mask {
    /// 由3D图像构造掩膜，非零（含负值）的有限体素视为在掩膜内。
    pub fn from_volume(image: &Volume) -> Result<Self> {
        let grid = image.frame(0).map(|&v| v != 0.0 && v.is_finite());
        Self::from_grid(grid)
    }

    /// 由3D图像构造掩膜，严格大于`thr`的有限体素视为在掩膜内。
    pub fn threshold(image: &Volume, thr: f32) -> Result<Self> {
        let grid = image.frame(0).map(|&v| v > thr && v.is_finite());
        Self::from_grid(grid)
    }

    /// 由布尔网格构造掩膜。空掩膜返回`EmptyMask`。
    pub fn from_grid(grid: Array3<bool>) -> Result<Self> {
        let shape = grid_shape(&grid);
        let voxels: Vec<Voxel> = VoxelIter::new(shape)
            .filter(|v| grid[[v.x, v.y, v.z]])
            .collect();
        if voxels.is_empty() {
            return Err(ConnectivityError::EmptyMask);
        }
        Ok(Self { grid, voxels })
    }

    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        grid_shape(&self.grid)
    }

    /// 掩膜内体素个数。
    #[inline]
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    #[inline]
    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    #[inline]
    pub fn contains(&self, v: Voxel) -> bool {
        v.in_bounds(self.shape()) && self.grid[[v.x, v.y, v.z]]
    }

    #[inline]
    pub fn grid(&self) -> &Array3<bool> {
        &self.grid
    }

    /// 与另一掩膜求交。交集为空时返回`EmptyMask`。
    pub fn intersect(&self, other: &Mask) -> Result<Mask> {
        self.check_same_grid("mask intersection", other.shape())?;
        let grid = ndarray::Zip::from(&self.grid)
            .and(&other.grid)
            .map_collect(|&a, &b| a && b);
        Mask::from_grid(grid)
    }

    /// 6-邻域形态学腐蚀一次。网格边缘的体素总会被腐蚀掉。
    pub fn erode(&self) -> Result<Mask> {
        let shape = self.shape();
        let mut grid = Array3::from_elem(self.grid.raw_dim(), false);
        for v in self.voxels.iter().copied() {
            let n6 = v.n6_positions(shape);
            if n6.len() == 6 && n6.iter().all(|n| self.grid[[n.x, n.y, n.z]]) {
                grid[[v.x, v.y, v.z]] = true;
            }
        }
        Mask::from_grid(grid)
    }

    /// 检查`found`是否与掩膜网格形状一致。
    pub fn check_same_grid(&self, what: &'static str, found: [usize; 3]) -> Result<()> {
        let expected = self.shape();
        if expected != found {
            return Err(ConnectivityError::shape(what, &expected, &found));
        }
        Ok(())
    }
}

#[inline]
fn grid_shape(grid: &Array3<bool>) -> [usize; 3] {
    let (x, y, z) = grid.dim();
    [x, y, z]
}

/// 将4D图像在掩膜内的时间序列展开为“时间×体素”矩阵。
///
/// 行数等于帧数，列数等于掩膜内体素个数，列顺序与`mask.voxels()`一致。
pub fn time_series_to_matrix(image: &Volume, mask: &Mask) -> Result<Array2<f64>> {
    mask.check_same_grid("time series image", image.spatial_shape())?;
    let data = image.data();
    let n_frames = image.n_frames();
    let mut matrix = Array2::<f64>::zeros((n_frames, mask.len()));
    for (j, v) in mask.voxels().iter().enumerate() {
        for t in 0..n_frames {
            matrix[[t, j]] = data[[v.x, v.y, v.z, t]] as f64;
        }
    }
    Ok(matrix)
}

/// `time_series_to_matrix`的逆操作：将矩阵写回`reference`网格上的4D图像，掩膜外为0。
pub fn matrix_to_time_series(
    matrix: &Array2<f64>,
    mask: &Mask,
    reference: &Volume,
) -> Result<Volume> {
    mask.check_same_grid("reference image", reference.spatial_shape())?;
    let (n_frames, n_voxels) = matrix.dim();
    if n_voxels != mask.len() {
        return Err(ConnectivityError::shape(
            "time-by-voxel matrix",
            &[n_frames, mask.len()],
            &[n_frames, n_voxels],
        ));
    }
    let [x, y, z] = reference.spatial_shape();
    let mut data = Array4::<f32>::zeros((x, y, z, n_frames));
    for (j, v) in mask.voxels().iter().enumerate() {
        for t in 0..n_frames {
            data[[v.x, v.y, v.z, t]] = matrix[[t, j]] as f32;
        }
    }
    Ok(reference.like4(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn cube_mask(n: usize, lo: usize, hi: usize) -> Mask {
        let grid = Array3::from_shape_fn((n, n, n), |(x, y, z)| {
            (lo..hi).contains(&x) && (lo..hi).contains(&y) && (lo..hi).contains(&z)
        });
        Mask::from_grid(grid).unwrap()
    }

    #[test]
    fn test_empty_mask() {
        let img = Volume::from_array3(Array3::zeros((3, 3, 3)), [1.0; 3]);
        assert!(matches!(
            Mask::from_volume(&img),
            Err(ConnectivityError::EmptyMask)
        ));
    }

    #[test]
    fn test_negative_voxels() {
        let data = Array3::from_shape_fn((3, 1, 1), |(x, _, _)| [-5.0, 0.0, 2.0][x]);
        let img = Volume::from_array3(data, [1.0; 3]);
        let nonzero = Mask::from_volume(&img).unwrap();
        assert_eq!(nonzero.voxels(), &[Voxel::new(0, 0, 0), Voxel::new(2, 0, 0)]);
        let above = Mask::threshold(&img, 1.0).unwrap();
        assert_eq!(above.voxels(), &[Voxel::new(2, 0, 0)]);
        assert!(matches!(
            Mask::threshold(&img, 3.0),
            Err(ConnectivityError::EmptyMask)
        ));
    }

    #[test]
    fn test_matrix_shape() {
        let mask = cube_mask(5, 1, 4);
        let data = Array::from_shape_fn((5, 5, 5, 7), |(x, y, z, t)| (x + y + z + t) as f32);
        let bold = Volume::from_array4(data, [1.0; 3], 2.0);
        let m = time_series_to_matrix(&bold, &mask).unwrap();
        assert_eq!(m.dim(), (7, 27));
        let v = mask.voxels()[0];
        assert_eq!(m[[3, 0]], (v.x + v.y + v.z + 3) as f64);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let mask = cube_mask(4, 1, 3);
        let data = Array::from_shape_fn((4, 4, 4, 3), |(x, y, z, t)| (x * y + z * t) as f32);
        let bold = Volume::from_array4(data, [1.0; 3], 2.0);
        let m = time_series_to_matrix(&bold, &mask).unwrap();
        let back = matrix_to_time_series(&m, &mask, &bold).unwrap();
        for v in mask.voxels() {
            for t in 0..3 {
                assert_eq!(back.data()[[v.x, v.y, v.z, t]], bold.data()[[v.x, v.y, v.z, t]]);
            }
        }
        assert_eq!(back.data()[[0, 0, 0, 1]], 0.0);
    }

    #[test]
    fn test_grid_mismatch() {
        let mask = cube_mask(4, 1, 3);
        let bold = Volume::from_array4(Array4::zeros((5, 4, 4, 2)), [1.0; 3], 2.0);
        assert!(matches!(
            time_series_to_matrix(&bold, &mask),
            Err(ConnectivityError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_erode() {
        let mask = cube_mask(7, 1, 6);
        let eroded = mask.erode().unwrap();
        assert_eq!(eroded.len(), 27);
        assert!(eroded.contains(Voxel::new(3, 3, 3)));
        assert!(!eroded.contains(Voxel::new(1, 3, 3)));
    }

    #[test]
    fn test_intersect() {
        let a = cube_mask(6, 0, 3);
        let b = cube_mask(6, 2, 5);
        let both = a.intersect(&b).unwrap();
        assert_eq!(both.voxels(), &[Voxel::new(2, 2, 2)]);
        let far = cube_mask(6, 4, 6);
        assert!(matches!(a.intersect(&far), Err(ConnectivityError::EmptyMask)));
    }
}
