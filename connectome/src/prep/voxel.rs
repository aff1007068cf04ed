/// 代表一个体素坐标(x, y, z)索引，不负责边界检查。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Voxel {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Voxel {
    #[inline]
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn to_tuple(self) -> (usize, usize, usize) {
        (self.x, self.y, self.z)
    }

    #[inline]
    pub fn to_array(self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }

    /// 体素中心的连续索引坐标。
    #[inline]
    pub fn to_f64(self) -> [f64; 3] {
        [self.x as f64, self.y as f64, self.z as f64]
    }

    /// 判断坐标是否落在形状为`shape`的网格内。
    #[inline]
    pub fn in_bounds(&self, shape: [usize; 3]) -> bool {
        self.x < shape[0] && self.y < shape[1] && self.z < shape[2]
    }

    /// 在形状为`shape`的网格内，6-邻域中的所有坐标。
    pub fn n6_positions(self, shape: [usize; 3]) -> Vec<Voxel> {
        let (x, y, z) = self.to_tuple();
        [
            (x.wrapping_sub(1), y, z),
            (x + 1, y, z),
            (x, y.wrapping_sub(1), z),
            (x, y + 1, z),
            (x, y, z.wrapping_sub(1)),
            (x, y, z + 1),
        ]
        .into_iter()
        .map(Voxel::from)
        .filter(|v| v.in_bounds(shape))
        .collect()
    }
}

impl From<(usize, usize, usize)> for Voxel {
    #[inline]
    fn from(v: (usize, usize, usize)) -> Self {
        Voxel::new(v.0, v.1, v.2)
    }
}

impl From<Voxel> for [usize; 3] {
    #[inline]
    fn from(v: Voxel) -> Self {
        v.to_array()
    }
}
