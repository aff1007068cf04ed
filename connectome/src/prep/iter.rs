use super::voxel::Voxel;

/// 按照NIfTI存储顺序（x变化最快，其次y，最后z）枚举网格内所有体素坐标。
pub struct VoxelIter {
    cur_x: usize,
    cur_y: usize,
    cur_z: usize,
    shape: [usize; 3],
}

impl VoxelIter {
    #[inline]
    pub fn new(shape: [usize; 3]) -> Self {
        Self {
            cur_x: 0,
            cur_y: 0,
            cur_z: 0,
            shape,
        }
    }
}

impl Iterator for VoxelIter {
    type Item = Voxel;

    fn next(&mut self) -> Option<Self::Item> {
        if self.shape.contains(&0) || self.cur_z == self.shape[2] {
            return None;
        }
        let ret = Voxel::new(self.cur_x, self.cur_y, self.cur_z);
        if self.cur_x + 1 == self.shape[0] {
            self.cur_x = 0;
            if self.cur_y + 1 == self.shape[1] {
                self.cur_y = 0;
                self.cur_z += 1;
            } else {
                self.cur_y += 1;
            }
        } else {
            self.cur_x += 1;
        }
        Some(ret)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.shape.contains(&0) || self.cur_z == self.shape[2] {
            return (0, Some(0));
        }
        let plane = self.shape[0] * self.shape[1];
        let done = self.cur_z * plane + self.cur_y * self.shape[0] + self.cur_x;
        let left = plane * self.shape[2] - done;
        (left, Some(left))
    }
}

impl ExactSizeIterator for VoxelIter {}

#[cfg(test)]
mod tests {
    use super::VoxelIter;

    fn test_voxel_iter_with(shape: [usize; 3]) {
        let mut it = VoxelIter::new(shape);
        assert_eq!(it.len(), shape.iter().product::<usize>());
        for z in 0..shape[2] {
            for y in 0..shape[1] {
                for x in 0..shape[0] {
                    assert_eq!(it.next(), Some((x, y, z).into()));
                }
            }
        }
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_voxel_iter_zero() {
        let mut it = VoxelIter::new([0, 4, 4]);
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_voxel_iter_small() {
        test_voxel_iter_with([3, 4, 5]);
    }

    #[test]
    fn test_voxel_iter_single() {
        test_voxel_iter_with([1, 1, 1]);
    }
}
