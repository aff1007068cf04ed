pub mod iter;
pub mod log;
pub mod mask;
pub mod volume;
pub mod voxel;

pub use iter::VoxelIter;
pub use log::StageTimer;
pub use mask::{matrix_to_time_series, time_series_to_matrix, Mask};
pub use volume::{average_over_time, read_image, Volume};
pub use voxel::Voxel;
