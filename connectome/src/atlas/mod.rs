//! 图谱：标签表与脑区平均。

pub mod regions;
pub mod table;

pub use regions::{region_average, RegionSeries};
pub use table::{LabelTable, Region};
