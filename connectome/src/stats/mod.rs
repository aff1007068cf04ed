//! 相关矩阵与显著性检验。

pub mod correlation;
pub mod tdist;

pub use correlation::{correlate, CorrelationMatrix};
pub use tdist::{correlation_p, two_sided_p};
