//! 静息态fMRI功能连接分析：图谱配准、BOLD预处理、脑区相关与网络图。

pub mod atlas;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod prep;
pub mod preprocess;
pub mod registration;
pub mod stats;

pub use config::{load_config, PipelineConfig};
pub use error::{ConnectivityError, Result};
pub use pipeline::{Inputs, Pipeline, PipelineOutput};
