use nifti::error::NiftiError;
use std::io::Error as IoError;
use thiserror::Error;

/// 本库所有操作可能产生的错误。
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] NiftiError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid TOML configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// 请求的图像维数与文件中的不一致。
    #[error("expected a {expected}-D image, but got {found}-D")]
    DimensionMismatch { expected: usize, found: usize },

    /// 两个本应对齐的数据形状不一致。
    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("mask contains no voxels")]
    EmptyMask,

    #[error("no sub-network named `{0}` in the label table")]
    UnknownNetwork(String),

    #[error("invalid label table: {0}")]
    InvalidLabelTable(String),

    #[error("invalid motion parameters: {0}")]
    InvalidMotionParameters(String),

    #[error("linear system is singular")]
    SingularMatrix,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// 本库的结果类型。
pub type Result<T> = std::result::Result<T, ConnectivityError>;

impl ConnectivityError {
    #[inline]
    pub(crate) fn shape(what: &'static str, expected: &[usize], found: &[usize]) -> Self {
        ConnectivityError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}
