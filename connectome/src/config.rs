//! 流水线配置：TOML文件，所有字段均有默认值，命令行参数可覆盖文件中的值。
//!
//! ```toml
//! [inputs]
//! bold = "rest_bold.nii.gz"
//! atlas = "aal.nii.gz"
//!
//! [preprocess]
//! compcor_components = 6
//! band_pass = [0.01, 0.1]
//!
//! [network]
//! name = "dmn"
//! density = 0.25
//! ```

use crate::error::{ConnectivityError, Result};
use crate::preprocess::PreprocessOptions;
use crate::registration::{Interpolation, MomentRegistration, TransformModel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 完整的流水线配置。
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub inputs: InputsConfig,
    pub registration: RegistrationConfig,
    pub preprocess: PreprocessOptions,
    pub network: NetworkConfig,
    pub output: OutputConfig,
}

/// 输入文件。路径为空时由命令行在数据目录中按文件名查找。
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputsConfig {
    pub atlas: Option<PathBuf>,
    pub label_table: Option<PathBuf>,
    pub bold: Option<PathBuf>,
    pub mask: Option<PathBuf>,
    pub segmentation: Option<PathBuf>,
    /// 在数据目录中查找各输入时使用的文件名。
    pub atlas_name: String,
    pub label_table_name: String,
    pub bold_name: String,
    pub mask_name: String,
    pub segmentation_name: String,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            atlas: None,
            label_table: None,
            bold: None,
            mask: None,
            segmentation: None,
            atlas_name: "atlas.nii.gz".to_string(),
            label_table_name: "labels.csv".to_string(),
            bold_name: "bold.nii.gz".to_string(),
            mask_name: "mask.nii.gz".to_string(),
            segmentation_name: "segmentation.nii.gz".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationConfig {
    /// 逐一尝试并比较的变换模型。
    pub models: Vec<TransformModel>,
    /// 后续分析使用的模型；必须出现在`models`中。
    pub primary: TransformModel,
    /// 标签图像应使用最近邻插值。
    pub interpolation: Interpolation,
    pub fixed_fraction: f32,
    pub moving_fraction: f32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        let m = MomentRegistration::default();
        Self {
            models: vec![TransformModel::Translation, TransformModel::Affine],
            primary: TransformModel::Affine,
            interpolation: Interpolation::NearestNeighbor,
            fixed_fraction: m.fixed_fraction,
            moving_fraction: m.moving_fraction,
        }
    }
}

impl RegistrationConfig {
    pub fn registration(&self) -> MomentRegistration {
        MomentRegistration {
            fixed_fraction: self.fixed_fraction,
            moving_fraction: self.moving_fraction,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// 子网络名，对应标签表中的一列。
    pub name: String,
    /// 保留边所占的比例。
    pub density: f64,
    pub compute_efficiency: bool,
    /// 相关显著性的检验水平。
    pub alpha: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "dmn".to_string(),
            density: 0.25,
            compute_efficiency: true,
            alpha: 0.05,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// 是否写出清洗后的4D图像。
    pub write_cleaned: bool,
    /// 图像边长（像素）。
    pub plot_size: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            write_cleaned: true,
            plot_size: 800,
        }
    }
}

/// 读取并校验配置文件。
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = PipelineConfig::from_toml_str(&text)?;
    debug!(path = %path.display(), "读取配置");
    Ok(config)
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查各字段取值范围及相互之间是否一致。
    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        let invalid = |msg: String| Err(ConnectivityError::InvalidParameter(msg));
        if !(self.network.density > 0.0 && self.network.density <= 1.0) {
            return invalid(format!(
                "network.density must be in (0, 1], but got {}",
                self.network.density
            ));
        }
        if !(self.network.alpha > 0.0 && self.network.alpha < 1.0) {
            return invalid(format!(
                "network.alpha must be in (0, 1), but got {}",
                self.network.alpha
            ));
        }
        if self.network.name.trim().is_empty() {
            return invalid("network.name must not be empty".to_string());
        }
        if self.registration.models.is_empty() {
            return invalid("registration.models must not be empty".to_string());
        }
        if !self.registration.models.contains(&self.registration.primary) {
            return invalid(format!(
                "registration.primary `{}` is not listed in registration.models",
                self.registration.primary
            ));
        }
        for f in [self.registration.fixed_fraction, self.registration.moving_fraction] {
            if !(0.0..1.0).contains(&f) {
                return invalid(format!("foreground fraction must be in [0, 1), but got {f}"));
            }
        }
        if self.output.plot_size < 64 {
            return invalid(format!(
                "output.plot_size must be at least 64, but got {}",
                self.output.plot_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::NoiseRoi;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(c, PipelineConfig::default());
        assert_eq!(c.preprocess.band_pass, Some([0.01, 0.1]));
        assert!(!c.preprocess.regress_global_signal);
        assert_eq!(c.network.name, "dmn");
    }

    #[test]
    fn test_sections() {
        let text = r#"
[registration]
models = ["translation"]
primary = "translation"

[preprocess]
compcor_components = 3
smoothing_fwhm = 0.0
noise_roi = { kind = "segmentation", labels = [1, 3] }

[network]
density = 0.1
compute_efficiency = false
"#;
        let c = PipelineConfig::from_toml_str(text).unwrap();
        assert_eq!(c.registration.primary, TransformModel::Translation);
        assert_eq!(c.preprocess.compcor_components, 3);
        assert_eq!(
            c.preprocess.noise_roi,
            NoiseRoi::Segmentation { labels: vec![1, 3] }
        );
        assert_eq!(c.network.density, 0.1);
        assert_eq!(c.output, OutputConfig::default());
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::from_toml_str("[network]\ndensity = 0.0\n").is_err());
        assert!(PipelineConfig::from_toml_str("[network]\nalpha = 1.0\n").is_err());
        assert!(PipelineConfig::from_toml_str("[preprocess]\nband_pass = [0.2, 0.1]\n").is_err());
        assert!(PipelineConfig::from_toml_str("[preprocess]\nsmoothing_fwhm = -2.0\n").is_err());
        assert!(PipelineConfig::from_toml_str(
            "[registration]\nmodels = [\"translation\"]\nprimary = \"affine\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            PipelineConfig::from_toml_str("[network]\ndensty = 0.2\n"),
            Err(ConnectivityError::Config(_))
        ));
    }
}
