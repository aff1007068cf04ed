use super::utils::discover;
use anyhow::{bail, Context};
use clap::Args;
use connectome::config::{InputsConfig, PipelineConfig};
use connectome::load_config;
use connectome::preprocess::PreprocessOptions;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// 各子命令共用的输入与配置参数。显式给出的文件路径优先于数据目录中的查找结果。
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// TOML配置文件。
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// 数据目录；未显式给出的输入按配置中的文件名在此目录下（两层以内）查找。
    #[arg(long = "data-dir", short = 'D')]
    data_dir: Option<PathBuf>,
    /// 输出目录。
    #[arg(long = "output-dir", short)]
    output_dir: Option<PathBuf>,
    /// 图谱标签图像（3D）。
    #[arg(long)]
    atlas: Option<PathBuf>,
    /// 图谱标签表（CSV）。
    #[arg(long)]
    labels: Option<PathBuf>,
    /// BOLD图像（4D）。
    #[arg(long)]
    bold: Option<PathBuf>,
    /// 脑掩膜（3D，BOLD空间）。
    #[arg(long)]
    mask: Option<PathBuf>,
    /// 组织分割图像（3D，BOLD空间）。
    #[arg(long)]
    segmentation: Option<PathBuf>,
}

impl CommonArgs {
    /// 读取配置文件（或使用默认配置），再用命令行参数覆盖。
    pub fn load(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("无法读取配置文件`{}`", path.display()))?,
            None => PipelineConfig::default(),
        };
        let inputs = &mut config.inputs;
        for (slot, flag) in [
            (&mut inputs.atlas, &self.atlas),
            (&mut inputs.label_table, &self.labels),
            (&mut inputs.bold, &self.bold),
            (&mut inputs.mask, &self.mask),
            (&mut inputs.segmentation, &self.segmentation),
        ] {
            if flag.is_some() {
                *slot = flag.clone();
            }
        }
        if let Some(dir) = &self.data_dir {
            if !dir.is_dir() {
                bail!("数据目录`{}`不存在", dir.display());
            }
            discover_inputs(inputs, dir);
        }
        if let Some(dir) = &self.output_dir {
            config.output.directory = dir.clone();
        }
        Ok(config)
    }
}

fn discover_inputs(inputs: &mut InputsConfig, dir: &std::path::Path) {
    let names = [
        inputs.atlas_name.clone(),
        inputs.label_table_name.clone(),
        inputs.bold_name.clone(),
        inputs.mask_name.clone(),
        inputs.segmentation_name.clone(),
    ];
    let slots = [
        &mut inputs.atlas,
        &mut inputs.label_table,
        &mut inputs.bold,
        &mut inputs.mask,
        &mut inputs.segmentation,
    ];
    for (slot, name) in slots.into_iter().zip(names.iter()) {
        if slot.is_none() {
            *slot = discover(dir, name);
            match slot {
                Some(p) => debug!(path = %p.display(), "找到输入"),
                None => debug!(name = %name, "数据目录中没有该输入"),
            }
        }
    }
}

/// 确保输出目录存在并返回其路径。
pub fn output_dir(config: &PipelineConfig) -> anyhow::Result<PathBuf> {
    let dir = config.output.directory.clone();
    fs::create_dir_all(&dir).with_context(|| format!("无法创建输出目录`{}`", dir.display()))?;
    Ok(dir)
}

/// 取出必需的输入路径。
pub fn required(path: &Option<PathBuf>, flag: &str) -> anyhow::Result<PathBuf> {
    match path {
        Some(p) => Ok(p.clone()),
        None => bail!("缺少输入：请用`--{flag}`指定，或在`--data-dir`中提供"),
    }
}

/// 覆盖预处理选项的命令行参数。
#[derive(Args, Debug, Clone, Default)]
pub struct PreprocessArgs {
    /// 关闭运动校正。
    #[arg(long)]
    no_motion_correction: bool,
    /// 外部运动参数文件（T行×6列：tx ty tz rx ry rz）。
    #[arg(long)]
    motion_parameters: Option<PathBuf>,
    /// CompCor成分个数。
    #[arg(long)]
    compcor: Option<usize>,
    /// 回归全局信号。
    #[arg(long)]
    global_signal: bool,
    /// 带通频带下限（Hz）。
    #[arg(long)]
    low: Option<f64>,
    /// 带通频带上限（Hz）。
    #[arg(long)]
    high: Option<f64>,
    /// 关闭带通滤波。
    #[arg(long, conflicts_with_all = ["low", "high"])]
    no_band_pass: bool,
    /// 平滑核FWHM（毫米），0为不平滑。
    #[arg(long)]
    fwhm: Option<f64>,
    /// FD阈值（毫米）。
    #[arg(long)]
    fd_threshold: Option<f64>,
    /// 计算相关前删除FD超过阈值的帧。
    #[arg(long)]
    scrub: bool,
}

impl PreprocessArgs {
    pub fn apply(&self, options: &mut PreprocessOptions) {
        if self.no_motion_correction {
            options.motion_correction = false;
        }
        if self.motion_parameters.is_some() {
            options.motion_parameters = self.motion_parameters.clone();
        }
        if let Some(n) = self.compcor {
            options.compcor_components = n;
        }
        if self.global_signal {
            options.regress_global_signal = true;
        }
        if self.no_band_pass {
            options.band_pass = None;
        } else if self.low.is_some() || self.high.is_some() {
            let [low, high] = options.band_pass.unwrap_or([0.01, 0.1]);
            options.band_pass = Some([self.low.unwrap_or(low), self.high.unwrap_or(high)]);
        }
        if let Some(f) = self.fwhm {
            options.smoothing_fwhm = f;
        }
        if let Some(t) = self.fd_threshold {
            options.fd_threshold = t;
        }
        if self.scrub {
            options.scrub = true;
        }
        if options.regress_global_signal {
            warn!("已启用全局信号回归，负相关的解释需谨慎");
        }
    }
}

/// 覆盖子网络与网络图配置的命令行参数。
#[derive(Args, Debug, Clone, Default)]
pub struct NetworkArgs {
    /// 子网络名（标签表中的列名）。
    #[arg(long = "network", short = 'n')]
    name: Option<String>,
    /// 网络图保留边的比例。
    #[arg(long)]
    density: Option<f64>,
    /// 显著性检验水平。
    #[arg(long)]
    alpha: Option<f64>,
    /// 不计算效率指标。
    #[arg(long)]
    no_efficiency: bool,
}

impl NetworkArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        let net = &mut config.network;
        if let Some(name) = &self.name {
            net.name = name.clone();
        }
        if let Some(d) = self.density {
            net.density = d;
        }
        if let Some(a) = self.alpha {
            net.alpha = a;
        }
        if self.no_efficiency {
            net.compute_efficiency = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_overrides() {
        let args = PreprocessArgs {
            compcor: Some(3),
            high: Some(0.08),
            fwhm: Some(0.0),
            ..Default::default()
        };
        let mut options = PreprocessOptions::default();
        args.apply(&mut options);
        assert_eq!(options.compcor_components, 3);
        assert_eq!(options.band_pass, Some([0.01, 0.08]));
        assert_eq!(options.smoothing_fwhm, 0.0);

        let args = PreprocessArgs {
            no_band_pass: true,
            ..Default::default()
        };
        args.apply(&mut options);
        assert_eq!(options.band_pass, None);
    }

    #[test]
    fn test_discovery_and_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bold.nii.gz"), b"").unwrap();
        std::fs::write(dir.path().join("mask.nii.gz"), b"").unwrap();
        let explicit = dir.path().join("other_mask.nii.gz");
        let args = CommonArgs {
            config: None,
            data_dir: Some(dir.path().to_path_buf()),
            output_dir: Some(dir.path().join("out")),
            atlas: None,
            labels: None,
            bold: None,
            mask: Some(explicit.clone()),
            segmentation: None,
        };
        let config = args.load().unwrap();
        assert_eq!(config.inputs.bold, Some(dir.path().join("bold.nii.gz")));
        assert_eq!(config.inputs.mask, Some(explicit));
        assert_eq!(config.inputs.atlas, None);
        assert_eq!(config.output.directory, dir.path().join("out"));
        assert!(required(&config.inputs.atlas, "atlas").is_err());
    }
}
