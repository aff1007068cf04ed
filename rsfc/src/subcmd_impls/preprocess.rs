use super::common::{output_dir, required, CommonArgs, PreprocessArgs};
use super::export::{write_flags, write_matrix, write_png, write_series};
use super::plot::{self, Trace};
use super::utils::rgb;
use anyhow::Context;
use clap::Args;
use connectome::config::OutputConfig;
use connectome::pipeline::Pipeline;
use connectome::prep::read_image;
use connectome::preprocess::PreprocessOutput;
use std::path::Path;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct Preprocess {
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    preprocess: PreprocessArgs,
}

impl Preprocess {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut config = self.common.load()?;
        self.preprocess.apply(&mut config.preprocess);
        config.validate()?;
        let out = output_dir(&config)?;

        let bold = read_image(required(&config.inputs.bold, "bold")?, 4).context("无法读取BOLD图像")?;
        let mask = read_image(required(&config.inputs.mask, "mask")?, 3).context("无法读取脑掩膜")?;
        let segmentation = config
            .inputs
            .segmentation
            .as_ref()
            .map(|p| read_image(p, 3))
            .transpose()
            .context("无法读取分割图像")?;

        let pipeline = Pipeline::new(config.clone());
        let (_, result) = pipeline.preprocess(&bold, &mask, segmentation.as_ref())?;
        write_preprocess(&out, &result, &config.output, config.preprocess.fd_threshold)
    }
}

/// 写出清洗后的图像、质控序列、干扰矩阵与质控图。
pub fn write_preprocess(
    out: &Path,
    result: &PreprocessOutput,
    output: &OutputConfig,
    fd_threshold: f64,
) -> anyhow::Result<()> {
    if output.write_cleaned {
        let path = out.join("cleaned.nii.gz");
        result
            .cleaned
            .write(&path)
            .with_context(|| format!("无法写出`{}`", path.display()))?;
        info!(path = %path.display(), "写出清洗后的BOLD图像");
    }
    write_series(out, "fd.npy", &result.framewise_displacement)?;
    write_series(out, "dvars.npy", &result.dvars)?;
    write_series(out, "global_signal.npy", &result.global_signal)?;
    write_flags(out, "censored.npy", &result.censored)?;
    write_matrix(out, "nuisance.npy", &result.nuisance)?;
    write_matrix(out, "motion.npy", result.motion.matrix())?;
    let names = result.nuisance_names.join("\n");
    std::fs::write(out.join("nuisance_names.txt"), names).context("无法写出干扰回归量名称")?;

    let n_censored = result.n_censored();
    if n_censored > 0 {
        warn!(
            frames = n_censored,
            threshold = fd_threshold,
            "部分帧的FD超过阈值"
        );
    }
    let panels = [
        Trace {
            values: &result.framewise_displacement,
            color: rgb::red(),
            threshold: Some(fd_threshold),
        },
        Trace {
            values: &result.dvars,
            color: rgb::blue(),
            threshold: None,
        },
        Trace {
            values: &result.global_signal,
            color: rgb::green(),
            threshold: None,
        },
    ];
    let img = plot::traces(&panels, output.plot_size, output.plot_size * 3 / 4);
    write_png(out, "qc.png", &img)
}

#[cfg(test)]
mod tests {
    use super::super::export::assert_artifacts;
    use super::*;
    use connectome::prep::Volume;
    use connectome::preprocess::MotionParameters;
    use ndarray::{Array2, Array4};

    fn sample_output(n_frames: usize) -> PreprocessOutput {
        let fd: Vec<f64> = (0..n_frames).map(|t| if t == 3 { 0.9 } else { 0.1 }).collect();
        PreprocessOutput {
            cleaned: Volume::from_array4(Array4::zeros((2, 2, 2, n_frames)), [3.0; 3], 2.0),
            matrix: Array2::zeros((n_frames, 8)),
            censored: fd.iter().map(|&d| d > 0.5).collect(),
            framewise_displacement: fd,
            dvars: vec![1.0; n_frames],
            global_signal: (0..n_frames).map(|t| t as f64).collect(),
            nuisance: Array2::from_shape_fn((n_frames, 2), |(t, k)| (t * (k + 1)) as f64),
            nuisance_names: vec!["tx".to_string(), "compcor1".to_string()],
            motion: MotionParameters::from_array(Array2::zeros((n_frames, 6))).unwrap(),
        }
    }

    #[test]
    fn test_write_preprocess_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig {
            directory: dir.path().to_path_buf(),
            write_cleaned: true,
            plot_size: 64,
        };
        write_preprocess(dir.path(), &sample_output(6), &output, 0.5).unwrap();
        assert_artifacts(
            dir.path(),
            &[
                "cleaned.nii.gz",
                "fd.npy",
                "dvars.npy",
                "global_signal.npy",
                "censored.npy",
                "nuisance.npy",
                "motion.npy",
                "nuisance_names.txt",
                "qc.png",
            ],
        );
        let names = std::fs::read_to_string(dir.path().join("nuisance_names.txt")).unwrap();
        assert_eq!(names, "tx\ncompcor1");
        let cleaned = read_image(dir.path().join("cleaned.nii.gz"), 4).unwrap();
        assert_eq!(cleaned.n_frames(), 6);
    }

    #[test]
    fn test_cleaned_image_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig {
            directory: dir.path().to_path_buf(),
            write_cleaned: false,
            plot_size: 64,
        };
        write_preprocess(dir.path(), &sample_output(6), &output, 0.5).unwrap();
        assert!(!dir.path().join("cleaned.nii.gz").exists());
        assert!(dir.path().join("qc.png").exists());
    }
}
