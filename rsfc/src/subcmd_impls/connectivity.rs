use super::common::{output_dir, required, CommonArgs, NetworkArgs, PreprocessArgs};
use super::export::{region_legend, write_json, write_matrix, write_png, write_series};
use super::plot;
use anyhow::Context;
use clap::Args;
use connectome::atlas::{LabelTable, RegionSeries};
use connectome::config::PipelineConfig;
use connectome::pipeline::Pipeline;
use connectome::prep::{average_over_time, read_image, time_series_to_matrix, Mask};
use connectome::stats::CorrelationMatrix;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct Connectivity {
    #[command(flatten)]
    source: SeriesArgs,
}

impl Connectivity {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let (config, series) = self.source.load(None)?;
        let out = output_dir(&config)?;
        write_connectivity(
            &out,
            &series.regions,
            &series.correlation,
            &series.label_table,
            &config,
        )
    }
}

/// 脑区时间序列的来源：已清洗的4D图像与已配准的图谱可直接给出，缺少时现场计算。
#[derive(Args, Debug)]
pub struct SeriesArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub preprocess: PreprocessArgs,
    /// 已预处理的4D图像；给出时跳过预处理。
    #[arg(long)]
    pub cleaned: Option<PathBuf>,
    /// 已在BOLD空间的图谱；给出时跳过配准。
    #[arg(long = "registered-atlas")]
    pub registered_atlas: Option<PathBuf>,
}

pub struct Series {
    pub label_table: LabelTable,
    pub regions: RegionSeries,
    pub correlation: CorrelationMatrix,
}

impl SeriesArgs {
    /// 读取配置与输入，必要时配准、预处理，最后计算全脑相关矩阵。
    pub fn load(&self, network: Option<&NetworkArgs>) -> anyhow::Result<(PipelineConfig, Series)> {
        let mut config = self.common.load()?;
        self.preprocess.apply(&mut config.preprocess);
        if let Some(args) = network {
            args.apply(&mut config);
        }
        config.validate()?;
        let pipeline = Pipeline::new(config.clone());

        let label_table = LabelTable::read(required(&config.inputs.label_table, "labels")?)
            .context("无法读取标签表")?;
        let mask_image =
            read_image(required(&config.inputs.mask, "mask")?, 3).context("无法读取脑掩膜")?;

        let bold = if self.cleaned.is_none() || self.registered_atlas.is_none() {
            let path = required(&config.inputs.bold, "bold")?;
            Some(read_image(path, 4).context("无法读取BOLD图像")?)
        } else {
            None
        };

        let (mask, matrix, censored) = match &self.cleaned {
            Some(path) => {
                let cleaned = read_image(path, 4).context("无法读取已预处理的图像")?;
                if config.preprocess.scrub {
                    warn!("使用已预处理的图像时没有FD序列，忽略删帧");
                }
                let mask = Mask::from_volume(&mask_image)?;
                let matrix = time_series_to_matrix(&cleaned, &mask)?;
                (mask, matrix, None)
            }
            None => {
                let bold = bold.as_ref().context("缺少BOLD图像")?;
                let segmentation = config
                    .inputs
                    .segmentation
                    .as_ref()
                    .map(|p| read_image(p, 3))
                    .transpose()
                    .context("无法读取分割图像")?;
                let (mask, result) =
                    pipeline.preprocess(bold, &mask_image, segmentation.as_ref())?;
                (mask, result.matrix, Some(result.censored))
            }
        };

        let atlas = match &self.registered_atlas {
            Some(path) => read_image(path, 3).context("无法读取已配准的图谱")?,
            None => {
                let bold = bold.as_ref().context("缺少BOLD图像")?;
                let atlas = read_image(required(&config.inputs.atlas, "atlas")?, 3)
                    .context("无法读取图谱")?;
                let mean_bold = average_over_time(bold)?;
                let (mut results, primary) = pipeline.register(&mean_bold, &atlas, &mask_image)?;
                let chosen = results.swap_remove(primary);
                info!(model = %chosen.model, dice = chosen.dice, "使用主模型配准结果");
                chosen.atlas
            }
        };

        let (regions, correlation) =
            pipeline.connectivity(&matrix, censored.as_deref(), &mask, &atlas, &label_table)?;
        Ok((
            config,
            Series {
                label_table,
                regions,
                correlation,
            },
        ))
    }
}

/// 写出脑区时间序列、相关矩阵、p值矩阵、热图与脑区说明。
pub fn write_connectivity(
    out: &Path,
    regions: &RegionSeries,
    correlation: &CorrelationMatrix,
    table: &LabelTable,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    write_matrix(out, "region_series.npy", regions.matrix())?;
    write_matrix(out, "correlation.npy", correlation.r())?;
    write_matrix(out, "p_values.npy", correlation.p_values())?;
    write_series(out, "mean_connectivity.npy", &correlation.mean_connectivity().to_vec())?;
    let significant = correlation.significant(config.network.alpha);
    let img = plot::heatmap(correlation.r(), Some(&significant), config.output.plot_size);
    write_png(out, "heatmap.png", &img)?;
    write_json(out, "regions.json", &region_legend(regions, table))?;
    info!(
        regions = correlation.dim(),
        frames = correlation.n_samples(),
        "写出相关矩阵"
    );
    Ok(())
}
