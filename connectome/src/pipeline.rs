//! 从读入数据到网络图的完整流水线。

use crate::atlas::{region_average, LabelTable, RegionSeries};
use crate::config::{InputsConfig, PipelineConfig};
use crate::error::{ConnectivityError, Result};
use crate::network::{build_network_graph, NetworkGraph};
use crate::prep::{average_over_time, read_image, Mask, StageTimer, Volume};
use crate::preprocess::{preprocess_bold, PreprocessOutput};
use crate::registration::{
    apply_transform, overlap, Registration, TransformList, TransformModel,
};
use crate::stats::CorrelationMatrix;
use ndarray::Array2;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// 流水线的全部输入。
#[derive(Clone, Debug)]
pub struct Inputs {
    /// 4D BOLD图像。
    pub bold: Volume,
    /// 图谱标签图像（模板空间）。
    pub atlas: Volume,
    pub label_table: LabelTable,
    /// BOLD空间的脑掩膜。
    pub mask: Volume,
    /// BOLD空间的组织分割图像。
    pub segmentation: Option<Volume>,
}

impl Inputs {
    /// 按配置中的路径读取所有输入。除分割图像外都是必需的。
    pub fn load(config: &InputsConfig) -> Result<Self> {
        let required = |p: &Option<std::path::PathBuf>, what: &str| {
            p.clone().ok_or_else(|| {
                ConnectivityError::InvalidParameter(format!("missing input `{what}`"))
            })
        };
        let bold = required(&config.bold, "bold")?;
        let atlas = required(&config.atlas, "atlas")?;
        let label_table = required(&config.label_table, "label_table")?;
        let mask = required(&config.mask, "mask")?;
        Self::read(
            &bold,
            &atlas,
            &label_table,
            &mask,
            config.segmentation.as_deref(),
        )
    }

    pub fn read(
        bold: &Path,
        atlas: &Path,
        label_table: &Path,
        mask: &Path,
        segmentation: Option<&Path>,
    ) -> Result<Self> {
        info!("读取输入图像");
        Ok(Self {
            bold: read_image(bold, 4)?,
            atlas: read_image(atlas, 3)?,
            label_table: LabelTable::read(label_table)?,
            mask: read_image(mask, 3)?,
            segmentation: segmentation.map(|p| read_image(p, 3)).transpose()?,
        })
    }
}

/// 用某一变换模型把图谱配准到BOLD空间的结果。
#[derive(Clone, Debug)]
pub struct RegisteredAtlas {
    pub model: TransformModel,
    pub transforms: TransformList,
    /// BOLD网格上的图谱。
    pub atlas: Volume,
    /// 配准后图谱与脑掩膜的Dice系数。
    pub dice: f64,
}

/// 流水线的全部输出。
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub mean_bold: Volume,
    /// 按配置顺序排列的每个模型的配准结果。
    pub registrations: Vec<RegisteredAtlas>,
    /// `registrations`中主模型的下标。
    pub primary: usize,
    pub mask: Mask,
    pub preprocess: PreprocessOutput,
    pub regions: RegionSeries,
    pub correlation: CorrelationMatrix,
    pub sub_regions: RegionSeries,
    pub sub_correlation: CorrelationMatrix,
    pub graph: NetworkGraph,
}

impl PipelineOutput {
    /// 主模型配准后的图谱。
    pub fn atlas(&self) -> &RegisteredAtlas {
        &self.registrations[self.primary]
    }
}

/// 流水线。配准算法可以替换，默认为矩配准初始化器。
pub struct Pipeline {
    config: PipelineConfig,
    registration: Box<dyn Registration>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let registration = Box::new(config.registration.registration());
        Self {
            config,
            registration,
        }
    }

    /// 替换配准算法。
    pub fn with_registration<R: Registration + 'static>(mut self, registration: R) -> Self {
        self.registration = Box::new(registration);
        self
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 配准每个模型，返回结果与主模型下标。`mask`是BOLD空间的脑掩膜图像，用于计算Dice系数。
    pub fn register(
        &self,
        mean_bold: &Volume,
        atlas: &Volume,
        mask: &Volume,
    ) -> Result<(Vec<RegisteredAtlas>, usize)> {
        let reg = &self.config.registration;
        let mut results = Vec::with_capacity(reg.models.len());
        for &model in &reg.models {
            let transforms = self.registration.register(mean_bold, atlas, model)?;
            let warped = apply_transform(mean_bold, atlas, &transforms.forward, reg.interpolation)?;
            check_grid("brain mask", warped.spatial_shape(), mask.spatial_shape())?;
            let dice = overlap(&warped, mask)?;
            info!(%model, dice, "图谱配准");
            results.push(RegisteredAtlas {
                model,
                transforms,
                atlas: warped,
                dice,
            });
        }
        let primary = results
            .iter()
            .position(|r| r.model == reg.primary)
            .ok_or_else(|| {
                ConnectivityError::InvalidParameter(format!(
                    "primary transform model `{}` was not registered",
                    reg.primary
                ))
            })?;
        Ok((results, primary))
    }

    /// 在脑掩膜内预处理BOLD序列。
    pub fn preprocess(
        &self,
        bold: &Volume,
        mask: &Volume,
        segmentation: Option<&Volume>,
    ) -> Result<(Mask, PreprocessOutput)> {
        let bold_shape = bold.spatial_shape();
        check_grid("brain mask", bold_shape, mask.spatial_shape())?;
        if let Some(seg) = segmentation {
            check_grid("segmentation image", bold_shape, seg.spatial_shape())?;
        }
        info!("预处理BOLD序列");
        let mask = Mask::from_volume(mask)?;
        let out = preprocess_bold(bold, &mask, &self.config.preprocess, segmentation)?;
        let expected = [bold.n_frames(), mask.len()];
        let found = [out.matrix.nrows(), out.matrix.ncols()];
        if expected != found {
            return Err(ConnectivityError::shape(
                "time-by-voxel matrix",
                &expected,
                &found,
            ));
        }
        Ok((mask, out))
    }

    /// 脑区平均与全脑相关矩阵。配置要求删帧且给出了`censored`时，先删除被标记的帧。
    pub fn connectivity(
        &self,
        matrix: &Array2<f64>,
        censored: Option<&[bool]>,
        mask: &Mask,
        atlas: &Volume,
        table: &LabelTable,
    ) -> Result<(RegionSeries, CorrelationMatrix)> {
        info!("计算脑区相关");
        let mut regions = region_average(matrix, mask, atlas, Some(table))?;
        if let (true, Some(censored)) = (self.config.preprocess.scrub, censored) {
            regions = regions.drop_frames(censored)?;
            info!(remaining = regions.n_frames(), "删除高运动帧");
            if regions.n_frames() < 3 {
                return Err(ConnectivityError::InvalidParameter(format!(
                    "only {} frames remain after scrubbing",
                    regions.n_frames()
                )));
            }
        }
        debug!(regions = regions.n_regions(), frames = regions.n_frames(), "脑区平均");
        let correlation = CorrelationMatrix::from_series(&regions)?;
        let n_labels = labels_in_mask(atlas, mask).len();
        if correlation.dim() != n_labels {
            return Err(ConnectivityError::shape(
                "correlation matrix",
                &[n_labels, n_labels],
                &[correlation.dim(), correlation.dim()],
            ));
        }
        Ok((regions, correlation))
    }

    /// 选出配置中的子网络，计算其相关矩阵并构造网络图。
    pub fn sub_network(
        &self,
        regions: &RegionSeries,
        table: &LabelTable,
    ) -> Result<(RegionSeries, CorrelationMatrix, NetworkGraph)> {
        let network = &self.config.network;
        let members = table.sub_network(&network.name)?;
        let sub_regions = regions.select(&members)?;
        let sub_correlation = CorrelationMatrix::from_series(&sub_regions)?;
        let flagged = members
            .iter()
            .filter(|id| regions.labels().contains(*id))
            .count();
        if sub_correlation.dim() != flagged {
            return Err(ConnectivityError::shape(
                "sub-network correlation matrix",
                &[flagged, flagged],
                &[sub_correlation.dim(), sub_correlation.dim()],
            ));
        }
        let graph = build_network_graph(
            &sub_correlation,
            network.density,
            network.compute_efficiency,
        )?;
        info!(
            network = %network.name,
            members = sub_correlation.dim(),
            density = graph.density(),
            global_efficiency = ?graph.global_efficiency(),
            "子网络分析"
        );
        Ok((sub_regions, sub_correlation, graph))
    }

    /// 依次执行配准、预处理、脑区平均、相关分析、子网络分析与网络图构造。
    pub fn run(&self, inputs: &Inputs) -> Result<PipelineOutput> {
        self.config.validate()?;
        let mut timer = StageTimer::new();
        check_grid(
            "brain mask",
            inputs.bold.spatial_shape(),
            inputs.mask.spatial_shape(),
        )?;

        let mean_bold = average_over_time(&inputs.bold)?;
        let (registrations, primary) = self.register(&mean_bold, &inputs.atlas, &inputs.mask)?;
        timer.finish("registration");

        timer.start();
        let (mask, preprocess) =
            self.preprocess(&inputs.bold, &inputs.mask, inputs.segmentation.as_ref())?;
        timer.finish("preprocess");

        timer.start();
        let (regions, correlation) = self.connectivity(
            &preprocess.matrix,
            Some(preprocess.censored.as_slice()),
            &mask,
            &registrations[primary].atlas,
            &inputs.label_table,
        )?;
        let (sub_regions, sub_correlation, graph) =
            self.sub_network(&regions, &inputs.label_table)?;
        timer.finish("connectivity");
        info!(
            regions = correlation.dim(),
            ms = timer.get_total_ms(),
            "流水线完成"
        );

        Ok(PipelineOutput {
            mean_bold,
            registrations,
            primary,
            mask,
            preprocess,
            regions,
            correlation,
            sub_regions,
            sub_correlation,
            graph,
        })
    }
}

fn check_grid(what: &'static str, expected: [usize; 3], found: [usize; 3]) -> Result<()> {
    if expected != found {
        return Err(ConnectivityError::shape(what, &expected, &found));
    }
    Ok(())
}

/// 掩膜内出现的所有非零图谱标签。
pub fn labels_in_mask(atlas: &Volume, mask: &Mask) -> BTreeSet<u32> {
    mask.voxels()
        .iter()
        .filter_map(|v| atlas.get(*v))
        .map(|l| l.round())
        .filter(|&l| l >= 1.0)
        .map(|l| l as u32)
        .collect()
}
