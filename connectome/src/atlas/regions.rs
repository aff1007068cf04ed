use super::table::LabelTable;
use crate::error::{ConnectivityError, Result};
use crate::prep::{Mask, Volume};
use ndarray::{Array2, Axis};
use std::collections::BTreeMap;
use tracing::warn;

/// “时间×脑区”矩阵，列按脑区标签升序排列。
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSeries {
    matrix: Array2<f64>,
    labels: Vec<u32>,
    names: Vec<String>,
}

/// 对“时间×体素”矩阵按图谱标签取体素平均，得到“时间×脑区”矩阵。
///
/// `atlas`必须已配准到`mask`所在网格。只有掩膜内出现过的非零标签才会成为一列；
/// 标签表中找不到的标签以`label_<id>`命名。
pub fn region_average(
    matrix: &Array2<f64>,
    mask: &Mask,
    atlas: &Volume,
    table: Option<&LabelTable>,
) -> Result<RegionSeries> {
    mask.check_same_grid("atlas image", atlas.spatial_shape())?;
    let (n_frames, n_voxels) = matrix.dim();
    if n_voxels != mask.len() {
        return Err(ConnectivityError::shape(
            "time-by-voxel matrix",
            &[n_frames, mask.len()],
            &[n_frames, n_voxels],
        ));
    }

    let mut members: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (j, v) in mask.voxels().iter().enumerate() {
        let label = atlas.get(*v).unwrap_or(0.0).round();
        if label >= 1.0 {
            members.entry(label as u32).or_default().push(j);
        }
    }
    if members.is_empty() {
        return Err(ConnectivityError::InvalidParameter(
            "no atlas label falls inside the mask".to_string(),
        ));
    }

    let mut out = Array2::<f64>::zeros((n_frames, members.len()));
    let mut labels = Vec::with_capacity(members.len());
    let mut names = Vec::with_capacity(members.len());
    for (k, (label, columns)) in members.iter().enumerate() {
        let sub = matrix.select(Axis(1), columns);
        if let Some(mean) = sub.mean_axis(Axis(1)) {
            out.column_mut(k).assign(&mean);
        }
        labels.push(*label);
        names.push(match table.and_then(|t| t.name_of(*label)) {
            Some(name) => name.to_string(),
            None => {
                if table.is_some() {
                    warn!(label, "标签表中没有该标签");
                }
                format!("label_{label}")
            }
        });
    }
    Ok(RegionSeries {
        matrix: out,
        labels,
        names,
    })
}

impl RegionSeries {
    /// 直接由矩阵与标签、名称构造。三者长度必须一致。
    pub fn new(matrix: Array2<f64>, labels: Vec<u32>, names: Vec<String>) -> Result<Self> {
        if matrix.ncols() != labels.len() || labels.len() != names.len() {
            return Err(ConnectivityError::shape(
                "region series",
                &[matrix.ncols(), matrix.ncols()],
                &[labels.len(), names.len()],
            ));
        }
        Ok(Self {
            matrix,
            labels,
            names,
        })
    }

    #[inline]
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    #[inline]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn n_regions(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.matrix.nrows()
    }

    /// 只保留`ids`中出现、且本矩阵中存在的脑区（保持升序）。
    ///
    /// 不存在的标签会被跳过并记录警告；一个都不存在时返回错误。
    pub fn select(&self, ids: &[u32]) -> Result<RegionSeries> {
        let columns: Vec<usize> = self
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| ids.contains(*l))
            .map(|(i, _)| i)
            .collect();
        for id in ids.iter().filter(|id| !self.labels.contains(*id)) {
            warn!(label = id, "子网络成员不在掩膜内，已跳过");
        }
        if columns.is_empty() {
            return Err(ConnectivityError::InvalidParameter(
                "none of the requested regions is present".to_string(),
            ));
        }
        Ok(RegionSeries {
            matrix: self.matrix.select(Axis(1), &columns),
            labels: columns.iter().map(|&i| self.labels[i]).collect(),
            names: columns.iter().map(|&i| self.names[i].clone()).collect(),
        })
    }

    /// 删除`censored`中标记为`true`的帧。
    pub fn drop_frames(&self, censored: &[bool]) -> Result<RegionSeries> {
        if censored.len() != self.n_frames() {
            return Err(ConnectivityError::shape(
                "censored frame flags",
                &[self.n_frames()],
                &[censored.len()],
            ));
        }
        let rows: Vec<usize> = (0..self.n_frames()).filter(|&t| !censored[t]).collect();
        Ok(RegionSeries {
            matrix: self.matrix.select(Axis(0), &rows),
            labels: self.labels.clone(),
            names: self.names.clone(),
        })
    }
}
