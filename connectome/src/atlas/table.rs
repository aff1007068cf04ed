use crate::error::{ConnectivityError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

/// 标签列可接受的表头名。
const LABEL_COLUMNS: [&str; 3] = ["label", "label_num", "id"];
/// 名称列可接受的表头名。
const NAME_COLUMNS: [&str; 3] = ["name", "label_name", "region"];

/// 图谱中的一个脑区。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub id: u32,
    pub name: String,
    networks: BTreeSet<String>,
}

impl Region {
    /// 判断该脑区是否属于子网络`network`（不区分大小写）。
    pub fn is_member_of(&self, network: &str) -> bool {
        self.networks.contains(&network.to_ascii_lowercase())
    }
}

/// 图谱标签表：整数标签到脑区名称及子网络归属的映射。
///
/// CSV格式：表头必须包含标签列（`label`/`label_num`/`id`）与名称列
/// （`name`/`label_name`/`region`），其余每一列都是一个子网络归属标记，
/// 取值为`1`、`true`、`yes`或`x`时视为属于该子网络。
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    regions: BTreeMap<u32, Region>,
    networks: Vec<String>,
}

impl LabelTable {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        Self::from_reader(rdr)
    }

    pub fn from_csv_str(s: &str) -> Result<Self> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(s.as_bytes());
        Self::from_reader(rdr)
    }

    fn from_reader<R: io::Read>(mut rdr: csv::Reader<R>) -> Result<Self> {
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));
        let label_col = find(&LABEL_COLUMNS).ok_or_else(|| {
            ConnectivityError::InvalidLabelTable("missing label column".to_string())
        })?;
        let name_col = find(&NAME_COLUMNS).ok_or_else(|| {
            ConnectivityError::InvalidLabelTable("missing name column".to_string())
        })?;
        let network_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != label_col && *i != name_col)
            .map(|(i, h)| (i, h.clone()))
            .collect();

        let mut regions = BTreeMap::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let raw = record.get(label_col).unwrap_or_default();
            let id = parse_label(raw).ok_or_else(|| {
                ConnectivityError::InvalidLabelTable(format!(
                    "row {}: `{raw}` is not a positive integer label",
                    row + 1
                ))
            })?;
            let name = record.get(name_col).unwrap_or_default().to_string();
            let networks = network_cols
                .iter()
                .filter(|(i, _)| record.get(*i).map_or(false, is_truthy))
                .map(|(_, n)| n.clone())
                .collect();
            let region = Region { id, name, networks };
            if regions.insert(id, region).is_some() {
                return Err(ConnectivityError::InvalidLabelTable(format!(
                    "duplicate label {id}"
                )));
            }
        }
        Ok(Self {
            regions,
            networks: network_cols.into_iter().map(|(_, n)| n).collect(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&Region> {
        self.regions.get(&id)
    }

    #[inline]
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.regions.get(&id).map(|r| r.name.as_str())
    }

    /// 按标签升序枚举所有脑区。
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// 表中出现的所有子网络名（小写）。
    #[inline]
    pub fn networks(&self) -> &[String] {
        &self.networks
    }

    /// 子网络`name`的全部成员标签（升序）。表中没有该子网络时返回`UnknownNetwork`。
    pub fn sub_network(&self, name: &str) -> Result<Vec<u32>> {
        let key = name.to_ascii_lowercase();
        if !self.networks.contains(&key) {
            return Err(ConnectivityError::UnknownNetwork(name.to_string()));
        }
        Ok(self
            .regions
            .values()
            .filter(|r| r.networks.contains(&key))
            .map(|r| r.id)
            .collect())
    }
}

fn parse_label(s: &str) -> Option<u32> {
    if let Ok(v) = s.parse::<u32>() {
        return (v > 0).then_some(v);
    }
    let f: f64 = s.parse().ok()?;
    (f.fract() == 0.0 && f >= 1.0 && f <= u32::MAX as f64).then_some(f as u32)
}

fn is_truthy(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "1" | "1.0" | "true" | "t" | "yes" | "y" | "x"
    )
}
