use anyhow::Context;
use connectome::atlas::{LabelTable, RegionSeries};
use image::RgbImage;
use json::JsonValue;
use ndarray::{Array1, Array2};
use std::path::Path;
use tracing::info;

pub fn write_series(dir: &Path, name: &str, values: &[f64]) -> anyhow::Result<()> {
    let path = dir.join(name);
    ndarray_npy::write_npy(&path, &Array1::from(values.to_vec()))
        .with_context(|| format!("无法写出`{}`", path.display()))
}

pub fn write_flags(dir: &Path, name: &str, flags: &[bool]) -> anyhow::Result<()> {
    let path = dir.join(name);
    let a: Array1<u8> = flags.iter().map(|&f| f as u8).collect();
    ndarray_npy::write_npy(&path, &a).with_context(|| format!("无法写出`{}`", path.display()))
}

pub fn write_matrix(dir: &Path, name: &str, m: &Array2<f64>) -> anyhow::Result<()> {
    let path = dir.join(name);
    ndarray_npy::write_npy(&path, m).with_context(|| format!("无法写出`{}`", path.display()))
}

pub fn write_json(dir: &Path, name: &str, value: &JsonValue) -> anyhow::Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, value.pretty(2))
        .with_context(|| format!("无法写出`{}`", path.display()))
}

pub fn write_png(dir: &Path, name: &str, img: &RgbImage) -> anyhow::Result<()> {
    let path = dir.join(name);
    img.save(&path)
        .with_context(|| format!("无法写出`{}`", path.display()))?;
    info!(path = %path.display(), "写出图像");
    Ok(())
}

/// 矩阵行列对应的脑区说明：下标、标签、名称及所属子网络。
pub fn region_legend(series: &RegionSeries, table: &LabelTable) -> JsonValue {
    let regions: Vec<JsonValue> = series
        .labels()
        .iter()
        .zip(series.names())
        .enumerate()
        .map(|(i, (&label, name))| {
            let mut r = JsonValue::new_object();
            r["index"] = i.into();
            r["label"] = label.into();
            r["name"] = name.as_str().into();
            let networks: Vec<JsonValue> = table
                .networks()
                .iter()
                .filter(|n| table.get(label).map_or(false, |reg| reg.is_member_of(n)))
                .map(|n| n.as_str().into())
                .collect();
            r["networks"] = JsonValue::Array(networks);
            r
        })
        .collect();
    JsonValue::Array(regions)
}

/// 测试用的四个脑区：PCC与mPFC、M1与V1各自同步。
#[cfg(test)]
pub(super) fn sample_regions() -> (LabelTable, RegionSeries) {
    let table = LabelTable::from_csv_str(
        "label,name,dmn\n1,PCC,1\n2,mPFC,1\n3,M1,0\n4,V1,0\n",
    )
    .unwrap();
    let series = RegionSeries::new(
        Array2::from_shape_fn((30, 4), |(t, k)| {
            let t = t as f64;
            let shared = if k < 2 { (t * 0.5).sin() } else { (t * 1.3).cos() };
            shared + 0.2 * ((t + 1.0) * (k as f64 + 0.7)).sin()
        }),
        vec![1, 2, 3, 4],
        ["PCC", "mPFC", "M1", "V1"].map(String::from).to_vec(),
    )
    .unwrap();
    (table, series)
}

/// 断言`dir`下恰好有`names`这些文件。
#[cfg(test)]
pub(super) fn assert_artifacts(dir: &Path, names: &[&str]) {
    let mut found: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    found.sort();
    let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    expected.sort();
    assert_eq!(found, expected);
}
