use super::common::{output_dir, required, CommonArgs};
use super::export::{write_json, write_png};
use super::plot;
use anyhow::Context;
use clap::Args;
use connectome::pipeline::{Pipeline, RegisteredAtlas};
use connectome::prep::{average_over_time, read_image, Volume};
use connectome::registration::{AffineTransform, TransformModel};
use json::JsonValue;
use std::path::Path;
use tracing::info;

#[derive(Args, Debug)]
pub struct Register {
    #[command(flatten)]
    common: CommonArgs,
    /// 要比较的变换模型（可多次给出）；默认使用配置中的列表。
    #[arg(long = "model", short)]
    models: Vec<TransformModel>,
}

impl Register {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut config = self.common.load()?;
        if !self.models.is_empty() {
            config.registration.models = self.models.clone();
            if !self.models.contains(&config.registration.primary) {
                config.registration.primary = self.models[0];
            }
        }
        config.validate()?;
        let out = output_dir(&config)?;

        let bold = read_image(required(&config.inputs.bold, "bold")?, 4).context("无法读取BOLD图像")?;
        let atlas = read_image(required(&config.inputs.atlas, "atlas")?, 3).context("无法读取图谱")?;
        let mask = read_image(required(&config.inputs.mask, "mask")?, 3).context("无法读取脑掩膜")?;
        let mean_bold = average_over_time(&bold)?;

        let pipeline = Pipeline::new(config.clone());
        let (results, primary) = pipeline.register(&mean_bold, &atlas, &mask)?;
        write_registrations(&out, &mean_bold, &results, primary, config.output.plot_size)?;
        info!(model = %results[primary].model, "配准完成");
        Ok(())
    }
}

/// 写出每个模型的配准图谱、叠加图，以及汇总各模型Dice系数的`registration.json`。
pub fn write_registrations(
    out: &Path,
    mean_bold: &Volume,
    results: &[RegisteredAtlas],
    primary: usize,
    plot_size: u32,
) -> anyhow::Result<()> {
    let mut summary = JsonValue::new_object();
    let mut models = Vec::with_capacity(results.len());
    for r in results {
        let nii = out.join(format!("atlas_{}.nii.gz", r.model));
        r.atlas
            .write(&nii)
            .with_context(|| format!("无法写出`{}`", nii.display()))?;
        let img = plot::overlay(mean_bold, &r.atlas, plot_size);
        write_png(out, &format!("overlay_{}.png", r.model), &img)?;

        let mut m = JsonValue::new_object();
        m["model"] = r.model.name().into();
        m["dice"] = r.dice.into();
        m["forward"] = transform_json(&r.transforms.composed());
        models.push(m);
    }
    summary["models"] = JsonValue::Array(models);
    summary["primary"] = results[primary].model.name().into();
    write_json(out, "registration.json", &summary)
}

fn transform_json(t: &AffineTransform) -> JsonValue {
    let mut j = JsonValue::new_object();
    j["linear"] = JsonValue::Array(
        t.linear
            .iter()
            .map(|row| JsonValue::Array(row.iter().map(|&v| v.into()).collect()))
            .collect(),
    );
    j["offset"] = JsonValue::Array(t.offset.iter().map(|&v| v.into()).collect());
    j
}
