use super::common::{output_dir, CommonArgs, NetworkArgs, PreprocessArgs};
use super::connectivity::write_connectivity;
use super::network::write_network;
use super::preprocess::write_preprocess;
use super::register::write_registrations;
use super::utils::{color_valid_rgb_hex, rgb};
use anyhow::Context;
use clap::Args;
use connectome::pipeline::{Inputs, Pipeline};
use image::Rgb;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunPipeline {
    #[command(flatten)]
    common: CommonArgs,
    #[command(flatten)]
    preprocess: PreprocessArgs,
    #[command(flatten)]
    network: NetworkArgs,
    /// 网络图中边的颜色（十六进制RGB）。
    #[arg(long = "edge-color", value_parser = color_valid_rgb_hex)]
    edge_color: Option<Rgb<u8>>,
}

impl RunPipeline {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut config = self.common.load()?;
        self.preprocess.apply(&mut config.preprocess);
        self.network.apply(&mut config);
        config.validate()?;
        let out = output_dir(&config)?;

        let inputs = Inputs::load(&config.inputs).context("无法读取输入")?;
        let result = Pipeline::new(config.clone()).run(&inputs)?;

        write_registrations(
            &out,
            &result.mean_bold,
            &result.registrations,
            result.primary,
            config.output.plot_size,
        )?;
        write_preprocess(
            &out,
            &result.preprocess,
            &config.output,
            config.preprocess.fd_threshold,
        )?;
        write_connectivity(
            &out,
            &result.regions,
            &result.correlation,
            &inputs.label_table,
            &config,
        )?;
        write_network(
            &out,
            &result.sub_regions,
            &result.sub_correlation,
            &result.graph,
            &inputs.label_table,
            &config,
            self.edge_color.unwrap_or_else(rgb::orange),
        )?;
        info!(output = %out.display(), "全部结果已写出");
        Ok(())
    }
}
