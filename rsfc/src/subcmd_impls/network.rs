use super::common::{output_dir, NetworkArgs};
use super::connectivity::SeriesArgs;
use super::export::{region_legend, write_json, write_matrix, write_png};
use super::plot;
use super::utils::{color_valid_rgb_hex, rgb};
use clap::Args;
use connectome::atlas::{LabelTable, RegionSeries};
use connectome::config::PipelineConfig;
use connectome::network::NetworkGraph;
use connectome::pipeline::Pipeline;
use connectome::stats::CorrelationMatrix;
use image::Rgb;
use json::JsonValue;
use std::path::Path;
use tracing::info;

#[derive(Args, Debug)]
pub struct Network {
    #[command(flatten)]
    source: SeriesArgs,
    #[command(flatten)]
    network: NetworkArgs,
    /// 网络图中边的颜色（十六进制RGB）。
    #[arg(long = "edge-color", value_parser = color_valid_rgb_hex)]
    edge_color: Option<Rgb<u8>>,
}

impl Network {
    pub fn run(&mut self) -> anyhow::Result<()> {
        let (config, series) = self.source.load(Some(&self.network))?;
        let out = output_dir(&config)?;
        let pipeline = Pipeline::new(config.clone());
        let (sub_regions, sub_correlation, graph) =
            pipeline.sub_network(&series.regions, &series.label_table)?;
        write_network(
            &out,
            &sub_regions,
            &sub_correlation,
            &graph,
            &series.label_table,
            &config,
            self.edge_color.unwrap_or_else(rgb::orange),
        )
    }
}

/// 写出子网络的相关矩阵、热图、网络图及其统计量。
pub fn write_network(
    out: &Path,
    sub_regions: &RegionSeries,
    sub_correlation: &CorrelationMatrix,
    graph: &NetworkGraph,
    table: &LabelTable,
    config: &PipelineConfig,
    edge_color: Rgb<u8>,
) -> anyhow::Result<()> {
    let size = config.output.plot_size;
    write_matrix(out, "network_correlation.npy", sub_correlation.r())?;
    write_matrix(out, "network_p_values.npy", sub_correlation.p_values())?;
    let significant = sub_correlation.significant(config.network.alpha);
    let img = plot::heatmap(sub_correlation.r(), Some(&significant), size);
    write_png(out, "network_heatmap.png", &img)?;

    let mut summary = JsonValue::from(graph);
    summary["network"] = config.network.name.as_str().into();
    summary["requested_density"] = config.network.density.into();
    write_json(out, "graph.json", &summary)?;
    write_png(out, "graph.png", &plot::graph(graph, size, edge_color))?;
    write_json(out, "network_regions.json", &region_legend(sub_regions, table))?;
    info!(
        network = %config.network.name,
        nodes = graph.n_nodes(),
        edges = graph.edges().len(),
        "写出网络图"
    );
    Ok(())
}
