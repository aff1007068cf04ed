use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rsfc")]
#[command(about = "静息态fMRI功能连接分析工具集.")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// 输出调试级别日志（可被`RUST_LOG`覆盖）。
    #[arg(short, long, global = true)]
    verbose: bool,
    /// 子命令。
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    #[inline]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn run_program(&mut self) -> anyhow::Result<()> {
        match self.command {
            Commands::Register(ref mut v) => v.run(),
            Commands::Preprocess(ref mut v) => v.run(),
            Commands::Connectivity(ref mut v) => v.run(),
            Commands::Network(ref mut v) => v.run(),
            Commands::Pipeline(ref mut v) => v.run(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 将图谱配准到BOLD空间，比较各变换模型并输出叠加图。
    Register(crate::subcmd_impls::register::Register),
    /// 预处理BOLD序列，输出清洗后的图像与质控曲线。
    Preprocess(crate::subcmd_impls::preprocess::Preprocess),
    /// 计算脑区相关矩阵与显著性矩阵，输出热图。
    Connectivity(crate::subcmd_impls::connectivity::Connectivity),
    /// 子网络相关分析与网络图。
    Network(crate::subcmd_impls::network::Network),
    /// 依次执行以上全部步骤。
    Pipeline(crate::subcmd_impls::pipeline::RunPipeline),
}
