use std::fs;
use std::path::PathBuf;

use clap::Parser;
use toml::Table;

use tiermc::mem::ctrl::MemCtrl;
use tiermc::mem::dram::DramModel;
use tiermc::mem::media::AddrRange;
use tiermc::mem::nvm::NvmModel;
use tiermc::sim::config::{Config, CtrlConfig, DramConfig, NvmConfig, SimConfig};
use tiermc::sim::top::Sim;
use tiermc::traffic::config::TrafficConfig;
use tiermc::traffic::patterns::TrafficGen;

#[derive(Parser)]
#[command(version, about)]
struct TiermcArgs {
    #[arg(help = "Path to config.toml; defaults apply when omitted")]
    config_path: Option<PathBuf>,
    #[arg(long, help = "Override number of traffic requests")]
    num_reqs: Option<u32>,
    #[arg(long, help = "Override traffic seed")]
    seed: Option<u64>,
    #[arg(long, help = "Override scheduling policy (fcfs, frfcfs)")]
    sched: Option<String>,
    #[arg(long, help = "Dump controller stats as JSON")]
    dump_stats: Option<bool>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv = TiermcArgs::parse();
    let table: Table = match &argv.config_path {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => Table::new(),
    };

    let mut sim_config = SimConfig::from_section(table.get("sim"));
    let mut ctrl_config = CtrlConfig::from_section(table.get("ctrl"));
    let dram_config = DramConfig::from_section(table.get("dram"));
    let nvm_config = NvmConfig::from_section(table.get("nvm"));
    let mut traffic_config = TrafficConfig::from_section(table.get("traffic"));

    // override toml configs with argv
    traffic_config.num_reqs = argv.num_reqs.unwrap_or(traffic_config.num_reqs);
    traffic_config.seed = argv.seed.unwrap_or(traffic_config.seed);
    sim_config.dump_stats = argv.dump_stats.unwrap_or(sim_config.dump_stats);
    if let Some(policy) = &argv.sched {
        ctrl_config.sched_policy = policy.parse().map_err(anyhow::Error::msg)?;
    }

    let range = AddrRange::new(0, nvm_config.size_bytes);
    let ctrl = MemCtrl::new(
        ctrl_config,
        Box::new(DramModel::new(dram_config, range)),
        Box::new(NvmModel::new(nvm_config, range)),
    )?;
    let mut sim = Sim::new(sim_config.clone(), ctrl, TrafficGen::new(traffic_config));
    sim.run()?;

    if sim_config.dump_stats {
        println!("{}", serde_json::to_string_pretty(sim.stats())?);
    }
    Ok(())
}
