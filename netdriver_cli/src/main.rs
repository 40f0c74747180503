mod echo;

use echo::EchoServer;
use netdriver_core::{
    Delivery, DriverSettings, NetDriver, engine_args, exit_on_fatal, resolve_port,
};

use clap::Parser;
use log::info;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Replays inputs through the TCP net driver against the bundled echo server.
///
/// Arguments after `--` are handed to the server.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML file with a `[driver]` table.
    #[clap(short, long = "config", value_parser)]
    config_file: Option<PathBuf>,
    /// Default TCP port; `_HF_TCP_PORT` still takes precedence.
    #[clap(short, long)]
    port: Option<u16>,
    /// Skip the private namespaces.
    #[clap(long)]
    no_isolate: bool,
    /// How many times the whole input set is replayed.
    #[clap(short, long, default_value_t = 1)]
    iterations: u64,
    /// Input files or directories; stdin when empty.
    inputs: Vec<PathBuf>,
}

fn load_inputs(paths: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>, anyhow::Error> {
    let mut inputs = Vec::new();
    if paths.is_empty() {
        let mut data = Vec::new();
        std::io::stdin().read_to_end(&mut data)?;
        inputs.push(("<stdin>".to_string(), data));
        return Ok(inputs);
    }
    for path in paths {
        if path.is_dir() {
            let mut entries = std::fs::read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<Vec<_>, _>>()?;
            entries.sort();
            for file_path in entries.iter().filter(|p| p.is_file()) {
                inputs.push(read_input(file_path)?);
            }
        } else {
            inputs.push(read_input(path)?);
        }
    }
    Ok(inputs)
}

fn read_input(path: &Path) -> Result<(String, Vec<u8>), anyhow::Error> {
    let data = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Failed to read input {:?}: {}", path, e))?;
    Ok((path.display().to_string(), data))
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let cli = Cli::parse_from(engine_args(&args));

    let mut settings = match &cli.config_file {
        Some(path) => {
            info!("Loading configuration from {path:?}");
            DriverSettings::load_from_file(path)?
        }
        None => DriverSettings::default(),
    };
    if let Some(port) = cli.port {
        settings.default_port = port;
    }
    if cli.no_isolate {
        settings.isolate = false;
    }

    let inputs = load_inputs(&cli.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("no inputs found in {:?}", cli.inputs);
    }

    let server = EchoServer::new(exit_on_fatal(resolve_port(settings.default_port)));
    let mut driver = exit_on_fatal(NetDriver::initialize(args, server, &settings));

    let start_time = Instant::now();
    let mut executions = 0u64;
    let mut early_closes = 0u64;
    for _ in 0..cli.iterations {
        for (name, data) in &inputs {
            let delivery = exit_on_fatal(driver.test_one_input(data));
            executions += 1;
            if let Delivery::PeerClosedEarly { .. } = delivery {
                early_closes += 1;
            }
            info!(
                "{name} ({} bytes, md5 {:x}): {delivery:?}",
                data.len(),
                md5::compute(data)
            );
        }
    }

    let elapsed = start_time.elapsed();
    let exec_per_sec = if elapsed.as_secs_f32() > 0.0 {
        executions as f32 / elapsed.as_secs_f32()
    } else {
        0.0
    };
    println!(
        "Replayed {executions} inputs in {elapsed:.2?} ({exec_per_sec:.2} execs/sec), {early_closes} closed early by the server"
    );
    Ok(())
}
