// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use dpm_codegen::header::HeaderGenerator;
use dpm_codegen::{is_stale, splice, GeneratedBlock, GeneratedController, RustGenerator};
use dpm_config::{AccessKind, PlatformManifest, StimulusScript};
use dpm_core::domain::DomainState;
use dpm_core::power::{DelayTable, PendingTransition};
use dpm_core::registry::resolve_components;
use dpm_core::trace::StateSample;
use dpm_core::{
    ControllerStats, GenericDomain, Interconnect, PowerController, PowerRegisterMap, PowerState,
    SimTime,
};

mod vcd_trace;

const EXIT_PASS: u8 = 0;
const EXIT_STALE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

const HEADER_FILE: &str = "pm_addr.h";
const RUST_FILE: &str = "pm_addr.rs";

#[derive(Parser, Debug)]
#[command(author, version, about = "Delayed power manager toolkit", long_about = None)]
struct Cli {
    /// Enable debug-level tracing of register accesses and transitions
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the offset header and Rust offset module for a platform.
    Generate(GenerateArgs),

    /// Replay a register stimulus script against the power manager.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Path to the platform manifest (YAML)
    #[arg(short, long)]
    platform: PathBuf,

    /// Directory receiving pm_addr.h and pm_addr.rs
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Only report whether the generated files are up to date
    #[arg(long)]
    check: bool,

    /// Print the allocated register map as JSON
    #[arg(long)]
    print_map: bool,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the platform manifest (YAML)
    #[arg(short, long)]
    platform: PathBuf,

    /// Path to the stimulus script (YAML)
    #[arg(short = 'c', long)]
    script: PathBuf,

    /// Write the state signals of every component as a VCD file
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Directory to write run artifacts (result.json)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the script's max_time limit
    #[arg(long)]
    max_time: Option<u64>,
}

#[derive(Debug, Serialize)]
struct StepResult {
    at: SimTime,
    access: AccessKind,
    addr: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ComponentResult {
    name: String,
    state: PowerState,
    pending: Option<PendingTransition>,
    delays: DelayTable,
    voltage: Option<f32>,
    domain: DomainState,
}

#[derive(Debug, Serialize)]
struct RunResult {
    result_schema_version: String,
    status: String,
    platform: String,
    controller: String,
    end_time: SimTime,
    stats: ControllerStats,
    last_power_report: f64,
    components: Vec<ComponentResult>,
    trace: BTreeMap<String, Vec<StateSample>>,
    steps: Vec<StepResult>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag.
    // Logs go to stderr; stdout carries only JSON output.
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Generate(args) => run_generate(args),
        Commands::Run(args) => run_replay(args),
    }
}

fn manifest_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_map(args: &GenerateArgs) -> anyhow::Result<(PlatformManifest, PowerRegisterMap)> {
    let manifest = PlatformManifest::from_file(&args.platform)
        .with_context(|| format!("Failed to load platform manifest {:?}", args.platform))?;
    let config = &manifest.controller;
    let schedule = manifest
        .load_schedule(&manifest_dir(&args.platform))
        .context("Failed to load schedule")?;
    let names = resolve_components(
        &manifest.sibling_names(),
        &config.id,
        config.components.as_deref(),
        schedule.as_ref(),
    )?;
    let map = PowerRegisterMap::allocate(&names, config.word_size)?;
    Ok((manifest, map))
}

fn run_generate(args: GenerateArgs) -> ExitCode {
    let (manifest, map) = match load_map(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if args.print_map {
        match serde_json::to_string_pretty(&map) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize register map: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    }

    let model = GeneratedController::from_map(&manifest.controller.id, &map);
    let generated = HeaderGenerator::generate(&model)
        .and_then(|header| Ok((header, RustGenerator::generate(&model)?)));
    let (header_blocks, rust_blocks) = match generated {
        Ok(blocks) => blocks,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let outputs = [(HEADER_FILE, header_blocks), (RUST_FILE, rust_blocks)];

    let mut stale = false;
    for (file, blocks) in &outputs {
        let path = args.out_dir.join(file);
        match write_output(&path, blocks, &map, args.check) {
            Ok(was_stale) => stale |= was_stale,
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    }

    if args.check && stale {
        warn!("Generated files are out of date, run `dpm generate` to refresh them");
        return ExitCode::from(EXIT_STALE);
    }
    ExitCode::from(EXIT_PASS)
}

/// Splices `blocks` into the file at `path`. Returns whether the file was stale.
fn write_output(
    path: &Path,
    blocks: &[GeneratedBlock],
    map: &PowerRegisterMap,
    check_only: bool,
) -> anyhow::Result<bool> {
    let existing = if path.exists() {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
    } else {
        String::new()
    };
    let stale = is_stale(&existing, map);

    if check_only {
        if stale {
            info!("{:?} is out of date", path);
        }
        return Ok(stale);
    }

    let text = splice(&existing, blocks).with_context(|| format!("Failed to splice {:?}", path))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {:?}", path))?;
    info!(
        "{} {:?} ({} components)",
        if stale { "Generated" } else { "Refreshed" },
        path,
        map.len()
    );
    Ok(stale)
}

fn run_replay(args: RunArgs) -> ExitCode {
    let manifest = match PlatformManifest::from_file(&args.platform) {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to load platform manifest {:?}: {}", args.platform, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let script = match StimulusScript::from_file(&args.script) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load stimulus script {:?}: {}", args.script, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let mut controller =
        match PowerController::from_manifest(&manifest, &manifest_dir(&args.platform)) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to build power manager: {}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        };
    let bus = match Interconnect::new(&manifest.controller.regions, controller.map()) {
        Ok(bus) => bus,
        Err(e) => {
            error!("Invalid region layout: {}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let names: Vec<String> = controller
        .components()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut domains = Vec::with_capacity(names.len());
    for name in &names {
        let domain = GenericDomain::new(name.clone());
        let bound = controller
            .bind_power(name, domain.power_input())
            .and_then(|_| controller.bind_voltage(name, domain.voltage_input()));
        if let Err(e) = bound {
            error!("Failed to bind domain {}: {}", name, e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
        domains.push(domain);
    }

    let vcd = match &args.vcd {
        Some(path) => match vcd_trace::VcdObserver::new(path.clone(), controller.name(), &names) {
            Ok(observer) => {
                let observer = Arc::new(observer);
                controller.add_observer(observer.clone());
                Some(observer)
            }
            Err(e) => {
                error!("Failed to create VCD file {:?}: {}", path, e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        },
        None => None,
    };

    let max_time = args.max_time.unwrap_or(script.limits.max_time);
    info!(
        "Replaying {} steps against '{}' up to t={}",
        script.steps.len(),
        controller.name(),
        max_time
    );

    let mut steps = Vec::with_capacity(script.steps.len());
    for step in script.steps.iter().take_while(|s| s.at <= max_time) {
        controller.run_until(step.at);
        let outcome = match step.access {
            AccessKind::Write => {
                let value = step.value.map(|v| v.as_word()).unwrap_or_default();
                bus.write(&mut controller, step.addr, value).map(|_| None)
            }
            AccessKind::Read => bus.read(&mut controller, step.addr).map(Some),
        };
        let (value, error) = match outcome {
            Ok(read) => (read.or(step.value.map(|v| v.as_word())), None),
            Err(e) => (None, Some(e.to_string())),
        };
        steps.push(StepResult {
            at: step.at,
            access: step.access,
            addr: step.addr,
            value,
            error,
        });
    }
    controller.run_until(max_time);

    if let Some(vcd) = &vcd {
        if let Err(e) = vcd.finish(max_time) {
            error!("Failed to finish VCD file: {:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }

    let snapshot = controller.snapshot();
    let components = snapshot
        .components
        .iter()
        .zip(&domains)
        .map(|(c, domain)| ComponentResult {
            name: c.name().to_string(),
            state: c.state(),
            pending: c.pending().copied(),
            delays: *c.delays(),
            voltage: c.voltage(),
            domain: domain.snapshot(),
        })
        .collect();

    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "pass".to_string(),
        platform: manifest.name.clone(),
        controller: snapshot.name.clone(),
        end_time: snapshot.time,
        stats: snapshot.stats,
        last_power_report: snapshot.last_measure,
        components,
        trace: controller.trace().all(),
        steps,
    };

    if let Err(e) = emit_result(&result, args.output_dir.as_deref()) {
        error!("{:#}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }
    ExitCode::from(EXIT_PASS)
}

fn emit_result(result: &RunResult, output_dir: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run result")?;
    println!("{}", json);

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        let path = dir.join("result.json");
        std::fs::write(&path, &json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Wrote {:?}", path);
    }
    Ok(())
}
