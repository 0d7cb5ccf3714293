//! CLI entry point for LUT Renderer

mod cli;

use clap::Parser;
use cli::{Cli, Commands, LutCommand, PresetCommand, RenderArgs};
use lut_renderer::{
    build_pipeline, check_tools, collect_sources, intake::format_bytes, spawn_queue,
    ConcurrencyPlan, FfprobeProbe, Job, JobEvent, JobIntake, QueueEvent, SourceProbe,
    Supervisor, SupervisorConfig,
};
use lut_renderer_config::{EncodingParameters, PresetStore, Settings};
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type CliResult = Result<ExitCode, Box<dyn Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Render(args) => render(&cli, args).await,
        Commands::Presets { command } => presets(&cli.config, command),
        Commands::Luts { command } => luts(&cli.config, command),
        Commands::Check => check(&cli.config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "lut_renderer=debug"
    } else {
        "lut_renderer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn render(cli: &Cli, args: &RenderArgs) -> CliResult {
    let settings = Settings::load(&cli.config)?;

    let mut params = match &args.preset {
        Some(name) => PresetStore::new(settings.presets_dir(&cli.config)).load(name)?,
        None => EncodingParameters::default(),
    };
    args.params.apply(&mut params);

    let lut = if args.no_lut {
        None
    } else {
        args.lut.clone().or_else(|| settings.luts.current.clone())
    };

    let sources = collect_sources(&args.inputs);
    if sources.is_empty() {
        eprintln!("No video files found");
        return Ok(ExitCode::FAILURE);
    }

    let probe: Arc<dyn SourceProbe> = Arc::new(FfprobeProbe::new(settings.tools.ffprobe.clone()));
    let mut intake = JobIntake::new(
        probe.clone(),
        args.output_dir
            .clone()
            .or_else(|| settings.paths.output_dir.clone()),
        args.intermediate_dir
            .clone()
            .or_else(|| settings.paths.intermediate_dir.clone()),
    );
    let admission =
        tokio::task::block_in_place(|| intake.admit(&sources, &params, lut.as_deref()))?;

    if let Some(estimate) = &admission.master_estimate {
        match estimate.free_bytes {
            Some(free) if !estimate.fits() => eprintln!(
                "Warning: ProRes masters need about {} but only {} is free",
                format_bytes(estimate.total_bytes),
                format_bytes(free)
            ),
            _ => tracing::info!(
                total = %format_bytes(estimate.total_bytes),
                files = estimate.estimated,
                "estimated master size"
            ),
        }
    }

    if args.dry_run {
        for job in &admission.jobs {
            print_plan(job, &settings.tools.ffmpeg, args.json)?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    check_tools(&settings)?;

    let mut plan = ConcurrencyPlan::derive(&settings);
    if let Some(jobs) = args.jobs {
        plan.max_concurrent_jobs = jobs.max(1);
    }
    let supervisor = Supervisor::new(
        SupervisorConfig {
            ffmpeg: settings.tools.ffmpeg.clone(),
            cancel_grace: plan.cancel_grace,
        },
        probe,
    );

    let names: HashMap<String, String> = admission
        .jobs
        .iter()
        .map(|job| (job.id.clone(), display_name(&job.source_path)))
        .collect();

    let (queue, mut events) = spawn_queue(supervisor, plan.max_concurrent_jobs as usize);
    queue.add_jobs(admission.jobs).await?;
    let started = queue.start_all().await?;
    tracing::info!(
        jobs = started,
        max_concurrent = plan.max_concurrent_jobs,
        cores = plan.total_cores,
        "rendering"
    );

    let mut printer = EventPrinter {
        names,
        json: args.json,
        verbose: cli.verbose,
        last_progress: HashMap::new(),
    };
    let mut canceling = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(QueueEvent::Idle) | None => break,
                Some(event) => printer.print(&event)?,
            },
            _ = tokio::signal::ctrl_c(), if !canceling => {
                eprintln!("Canceling...");
                canceling = true;
                queue.cancel_all().await?;
            }
        }
    }

    let snapshot = queue.snapshot().await?;
    queue.shutdown().await?;

    if !args.json {
        println!(
            "{} completed, {} failed, {} canceled",
            snapshot.completed, snapshot.failed, snapshot.canceled
        );
        for job in snapshot.jobs.iter().filter(|j| j.error.is_some()) {
            println!(
                "  {}: {}",
                display_name(&job.source_path),
                job.error.as_deref().unwrap_or_default()
            );
        }
    }

    if snapshot.failed > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_plan(job: &Job, ffmpeg: &str, json: bool) -> Result<(), Box<dyn Error>> {
    let stages = build_pipeline(job)?;
    let mut planned = Vec::with_capacity(stages.len());
    for stage in &stages {
        let descriptor = if stage.probe_source {
            None
        } else {
            job.source_info.as_ref()
        };
        planned.push((stage, stage.synthesize(ffmpeg, descriptor)?));
    }

    if json {
        let stages: Vec<_> = planned
            .iter()
            .map(|(stage, cmd)| {
                serde_json::json!({
                    "name": stage.name,
                    "argv": cmd.argv,
                    "notes": cmd.notes,
                })
            })
            .collect();
        let value = serde_json::json!({ "job": job, "stages": stages });
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    println!("{}", job.source_path.display());
    for (stage, cmd) in &planned {
        println!("  [{}]", stage.name);
        for note in &cmd.notes {
            println!("    # {}", note);
        }
        println!("    {}", cmd.display());
    }
    if let Some(cover) = &job.cover_path {
        println!("  [cover] {}", cover.display());
    }
    Ok(())
}

struct EventPrinter {
    names: HashMap<String, String>,
    json: bool,
    verbose: bool,
    last_progress: HashMap<String, u8>,
}

impl EventPrinter {
    fn print(&mut self, event: &QueueEvent) -> Result<(), serde_json::Error> {
        if self.json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }
        let QueueEvent::Job { id, event } = event else {
            return Ok(());
        };
        let name = self.names.get(id).map(String::as_str).unwrap_or(id.as_str());
        match event {
            JobEvent::Progress { progress } => {
                // One line per 10%
                let step = progress / 10;
                let last = self.last_progress.insert(id.clone(), step);
                if last != Some(step) {
                    println!("{}: {}%", name, progress);
                }
            }
            JobEvent::Log { message } => {
                if self.verbose {
                    println!("{}: {}", name, message);
                }
            }
            JobEvent::Status { status, error } => match error {
                Some(error) => println!("{}: {:?} ({})", name, status, error),
                None => println!("{}: {:?}", name, status),
            },
        }
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn presets(config: &Path, command: &PresetCommand) -> CliResult {
    let settings = Settings::load(config)?;
    let store = PresetStore::new(settings.presets_dir(config));

    match command {
        PresetCommand::List => {
            for name in store.list()? {
                println!("{}", name);
            }
        }
        PresetCommand::Show { name } => {
            let params = store.load(name)?;
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        PresetCommand::Save {
            name,
            params: args,
            force,
        } => {
            let mut params = EncodingParameters::default();
            args.apply(&mut params);
            params.validate()?;
            let path = if *force {
                store.overwrite(name, &params)?
            } else {
                store.save(name, &params)?
            };
            println!("Saved {}", path.display());
        }
        PresetCommand::Delete { name } => store.delete(name)?,
        PresetCommand::Rename { from, to } => {
            let path = store.rename(from, to)?;
            println!("Renamed to {}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Settings as written on disk, without environment overrides, so saving
/// never persists them.
fn load_for_edit(config: &Path) -> Result<Settings, Box<dyn Error>> {
    if config.exists() {
        Ok(Settings::load_from_file(config)?)
    } else {
        Ok(Settings::default())
    }
}

fn luts(config: &Path, command: &LutCommand) -> CliResult {
    let mut settings = load_for_edit(config)?;

    match command {
        LutCommand::List => {
            for path in &settings.luts.history {
                let marker = if settings.luts.current.as_ref() == Some(path) {
                    "*"
                } else {
                    " "
                };
                let missing = if path.exists() { "" } else { " (missing)" };
                println!("{} {}{}", marker, path.display(), missing);
            }
            return Ok(ExitCode::SUCCESS);
        }
        LutCommand::Add { paths } => {
            let (found, missing): (Vec<&PathBuf>, Vec<&PathBuf>) =
                paths.iter().partition(|p| p.is_file());
            for path in &missing {
                eprintln!("Skipping missing LUT {}", path.display());
            }
            settings.luts.add(found.into_iter().cloned());
        }
        LutCommand::Remove { path } => {
            if !settings.luts.remove(path) {
                eprintln!("{} is not in the history", path.display());
                return Ok(ExitCode::FAILURE);
            }
        }
        LutCommand::Use { path } => {
            if !path.is_file() {
                eprintln!("LUT file not found: {}", path.display());
                return Ok(ExitCode::FAILURE);
            }
            settings.luts.set_current(path.clone());
        }
        LutCommand::Prune => {
            for path in settings.luts.prune_missing() {
                println!("Removed {}", path.display());
            }
        }
    }

    settings.save(config)?;
    Ok(ExitCode::SUCCESS)
}

fn check(config: &Path) -> CliResult {
    let settings = Settings::load(config)?;
    for report in check_tools(&settings)? {
        println!(
            "{}: {} ({})",
            report.name,
            report.path.display(),
            report.version.as_deref().unwrap_or("unknown version")
        );
    }
    Ok(ExitCode::SUCCESS)
}
