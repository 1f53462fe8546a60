use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use vesperia_core::fps4::{Fps4Archive, Fps4Builder, Manifest};
use vesperia_core::tool::{ToolConfig, TOOL_CONFIG_FILE};
use vesperia_core::{apply_patch, run, strings, PatcherSettings, RandomizerSettings, Target};

#[derive(Debug, Parser)]
#[command(name = "tov-randomizer", version, about = "Tales of Vesperia: Definitive Edition randomizer and patcher")]
struct Args {
    /// Log every step, not just the summaries.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a randomized patch file.
    Randomize {
        #[arg(long, default_value = "data")]
        data: PathBuf,

        /// Defaults to the current time.
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value = "player")]
        player: String,

        /// File to write, or a directory to name the patch in.
        #[arg(long, default_value = "patches")]
        output: PathBuf,

        /// artes, skills, items, shops, chests or search. All when omitted.
        targets: Vec<Target>,
    },
    /// Apply a patch file to the extracted working copies.
    Patch {
        file: PathBuf,

        #[arg(long, default_value = "builds")]
        build: PathBuf,

        #[arg(long, default_value = "data")]
        data: PathBuf,
    },
    /// Inspect or extract an FPS4 container.
    Fps4 {
        container: PathBuf,

        /// Write the manifest here instead of printing it.
        #[arg(long)]
        manifest: Option<PathBuf>,

        #[arg(long, value_name = "DIR")]
        extract: Option<PathBuf>,
    },
    /// Rebuild an FPS4 container from a manifest.
    Pack {
        manifest: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },
    /// Check that .NET, HyoutaToolsCLI and comptoe can be run.
    Check {
        /// Written with the default paths when it does not exist.
        #[arg(long, default_value = TOOL_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Dump a string dictionary as JSON.
    Strings {
        file: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .context("Failed to set up logging")?;
    Ok(())
}

fn write_or_print(json: String, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Randomize { data, seed, player, output, targets } => {
            let seed = seed.unwrap_or_else(|| chrono::Local::now().timestamp().unsigned_abs());
            log::info!("Seed: {seed}");
            let settings = RandomizerSettings { seed, player, targets, data_dir: data, output_path: output };
            run(settings)?;
        }
        Command::Patch { file, build, data } => {
            let settings = PatcherSettings { patch_file: file, build_dir: build, data_dir: data };
            apply_patch(&settings).with_context(|| format!("Failed to apply {}", settings.patch_file.display()))?;
        }
        Command::Fps4 { container, manifest, extract } => {
            let bytes = fs::read(&container).with_context(|| format!("Failed to read {}", container.display()))?;
            let archive = Fps4Archive::parse(&bytes)?;
            let parsed = match &extract {
                Some(dir) => {
                    fs::create_dir_all(dir)?;
                    archive.extract_to(dir)?
                }
                None => archive.manifest()?,
            };
            log::info!("{} holds {} files", container.display(), parsed.files.len());
            write_or_print(serde_json::to_string_pretty(&parsed)?, manifest.as_deref())?;
        }
        Command::Pack { manifest, output } => {
            let parsed = Manifest::load(&manifest).with_context(|| format!("Failed to read {}", manifest.display()))?;
            let bytes = Fps4Builder::from_manifest(&parsed)?.build();
            fs::write(&output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;
            log::info!("Packed {} files into {}", parsed.files.len(), output.display());
        }
        Command::Check { config } => {
            let tools = ToolConfig::load(&config)?;
            if !config.exists() {
                tools.save(&config).with_context(|| format!("Failed to write {}", config.display()))?;
                log::info!("Wrote default tool paths to {}", config.display());
            }
            tools.check_dependencies().context("Missing dependency")?;
            log::info!("All dependencies found");
        }
        Command::Strings { file, output } => {
            let entries = strings::read_strings(&file)?;
            write_or_print(serde_json::to_string_pretty(&entries)?, output.as_deref())?;
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = setup_logging(args.verbose).and_then(|()| execute(args.command)) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
