use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use commit2mod::{build_mod, resolve_head_commit, BuildOptions};
use env_logger::Builder;
use log::{info, Level, LevelFilter};
use std::io::Write;
use std::path::PathBuf;

// --- Main Application Entry Point ---

fn main() {
    // 1. Parse command-line arguments using `clap`.
    let args = Args::parse();

    // 2. Call the main logic function.
    //    All complex logic and error handling is inside `run`.
    if let Err(e) = run(args) {
        // 3. Using {:?} ensures the full error chain from `anyhow` is printed.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Contains the primary logic of the application.
fn run(args: Args) -> Result<()> {
    setup_logging(&args);

    // --- Argument Validation ---
    if !args.repo.is_dir() {
        return Err(anyhow!(
            "Repository '{}' not found or is not a directory.",
            args.repo.display()
        ));
    }

    // --- Commit Resolution ---
    // An explicit --commit wins; otherwise the repository's HEAD is used.
    // Failure to resolve any commit is the one fatal configuration error.
    let commit = match &args.commit {
        Some(id) => id.clone(),
        None => {
            let head = resolve_head_commit(&args.repo).context(
                "No commit identifier resolvable (pass --commit or run inside a git repository with history)",
            )?;
            info!("Using latest commit: {}", head);
            head
        }
    };

    // --- Packaging ---
    let options = BuildOptions {
        repo: args.repo,
        commit,
        name: args.name,
        version: args.mod_version,
        output_dir: args.output,
    };
    let report = build_mod(&options)
        .with_context(|| format!("Failed to package commit {}", options.commit))?;

    // --- Final Summary ---
    info!("");
    info!("--- Summary ---");
    info!("New files copied:   {}", report.new_file_count);
    info!("Passage patches:    {}", report.passage_patch_count);
    info!("Script patches:     {}", report.script_patch_count);
    info!("Package directory:  {}", report.mod_dir.display());

    println!("{}", report.zip_path.display());

    Ok(())
}

// --- Helper Structs and Functions ---

/// Defines the command-line arguments for the application.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Package a git commit as a SugarCube mod with replayable find/replace patches.",
    long_about = "Copies files added by the commit into the package verbatim and reduces modified \
.twee/.js files to minimal find/replace operations, recorded in a boot.json manifest and bundled as a zip."
)]
struct Args {
    /// Commit to package. Defaults to the repository's HEAD.
    #[arg(short, long, help = "Commit to package (defaults to HEAD).")]
    commit: Option<String>,
    /// Name of the generated mod.
    #[arg(short, long, default_value = "newmod", help = "Name of the generated mod.")]
    name: String,
    /// Version string recorded in the manifest and the zip name.
    #[arg(
        long = "mod-version",
        default_value = "1",
        help = "Mod version for the manifest and the zip name."
    )]
    mod_version: String,
    /// Git repository to read from.
    #[arg(short, long, default_value = ".", help = "Git repository to read from.")]
    repo: PathBuf,
    /// Directory receiving the package directory and the zip.
    #[arg(
        short,
        long,
        default_value = "output",
        help = "Directory receiving the package and the zip."
    )]
    output: PathBuf,
    /// Increase logging verbosity. Can be used multiple times.
    /// -v for info, -vv for debug, -vvv for trace.
    #[arg(short, long, action = clap::ArgAction::Count, long_help = "Increase logging verbosity.\n-v for info, -vv for debug, -vvv for trace.")]
    verbose: u8,
}

/// Sets up the global logger with the colored per-level format.
fn setup_logging(args: &Args) {
    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace, // -vvv and higher
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}
