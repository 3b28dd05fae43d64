//! debforge - build Debian binary packages from a staged tree.

mod commands;

use clap::{Args, Parser, Subcommand};
use debforge::PackageError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Parser)]
#[command(name = "debforge", version)]
#[command(about = "Build .deb packages from a staged filesystem tree")]
#[command(
    after_help = "QUICK START:\n  debforge init           Create debforge.toml, root/ and debian/\n  debforge package        Build the project's package\n  debforge build --root R --name N --version V\n                          Build a package without a project file\n  debforge clean --cache  Remove work files and cached environments"
)]
struct Cli {
    /// More logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project skeleton
    Init {
        /// Project directory (default: current directory)
        dir: Option<PathBuf>,
        /// Package name (default: directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Build the package described by debforge.toml
    Package {
        /// Project directory (default: current directory)
        dir: Option<PathBuf>,
        /// Override the output path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Override the dependency cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Overwrite an existing package file
        #[arg(long)]
        force: bool,
    },

    /// Build a package from explicit flags
    Build(BuildArgs),

    /// Remove the project's work directory
    Clean {
        /// Project directory (default: current directory)
        dir: Option<PathBuf>,
        /// Also clear the dependency cache
        #[arg(long)]
        cache: bool,
        /// Override the dependency cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Staged tree mirroring the target filesystem
    #[arg(long)]
    root: PathBuf,
    /// Package name
    #[arg(long)]
    name: String,
    /// Package version
    #[arg(long)]
    version: String,
    #[arg(long, default_value = "")]
    vendor: String,
    /// Dependency (repeatable)
    #[arg(long = "depends")]
    depends: Vec<String>,
    /// Newline-delimited dependency list
    #[arg(long)]
    depends_file: Option<PathBuf>,
    #[arg(long)]
    architecture: Option<String>,
    #[arg(long)]
    maintainer: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Control overrides (maintainer scripts, conffiles, control)
    #[arg(long)]
    debian_dir: Option<PathBuf>,
    /// Package file (default: <name>_<version>_<arch>.deb)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Scratch directory for staging areas
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Overwrite an existing package file
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Init { dir, name } => commands::cmd_init(dir, name),
        Commands::Package {
            dir,
            output,
            cache_dir,
            force,
        } => commands::cmd_package(dir, output, cache_dir, force),
        Commands::Build(args) => commands::cmd_build(args),
        Commands::Clean {
            dir,
            cache,
            cache_dir,
        } => commands::cmd_clean(dir, cache, cache_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<PackageError>()
                .map(PackageError::exit_code)
                .unwrap_or(2);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}
