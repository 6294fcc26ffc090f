use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "selfextract")]
#[command(version)]
#[command(about = "Create self-extracting executable archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  selfextract -f app.run -C build .           package the contents of build/\n  \
  SELFEXTRACT_DIR=/opt/app ./app.run          extract to a persistent directory and run\n  \
  SELFEXTRACT_EXTRACT_ONLY=1 ./app.run        extract without running the startup program")]
pub struct Cli {
    /// Files and directories to archive
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Name of the archive to create
    #[arg(short = 'f', value_name = "OUTPUT", default_value = "selfextract.out")]
    pub output: PathBuf,

    /// Change dir before archiving files, only affects input files
    #[arg(short = 'C', value_name = "DIR", default_value = ".")]
    pub change_dir: PathBuf,

    /// Verbose output
    #[arg(short = 'v')]
    pub verbose: bool,
}
