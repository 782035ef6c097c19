use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

pub const FAL_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const FAL_BEFORE_HELP: &str = concat!(
    "fal ",
    env!("CARGO_PKG_VERSION"),
    " – Python models for dbt, run where their environment lives\n\n",
    "\x1b[1;36mModels\x1b[0m\n",
    "  run              Run a Python model in-process, in a local env, or remotely.\n",
    "  isolated-run     Worker entry point for a serialized execution request.\n\n",
    "\x1b[1;36mEnvironments\x1b[0m\n",
    "  environments     List environments declared in fal_project.yml.\n",
    "  flatten          Show the single environment a remote run would ship.\n\n",
    "\x1b[1;36mArchives\x1b[0m\n",
    "  pack / unpack    Zip a scripts directory or extract one into a fresh path.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "fal",
    author,
    version,
    disable_help_subcommand = true,
    before_help = FAL_BEFORE_HELP,
    help_template = FAL_HELP_TEMPLATE
)]
pub struct FalCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Run a Python model with its adapter")]
    Run(RunArgs),
    #[command(about = "List environments declared for a project")]
    Environments(ProjectDirArgs),
    #[command(about = "Print the flat environment a remote run would ship")]
    Flatten(FlattenArgs),
    #[command(about = "Zip a directory into an archive file")]
    Pack(PackArgs),
    #[command(about = "Extract an archive into a directory that does not exist yet")]
    Unpack(UnpackArgs),
    #[command(
        name = "isolated-run",
        about = "Run a serialized execution request in this environment"
    )]
    IsolatedRun(IsolatedRunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(value_name = "MODEL", help = "Python file defining `main(read_df, write_df)`")]
    pub model: PathBuf,
    #[arg(long, value_name = "FILE", help = "Adapter config JSON (profile, target, credentials)")]
    pub config: PathBuf,
    #[arg(long, value_name = "FILE", help = "dbt manifest JSON")]
    pub manifest: Option<PathBuf>,
    #[arg(long = "macro-manifest", value_name = "FILE", help = "dbt macro manifest JSON")]
    pub macro_manifest: Option<PathBuf>,
    #[arg(
        long,
        short = 'e',
        value_name = "NAME",
        help = "Environment from fal_project.yml (`local` runs in-process)"
    )]
    pub environment: Option<String>,
    #[arg(
        long = "adapter-type",
        value_name = "TYPE",
        help = "Override the adapter type from the credentials"
    )]
    pub adapter_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProjectDirArgs {
    #[arg(long = "project-dir", value_name = "DIR", default_value = ".")]
    pub project_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct FlattenArgs {
    #[command(flatten)]
    pub project: ProjectDirArgs,
    #[arg(long, short = 'e', value_name = "NAME")]
    pub environment: String,
    #[arg(long = "adapter-type", value_name = "TYPE", default_value = "fal")]
    pub adapter_type: String,
}

#[derive(Args, Debug)]
pub struct PackArgs {
    #[arg(value_name = "DIR")]
    pub root: PathBuf,
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct UnpackArgs {
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
    #[arg(value_name = "DEST")]
    pub dest: PathBuf,
}

#[derive(Args, Debug)]
pub struct IsolatedRunArgs {
    #[arg(long, value_name = "FILE", help = "Execution request JSON")]
    pub request: PathBuf,
}
