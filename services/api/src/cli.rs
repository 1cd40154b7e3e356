use crate::demo::{run_demo, run_worklist, DemoArgs, WorklistArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use qre_review::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "QRE Review",
    about = "Run and demonstrate the QRE study review and evidence workflow",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a sample engagement from findings through evidence, reprocessing, and readiness
    Demo(DemoArgs),
    /// Print the prioritized reviewer worklist for the sample engagement
    Worklist(WorklistArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Load the sample engagement for the given tax year before serving
    #[arg(long, value_name = "TAX_YEAR")]
    pub(crate) seed_demo: Option<i32>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Worklist(args) => run_worklist(args),
    }
}
