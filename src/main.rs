use reprobox::cli::commands::{CliArgs, Commands};
use reprobox::cli::handlers::{handle_batch, handle_cleanup, handle_inspect, handle_run};
use reprobox::util::logging::parse_level;
use reprobox::util::{init_logging, LoggingConfig};
use reprobox::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("reprobox v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(run_args, args.quiet).await,
        Commands::Batch(batch_args) => handle_batch(batch_args, args.quiet).await,
        Commands::Inspect(inspect_args) => handle_inspect(inspect_args, args.quiet).await,
        Commands::Cleanup(cleanup_args) => handle_cleanup(cleanup_args),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let mut config = LoggingConfig::from_env();
    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    init_logging(config);
}
