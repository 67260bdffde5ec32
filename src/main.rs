mod cli;
mod dns;
mod utils;

use echoprobe::observer::NullSink;
use echoprobe::runtime;

#[tokio::main]
async fn main() {
    // Enable debug logging if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }

    // Parse command line arguments
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            utils::exit_with_error(&format!("invalid arguments: {}", e), 1);
        }
    };

    // Resolve target hostname
    let target_ip = match dns::resolve_destination(&args.target, args.family).await {
        Ok(ip) => ip,
        Err(e) => {
            utils::exit_with_error(&format!("cannot resolve '{}': {}", args.target, e), 1);
        }
    };
    log::debug!("resolved {} to {}", args.target, target_ip);

    let config = args.to_config(target_ip);
    let identity = utils::local_identity();
    log::debug!("probe signature {}", identity.signature());

    // Setup signal handler for Ctrl+C
    let shutdown = utils::setup_signal_handler();

    let report = match runtime::run(config, identity, NullSink, shutdown).await {
        Ok(report) => report,
        Err(e) => {
            utils::exit_with_error(&format!("{:#}", e), 1);
        }
    };

    if report.received == 0 {
        std::process::exit(1);
    }
}
