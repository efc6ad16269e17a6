use ascii_video::cli::Cli;
use ascii_video::pipeline::{CancelToken, run};
use clap::Parser;

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level)
        .parse_default_env()
        .init();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        log::warn!("cannot install Ctrl-C handler: {err}");
    }

    let config = cli.pipeline_config();
    match run(&config, &cancel) {
        Ok(stats) => {
            let suffix = if stats.cancelled { " (cancelled)" } else { "" };
            println!(
                "wrote {} of {} frames to {}{suffix}",
                stats.frames_written,
                stats.frames_read,
                config.output.display()
            );
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
