use anyhow::Result;
use clap::Parser;
use playlog::{
    daemon::{args::DaemonArgs, start_daemon, DaemonConfig},
    utils::{
        logging::{enable_logging, DAEMON_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() {
    run_service().unwrap();
}

fn run_service() -> Result<()> {
    let args = DaemonArgs::parse();

    if !args.force {
        #[cfg(unix)]
        {
            use daemonize::Daemonize;
            use tracing::error;

            let daemonize = Daemonize::new()
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent
                        .inspect_err(|e| error!("Failed to create daemon on parent side {e:?}"))?;
                    println!("Created daemon");
                    return Ok(());
                }
                daemonize::Outcome::Child(_) => (),
            }
        }
    }

    run(args)
}

fn run(args: DaemonArgs) -> Result<()> {
    let config = DaemonConfig::resolve(args.dir, args.interval_minutes, args.api_url, args.api_token)?;
    enable_logging(DAEMON_PREFIX, &config.dir, args.log, args.log_console)?;
    single_thread_runtime()?.block_on(async move { start_daemon(config).await })?;
    Ok(())
}
