#[macro_use]
extern crate log;

use clap::{CommandFactory, Parser};
use colored::*;
use eyre::{Result, WrapErr};
use std::process::ExitCode;

// lib.rs imports
use deposit_dispatch::{
    config::{self, *},
    deposit,
    dispatcher::Dispatcher,
    logger::Logger,
    mint,
    rpc::HttpTransport,
    signer::DockerSigner,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse args with clap
    let args = Cli::parse();

    if let CliCmd::Version {} = args.command {
        let mut ver = Cli::command().render_version();
        ver.pop(); // remove "\n"
        println!("version: {}", ver);
        return Ok(ExitCode::SUCCESS);
    }

    // Config file < inline JSON < command line
    let config_args =
        config::merge_args::<ConfigArgs>(args.config, args.config_path, args.config_json)?;

    // Setup our global logger
    let logger = Logger::new(config_args.log_level.unwrap_or(DEFAULT_LOG_LEVEL));
    logger.set_global()?;

    let config = RunConfig::try_from(config_args)?;
    debug!("{:#?}", config);

    let transport = HttpTransport::new()?;
    let signer = DockerSigner::new(&config);

    match args.command {
        CliCmd::Deposits {
            file,
            offset,
            count,
        } => {
            let file = shellexpand::full(&file.to_string_lossy())
                .wrap_err_with(|| format!("{:?}", file))?
                .to_string();
            let intents = deposit::load(&file, offset, count)?;
            if intents.len() < count {
                warn!(
                    "Requested {} deposits from offset {}, only {} available in {}",
                    count,
                    offset,
                    intents.len().to_string().yellow(),
                    file.green()
                );
            }
            // Partial failures are reported in the summary line only,
            // the process exits 0 once every batch was attempted
            Dispatcher::new(&config, &transport, &signer)
                .run(&intents)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        CliCmd::Mint { amount } => {
            match mint::mint(&config, &transport, &signer, amount).await {
                Ok((tx_hash, _)) => {
                    info!("Mint {} confirmed", tx_hash.to_string().red());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!("{:?}", e);
                    eprintln!("ERROR: mint failed: {:#}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        CliCmd::Version {} => Ok(ExitCode::SUCCESS),
    }
}
