use std::env;
use std::io;
use std::path::Path;
use std::process;
use std::time::Duration;

use simple_wallet::SessionConfig;
use simple_wallet::host::{CardState, ReaderProvider, ServiceError, SimulatedReaders, WalletService};
use simple_wallet::script::{self, ScriptError};
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("usage: simple-wallet [--simulate] [--reader <index>] [--poll-ms <millis>] <script.csv>")]
    Usage,

    #[error("invalid value for {flag}: '{value}'")]
    InvalidValue { flag: &'static str, value: String },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("failed to write results: {0}")]
    Output(#[from] csv::Error),

    #[cfg(feature = "pcsc")]
    #[error(transparent)]
    Transport(#[from] simple_wallet::host::TransportError),

    #[cfg(not(feature = "pcsc"))]
    #[error("built without pc/sc support; rebuild with --features pcsc or pass --simulate")]
    NoPcsc,
}

#[derive(Debug)]
struct Args {
    simulate: bool,
    config: SessionConfig,
    script: String,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, CliError> {
        let mut simulate = false;
        let mut config = SessionConfig::default();
        let mut script = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--simulate" => simulate = true,
                "--reader" => {
                    let index = Self::value(&mut args, "--reader")?;
                    config = config.with_reader_index(index);
                }
                "--poll-ms" => {
                    let millis = Self::value(&mut args, "--poll-ms")?;
                    config = config.with_poll_interval(Duration::from_millis(millis));
                }
                _ if arg.starts_with("--") => return Err(CliError::Usage),
                _ => script = Some(arg),
            }
        }

        let script = script.ok_or(CliError::Usage)?;
        if !script.ends_with(".csv") {
            warn!(script = %script, "script file seems to not be a csv file");
        }
        Ok(Self {
            simulate,
            config,
            script,
        })
    }

    fn value<T: std::str::FromStr>(
        args: &mut impl Iterator<Item = String>,
        flag: &'static str,
    ) -> Result<T, CliError> {
        let value = args.next().ok_or(CliError::Usage)?;
        value
            .parse()
            .map_err(|_| CliError::InvalidValue { flag, value })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let result = match Args::parse(env::args().skip(1)) {
        Ok(args) => run(args).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let operations = script::read_operations(Path::new(&args.script))?;

    if args.simulate {
        return drive(SimulatedReaders::with_wallet_card(), args.config, operations).await;
    }

    #[cfg(feature = "pcsc")]
    let result = {
        let readers = simple_wallet::host::PcscReaders::establish()?;
        drive(readers, args.config, operations).await
    };

    #[cfg(not(feature = "pcsc"))]
    let result = Err(CliError::NoPcsc);

    result
}

/// Stream the script through a wallet service over `provider` and print the results.
async fn drive<P: ReaderProvider>(
    provider: P,
    config: SessionConfig,
    operations: impl Iterator<Item = Result<script::ScriptLine, ScriptError>> + Send + 'static,
) -> Result<(), CliError> {
    let (wallet, service) = WalletService::spawn(provider, config);

    info!("waiting for card");
    if let CardState::Connected { reader, balance } = wallet.wait_for_card().await? {
        info!(reader = %reader, balance, "card ready");
    }

    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(line) => {
                    if tx_sender.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let outcomes = script::run(&wallet, ReceiverStream::new(tx_receiver)).await;

    wallet.shutdown();
    if let Err(e) = service.await {
        warn!(reason = %e, "wallet service task failed");
    }

    script::write_outcomes(outcomes, io::stdout().lock())?;
    Ok(())
}
