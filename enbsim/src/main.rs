//! main - runs a simulated eNB, or a batch of simulated UE connection attempts against one

use anyhow::{Result, ensure};
use async_std::channel::Sender;
use async_std::prelude::*;
use clap::{Parser, Subcommand};
use enbsim::{
    Config, Enb, ProcedureResult, UeConnectionProcedure, UeIdentityInfo, UeTimerConfig,
};
use rrc::{EstablishmentCause, NasInfo, NasMessageType, RrcPdu, UeIdentityType};
use signal_hook::consts::signal::*;
use signal_hook_async_std::Signals;
use slog::{Drain, Logger, info, o, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use transport::IoService;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file of timer and retry settings.  Settings not in the file keep their defaults.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run an eNB until interrupted, then log the result of every UE that contacted it.
    Enb {
        /// Local IPv4 address to serve the Uu interface on.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        local_ip: IpAddr,

        #[arg(long, default_value_t = 9000)]
        port: u16,
    },

    /// Run connection attempts against an eNB, concurrently, one UDP endpoint per attempt.
    Ue {
        /// Address of the eNB, for example 127.0.0.1:9000.
        #[arg(long)]
        enb: SocketAddr,

        /// Local address to send from.  Each attempt binds its own ephemeral port.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        local_ip: IpAddr,

        /// Random value identity of the first UE.  Later attempts count up from it.
        #[arg(long, default_value_t = 3434)]
        identity_value: u64,

        #[arg(long, default_value_t = 1)]
        attempts: u32,
    },
}

#[async_std::main]
async fn main() -> Result<()> {
    exit_on_panic();
    let logger = init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(filename) => enbsim::load_config_file(filename, &logger)?,
        None => Config::default(),
    };

    match args.role {
        Role::Enb { local_ip, port } => {
            run_enb(config, SocketAddr::new(local_ip, port), logger).await
        }
        Role::Ue {
            enb,
            local_ip,
            identity_value,
            attempts,
        } => run_ues(config, enb, local_ip, identity_value, attempts, logger).await,
    }
}

async fn run_enb(config: Config, bind_address: SocketAddr, logger: Logger) -> Result<()> {
    check_local_ip(&bind_address.ip())?;
    let enb = Enb::start(config.enb, bind_address, logger.new(o!("enb" => 1))).await?;

    wait_for_signal().await?;

    let mut results = enb.dispatcher().results_by_ue().into_iter().collect::<Vec<_>>();
    results.sort_by_key(|(key, _)| *key);
    for (key, result) in results {
        info!(&logger, "UE {key}: {result}");
    }
    enb.graceful_shutdown().await;
    Ok(())
}

async fn run_ues(
    config: Config,
    enb_address: SocketAddr,
    local_ip: IpAddr,
    identity_value: u64,
    attempts: u32,
    logger: Logger,
) -> Result<()> {
    ensure!(attempts > 0, "At least one attempt is needed");
    let timer_config = UeTimerConfig::from(&config.ue);
    let (result_sender, result_receiver) = async_channel::unbounded();
    let mut endpoints = vec![];

    for ii in 0..attempts {
        let logger = logger.new(o!("ue" => ii));
        let io =
            IoService::<RrcPdu>::new(&format!("ue-{ii}"), SocketAddr::new(local_ip, 0), &logger);
        let result_sender = result_sender.clone();
        let procedure = UeConnectionProcedure::new(
            NasInfo::new(NasMessageType::AttachRequest),
            timer_config,
            enb_address,
            io.clone(),
            move |result| {
                let _ = result_sender.try_send((ii, result));
            },
            UeIdentityInfo {
                identity_type: UeIdentityType::RandomValue,
                identity_value: identity_value + ii as u64,
                establishment_cause: EstablishmentCause::MoSignalling,
                selected_plmn_identity: config.ue.selected_plmn_identity(),
            },
            logger,
        )?;
        procedure.execute().await?;

        // An attempt runs only as long as its procedure is held.
        endpoints.push((procedure, io));
    }

    let mut failures = 0;
    for _ in 0..attempts {
        let (ii, result) = result_receiver.recv().await?;
        if result == ProcedureResult::Success {
            info!(&logger, "Attempt {ii}: {result}");
        } else {
            warn!(&logger, "Attempt {ii}: {result}");
            failures += 1;
        }
    }
    for (_, io) in endpoints {
        io.stop().await;
    }
    ensure!(failures == 0, "{failures} of {attempts} attempt(s) failed");
    Ok(())
}

fn init_logging() -> Logger {
    // Use info level logging by default
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info") }
    }
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog_envlogger::new(drain);
    slog::Logger::root(drain, o!())
}

fn exit_on_panic() {
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        std::process::exit(1);
    }));
}

fn check_local_ip(ip: &IpAddr) -> Result<()> {
    ensure!(
        !ip.is_unspecified(),
        "Unspecified IP address not allowed for local IP - \
         UEs check that replies come from the address they sent to"
    );
    Ok(())
}

async fn wait_for_signal() -> Result<i32> {
    let signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT])?;
    let handle = signals.handle();
    let (sig_sender, sig_receiver) = async_std::channel::unbounded();
    let signals_task = async_std::task::spawn(handle_signals(signals, sig_sender));
    let signal = sig_receiver.recv().await;
    handle.close();
    signals_task.await;
    Ok(signal?)
}

async fn handle_signals(signals: Signals, sig_sender: Sender<i32>) {
    let mut signals = signals.fuse();
    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => {}
            SIGTERM | SIGINT | SIGQUIT => {
                let _ = sig_sender.send(signal).await;
            }
            _ => unreachable!(),
        }
    }
}
