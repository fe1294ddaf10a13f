use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bsc_config::{SharedConfig, toml_config};
use bsc_core::{BscTime, Sap, bsc_entities::BscEntity, debug};
use bsc_entities::MessageRouter;
use bsc_entities::bsc::BscCore;
use bsc_entities::peer::PeerEntity;
use bsc_entities::peer::loopback::{LoopbackRole, LoopbackTransport, LoopbackWorker};

/// Load configuration file
fn load_config_from_toml(cfg_path: &str) -> SharedConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

/// Registers a loopback peer, exits when its worker thread cannot be started
fn register_loopback(router: &mut MessageRouter, cfg: &SharedConfig, entity: BscEntity, sap: Sap, transport: LoopbackTransport) {
    match PeerEntity::<LoopbackWorker>::new(cfg.clone(), entity, BscEntity::Bsc, sap, transport) {
        Ok(peer) => router.register_entity(Box::new(peer)),
        Err(e) => {
            eprintln!("Failed to start {:?} peer: {}", entity, e);
            std::process::exit(1);
        }
    }
}

/// Start the BSC core with loopback peers
fn build_bsc_stack(cfg: &SharedConfig) -> MessageRouter {
    let mut router = MessageRouter::new(cfg.clone());
    router.register_entity(Box::new(BscCore::new(cfg.clone())));

    // The loopback BTS reports every configured TRX up
    let mut bts = LoopbackTransport::new(LoopbackRole::Bts);
    bts.trx = cfg.config().bts.iter().flat_map(|b| b.trx.iter().map(move |t| (b.nr, t.nr))).collect();
    register_loopback(&mut router, cfg, BscEntity::Bts, Sap::AbisSap, bts);
    register_loopback(&mut router, cfg, BscEntity::Msc, Sap::ASap, LoopbackTransport::new(LoopbackRole::Msc));
    register_loopback(&mut router, cfg, BscEntity::Mgw, Sap::MgcpSap, LoopbackTransport::new(LoopbackRole::Mgw));
    register_loopback(&mut router, cfg, BscEntity::Hodec, Sap::Control, LoopbackTransport::new(LoopbackRole::Hodec));
    eprintln!(" -> Loopback BTS, MSC and MGW");

    router.set_time(BscTime::default());
    router
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "GSM BSC signaling core",
    long_about = "Runs the BSC signaling core using the provided TOML configuration file"
)]
struct Args {
    /// Config file (required)
    #[arg(help = "TOML config with network, BTS and MSC parameters")]
    config: String,
}

fn main() {
    let args = Args::parse();
    let cfg = load_config_from_toml(&args.config);
    let _log_guard = debug::setup_logging_default(cfg.config().debug_log.clone());

    {
        let c = cfg.config();
        tracing::info!("MCC {} MNC {}: {} BTS, {} MSC", c.net.mcc, c.net.mnc, c.bts.len(), c.msc.len());
    }
    let mut router = build_bsc_stack(&cfg);

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    router.run_stack(None, Some(running));

    let state = cfg.state_read();
    for (name, value) in state.counters.dump() {
        tracing::info!("{}: {}", name, value);
    }
}
