//! Line-oriented driver for the simulator protocol.
//!
//! Reads one frame per line from stdin and writes each reply on its own line
//! to stdout. An optional argument names a TOML tuning file. With `--lag`,
//! every steer reply is held back by the configured actuation latency.
//!
//!     mpc-driver [--lag] [config.toml] < frames.txt

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use kinematic_mpc::protocol::{MANUAL_FRAME, RESET_FRAME};
use kinematic_mpc::{MpcConfig, MpcController, MpcError, Session};
use log::{error, info};

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    lag: bool,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    for arg in std::env::args().skip(1) {
        if arg == "--lag" {
            args.lag = true;
        } else {
            args.config = Some(arg);
        }
    }
    args
}

fn load_config(path: Option<&str>) -> Result<MpcConfig, MpcError> {
    match path {
        Some(path) => {
            info!("loading tuning from {path}");
            MpcConfig::load(path)
        }
        None => Ok(MpcConfig::default()),
    }
}

fn run(mut session: Session, reply_delay: Duration) -> io::Result<()> {
    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    writeln!(out, "{RESET_FRAME}")?;
    out.flush()?;

    for line in stdin.lock().lines() {
        if let Some(reply) = session.handle_frame(&line?) {
            // Actuation lag
            if reply != MANUAL_FRAME && !reply_delay.is_zero() {
                thread::sleep(reply_delay);
            }
            writeln!(out, "{reply}")?;
            out.flush()?;
        }
    }
    info!("input closed after {} ticks", session.ticks());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = parse_args();

    let controller = match load_config(args.config.as_deref()).and_then(MpcController::new) {
        Ok(controller) => controller,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let config = controller.config();
    info!("horizon {} x {}s", config.horizon, config.dt);

    let reply_delay = if args.lag {
        info!("delaying steer replies by {:?}", config.latency());
        config.latency()
    } else {
        Duration::ZERO
    };

    match run(Session::new(controller), reply_delay) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("i/o failure: {e}");
            ExitCode::FAILURE
        }
    }
}
