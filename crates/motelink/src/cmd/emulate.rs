use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use motelink_device::{Emulator, EmulatorServer, ExtensionType, CONTROL_SOCKET, INTERRUPT_SOCKET};
use tracing::{info, warn};

use crate::cmd::EmulateArgs;
use crate::exit::{io_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: EmulateArgs) -> CliResult<i32> {
    std::fs::create_dir_all(&args.dir)
        .map_err(|err| io_error(&format!("failed creating {}", args.dir.display()), err))?;

    let mut emulator = Emulator::new().with_extension(ExtensionType::from(args.extension));
    if args.motionplus {
        emulator = emulator.with_motionplus();
    }
    if let Some(level) = args.battery {
        emulator.set_battery(level);
    }

    let server =
        EmulatorServer::bind(&args.dir).map_err(|err| transport_error("bind failed", err))?;
    info!(
        dir = %args.dir.display(),
        extension = %ExtensionType::from(args.extension),
        motionplus = args.motionplus,
        "emulator listening"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), args.dir.clone())?;

    let mut served = 0usize;
    while running.load(Ordering::SeqCst) {
        let (control, interrupt) = server
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        info!("host connected");

        match emulator.serve(control, interrupt) {
            Ok(()) => info!("host disconnected"),
            Err(err) => warn!(error = %err, "session ended with an error"),
        }

        served = served.saturating_add(1);
        if args.sessions.is_some_and(|limit| served >= limit) {
            break;
        }
    }

    Ok(SUCCESS)
}

/// Ctrl-C interrupts a blocking accept, so the handler removes the sockets
/// and exits directly.
fn install_ctrlc_handler(running: Arc<AtomicBool>, dir: PathBuf) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let _ = std::fs::remove_file(dir.join(CONTROL_SOCKET));
        let _ = std::fs::remove_file(dir.join(INTERRUPT_SOCKET));
        std::process::exit(SUCCESS);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
