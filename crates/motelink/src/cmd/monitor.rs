use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use motelink_device::{DeviceError, DeviceFlags, ReportMode};
use tracing::info;

use crate::cmd::{connect, finish, report_mode, MonitorArgs};
use crate::exit::{device_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_batch, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let mode = report_mode(&args.mode);
    let device = connect(&args.connect)?;

    if mode.contains(ReportMode::MOTIONPLUS) {
        device
            .enable(DeviceFlags::MOTIONPLUS)
            .map_err(|err| device_error("MotionPlus activation failed", err))?;
    } else if mode.intersects(ReportMode::EXT) {
        device
            .detect_extension()
            .map_err(|err| device_error("extension detection failed", err))?;
    }
    if args.continuous {
        device
            .enable(DeviceFlags::CONTINUOUS)
            .map_err(|err| device_error("enabling continuous reports failed", err))?;
    }
    device
        .set_report_mode(mode)
        .map_err(|err| device_error("setting report mode failed", err))?;
    info!(mode = ?mode, "monitoring");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let batch = match device.poll_timeout(POLL_INTERVAL) {
            Ok(batch) => batch,
            Err(DeviceError::Timeout(_)) => continue,
            Err(DeviceError::Disconnected) => {
                return Err(CliError::new(FAILURE, "device disconnected"));
            }
            Err(err) => return Err(device_error("poll failed", err)),
        };

        print_batch(&batch, format);
        if batch.is_disconnect() {
            return Err(CliError::new(FAILURE, "device disconnected"));
        }

        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    finish(device)?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
