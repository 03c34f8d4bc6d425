#![cfg(unix)]

//! End-to-end sessions between a device handle and the emulator.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use motelink_device::{
    Device, DeviceConfig, DeviceError, DeviceFlags, Emulator, EmulatorServer, Event, EventBatch,
    ExtensionType, ReportMode,
};
use motelink_frame::{AddressSpace, Buttons};
use motelink_transport::ReportStream;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/motelink-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn session(emulator: &Emulator) -> Device {
    let (control, control_peer) = ReportStream::pair().expect("control pair");
    let (interrupt, interrupt_peer) = ReportStream::pair().expect("interrupt pair");
    emulator
        .spawn(control_peer, interrupt_peer)
        .expect("emulator should start");
    Device::connect(control, interrupt, DeviceConfig::default()).expect("device should connect")
}

/// Poll until a batch satisfies `pred`, skipping the rest.
fn wait_for_batch(device: &Device, pred: impl Fn(&EventBatch) -> bool) -> EventBatch {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let batch = device
            .poll_timeout(remaining)
            .expect("expected batch should arrive");
        if pred(&batch) {
            return batch;
        }
    }
}

#[test]
fn status_and_leds() {
    let emulator = Emulator::new();
    emulator.set_battery(0x55);
    let device = session(&emulator);

    device.set_led(0x0A).unwrap();
    let status = device.request_status().unwrap();
    assert_eq!(status.battery, 0x55);
    assert_eq!(status.flags.leds(), 0x0A);
    assert_eq!(emulator.leds(), 0x0A);
}

#[test]
fn eeprom_roundtrip() {
    let emulator = Emulator::new();
    let device = session(&emulator);
    let data: Vec<u8> = (0..37).map(|i| i * 3).collect();

    assert_eq!(
        device.write(AddressSpace::Eeprom, 0x0FA0, &data).unwrap(),
        37
    );
    assert_eq!(emulator.eeprom(0x0FA0, 37), data);
    let back = device.read(AddressSpace::Eeprom, 0x0FA0, 37).unwrap();
    assert_eq!(back.as_ref(), data.as_slice());
}

#[test]
fn eeprom_out_of_range() {
    let emulator = Emulator::new();
    let device = session(&emulator);

    let err = device.read(AddressSpace::Eeprom, 0x1800, 8).unwrap_err();
    assert!(matches!(err, DeviceError::DeviceNack { code: 8 }));
    let err = device
        .write(AddressSpace::Eeprom, 0x16F8, &[0x11; 24])
        .unwrap_err();
    assert!(matches!(
        err,
        DeviceError::WriteFailed {
            written: 0,
            code: 8
        }
    ));
}

#[test]
fn detects_nunchuk() {
    let emulator = Emulator::new().with_extension(ExtensionType::Nunchuk);
    let device = session(&emulator);

    assert_eq!(device.detect_extension().unwrap(), ExtensionType::Nunchuk);
    assert_eq!(device.state().extension, ExtensionType::Nunchuk);
    assert_eq!(emulator.register(0xA4_00F0), 0x55);
}

#[test]
fn unplugging_resets_extension() {
    let emulator = Emulator::new().with_extension(ExtensionType::Classic);
    let device = session(&emulator);
    assert_eq!(device.detect_extension().unwrap(), ExtensionType::Classic);

    emulator.set_extension(ExtensionType::None);
    wait_for_batch(&device, |batch| {
        batch.events.iter().any(|event| {
            matches!(
                event,
                Event::Status {
                    extension: ExtensionType::None,
                    ..
                }
            )
        })
    });
    assert_eq!(device.state().extension, ExtensionType::None);
}

#[test]
fn motionplus_enable_and_disable() {
    let emulator = Emulator::new()
        .with_extension(ExtensionType::Nunchuk)
        .with_motionplus();
    let device = session(&emulator);
    assert_eq!(device.detect_extension().unwrap(), ExtensionType::Nunchuk);

    device.enable(DeviceFlags::MOTIONPLUS).unwrap();
    assert!(emulator.motionplus_active());
    assert!(device.flags().contains(DeviceFlags::MOTIONPLUS));
    assert_eq!(device.state().extension, ExtensionType::MotionPlus);

    device
        .set_report_mode(ReportMode::BTN | ReportMode::MOTIONPLUS)
        .unwrap();
    let batch = wait_for_batch(&device, |batch| {
        batch
            .events
            .iter()
            .any(|event| matches!(event, Event::MotionPlus(_)))
    });
    let Some(Event::MotionPlus(gyro)) = batch
        .events
        .iter()
        .find(|event| matches!(event, Event::MotionPlus(_)))
    else {
        unreachable!();
    };
    assert_eq!(gyro.angle_rate, [0x1F7F; 3]);

    device.disable(DeviceFlags::MOTIONPLUS).unwrap();
    assert!(!emulator.motionplus_active());
    assert!(!device.flags().contains(DeviceFlags::MOTIONPLUS));
    assert_eq!(device.state().extension, ExtensionType::Nunchuk);
}

#[test]
fn motionplus_missing_falls_back() {
    let emulator = Emulator::new().with_extension(ExtensionType::Classic);
    let device = session(&emulator);

    let err = device.enable_motionplus().unwrap_err();
    assert!(matches!(
        err,
        DeviceError::ExtensionMismatch {
            expected: ExtensionType::MotionPlus,
            found: ExtensionType::Classic
        }
    ));
    assert!(!device.flags().contains(DeviceFlags::MOTIONPLUS));
    assert_eq!(device.state().extension, ExtensionType::Classic);
}

#[test]
fn ir_mode_powers_camera() {
    let emulator = Emulator::new();
    let device = session(&emulator);

    device
        .set_report_mode(ReportMode::BTN | ReportMode::ACC | ReportMode::IR)
        .unwrap();
    assert_eq!(emulator.register(0xB0_0033), 0x03);
    assert_eq!(emulator.register(0xB0_0030), 0x08);

    let batch = wait_for_batch(&device, |batch| {
        batch
            .events
            .iter()
            .any(|event| matches!(event, Event::Ir { .. }))
    });
    assert_eq!(batch.len(), 3);

    device.set_report_mode(ReportMode::BTN).unwrap();
    device.request_status().unwrap();
    assert!(!emulator.ir_enabled());
    assert_eq!(emulator.report_mode(), 0x30);
}

#[test]
fn button_presses_arrive_as_events() {
    let emulator = Emulator::new();
    let device = session(&emulator);
    device.request_status().unwrap();

    emulator.set_buttons(Buttons::A | Buttons::UP);
    let batch = wait_for_batch(&device, |batch| {
        batch.events.contains(&Event::Buttons {
            buttons: Buttons::A | Buttons::UP,
        })
    });
    assert_eq!(batch.len(), 1);
    assert_eq!(device.state().buttons, Buttons::A | Buttons::UP);
}

#[test]
fn connects_through_socket_directory() {
    let dir = unique_temp_dir("bridge");
    let server = EmulatorServer::bind(&dir).expect("bridge sockets should bind");
    let emulator = Emulator::new();

    let serving = emulator.clone();
    let handle = thread::spawn(move || {
        let (control, interrupt) = server.accept().expect("host should connect");
        serving.serve(control, interrupt)
    });

    let device = Device::connect_path(&dir, DeviceConfig::default()).unwrap();
    device.set_led(0x01).unwrap();
    device.request_status().unwrap();
    device.disconnect().unwrap();

    handle
        .join()
        .unwrap()
        .expect("session should end cleanly");
    assert_eq!(emulator.leds(), 0x01);
    let _ = std::fs::remove_dir_all(&dir);
}
