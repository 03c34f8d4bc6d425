//! Report tags.
//!
//! Tags 0x10-0x1F are outbound (host to controller), 0x20-0x3F inbound.
//! `NONE` is never sent on the wire and marks "no report".

/// Sentinel: no report.
pub const NONE: u8 = 0x00;

/// LED mask and rumble.
pub const LED_RUMBLE: u8 = 0x11;
/// Select the data reporting mode.
pub const REPORT_MODE: u8 = 0x12;
/// IR camera pixel clock enable.
pub const IR_ENABLE_1: u8 = 0x13;
/// Speaker enable.
pub const SPEAKER_ENABLE: u8 = 0x14;
/// Status request.
pub const STATUS_REQUEST: u8 = 0x15;
/// Memory write.
pub const WRITE_MEMORY: u8 = 0x16;
/// Memory read request.
pub const READ_MEMORY: u8 = 0x17;
/// Speaker sample data.
pub const SPEAKER_DATA: u8 = 0x18;
/// Speaker mute.
pub const SPEAKER_MUTE: u8 = 0x19;
/// IR camera logic enable.
pub const IR_ENABLE_2: u8 = 0x1A;

/// Status report.
pub const STATUS: u8 = 0x20;
/// Memory read reply.
pub const READ_DATA: u8 = 0x21;
/// Memory write acknowledgement.
pub const WRITE_ACK: u8 = 0x22;
/// Buttons only.
pub const BTN: u8 = 0x30;
/// Buttons + accelerometer.
pub const BTN_ACC: u8 = 0x31;
/// Buttons + 8 extension bytes.
pub const BTN_EXT8: u8 = 0x32;
/// Buttons + accelerometer + 12 IR bytes.
pub const BTN_ACC_IR12: u8 = 0x33;
/// Buttons + 19 extension bytes.
pub const BTN_EXT19: u8 = 0x34;
/// Buttons + accelerometer + 16 extension bytes.
pub const BTN_ACC_EXT16: u8 = 0x35;
/// Buttons + 10 IR bytes + 9 extension bytes.
pub const BTN_IR10_EXT9: u8 = 0x36;
/// Buttons + accelerometer + 10 IR bytes + 6 extension bytes.
pub const BTN_ACC_IR10_EXT6: u8 = 0x37;
/// 21 extension bytes.
pub const EXT21: u8 = 0x3D;
/// Interleaved buttons + accelerometer + IR, first half.
pub const BTN_ACC_IR36_1: u8 = 0x3E;
/// Interleaved buttons + accelerometer + IR, second half.
pub const BTN_ACC_IR36_2: u8 = 0x3F;

/// Returns a human-readable name for a report tag.
pub fn report_name(tag: u8) -> &'static str {
    match tag {
        NONE => "NONE",
        LED_RUMBLE => "LED_RUMBLE",
        REPORT_MODE => "REPORT_MODE",
        IR_ENABLE_1 => "IR_ENABLE_1",
        SPEAKER_ENABLE => "SPEAKER_ENABLE",
        STATUS_REQUEST => "STATUS_REQUEST",
        WRITE_MEMORY => "WRITE_MEMORY",
        READ_MEMORY => "READ_MEMORY",
        SPEAKER_DATA => "SPEAKER_DATA",
        SPEAKER_MUTE => "SPEAKER_MUTE",
        IR_ENABLE_2 => "IR_ENABLE_2",
        STATUS => "STATUS",
        READ_DATA => "READ_DATA",
        WRITE_ACK => "WRITE_ACK",
        BTN => "BTN",
        BTN_ACC => "BTN_ACC",
        BTN_EXT8 => "BTN_EXT8",
        BTN_ACC_IR12 => "BTN_ACC_IR12",
        BTN_EXT19 => "BTN_EXT19",
        BTN_ACC_EXT16 => "BTN_ACC_EXT16",
        BTN_IR10_EXT9 => "BTN_IR10_EXT9",
        BTN_ACC_IR10_EXT6 => "BTN_ACC_IR10_EXT6",
        EXT21 => "EXT21",
        BTN_ACC_IR36_1 | BTN_ACC_IR36_2 => "BTN_ACC_IR36",
        0x10..=0x1F => "OUTPUT_RESERVED",
        _ => "UNKNOWN",
    }
}

/// Returns true if the tag names a report the controller sends.
pub fn is_input(tag: u8) -> bool {
    matches!(
        tag,
        STATUS
            | READ_DATA
            | WRITE_ACK
            | BTN..=BTN_ACC_IR10_EXT6
            | EXT21
            | BTN_ACC_IR36_1
            | BTN_ACC_IR36_2
    )
}

/// Returns true if the tag names a report the host sends.
pub fn is_output(tag: u8) -> bool {
    (LED_RUMBLE..=IR_ENABLE_2).contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_every_input_report() {
        for tag in 0x20..=0x3F_u8 {
            if is_input(tag) {
                assert_ne!(report_name(tag), "UNKNOWN", "tag 0x{tag:02X}");
            }
        }
    }

    #[test]
    fn direction_classification() {
        assert!(is_output(STATUS_REQUEST));
        assert!(!is_input(STATUS_REQUEST));
        assert!(is_input(BTN_ACC_IR10_EXT6));
        assert!(!is_input(0x38));
        assert!(!is_output(NONE));
    }
}
