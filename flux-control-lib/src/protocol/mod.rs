//! Wire-level protocol for Magic Home bulbs.
//!
//! Every outbound frame is the command payload followed by one checksum byte
//! (the sum of the payload bytes modulo 256). There is no length prefix and
//! no escaping; framing of replies is implicit in the fixed reply length each
//! command expects.

use serde::Serialize;

use crate::error::ControlError;

pub mod matcher;

pub use matcher::ResponseMatcher;

/// Default TCP command port of a bulb.
pub const DEFAULT_PORT: u16 = 5577;

/// Query the bulb's current state. Expects a [`STATE_REPLY_LEN`]-byte reply.
pub const STATE_QUERY: [u8; 3] = [0x81, 0x8a, 0x8b];

/// Switch the bulb on. Expects a single acknowledgement byte.
pub const POWER_ON: [u8; 3] = [0x71, 0x23, 0x0f];

/// Switch the bulb off. Expects a single acknowledgement byte.
pub const POWER_OFF: [u8; 3] = [0x71, 0x24, 0x0f];

/// Length of the reply to [`STATE_QUERY`].
pub const STATE_REPLY_LEN: usize = 14;

/// Length of the acknowledgement to power and color commands.
pub const ACK_LEN: usize = 1;

/// Power state byte in a state reply: bulb is on.
const POWER_STATE_ON: u8 = 0x23;
/// Power state byte in a state reply: bulb is off.
const POWER_STATE_OFF: u8 = 0x24;

/// Encode a command payload into the on-wire frame.
///
/// Appends the checksum byte (sum of all payload bytes mod 256). This is the
/// only transformation the protocol applies.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let checksum = payload
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(checksum);
    frame
}

/// Build the payload that sets the bulb to a static RGB color.
///
/// Expects a single acknowledgement byte in reply.
pub fn set_color_command(red: u8, green: u8, blue: u8) -> [u8; 7] {
    [0x31, red, green, blue, 0x00, 0xf0, 0x0f]
}

/// Power state as reported by the bulb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerState {
    /// Not yet queried, or the bulb reported an unrecognized power byte.
    Unknown,
    On,
    Off,
}

/// Lighting mode family, derived from the reported pattern code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LightMode {
    /// Not yet queried, or the bulb reported an unrecognized pattern code.
    Unknown,
    WarmWhite,
    Color,
}

/// An RGB color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RGB {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// The decoded state of a bulb.
///
/// `color` is only meaningful while `mode` is [`LightMode::Color`]; a state
/// reply in any other mode leaves it unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulbState {
    pub power: PowerState,
    pub mode: LightMode,
    pub color: Option<RGB>,
}

impl Default for BulbState {
    fn default() -> Self {
        BulbState {
            power: PowerState::Unknown,
            mode: LightMode::Unknown,
            color: None,
        }
    }
}

/// Decode the reply to [`STATE_QUERY`].
///
/// Reply layout (14 bytes): byte 2 is the power state, byte 3 the pattern
/// code, bytes 6..=8 the RGB channels and byte 9 the warm-white level. A
/// pattern code of 0x61 or 0x62 means a static mode, disambiguated by the
/// warm-white level; any other pattern code leaves the mode unknown.
///
/// The trailing checksum byte of the reply is not validated, matching the
/// bulb firmware's own leniency on the command port.
pub fn decode_state_reply(reply: &[u8]) -> Result<BulbState, ControlError> {
    if reply.len() != STATE_REPLY_LEN {
        return Err(ControlError::BadReply(format!(
            "state reply must be {} bytes, got {}",
            STATE_REPLY_LEN,
            reply.len()
        )));
    }

    let power = match reply[2] {
        POWER_STATE_ON => PowerState::On,
        POWER_STATE_OFF => PowerState::Off,
        _ => PowerState::Unknown,
    };

    let pattern_code = reply[3];
    let warm_white_level = reply[9];

    let mode = match pattern_code {
        0x61 | 0x62 => {
            if warm_white_level != 0 {
                LightMode::WarmWhite
            } else {
                LightMode::Color
            }
        }
        _ => LightMode::Unknown,
    };

    let color = if mode == LightMode::Color {
        Some(RGB {
            red: reply[6],
            green: reply[7],
            blue: reply[8],
        })
    } else {
        None
    };

    Ok(BulbState { power, mode, color })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_reply() -> [u8; STATE_REPLY_LEN] {
        [0u8; STATE_REPLY_LEN]
    }

    #[test]
    fn test_encode_frame_appends_checksum() {
        assert_eq!(encode_frame(&POWER_ON), vec![0x71, 0x23, 0x0f, 0xa3]);
    }

    #[test]
    fn test_encode_frame_checksum_wraps() {
        assert_eq!(encode_frame(&[0xff, 0xff]), vec![0xff, 0xff, 0xfe]);
        assert_eq!(encode_frame(&STATE_QUERY), vec![0x81, 0x8a, 0x8b, 0x96]);
    }

    #[test]
    fn test_encode_frame_empty_payload() {
        assert_eq!(encode_frame(&[]), vec![0x00]);
    }

    #[test]
    fn test_set_color_command_layout() {
        assert_eq!(
            set_color_command(10, 20, 30),
            [0x31, 10, 20, 30, 0x00, 0xf0, 0x0f]
        );
    }

    #[test]
    fn test_decode_state_reply_on_color() {
        let mut reply = state_reply();
        reply[2] = 0x23;
        reply[3] = 0x61;
        reply[6] = 10;
        reply[7] = 20;
        reply[8] = 30;
        reply[9] = 0;

        let state = decode_state_reply(&reply).unwrap();
        assert_eq!(state.power, PowerState::On);
        assert_eq!(state.mode, LightMode::Color);
        assert_eq!(
            state.color,
            Some(RGB {
                red: 10,
                green: 20,
                blue: 30
            })
        );
    }

    #[test]
    fn test_decode_state_reply_warm_white_leaves_color_unset() {
        let mut reply = state_reply();
        reply[2] = 0x24;
        reply[3] = 0x61;
        reply[6] = 10;
        reply[9] = 5;

        let state = decode_state_reply(&reply).unwrap();
        assert_eq!(state.power, PowerState::Off);
        assert_eq!(state.mode, LightMode::WarmWhite);
        assert_eq!(state.color, None);
    }

    #[test]
    fn test_decode_state_reply_unknown_codes() {
        let mut reply = state_reply();
        reply[2] = 0x99;
        reply[3] = 0x25;

        let state = decode_state_reply(&reply).unwrap();
        assert_eq!(state.power, PowerState::Unknown);
        assert_eq!(state.mode, LightMode::Unknown);
        assert_eq!(state.color, None);
    }

    #[test]
    fn test_decode_state_reply_rejects_wrong_length() {
        assert!(matches!(
            decode_state_reply(&[0u8; 13]),
            Err(ControlError::BadReply(_))
        ));
    }
}
