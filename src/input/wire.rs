//! Touch injection wire format
//!
//! The agent accepts touch injection as a fixed 32-byte big-endian message:
//!
//! ```text
//! [0]      type = 2 (INJECT_TOUCH_EVENT)
//! [1]      action: 0=down 1=up 2=move 3=cancel
//! [2..10)  pointerId u64
//! [10..14) x i32
//! [14..18) y i32
//! [18..20) screenW u16
//! [20..22) screenH u16
//! [22..24) pressure u16 fixed-point
//! [24..28) actionButton u32
//! [28..32) buttons u32
//! ```

use bytes::BufMut;

use crate::control::CONTROL_MSG_INJECT_TOUCH;

/// Encoded size of a touch injection message.
pub const TOUCH_COMMAND_LEN: usize = 32;

/// A fully resolved touch injection, ready to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchCommand {
    pub action: u8,
    pub pointer_id: u64,
    pub x: i32,
    pub y: i32,
    pub screen_w: u16,
    pub screen_h: u16,
    pub pressure: u16,
    pub action_button: u32,
    pub buttons: u32,
}

impl TouchCommand {
    pub fn encode(&self) -> [u8; TOUCH_COMMAND_LEN] {
        let mut buf = [0u8; TOUCH_COMMAND_LEN];
        let mut w = &mut buf[..];
        w.put_u8(CONTROL_MSG_INJECT_TOUCH);
        w.put_u8(self.action);
        w.put_u64(self.pointer_id);
        w.put_i32(self.x);
        w.put_i32(self.y);
        w.put_u16(self.screen_w);
        w.put_u16(self.screen_h);
        w.put_u16(self.pressure);
        w.put_u32(self.action_button);
        w.put_u32(self.buttons);
        buf
    }
}

/// Map a 0..=1 pressure to the agent's u16 fixed-point scale.
///
/// Full pressure maps to the exact top of the range, everything else rounds
/// to nearest.
pub fn pressure_to_fixed(pressure: f64) -> u16 {
    let clamped = pressure.clamp(0.0, 1.0);
    if clamped >= 1.0 {
        0xffff
    } else {
        (clamped * 65535.0).round() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    fn decode(buf: &[u8; TOUCH_COMMAND_LEN]) -> TouchCommand {
        let mut r = &buf[..];
        assert_eq!(r.get_u8(), CONTROL_MSG_INJECT_TOUCH);
        TouchCommand {
            action: r.get_u8(),
            pointer_id: r.get_u64(),
            x: r.get_i32(),
            y: r.get_i32(),
            screen_w: r.get_u16(),
            screen_h: r.get_u16(),
            pressure: r.get_u16(),
            action_button: r.get_u32(),
            buttons: r.get_u32(),
        }
    }

    #[test]
    fn test_encode_round_trip() {
        let cmd = TouchCommand {
            action: 0,
            pointer_id: 1,
            x: 540,
            y: 1200,
            screen_w: 1080,
            screen_h: 2400,
            pressure: 32768,
            action_button: 1,
            buttons: 1,
        };
        assert_eq!(decode(&cmd.encode()), cmd);
    }

    #[test]
    fn test_encode_layout() {
        let cmd = TouchCommand {
            action: 2,
            pointer_id: 0x0102030405060708,
            x: -1,
            y: 16,
            screen_w: 0x1234,
            screen_h: 0x5678,
            pressure: 0xffff,
            action_button: 0xaabbccdd,
            buttons: 0x00000004,
        };
        let buf = cmd.encode();
        assert_eq!(buf[0], 2);
        assert_eq!(buf[1], 2);
        assert_eq!(&buf[2..10], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&buf[10..14], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&buf[14..18], &[0, 0, 0, 16]);
        assert_eq!(&buf[18..20], &[0x12, 0x34]);
        assert_eq!(&buf[20..22], &[0x56, 0x78]);
        assert_eq!(&buf[22..24], &[0xff, 0xff]);
        assert_eq!(&buf[24..28], &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(&buf[28..32], &[0, 0, 0, 4]);
    }

    #[test]
    fn test_pressure_fixed_point() {
        assert_eq!(pressure_to_fixed(0.0), 0);
        assert_eq!(pressure_to_fixed(1.0), 0xffff);
        assert_eq!(pressure_to_fixed(0.5), 32768);
        // Out-of-range values clamp instead of wrapping.
        assert_eq!(pressure_to_fixed(-3.0), 0);
        assert_eq!(pressure_to_fixed(7.5), 0xffff);
        assert_eq!(pressure_to_fixed(0.9), 58982);
    }
}
