//! H.264 SPS dimension decoding
//!
//! Recovers the coded picture width and height from a Sequence Parameter Set
//! so touch coordinates can fall back to the real video geometry. Parses just
//! far enough into the RBSP to reach `pic_width_in_mbs_minus1` and the
//! cropping window; everything else is skipped field by field.
//!
//! The decoder never panics on truncated or garbage input, it reports
//! failure by returning `None`.

use super::annexb::{nal_type, NAL_TYPE_SPS};

/// Profiles whose SPS carries `chroma_format_idc` and friends.
const PROFILES_WITH_CHROMA_INFO: [u8; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// Remove emulation-prevention bytes (`00 00 03` -> `00 00`).
///
/// `data` is the NAL payload after the one-byte NAL header.
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            rbsp.push(0);
            rbsp.push(0);
            i += 3;
        } else {
            rbsp.push(data[i]);
            i += 1;
        }
    }
    rbsp
}

/// MSB-first bit reader over an RBSP.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Some(u32::from(bit))
    }

    fn read_bits(&mut self, n: u32) -> Option<u32> {
        let mut value = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Some(value)
    }

    fn skip(&mut self, n: u32) -> Option<()> {
        self.read_bits(n).map(|_| ())
    }

    /// Exp-Golomb unsigned value.
    fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }
        if leading_zeros == 0 {
            return Some(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        Some((1 << leading_zeros) - 1 + suffix)
    }

    /// Exp-Golomb signed value.
    fn read_se(&mut self) -> Option<i32> {
        let k = self.read_ue()? as i64;
        let value = if k % 2 == 0 { -k / 2 } else { (k + 1) / 2 };
        Some(value as i32)
    }
}

/// Skip one scaling list of `size` coefficients.
fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Some(())
}

/// Decode picture width and height from a full SPS NAL (header included).
///
/// Returns `None` unless both dimensions land in `(0, 65535]`.
pub fn parse_sps_dimensions(nal: &[u8]) -> Option<(u16, u16)> {
    if nal.len() < 4 || nal_type(nal) != NAL_TYPE_SPS {
        return None;
    }
    let rbsp = strip_emulation_prevention(&nal[1..]);
    let profile_idc = *rbsp.first()?;

    let mut r = BitReader::new(&rbsp);
    // profile_idc, constraint flags, level_idc
    r.skip(24)?;
    // seq_parameter_set_id
    r.read_ue()?;

    let mut chroma_format_idc = 1u32;
    if PROFILES_WITH_CHROMA_INFO.contains(&profile_idc) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            // separate_colour_plane_flag
            r.skip(1)?;
        }
        // bit_depth_luma_minus8, bit_depth_chroma_minus8
        r.read_ue()?;
        r.read_ue()?;
        // qpprime_y_zero_transform_bypass_flag
        r.skip(1)?;
        // seq_scaling_matrix_present_flag
        if r.read_bits(1)? == 1 {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_bits(1)? == 1 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    // log2_max_frame_num_minus4
    r.read_ue()?;
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        // log2_max_pic_order_cnt_lsb_minus4
        r.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        // delta_pic_order_always_zero_flag
        r.skip(1)?;
        r.read_se()?;
        r.read_se()?;
        let cycles = r.read_ue()?;
        for _ in 0..cycles {
            r.read_se()?;
        }
    }

    // max_num_ref_frames, gaps_in_frame_num_value_allowed_flag
    r.read_ue()?;
    r.skip(1)?;

    let pic_width_in_mbs_minus1 = r.read_ue()?;
    let pic_height_in_map_units_minus1 = r.read_ue()?;
    let frame_mbs_only_flag = r.read_bits(1)?;
    if frame_mbs_only_flag == 0 {
        // mb_adaptive_frame_field_flag
        r.skip(1)?;
    }
    // direct_8x8_inference_flag
    r.skip(1)?;

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0u32, 0u32, 0u32, 0u32);
    if r.read_bits(1)? == 1 {
        crop_left = r.read_ue()?;
        crop_right = r.read_ue()?;
        crop_top = r.read_ue()?;
        crop_bottom = r.read_ue()?;
    }

    let mb_width = u64::from(pic_width_in_mbs_minus1) + 1;
    let mb_height =
        (u64::from(pic_height_in_map_units_minus1) + 1) * (2 - u64::from(frame_mbs_only_flag));

    let (sub_width, sub_height): (u64, u64) = match chroma_format_idc {
        0 | 3 => (1, 1),
        2 => (2, 1),
        _ => (2, 2),
    };
    let crop_unit_x = sub_width;
    let crop_unit_y = sub_height * (2 - u64::from(frame_mbs_only_flag));

    let horizontal_crop = (u64::from(crop_left) + u64::from(crop_right)) * crop_unit_x;
    let vertical_crop = (u64::from(crop_top) + u64::from(crop_bottom)) * crop_unit_y;
    let width = (mb_width * 16) as i64 - horizontal_crop as i64;
    let height = (mb_height * 16) as i64 - vertical_crop as i64;

    if width <= 0 || height <= 0 || width > 65535 || height > 65535 {
        return None;
    }
    Some((width as u16, height as u16))
}

/// Test-vector construction shared with the demuxer tests.
#[cfg(test)]
pub(crate) mod testing {
    /// MSB-first bit writer mirroring the reader.
    #[derive(Default)]
    pub struct BitWriter {
        bytes: Vec<u8>,
        bit: u8,
    }

    impl BitWriter {
        pub fn put_bits(&mut self, value: u32, n: u32) {
            for shift in (0..n).rev() {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let bit = ((value >> shift) & 1) as u8;
                let last = self.bytes.len() - 1;
                self.bytes[last] |= bit << (7 - self.bit);
                self.bit = (self.bit + 1) % 8;
            }
        }

        pub fn put_ue(&mut self, value: u32) {
            let coded = value as u64 + 1;
            let bits = 64 - coded.leading_zeros();
            self.put_bits(0, bits - 1);
            for shift in (0..bits).rev() {
                self.put_bits(((coded >> shift) & 1) as u32, 1);
            }
        }

        pub fn finish(mut self) -> Vec<u8> {
            // rbsp_stop_one_bit plus alignment, as a real encoder would emit
            self.put_bits(1, 1);
            while self.bit != 0 {
                self.put_bits(0, 1);
            }
            self.bytes
        }
    }

    /// Build a baseline-profile SPS for the given geometry.
    pub fn build_sps(
        pic_width_in_mbs_minus1: u32,
        pic_height_in_map_units_minus1: u32,
        crop: Option<(u32, u32, u32, u32)>,
    ) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.put_bits(66, 8); // profile_idc: baseline
        w.put_bits(0, 8); // constraint flags
        w.put_bits(31, 8); // level_idc 3.1
        w.put_ue(0); // seq_parameter_set_id
        w.put_ue(0); // log2_max_frame_num_minus4
        w.put_ue(0); // pic_order_cnt_type
        w.put_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        w.put_ue(1); // max_num_ref_frames
        w.put_bits(0, 1); // gaps_in_frame_num_value_allowed_flag
        w.put_ue(pic_width_in_mbs_minus1);
        w.put_ue(pic_height_in_map_units_minus1);
        w.put_bits(1, 1); // frame_mbs_only_flag
        w.put_bits(1, 1); // direct_8x8_inference_flag
        match crop {
            Some((l, r, t, b)) => {
                w.put_bits(1, 1);
                w.put_ue(l);
                w.put_ue(r);
                w.put_ue(t);
                w.put_ue(b);
            }
            None => w.put_bits(0, 1),
        }
        let mut nal = vec![0x67];
        nal.extend(w.finish());
        nal
    }
}

#[cfg(test)]
mod tests {
    use super::testing::build_sps;
    use super::*;

    #[test]
    fn test_parse_uncropped_720p() {
        // 80x45 macroblocks -> 1280x720
        let sps = build_sps(79, 44, None);
        assert_eq!(parse_sps_dimensions(&sps), Some((1280, 720)));
    }

    #[test]
    fn test_parse_cropped_portrait() {
        // 68x150 macroblocks cropped right by 4 chroma units -> 1080x2400
        let sps = build_sps(67, 149, Some((0, 4, 0, 0)));
        assert_eq!(parse_sps_dimensions(&sps), Some((1080, 2400)));
    }

    #[test]
    fn test_parse_rejects_wrong_nal_type() {
        let mut sps = build_sps(79, 44, None);
        sps[0] = 0x65; // IDR header
        assert_eq!(parse_sps_dimensions(&sps), None);
    }

    #[test]
    fn test_parse_survives_truncation() {
        let sps = build_sps(79, 44, Some((0, 4, 0, 0)));
        for len in 0..sps.len() {
            // Any prefix must fail cleanly, never panic.
            assert_eq!(parse_sps_dimensions(&sps[..len]), None, "prefix len {len}");
        }
    }

    #[test]
    fn test_parse_survives_garbage() {
        let garbage = [0x67, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let _ = parse_sps_dimensions(&garbage);
    }

    fn insert_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(rbsp.len());
        let mut zeros = 0;
        for &b in rbsp {
            if zeros >= 2 && b <= 3 {
                out.push(3);
                zeros = 0;
            }
            out.push(b);
            zeros = if b == 0 { zeros + 1 } else { 0 };
        }
        out
    }

    #[test]
    fn test_emulation_round_trip() {
        let rbsp = [0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x03, 0xab];
        let escaped = insert_emulation_prevention(&rbsp);
        assert_ne!(escaped, rbsp);
        assert_eq!(strip_emulation_prevention(&escaped), rbsp);
    }

    #[test]
    fn test_strip_emulation_plain_passthrough() {
        let rbsp = [0x11, 0x22, 0x33];
        assert_eq!(strip_emulation_prevention(&rbsp), rbsp);
    }
}
