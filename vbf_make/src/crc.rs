// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crc_any::CRCu16;

/// The CRC used for VBF block trailers and for the embedded checksum of
/// some images: CRC-16/CCITT-FALSE
/// poly: 0x1021
/// initial: 0xffff
/// final xor: 0x0000
/// reflected: no (left shifting)
pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    let mut crc = CRCu16::crc16ccitt_false();
    crc.digest(bytes);
    crc.get_crc()
}

/// 16-bit wrapping sum of every byte
pub fn additive_sum16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccitt_false_check_value() {
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29b1);
    }

    #[test]
    fn ccitt_false_empty_is_initial_register() {
        assert_eq!(crc16_ccitt_false(&[]), 0xffff);
        assert_eq!(crc16_ccitt_false(&[0u8; 0x100]), 0x41e8);
    }

    #[test]
    fn ccitt_false_sees_single_byte_change() {
        let mut data = b"firmware payload".to_vec();
        let before = crc16_ccitt_false(&data);
        assert_eq!(before, crc16_ccitt_false(&data));
        data[3] ^= 0x01;
        assert_ne!(before, crc16_ccitt_false(&data));
    }

    #[test]
    fn additive_sum_wraps() {
        assert_eq!(additive_sum16(&[]), 0);
        assert_eq!(additive_sum16(&[0x01, 0x02, 0xff]), 0x0102);
        assert_eq!(additive_sum16(&[0xff; 0x102]), 0x00fe);
    }
}
