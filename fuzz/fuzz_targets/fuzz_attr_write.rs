//! Fuzz target: `gatt::decode_write`
//!
//! The first byte picks the attribute, the next two the offset, the rest is
//! the peer's payload. Checks:
//! - No panics under any byte sequence
//! - The button value is never writable
//! - An accepted LED write was exactly one byte, 0 or 1, at offset 0
//!
//! cargo fuzz run fuzz_attr_write

#![no_main]

use libfuzzer_sys::fuzz_target;
use lbskit::gatt::{AttrWrite, LbsAttribute, decode_write};

fuzz_target!(|data: &[u8]| {
    let [sel, lo, hi, payload @ ..] = data else {
        return;
    };
    let attr = match sel % 3 {
        0 => LbsAttribute::Button,
        1 => LbsAttribute::Led,
        _ => LbsAttribute::ButtonCcc,
    };
    let offset = u16::from_le_bytes([*lo, *hi]);

    match decode_write(attr, offset, payload) {
        Ok(AttrWrite::Led(on)) => {
            assert_eq!(attr, LbsAttribute::Led);
            assert_eq!(offset, 0);
            assert_eq!(payload, &[u8::from(on)]);
        }
        Ok(AttrWrite::Notifications(_)) => {
            assert_eq!(attr, LbsAttribute::ButtonCcc);
            assert_eq!(payload.len(), 2);
        }
        Err(_) => {}
    }
    assert!(attr != LbsAttribute::Button || decode_write(attr, offset, payload).is_err());
});
