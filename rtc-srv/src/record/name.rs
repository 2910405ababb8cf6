use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

const LABEL_MASK: u8 = 0xC0;
const POINTER_LABEL: u8 = 0xC0;

/// Reads an uncompressed wire-format name starting at `off`.
///
/// Returns the presentation form (no trailing dot, `"."` for the root) and
/// the offset just past the terminating zero octet.
pub(crate) fn unpack(msg: &[u8], mut off: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut wire_len = 0;
    loop {
        let Some(&c) = msg.get(off) else {
            return Err(Error::ErrTruncatedName);
        };
        off += 1;
        wire_len += 1;

        match c & LABEL_MASK {
            0x00 => {
                if c == 0 {
                    break;
                }
                let len = c as usize;
                let end = off + len;
                if end > msg.len() {
                    return Err(Error::ErrTruncatedName);
                }
                wire_len += len;
                if wire_len > MAX_NAME_LEN {
                    return Err(Error::ErrNameTooLong);
                }
                if !name.is_empty() {
                    name.push('.');
                }
                for &b in &msg[off..end] {
                    escape_octet(&mut name, b);
                }
                off = end;
            }
            POINTER_LABEL => return Err(Error::ErrCompressedName),
            // 0x40 and 0x80 label types have no defined meaning here.
            _ => return Err(Error::ErrSegTooLong),
        }
    }

    if wire_len > MAX_NAME_LEN {
        return Err(Error::ErrNameTooLong);
    }
    if name.is_empty() {
        name.push('.');
    }
    Ok((name, off))
}

fn escape_octet(name: &mut String, b: u8) {
    match b {
        b'.' => name.push_str("\\."),
        b'\\' => name.push_str("\\\\"),
        0x21..=0x7E => name.push(b as char),
        _ => name.push_str(&format!("\\{b:03}")),
    }
}

/// Appends `name` in wire format, undoing presentation escapes.
///
/// Labels longer than 63 octets are truncated.
pub(crate) fn pack(buf: &mut BytesMut, name: &str) {
    for label in split_labels(name) {
        let len = label.len().min(MAX_LABEL_LEN);
        buf.put_u8(len as u8);
        buf.put_slice(&label[..len]);
    }
    buf.put_u8(0);
}

fn split_labels(name: &str) -> Vec<Vec<u8>> {
    let mut labels = vec![];
    let mut label = vec![];
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let digits = bytes
                    .get(i + 1..i + 4)
                    .filter(|digits| digits.iter().all(u8::is_ascii_digit));
                if let Some(digits) = digits {
                    let value = digits
                        .iter()
                        .fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32);
                    label.push(value.min(u8::MAX as u32) as u8);
                    i += 4;
                } else if let Some(&escaped) = bytes.get(i + 1) {
                    label.push(escaped);
                    i += 2;
                } else {
                    label.push(b'\\');
                    i += 1;
                }
            }
            b'.' => {
                if !label.is_empty() {
                    labels.push(std::mem::take(&mut label));
                }
                i += 1;
            }
            b => {
                label.push(b);
                i += 1;
            }
        }
    }
    if !label.is_empty() {
        labels.push(label);
    }
    labels
}
