use anyhow::bail;
use bytes::{Buf, BufMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};


pub fn put_string(buf: &mut impl BufMut, s: &str) {
    buf.put_usize_varint(s.len());
    buf.put_slice(s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("string length {} exceeds the remaining {} bytes", len, buf.remaining());
    }

    let raw = buf.copy_to_bytes(len);
    let s = String::from_utf8(raw.to_vec())?;
    Ok(s)
}
