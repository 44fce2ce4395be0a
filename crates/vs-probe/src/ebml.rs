//! Minimal EBML header reading, enough to recover the `DocType`.

const DOC_TYPE_ID: u64 = 0x4282;

/// Read an EBML variable-length integer. With `keep_marker` the length
/// marker bit is retained, which is how element ids are written.
fn vint(buf: &[u8], keep_marker: bool) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    let bytes = buf.get(..len)?;
    let mask = if keep_marker { 0xFF } else { (0xFFu16 >> len) as u8 };
    let value = bytes[1..]
        .iter()
        .fold(u64::from(first & mask), |acc, b| (acc << 8) | u64::from(*b));
    Some((value, len))
}

/// Return the `DocType` string of an EBML header starting with the magic
/// bytes, or `None` if it cannot be found in `buf`.
pub(crate) fn doc_type(buf: &[u8]) -> Option<String> {
    let rest = buf.get(4..)?;
    let (header_len, n) = vint(rest, false)?;
    let mut body = &rest[n..];
    if (body.len() as u64) > header_len {
        body = &body[..header_len as usize];
    }

    while !body.is_empty() {
        let (id, id_len) = vint(body, true)?;
        let (size, size_len) = vint(&body[id_len..], false)?;
        let start = id_len + size_len;
        let end = start.checked_add(usize::try_from(size).ok()?)?;
        let data = body.get(start..end)?;
        if id == DOC_TYPE_ID {
            let text = String::from_utf8_lossy(data);
            return Some(text.trim_end_matches('\0').to_string());
        }
        body = &body[end..];
    }
    None
}

#[cfg(test)]
pub(crate) fn header(doc: &str) -> Vec<u8> {
    // EBMLVersion = 1, then DocType.
    let mut body = vec![0x42, 0x86, 0x81, 0x01, 0x42, 0x82, 0x80 | doc.len() as u8];
    body.extend_from_slice(doc.as_bytes());
    let mut out = vec![0x1A, 0x45, 0xDF, 0xA3, 0x80 | body.len() as u8];
    out.extend(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_doc_type() {
        assert_eq!(doc_type(&header("webm")).as_deref(), Some("webm"));
        assert_eq!(doc_type(&header("matroska")).as_deref(), Some("matroska"));
    }

    #[test]
    fn invalid_vint_yields_none() {
        assert_eq!(doc_type(&[0x1A, 0x45, 0xDF, 0xA3, 0x00, 0x00]), None);
        assert_eq!(doc_type(&[0x1A, 0x45]), None);
    }

    #[test]
    fn vint_decoding() {
        assert_eq!(vint(&[0x81], false), Some((1, 1)));
        assert_eq!(vint(&[0x42, 0x82], true), Some((0x4282, 2)));
        assert_eq!(vint(&[0x40, 0x02], false), Some((2, 2)));
        assert_eq!(vint(&[0x40], false), None);
    }
}
