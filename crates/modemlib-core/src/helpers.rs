//! Small conversion helpers shared by the command parsers and the
//! registration workflow.

/// Return the leading `len` digits of an IMSI (MCC + MNC).
///
/// Returns `None` if the IMSI is shorter than `len` or contains non-digits
/// in that prefix.
///
/// # Example
///
/// ```
/// use modemlib_core::imsi_prefix;
///
/// assert_eq!(imsi_prefix("214012345678901", 5).as_deref(), Some("21401"));
/// assert_eq!(imsi_prefix("2140", 5), None);
/// ```
pub fn imsi_prefix(imsi: &str, len: usize) -> Option<String> {
    let imsi = imsi.trim();
    let prefix = imsi.get(..len)?;
    if prefix.bytes().all(|b| b.is_ascii_digit()) {
        Some(prefix.to_string())
    } else {
        None
    }
}

/// Whether `s` looks like hex-encoded UCS-2 text.
///
/// Requires a non-empty, even multiple of four hex digits. Purely numeric
/// strings of that length (e.g. operator ids) are ambiguous, so callers
/// decide whether to decode those.
pub fn looks_like_ucs2_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 4 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decode hex-encoded UCS-2 (`"0076006F0064"` -> `"vod"`).
///
/// Returns `None` for malformed input or code units that are not valid
/// scalar values.
///
/// # Example
///
/// ```
/// use modemlib_core::decode_ucs2_hex;
///
/// assert_eq!(decode_ucs2_hex("004F00720061006E00670065").as_deref(), Some("Orange"));
/// assert_eq!(decode_ucs2_hex("004"), None);
/// ```
pub fn decode_ucs2_hex(s: &str) -> Option<String> {
    if !looks_like_ucs2_hex(s) {
        return None;
    }
    let units = s
        .as_bytes()
        .chunks(4)
        .map(|chunk| {
            let text = std::str::from_utf8(chunk).ok()?;
            u16::from_str_radix(text, 16).ok()
        })
        .collect::<Option<Vec<u16>>>()?;
    String::from_utf16(&units).ok()
}
