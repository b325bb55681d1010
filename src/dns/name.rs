//! Domain name wire encoding/decoding and the two derived properties a
//! query needs at creation time: the lower-case trailing-dot-normalized
//! FQDN, and its eTLD+1 "domain root" under a public-suffix table.
//!
//! Compression-pointer resolution only has byte-level meaning, so a plain
//! cursor over the original buffer is used here rather than threading a
//! bit-level reader through it; it's the pattern `resolved`, `hickory-dns`
//! and most hand-rolled DNS codecs in the wild use.

use super::packet::ParseError;

const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_HOPS: usize = 32;

/// Lower-cases and trailing-dot-normalizes a name for use as a query's
/// canonical FQDN.
pub fn normalize_fqdn(name: &str) -> String {
    let trimmed = name.trim_end_matches('.');
    let mut out = trimmed.to_ascii_lowercase();
    out.push('.');
    out
}

/// A small built-in suffix table covering the common multi-label public
/// suffixes; anything not listed is treated as a single-label TLD, which is
/// the common case and correct for the vast majority of real queries.
/// Swapping this for a full ICANN public-suffix-list client is a config
/// concern left to an external settings-store collaborator, not modeled
/// here.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.jp", "co.nz",
    "com.br", "com.cn",
];

/// Returns `(domain_root, icann_managed)` for a normalized FQDN.
pub fn public_suffix_root(fqdn: &str) -> (String, bool) {
    let labels: Vec<&str> = fqdn.trim_end_matches('.').split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return (fqdn.to_string(), false);
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let is_multi_label_suffix = MULTI_LABEL_SUFFIXES.contains(&last_two.as_str());

    let root_label_count = if is_multi_label_suffix { 3 } else { 2 };
    let root_labels: Vec<&str> = if labels.len() >= root_label_count {
        labels[labels.len() - root_label_count..].to_vec()
    } else {
        labels.clone()
    };

    (format!("{}.", root_labels.join(".")), true)
}

/// Encode a normalized FQDN (or `.` for the root) into wire label format.
pub fn encode_name(name: &str, out: &mut Vec<u8>) {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        out.push(0);
        return;
    }
    for label in trimmed.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

/// Decode a domain name starting at `offset` in `buf`, following
/// compression pointers as needed. Returns `(name, next_offset)` where
/// `next_offset` is the position immediately after the encoded name *at the
/// call site* (i.e. it does not follow pointers for the purpose of the
/// caller's cursor, matching RFC 1035 §4.1.4).
pub fn decode_name(buf: &[u8], offset: usize) -> Result<(String, usize), ParseError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = offset;
    let mut end_of_name: Option<usize> = None;
    let mut hops = 0usize;

    loop {
        let len_byte = *buf.get(cursor).ok_or(ParseError::Truncated)?;

        if len_byte == 0 {
            cursor += 1;
            if end_of_name.is_none() {
                end_of_name = Some(cursor);
            }
            break;
        }

        if len_byte & 0xC0 == 0xC0 {
            let second = *buf.get(cursor + 1).ok_or(ParseError::Truncated)?;
            let pointer = (((len_byte & 0x3F) as usize) << 8) | second as usize;
            if end_of_name.is_none() {
                end_of_name = Some(cursor + 2);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS || pointer >= cursor {
                return Err(ParseError::CompressionLoop);
            }
            cursor = pointer;
            continue;
        }

        if len_byte as usize > MAX_LABEL_LEN {
            return Err(ParseError::LabelTooLong);
        }

        let label_start = cursor + 1;
        let label_end = label_start + len_byte as usize;
        let label_bytes = buf.get(label_start..label_end).ok_or(ParseError::Truncated)?;
        let label = String::from_utf8(label_bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        cursor = label_end;
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        format!("{}.", labels.join("."))
    };

    Ok((name, end_of_name.unwrap_or(cursor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_simple_name() {
        let mut buf = Vec::new();
        encode_name("example.com.", &mut buf);
        let (name, next) = decode_name(&buf, 0).unwrap();
        assert_eq!(name, "example.com.");
        assert_eq!(next, buf.len());
    }

    #[test]
    fn root_name_round_trips() {
        let mut buf = Vec::new();
        encode_name(".", &mut buf);
        assert_eq!(buf, vec![0]);
        let (name, next) = decode_name(&buf, 0).unwrap();
        assert_eq!(name, ".");
        assert_eq!(next, 1);
    }

    #[test]
    fn follows_compression_pointer() {
        let mut buf = Vec::new();
        encode_name("example.com.", &mut buf); // offset 0
        let pointer_target = buf.len();
        buf.push(0xC0);
        buf.push(0x00); // pointer back to offset 0
        let (name, next) = decode_name(&buf, pointer_target).unwrap();
        assert_eq!(name, "example.com.");
        assert_eq!(next, pointer_target + 2);
    }

    #[test]
    fn rejects_self_referential_pointer_loop() {
        let buf = vec![0xC0, 0x00]; // points at itself
        assert!(matches!(
            decode_name(&buf, 0),
            Err(ParseError::CompressionLoop)
        ));
    }

    #[test]
    fn domain_root_simple() {
        let (root, icann) = public_suffix_root("www.example.com.");
        assert_eq!(root, "example.com.");
        assert!(icann);
    }

    #[test]
    fn domain_root_multi_label_suffix() {
        let (root, icann) = public_suffix_root("mail.google.co.uk.");
        assert_eq!(root, "google.co.uk.");
        assert!(icann);
    }

    #[test]
    fn normalize_lowercases_and_adds_trailing_dot() {
        assert_eq!(normalize_fqdn("Example.COM"), "example.com.");
        assert_eq!(normalize_fqdn("example.com."), "example.com.");
    }
}
