// Raw payload BLOB layout: [version: u8][payload].
// Version 1 = UTF-8 JSON exactly as the device helper printed it.
// Rows written by older tools carry bare JSON text (first byte `{`), read as legacy.

pub(super) const BLOB_VERSION_JSON: u8 = 1;

pub(super) fn with_version_prefix(version: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(payload);
    out
}

/// Payload after version byte. If first byte matches `expected_version`, return rest; else legacy (whole blob).
pub(super) fn blob_payload(bytes: &[u8], expected_version: u8) -> &[u8] {
    if bytes.first() == Some(&expected_version) {
        &bytes[1..]
    } else {
        bytes
    }
}
