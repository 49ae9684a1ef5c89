use std::io::Write;

use tempfile::NamedTempFile;

/// Assembles a container by hand: length prefix, header text as given, payload.
pub fn build_raw(header: &str, payload: &[u8]) -> Vec<u8> {
    build_raw_with_len(header.len() as u64, header, payload)
}

/// Like [`build_raw`] but with an arbitrary declared header length.
pub fn build_raw_with_len(declared: u64, header: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = declared.to_le_bytes().to_vec();
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn write_temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
