//! File probe helpers.
//!
//! These work on stat modes, read results and readers, the I/O itself is done by the caller. A
//! probe that cannot read something simply reports "not present".

use std::io::{ErrorKind, Read};

/// Size of the chunks read by [`reader_contains_marker`].
pub const SCAN_CHUNK_SIZE: usize = 4096;

/// Returns true if `mode` describes a non-directory with any execute bit set.
pub fn mode_is_executable(mode: u32, is_dir: bool) -> bool {
    !is_dir && mode & 0o111 != 0
}

/// Strip surrounding whitespace from a read result, any error yields an empty string.
pub fn trim_or_empty(data: std::io::Result<String>) -> String {
    match data {
        Ok(data) => data.trim().to_string(),
        Err(_) => String::new(),
    }
}

/// Case insensitive search for any of `tokens` in `text`.
pub fn text_contains_any(text: &str, tokens: &[&str]) -> bool {
    let text = text.to_lowercase();
    tokens
        .iter()
        .filter(|token| !token.is_empty())
        .any(|token| text.contains(&token.to_lowercase()))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Scan a reader for any of the given markers, ignoring ASCII case.
///
/// The data is read in [`SCAN_CHUNK_SIZE`] chunks. The tail of the previous chunk (longest marker
/// minus one byte) is kept in front of the next one, so a marker crossing a chunk boundary is
/// still found. With `limit > 0` no more than `limit` bytes are read.
pub fn reader_contains_marker<R: Read + ?Sized>(
    reader: &mut R,
    markers: &[&str],
    limit: u64,
) -> Result<bool, std::io::Error> {
    let markers: Vec<Vec<u8>> = markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .map(|marker| marker.to_ascii_lowercase().into_bytes())
        .collect();

    let keep = match markers.iter().map(Vec::len).max() {
        Some(longest) => longest - 1,
        None => return Ok(false),
    };

    let mut chunk = vec![0u8; SCAN_CHUNK_SIZE];
    let mut window: Vec<u8> = Vec::with_capacity(keep + SCAN_CHUNK_SIZE);
    let mut total: u64 = 0;

    loop {
        let mut want = SCAN_CHUNK_SIZE;
        if limit > 0 {
            let left = limit - total;
            if left == 0 {
                break;
            }
            want = want.min(left.min(SCAN_CHUNK_SIZE as u64) as usize);
        }

        let count = match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(count) => count,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        total += count as u64;

        window.extend(chunk[..count].iter().map(u8::to_ascii_lowercase));
        if markers.iter().any(|marker| contains_bytes(&window, marker)) {
            return Ok(true);
        }

        if window.len() > keep {
            window.drain(..window.len() - keep);
        }
    }

    Ok(false)
}
