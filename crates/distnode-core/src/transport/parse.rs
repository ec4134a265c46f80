//! Status-line and header parsing for streamed responses.

/// Status code from an `HTTP/x.y NNN reason` line.
pub(crate) fn status_code(line: &str) -> Option<u32> {
    let line = line.trim();
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// First byte position of a `Content-Range: bytes a-b/n` header line.
pub(crate) fn content_range_start(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-range") {
        return None;
    }
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// Final responses are everything but 1xx and redirects.
pub(crate) fn is_final(code: u32) -> bool {
    code >= 200 && !(300..400).contains(&code)
}
