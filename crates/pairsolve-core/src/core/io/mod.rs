pub mod distance_file;
pub mod rawxyz;

/// Reads the free-format header of a text file: every leading line whose
/// first whitespace-separated token does not parse as a number belongs to
/// the header.  Returns the header and the remaining lines with their
/// 1-based line numbers.
pub(crate) fn split_header(text: &str) -> (String, Vec<(usize, &str)>) {
    let mut header = String::new();
    let mut data = Vec::new();
    let mut in_header = true;
    for (idx, line) in text.lines().enumerate() {
        let first = line.split_whitespace().next();
        if in_header {
            match first {
                Some(token) if token.parse::<f64>().is_ok() => in_header = false,
                _ => {
                    header.push_str(line);
                    header.push('\n');
                    continue;
                }
            }
        }
        if first.is_some() {
            data.push((idx + 1, line));
        }
    }
    (header, data)
}

/// Looks up `token` in a header and parses the value following it,
/// skipping `:`, `=` and spaces.
pub(crate) fn header_token<T: std::str::FromStr>(header: &str, token: &str) -> Option<T> {
    let at = header.find(token)?;
    let rest = header[at + token.len()..].trim_start_matches([':', '=', ' ', '\t']);
    let value = rest.split_whitespace().next()?;
    value.parse().ok()
}
