use sha2::{Digest, Sha256};

/// Calculates SHA-256 checksum of the given data slice.
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Reduce a client-supplied file name to its last path segment without control
/// characters. The result is display metadata only.
pub fn display_name(raw: Option<&str>) -> String {
    let last_segment = raw
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = last_segment.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `Content-Disposition: attachment` with an ASCII fallback `filename` and an
/// RFC 5987 `filename*` carrying the exact UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = match ascii_safe.trim() {
        "" => "download",
        name => name,
    };

    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("attachment; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ascii_name_is_percent_encoded() {
        assert_eq!(
            content_disposition("résumé.pdf"),
            "attachment; filename=\"rsum.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }

    #[test]
    fn quotes_cannot_break_out_of_the_header() {
        let value = content_disposition("a\"; evil=1.txt");
        assert!(value.starts_with("attachment; filename=\"a evil=1.txt\";"));
        assert!(value.ends_with("filename*=UTF-8''a%22%3B%20evil%3D1.txt"));
    }

    #[test]
    fn fully_non_ascii_name_gets_placeholder_fallback() {
        assert!(content_disposition("файл").starts_with("attachment; filename=\"download\";"));
    }

    #[test]
    fn display_name_strips_directories_and_controls() {
        assert_eq!(display_name(Some("../../etc/passwd")), "passwd");
        assert_eq!(display_name(Some("C:\\Users\\me\\report.docx")), "report.docx");
        assert_eq!(display_name(Some("bad\nname.txt")), "badname.txt");
        assert_eq!(display_name(Some("résumé.pdf")), "résumé.pdf");
        assert_eq!(display_name(Some("..")), "file");
        assert_eq!(display_name(None), "file");
    }

    #[test]
    fn checksum_is_lowercase_hex() {
        assert_eq!(
            calculate_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
