/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(&[], "<empty>")]
    #[case::status_query(&[0x05, 0x02, 0x00], "05 02 00")]
    #[case::busy_sentinel(&[0x05, 0x09, 0x02, 0x00, 0x10, 0x54], "05 09 02 00 10 54")]
    #[case::uppercase(&[0xA1, 0xFF], "A1 FF")]
    fn format_hex_renders_spaced_uppercase_pairs(#[case] bytes: &[u8], #[case] expected: &str) {
        assert_eq!(expected, format_hex(bytes));
    }
}
