/// keyFieldSeparator separates the series key from the field name in the composite key
/// that identifies a specific field in series
pub const KEY_FIELD_SEPARATOR: &str = "#!~#";

pub fn series_field_key(series: &[u8], field: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(series.len() + KEY_FIELD_SEPARATOR.len() + field.len());
    key.extend_from_slice(series);
    key.extend_from_slice(KEY_FIELD_SEPARATOR.as_bytes());
    key.extend_from_slice(field);
    key
}

/// split_series_field_key splits a composite key into its series key and field name.
/// A key without the separator is returned whole as the series with an empty field.
pub fn split_series_field_key(key: &[u8]) -> (&[u8], &[u8]) {
    let sep = KEY_FIELD_SEPARATOR.as_bytes();
    match key.windows(sep.len()).position(|w| w == sep) {
        Some(i) => (&key[..i], &key[i + sep.len()..]),
        None => (key, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_field_key() {
        let key = series_field_key(b"cpu,host=a", b"usage");
        assert_eq!(key, b"cpu,host=a#!~#usage".to_vec());

        let (series, field) = split_series_field_key(&key);
        assert_eq!(series, b"cpu,host=a");
        assert_eq!(field, b"usage");

        let (series, field) = split_series_field_key(b"cpu");
        assert_eq!(series, b"cpu");
        assert!(field.is_empty());
    }
}
