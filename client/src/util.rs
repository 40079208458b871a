use percent_encoding::{utf8_percent_encode, AsciiSet, PercentEncode, NON_ALPHANUMERIC};
use std::collections::BTreeMap;

// based on https://docs.python.org/3/library/urllib.parse.html#urllib.parse.quote
const NOT_ENCODED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

pub(crate) fn urlencode(input: &str) -> PercentEncode<'_> {
    utf8_percent_encode(input, NOT_ENCODED)
}

/// Join path segments into a request path, encoding each segment.  The result never
/// begins with `/`, as required by [`Client::request`](crate::client::Client::request).
pub(crate) fn api_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| urlencode(s).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// True for `.` and `..`, which URL resolution would collapse rather than send.
pub(crate) fn is_dot_segment(segment: &str) -> bool {
    segment == "." || segment == ".."
}

/// Encode a metadata filter as repeated `meta=key:value` query pairs.
pub(crate) fn meta_query(meta: &BTreeMap<String, String>) -> Vec<(String, String)> {
    meta.iter()
        .map(|(k, v)| ("meta".to_owned(), format!("{}:{}", k, v)))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! urlencode_tests {
        ($($name:ident: $input:expr, $output:expr,)*) => {
        $(
            #[test]
            fn $name() {
                assert_eq!(&urlencode($input).to_string(), $output);
            }
        )*
        }
    }

    urlencode_tests! {
        unencoded: "abc-ABC_123.tilde~..", "abc-ABC_123.tilde~..",
        slashes: "abc/def", "abc%2Fdef",
        spaces: "abc def", "abc%20def",
        scoped_module: "@org/pkg", "%40org%2Fpkg",
    }

    #[test]
    fn api_path_encodes_segments() {
        assert_eq!(
            api_path(&["api", "webtask", "wt-1", "my task"]),
            "api/webtask/wt-1/my%20task"
        );
    }

    #[test]
    fn dot_segments() {
        assert!(is_dot_segment("."));
        assert!(is_dot_segment(".."));
        assert!(!is_dot_segment("..."));
        assert!(!is_dot_segment(".hidden"));
    }

    #[test]
    fn meta_query_one_pair_per_key() {
        let mut meta = BTreeMap::new();
        meta.insert("a".to_owned(), "b".to_owned());
        meta.insert("c".to_owned(), "d:e".to_owned());
        assert_eq!(
            meta_query(&meta),
            vec![
                ("meta".to_owned(), "a:b".to_owned()),
                ("meta".to_owned(), "c:d:e".to_owned())
            ]
        );
    }
}
