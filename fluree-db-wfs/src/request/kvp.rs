//! Key-value-pair URL assembly.

use crate::error::{Result, WfsError};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Unreserved characters (RFC 3986) stay literal; everything else is escaped.
const KVP_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode one parameter value.
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, KVP_VALUE).to_string()
}

/// Encode a multi-valued parameter: items escaped, comma delimiter literal.
pub fn encode_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| encode_value(item.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Append already-encoded `params` to `endpoint`, keeping any query string
/// it already has.
///
/// Keys already present on the endpoint are not repeated; a parameter may
/// never appear twice in the final URL.
pub fn append_query(endpoint: &str, params: &[(&str, String)]) -> Result<String> {
    let mut seen: Vec<String> = Vec::with_capacity(params.len());
    if let Some((_, existing)) = endpoint.split_once('?') {
        for pair in existing.split('&').filter(|p| !p.is_empty()) {
            let key = pair.split('=').next().unwrap_or_default();
            seen.push(key.to_ascii_uppercase());
        }
    }

    let mut url = endpoint.to_string();
    if !url.contains('?') {
        url.push('?');
    } else if !url.ends_with('?') && !url.ends_with('&') {
        url.push('&');
    }

    let mut first = true;
    for (key, value) in params {
        let upper = key.to_ascii_uppercase();
        if seen.contains(&upper) {
            // The endpoint's own value wins for fixed parameters it pins
            if endpoint_pins(&upper) {
                continue;
            }
            return Err(WfsError::config(format!(
                "Parameter {} appears twice in request to {}",
                key, endpoint
            )));
        }
        seen.push(upper);
        if !first {
            url.push('&');
        }
        first = false;
        url.push_str(key);
        url.push('=');
        url.push_str(value);
    }

    if first && (url.ends_with('&') || url.ends_with('?')) {
        url.pop();
    }
    Ok(url)
}

/// Parameters a capabilities-advertised endpoint may legitimately pre-fill.
fn endpoint_pins(key: &str) -> bool {
    matches!(key, "SERVICE" | "VERSION" | "MAP")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_bare_endpoint() {
        let url = append_query(
            "http://h/wfs",
            &[("SERVICE", "WFS".into()), ("TYPENAME", encode_value("topp:roads"))],
        )
        .unwrap();
        assert_eq!(url, "http://h/wfs?SERVICE=WFS&TYPENAME=topp%3Aroads");
    }

    #[test]
    fn test_no_duplicate_separator() {
        let url = append_query("http://h/wfs?", &[("A", "1".into())]).unwrap();
        assert_eq!(url, "http://h/wfs?A=1");
        let url = append_query("http://h/wfs?map=x.map&", &[("A", "1".into())]).unwrap();
        assert_eq!(url, "http://h/wfs?map=x.map&A=1");
        let url = append_query("http://h/wfs?map=x.map", &[("A", "1".into())]).unwrap();
        assert_eq!(url, "http://h/wfs?map=x.map&A=1");
    }

    #[test]
    fn test_pinned_parameter_is_kept_once() {
        let url = append_query(
            "http://h/wfs?service=WFS",
            &[("SERVICE", "WFS".into()), ("REQUEST", "GetFeature".into())],
        )
        .unwrap();
        assert_eq!(url, "http://h/wfs?service=WFS&REQUEST=GetFeature");
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let result = append_query(
            "http://h/wfs",
            &[("FILTER", "a".into()), ("FILTER", "b".into())],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_value_reserved_characters() {
        assert_eq!(encode_list(&["name A", "lanes D"]), "name%20A,lanes%20D");
        assert_eq!(encode_value("a,b"), "a%2Cb");
        assert_eq!(encode_value("<ogc:Filter/>"), "%3Cogc%3AFilter%2F%3E");
    }
}
