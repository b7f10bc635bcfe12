//! URL canonicalization. The normalized form is the sole identity key
//! for "is this the same event listing", so every URL that enters the
//! pipeline goes through [`normalize`] exactly once.

use url::form_urlencoded;
use url::Url;

/// Marketing/tracking parameters dropped during normalization, in
/// addition to any key starting with `utm_`.
const MARKETING_PARAMS: [&str; 4] = ["fbclid", "gclid", "mc_cid", "mc_eid"];

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.starts_with("utm_") || MARKETING_PARAMS.contains(&lower.as_str())
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Normalizes a raw URL into its canonical dedup key.
///
/// Lower-cases scheme and host, collapses repeated path separators,
/// strips a single trailing slash (root excepted), drops the fragment,
/// removes tracking query parameters and re-encodes the remainder
/// sorted by key. Never fails: input that does not parse as an
/// absolute URL is returned trimmed but otherwise untouched.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return trimmed.to_string(),
    };
    if url.cannot_be_a_base() {
        return trimmed.to_string();
    }

    // The parser already lower-cases scheme and host.
    let mut path = collapse_slashes(url.path());
    if path != "/" && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(key, _)| !is_tracking_param(key))
        .collect();
    // Stable sort: pairs sharing a key keep their original order.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        url.set_query(Some(&query));
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn idempotent_under_renormalization() {
        let inputs = [
            "https://example.com/e/1",
            "HTTPS://Example.COM//e/1/?utm_source=x#s",
            "https://x.com/e?b=2&a=1",
            "https://example.com/path with space?q=a b",
            "not a url at all",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn case_slashes_fragment_and_tracking_are_invariant() {
        assert_eq!(
            normalize("HTTPS://Example.COM//e/1/?utm_source=x#s"),
            normalize("https://example.com/e/1")
        );
    }

    #[test]
    fn strips_all_marketing_params() {
        assert_eq!(
            normalize("https://example.com/e?fbclid=1&gclid=2&mc_cid=3&mc_eid=4&UTM_CAMPAIGN=x"),
            normalize("https://example.com/e")
        );
    }

    #[test]
    fn keeps_and_sorts_remaining_query_params() {
        assert_eq!(
            normalize("https://x.com/e?b=2&a=1"),
            normalize("https://x.com/e?a=1&b=2")
        );
        assert_eq!(normalize("https://x.com/e?b=2&a=1"), "https://x.com/e?a=1&b=2");
    }

    #[test]
    fn root_path_keeps_trailing_slash() {
        assert_eq!(normalize("https://example.com/"), "https://example.com/");
        assert_eq!(normalize("https://example.com"), "https://example.com/");
    }

    #[test]
    fn malformed_input_is_returned_trimmed() {
        assert_eq!(normalize("  garbage  "), "garbage");
    }

    #[test]
    fn blank_query_values_survive() {
        let normalized = normalize("https://x.com/e?flag=&a=1");
        assert_eq!(normalized, "https://x.com/e?a=1&flag=");
    }
}
