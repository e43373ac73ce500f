//! URL normalization (§4.5 step 1, §8 property 2): resolve relative
//! against a base, iteratively percent-decode until a fixed point (or 5
//! iterations), strip the fragment, and append a trailing `/` when the
//! last path segment has no dot.

use url::Url;

const MAX_DECODE_ITERATIONS: u32 = 5;

/// Resolve `href` against `base` and normalize the result.
pub fn resolve_and_normalize(base: &str, href: &str) -> Option<String> {
    let base_url = Url::parse(base).ok()?;
    let joined = base_url.join(href).ok()?;
    Some(normalize(joined.as_str()))
}

/// Normalize an absolute URL string (§4.5 step 1, §8 property 2). Safe to
/// call repeatedly: `normalize(normalize(u)) == normalize(u)`.
pub fn normalize(url: &str) -> String {
    let decoded = percent_decode_fixed_point(url);

    let Ok(mut parsed) = Url::parse(&decoded) else {
        return decoded;
    };
    parsed.set_fragment(None);

    let needs_trailing_slash = {
        let path = parsed.path();
        !path.is_empty()
            && !path.ends_with('/')
            && path
                .rsplit('/')
                .next()
                .map(|segment| !segment.contains('.'))
                .unwrap_or(true)
    };

    if needs_trailing_slash {
        let mut path = parsed.path().to_string();
        path.push('/');
        parsed.set_path(&path);
    }

    parsed.to_string()
}

/// Repeatedly percent-decode `input` until it stops changing or
/// `MAX_DECODE_ITERATIONS` is reached (collapses double-encoded URLs like
/// `%2520` without looping forever on pathological input).
fn percent_decode_fixed_point(input: &str) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_DECODE_ITERATIONS {
        let decoded = percent_decode_once(&current);
        if decoded == current {
            break;
        }
        current = decoded;
    }
    current
}

fn percent_decode_once(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment() {
        assert_eq!(normalize("https://a.test/page#section"), "https://a.test/page/");
    }

    #[test]
    fn appends_trailing_slash_when_last_segment_has_no_dot() {
        assert_eq!(normalize("https://a.test/about"), "https://a.test/about/");
    }

    #[test]
    fn leaves_file_extensions_alone() {
        assert_eq!(normalize("https://a.test/doc.pdf"), "https://a.test/doc.pdf");
    }

    #[test]
    fn collapses_double_percent_encoding() {
        let doubled = "https://a.test/caf%2525e9";
        let once = "https://a.test/caf%25e9";
        assert_eq!(normalize(doubled), normalize(once));
    }

    #[test]
    fn idempotent_on_already_normalized_url() {
        let n = normalize("https://a.test/path/to/page");
        assert_eq!(normalize(&n), n);
    }

    #[test]
    fn idempotent_across_varied_inputs() {
        for u in [
            "https://a.test/",
            "https://a.test/a/b/c#frag",
            "https://a.test/file.html",
            "https://a.test/a%20b",
        ] {
            let once = normalize(u);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {u}");
        }
    }

    #[test]
    fn resolves_relative_against_base() {
        let resolved = resolve_and_normalize("https://a.test/dir/page", "../other").unwrap();
        assert_eq!(resolved, "https://a.test/other/");
    }
}
