//! URL wildcard patterns
//!
//! Conversion and resource patterns use `*` as "any run of characters,
//! including none". Everything else matches literally and the whole text
//! must be consumed.

/// Whether `text` matches `pattern`
pub fn matches_wildcard(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` seen and the text index it is matched up to
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Whether any URL in a redirect chain matches `pattern`
pub fn matches_any(pattern: &str, urls: &[String]) -> bool {
    urls.iter().any(|url| matches_wildcard(pattern, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(matches_wildcard("https://foo.com/*", "https://foo.com/bar"));
        assert!(matches_wildcard("https://foo.com/*", "https://foo.com/"));
        assert!(matches_wildcard(
            "https://qux.com/*/corge",
            "https://qux.com/quux/corge"
        ));
        assert!(!matches_wildcard(
            "https://qux.com/*/corge",
            "https://qux.com/quux/grault"
        ));
        assert!(matches_wildcard("*", ""));
        assert!(!matches_wildcard("https://foo.com/", "https://foo.com/bar"));
        assert!(matches_wildcard("a*b*c", "aXXbYYbc"));
    }

    #[test]
    fn test_redirect_chain() {
        let chain = vec![
            "https://grault.com/garply".to_string(),
            "https://foo.com/bar".to_string(),
        ];
        assert!(matches_any("https://foo.com/*", &chain));
        assert!(!matches_any("https://baz.com/*", &chain));
        assert!(!matches_any("https://foo.com/*", &[]));
    }
}
