//! Filesystem- and URL-safe keys derived from display names.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("-{2,}").expect("valid regex"));

/// Lowercase alphanumerics joined by single dashes. Never empty.
pub fn slugify(name: &str) -> String {
    let mapped: String = name
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let collapsed = DASH_RUNS.replace_all(&mapped, "-");
    let slug = collapsed.trim_matches('-');
    if slug.is_empty() {
        "_unnamed".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Claude Monet"), "claude-monet");
        assert_eq!(slugify("  Pierre-Auguste  Renoir "), "pierre-auguste-renoir");
        assert_eq!(slugify("../etc/passwd"), "etc-passwd");
        assert_eq!(slugify("Édouard Manet"), "édouard-manet");
        assert_eq!(slugify("Water Lilies (1916)"), "water-lilies-1916");
    }

    #[test]
    fn test_slugify_never_empty() {
        assert_eq!(slugify(""), "_unnamed");
        assert_eq!(slugify("???"), "_unnamed");
    }
}
