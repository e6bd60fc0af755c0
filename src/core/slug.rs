//! Feature slug validation and branch naming.
//!
//! A slug identifies one loop and is embedded in branch names, directory
//! names, and artifact file names, so the grammar is deliberately narrow.

use anyhow::{Result, anyhow};

/// Prefix for every loop branch (`agl/<slug>`).
pub const BRANCH_PREFIX: &str = "agl/";

/// Validate a feature slug: lowercase alphanumeric segments joined by single hyphens.
pub fn validate_slug(slug: &str) -> Result<()> {
    use std::sync::LazyLock;
    static SLUG_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap());

    if slug.is_empty() {
        return Err(anyhow!("slug must not be empty"));
    }
    if !SLUG_RE.is_match(slug) {
        return Err(anyhow!(
            "slug must be lowercase alphanumeric with single hyphens (got '{slug}')"
        ));
    }
    Ok(())
}

/// Branch name dedicated to a loop.
pub fn branch_for(slug: &str) -> String {
    format!("{BRANCH_PREFIX}{slug}")
}
