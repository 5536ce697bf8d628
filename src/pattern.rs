//! Glob matching with "anywhere in the path" semantics.
//!
//! A user-supplied glob `G` matches a path if either `G` or `**/G` does, so
//! `*.py` picks up Python files at any depth, while `src/*.py` still anchors
//! itself to a `src` component somewhere in the path. `*` never crosses a
//! path separator; `**` does.

use std::fmt;

use camino::Utf8Path;
use globset::{GlobBuilder, GlobMatcher};

use crate::result::WalkResult;

/// A compiled include/exclude pattern.
///
/// Works on both filesystem paths and in-archive paths (which always use
/// `/`); [`camino::Utf8Path`] papers over the difference.
#[derive(Clone, Debug)]
pub struct PathPattern {
    direct: GlobMatcher,
    any_depth: GlobMatcher,
    text: String,
}

impl PathPattern {
    /// Compiles a glob. Fails on malformed patterns (unclosed `[`, ...).
    pub fn new(glob: &str) -> WalkResult<PathPattern> {
        let direct = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        let any_depth = GlobBuilder::new(&format!("**/{glob}"))
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(PathPattern {
            direct,
            any_depth,
            text: glob.to_owned(),
        })
    }

    pub fn matches(&self, path: &Utf8Path) -> bool {
        let s = path.as_str();
        self.direct.is_match(s) || self.any_depth.is_match(s)
    }

    /// The glob text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{**/,}}{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(glob: &str, path: &str) -> bool {
        PathPattern::new(glob).unwrap().matches(Utf8Path::new(path))
    }

    #[test]
    fn applies_at_any_depth() {
        assert!(matches("*.py", "3.py"));
        assert!(matches("*.py", "R/3.py"));
        assert!(matches("*.py", "R/d1/d2/deep.py"));
        assert!(!matches("*.py", "R/d1/deep.pyc"));
    }

    #[test]
    fn star_does_not_cross_separators() {
        assert!(!matches("*.py", "R/dir.py/file"));
        assert!(matches("d*", "R/d1"));
        assert!(!matches("d*", "R/d1/5.j"));
    }

    #[test]
    fn anchored_subpaths() {
        assert!(matches("src/*.rs", "src/lib.rs"));
        assert!(matches("src/*.rs", "repo/src/lib.rs"));
        assert!(!matches("src/*.rs", "src/nested/lib.rs"));
    }

    #[test]
    fn prefix_globs() {
        assert!(matches("1*", "1.j"));
        assert!(matches("1*", "R/d5/12.j"));
        assert!(!matches("1*", "R/2.j"));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        assert!(PathPattern::new("[").is_err());
    }
}
