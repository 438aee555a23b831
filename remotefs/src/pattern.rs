//! Include/exclude glob sets anchored to a base prefix.
//!
//! Patterns starting with `!` exclude; all others include. A key is selected
//! when some include pattern matches it and no exclude pattern does. A set
//! with no include patterns selects nothing: exclusions only ever narrow a
//! selection, they never imply "everything else".

use globset::{GlobBuilder, GlobMatcher};

use remotefs_common::keys::join_key;

use crate::error::Result;

/// Ordered list of raw glob strings as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobSpec(pub Vec<String>);

impl From<&str> for GlobSpec {
    fn from(glob: &str) -> Self {
        GlobSpec(vec![glob.to_string()])
    }
}

impl From<String> for GlobSpec {
    fn from(glob: String) -> Self {
        GlobSpec(vec![glob])
    }
}

impl From<Vec<String>> for GlobSpec {
    fn from(globs: Vec<String>) -> Self {
        GlobSpec(globs)
    }
}

impl From<Vec<&str>> for GlobSpec {
    fn from(globs: Vec<&str>) -> Self {
        GlobSpec(globs.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for GlobSpec {
    fn from(globs: &[&str]) -> Self {
        GlobSpec(globs.iter().map(|g| g.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for GlobSpec {
    fn from(globs: [&str; N]) -> Self {
        GlobSpec(globs.iter().map(|g| g.to_string()).collect())
    }
}

/// Whether a compiled pattern adds to or removes from the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Include,
    Exclude,
}

/// A single glob bound to its base prefix.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub kind: PatternKind,
    matcher: GlobMatcher,
}

impl CompiledPattern {
    pub fn compile(raw: &str, base: &str) -> Result<Self> {
        let (kind, body) = match raw.strip_prefix('!') {
            Some(rest) => (PatternKind::Exclude, rest),
            None => (PatternKind::Include, raw),
        };
        let anchored = join_key(base, body);
        // `*` stays within one path segment; hidden names match like any other
        let matcher = GlobBuilder::new(&anchored)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self { kind, matcher })
    }

    /// The anchored glob this pattern was compiled from.
    pub fn glob(&self) -> &str {
        self.matcher.glob().glob()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }
}

/// Compiled include and exclude matchers for one selection.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    includes: Vec<CompiledPattern>,
    excludes: Vec<CompiledPattern>,
}

impl PatternSet {
    pub fn new(globs: impl Into<GlobSpec>, base: &str) -> Result<Self> {
        let GlobSpec(globs) = globs.into();
        let mut set = PatternSet::default();
        for raw in &globs {
            let compiled = CompiledPattern::compile(raw, base)?;
            match compiled.kind {
                PatternKind::Include => set.includes.push(compiled),
                PatternKind::Exclude => set.excludes.push(compiled),
            }
        }
        Ok(set)
    }

    /// True iff at least one include pattern matches and no exclude pattern does.
    pub fn matches(&self, key: &str) -> bool {
        self.includes.iter().any(|p| p.matches(key)) && !self.excludes.iter().any(|p| p.matches(key))
    }

    /// A set without include patterns can never select anything.
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
    }

    pub fn include_count(&self) -> usize {
        self.includes.len()
    }

    pub fn exclude_count(&self) -> usize {
        self.excludes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_with_exclusion() {
        let set = PatternSet::new(vec!["a/**", "!a/secret/**"], "").unwrap();
        assert!(set.matches("a/x.txt"));
        assert!(set.matches("a/deep/nested/x.txt"));
        assert!(!set.matches("a/secret/x.txt"));
        assert!(!set.matches("b/x.txt"));
    }

    #[test]
    fn test_only_exclusions_match_nothing() {
        let set = PatternSet::new(vec!["!a/**", "!*.tmp"], "").unwrap();
        assert!(set.is_empty());
        assert_eq!(set.exclude_count(), 2);
        for key in ["a/x", "b/y", "c.txt", "", ".hidden"] {
            assert!(!set.matches(key), "{key} should not match");
        }
    }

    #[test]
    fn test_empty_glob_list_matches_nothing() {
        let set = PatternSet::new(Vec::<String>::new(), "").unwrap();
        assert!(!set.matches("anything"));
    }

    #[test]
    fn test_single_string_glob() {
        let set = PatternSet::new("docs/*.md", "").unwrap();
        assert_eq!(set.include_count(), 1);
        assert!(set.matches("docs/a.md"));
        assert!(!set.matches("docs/sub/a.md"));
    }

    #[test]
    fn test_base_prefix_anchors_patterns() {
        let set = PatternSet::new(vec!["**/*.md", "!drafts/**"], "site").unwrap();
        assert!(set.matches("site/index.md"));
        assert!(set.matches("site/blog/post.md"));
        assert!(!set.matches("site/drafts/wip.md"));
        assert!(!set.matches("other/index.md"));

        let pattern = CompiledPattern::compile("!drafts/**", "site/").unwrap();
        assert_eq!(pattern.kind, PatternKind::Exclude);
        assert_eq!(pattern.glob(), "site/drafts/**");
    }

    #[test]
    fn test_dotfiles_match() {
        let set = PatternSet::new("**/*", "").unwrap();
        assert!(set.matches(".env"));
        assert!(set.matches("repo/.git/config"));
    }

    #[test]
    fn test_exclusion_order_irrelevant() {
        let a = PatternSet::new(vec!["!a/b", "a/*"], "").unwrap();
        let b = PatternSet::new(vec!["a/*", "!a/b"], "").unwrap();
        assert!(!a.matches("a/b"));
        assert!(!b.matches("a/b"));
        assert!(a.matches("a/c") && b.matches("a/c"));
    }

    #[test]
    fn test_alternates() {
        let set = PatternSet::new("images/*.{png,jpg}", "").unwrap();
        assert!(set.matches("images/c.png"));
        assert!(set.matches("images/d.jpg"));
        assert!(!set.matches("images/e.gif"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PatternSet::new("a/[b", "").is_err());
        assert!(PatternSet::new(vec!["ok/*", "!bad/{x"], "").is_err());
    }
}
