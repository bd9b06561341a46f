use std::path::Path;

use regex::Regex;

use crate::error::BuildError;

/// Compiled trigger patterns. An empty set matches every change.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    patterns: Vec<Regex>,
}

impl TriggerSet {
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BuildError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| BuildError::InvalidTrigger {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.patterns.iter().any(|p| p.is_match(&path))
    }

    pub fn matches_any<P: AsRef<Path>>(&self, paths: &[P]) -> bool {
        paths.iter().any(|p| self.matches(p.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn matches_any_pattern() {
        let set = TriggerSet::compile(&[r"\.html$", r"^/srv/data/blog/"]).unwrap();
        assert!(set.matches(Path::new("/srv/data/index.html")));
        assert!(set.matches(Path::new("/srv/data/blog/post.json")));
        assert!(!set.matches(Path::new("/srv/data/cache.json")));
        assert!(!set.matches_any::<PathBuf>(&[]));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = TriggerSet::compile(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, BuildError::InvalidTrigger { ref pattern, .. } if pattern == "(unclosed"));
    }
}
