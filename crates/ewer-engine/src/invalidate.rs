//! Invalidation: dropping results whose inputs are no longer trusted.
//!
//! Given a name pattern, every task whose name matches is tainted, and
//! so, transitively, is every task that depends on a tainted one. The
//! tainted tasks' result entries are removed from the store; their next
//! execution recomputes them. This is the only content-aware deletion in
//! the engine (cleanup is plain set complement).

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use tracing::info;

use ewer_core::task::{Node, TaskHandle};
use ewer_core::Digest;
use ewer_storage::Store;

use crate::error::EngineError;

/// A parsed invalidation pattern.
///
/// - `/.../` is a regular expression searched against the full name;
/// - a name containing a module qualifier (`.` or `::`) matches exactly;
/// - a bare function name matches any task whose name ends with it after
///   a qualifier.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Regex(Regex),
    Exact(String),
    Bare(String),
}

impl NamePattern {
    pub fn parse(pattern: &str) -> Result<NamePattern, EngineError> {
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let inner = &pattern[1..pattern.len() - 1];
            return Ok(NamePattern::Regex(Regex::new(inner)?));
        }
        if pattern.contains('.') || pattern.contains("::") {
            return Ok(NamePattern::Exact(pattern.to_string()));
        }
        Ok(NamePattern::Bare(pattern.to_string()))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Regex(re) => re.is_match(name),
            NamePattern::Exact(exact) => name == exact,
            NamePattern::Bare(bare) => {
                name.ends_with(&format!(".{}", bare)) || name.ends_with(&format!("::{}", bare))
            }
        }
    }
}

/// Removes the results of every task matching `pattern`, and of every
/// task that transitively depends on one. Returns per-name counts of
/// entries actually removed.
pub fn invalidate(
    tasks: &[TaskHandle],
    store: &dyn Store,
    pattern: &NamePattern,
) -> Result<BTreeMap<String, usize>, EngineError> {
    let mut cache: HashMap<Digest, bool> = HashMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut tainted_total = 0usize;

    for task in tasks {
        if tainted(&Node::Task(task.clone()), pattern, &mut cache) {
            tainted_total += 1;
            if store.remove(&task.digest())? {
                *counts.entry(task.name().to_string()).or_insert(0) += 1;
            }
        }
    }

    info!(
        tainted = tainted_total,
        removed = counts.values().sum::<usize>(),
        "invalidation finished"
    );
    Ok(counts)
}

/// Memoized taint check: a task is tainted if its name matches or any
/// dependency is tainted; a tasklet is tainted iff its base is.
fn tainted(node: &Node, pattern: &NamePattern, cache: &mut HashMap<Digest, bool>) -> bool {
    match node {
        Node::Tasklet(tasklet) => tainted(tasklet.base(), pattern, cache),
        Node::Task(task) => {
            let digest = task.digest();
            if let Some(&known) = cache.get(&digest) {
                return known;
            }
            let is_tainted = pattern.matches(task.name())
                || task
                    .dependencies()
                    .iter()
                    .any(|dep| tainted(dep, pattern, cache));
            cache.insert(digest, is_tainted);
            is_tainted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_regex_pattern() {
        let pattern = NamePattern::parse("/prime.*/").unwrap();
        assert!(matches!(pattern, NamePattern::Regex(_)));
        assert!(pattern.matches("demo.prime_sieve"));
        assert!(!pattern.matches("demo.compose"));
    }

    #[test]
    fn test_parse_exact_pattern() {
        let pattern = NamePattern::parse("demo.primes").unwrap();
        assert!(pattern.matches("demo.primes"));
        assert!(!pattern.matches("other.primes"));
        assert!(!pattern.matches("demo.primes_extended"));
    }

    #[test]
    fn test_parse_bare_pattern() {
        let pattern = NamePattern::parse("primes").unwrap();
        assert!(pattern.matches("demo.primes"));
        assert!(pattern.matches("deeper::module::primes"));
        assert!(!pattern.matches("demo.primes_extended"));
    }

    #[test]
    fn test_bad_regex_is_an_error() {
        assert!(matches!(
            NamePattern::parse("/((/"),
            Err(EngineError::Pattern(_))
        ));
    }
}
