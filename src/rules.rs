//! Rule Engine / Policy Cache.
//!
//! Three ordered pattern-rule lists (`excludes`, `forces`, `samplings`) are
//! matched head-to-tail; the first match wins. Decisions are cached per
//! variable id in a coarse-mutex-guarded map; a single mutex is an
//! acceptable bottleneck at this daemon's load.

use crate::config::Config;
use globset::{Glob, GlobMatcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The character separating the "table" and "key" halves of a variable id:
/// id = "table" + separator + "key".
pub const ID_SEPARATOR: char = ':';

/// Upper bound on the policy cache: a logged limit rather than an eviction
/// policy, since none is specified.
pub const CACHE_SIZE: usize = 200_000;

/// A single `{glob pattern, integer}` rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub pattern: String,
    pub ival: i64,
}

impl PatternRule {
    pub fn new(pattern: impl Into<String>, ival: i64) -> Self {
        PatternRule {
            pattern: pattern.into(),
            ival,
        }
    }

    fn matcher(&self) -> Option<GlobMatcher> {
        Glob::new(&self.pattern).ok().map(|g| g.compile_matcher())
    }
}

/// Per-variable logging decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingProperties {
    pub force: bool,
    pub exclude: bool,
    pub sampling: u32,
}

impl Default for LoggingProperties {
    fn default() -> Self {
        LoggingProperties {
            force: false,
            exclude: false,
            sampling: 1,
        }
    }
}

/// An immutable snapshot of the three rule lists, swapped wholesale on
/// reconfig to avoid reader-writer locking across a reload.
pub struct RuleSet {
    excludes: Vec<(PatternRule, Option<GlobMatcher>)>,
    forces: Vec<(PatternRule, Option<GlobMatcher>)>,
    samplings: Vec<(PatternRule, Option<GlobMatcher>)>,
}

impl RuleSet {
    /// Builds a rule set from a parsed config, prepending the hardcoded
    /// excludes `_*`, `*{sep}_*`, `<*`, `*{sep}<*` behind (i.e. at lower
    /// priority than) every user-supplied rule, matching the original
    /// daemon's reload sequence: hardcoded rules are seeded first and then
    /// pushed toward the tail as the file is parsed top-to-bottom with each
    /// new rule prepended.
    pub fn from_config(cfg: &Config) -> RuleSet {
        let mut excludes = cfg.excludes.clone();
        excludes.push(PatternRule::new("_*", 1));
        excludes.push(PatternRule::new(format!("*{ID_SEPARATOR}_*"), 1));
        excludes.push(PatternRule::new("<*", 1));
        excludes.push(PatternRule::new(format!("*{ID_SEPARATOR}<*"), 1));

        RuleSet {
            excludes: compile(excludes),
            forces: compile(cfg.forces.clone()),
            samplings: compile(cfg.samplings.clone()),
        }
    }

    fn first_match(list: &[(PatternRule, Option<GlobMatcher>)], id: &str) -> Option<i64> {
        list.iter()
            .find(|(_, m)| m.as_ref().is_some_and(|m| m.is_match(id)))
            .map(|(r, _)| r.ival)
    }
}

fn compile(rules: Vec<PatternRule>) -> Vec<(PatternRule, Option<GlobMatcher>)> {
    rules
        .into_iter()
        .map(|r| {
            let m = r.matcher();
            if m.is_none() {
                tracing::warn!(pattern = %r.pattern, "invalid glob pattern, rule will never match");
            }
            (r, m)
        })
        .collect()
}

/// The Rule Engine: holds the current [`RuleSet`] and a policy cache of
/// already-computed [`LoggingProperties`] per variable id.
pub struct RuleEngine {
    rules: parking_lot::RwLock<Arc<RuleSet>>,
    cache: Mutex<HashMap<String, LoggingProperties>>,
    /// Maximum age (seconds) a variable may go without updating and still be
    /// logged absent a force rule. `-1` disables age-based exclusion.
    max_age: i64,
}

impl RuleEngine {
    pub fn new(cfg: &Config) -> RuleEngine {
        RuleEngine {
            rules: parking_lot::RwLock::new(Arc::new(RuleSet::from_config(cfg))),
            cache: Mutex::new(HashMap::new()),
            max_age: cfg.max_age,
        }
    }

    /// Swaps in a freshly parsed rule set and invalidates the policy cache,
    /// since cached entries are only valid against the rule set that
    /// produced them.
    pub fn reload(&self, cfg: &Config) {
        *self.rules.write() = Arc::new(RuleSet::from_config(cfg));
        self.cache.lock().clear();
    }

    /// Returns the cached [`LoggingProperties`] for `id`, computing and
    /// inserting one if absent.
    pub fn get_properties(&self, id: &str) -> LoggingProperties {
        if let Some(p) = self.cache.lock().get(id) {
            return *p;
        }
        let rules = self.rules.read().clone();
        let sampling = RuleSet::first_match(&rules.samplings, id).unwrap_or(1).max(1) as u32;
        let force = RuleSet::first_match(&rules.forces, id).unwrap_or(0) != 0;
        let exclude = RuleSet::first_match(&rules.excludes, id).unwrap_or(0) != 0;
        let props = LoggingProperties {
            force,
            exclude,
            sampling,
        };

        let mut cache = self.cache.lock();
        if cache.len() >= CACHE_SIZE && !cache.contains_key(id) {
            tracing::warn!(
                size = cache.len(),
                "policy cache at configured ceiling; not caching {id:?}"
            );
        } else {
            cache.insert(id.to_string(), props);
        }
        props
    }

    /// `true` iff `id` should be logged right now, given its last update
    /// time: forced variables always log; otherwise a variable stale beyond
    /// `max_age` is dropped; otherwise the `exclude` flag decides.
    pub fn is_logging(&self, id: &str, update_time: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> bool {
        let props = self.get_properties(id);
        if props.force {
            return true;
        }
        if self.max_age >= 0 {
            let age = (now - update_time).num_seconds();
            if age > self.max_age {
                return false;
            }
        }
        !props.exclude
    }
}

/// `sample_count(variable) = ceil(field_count / max(1, sampling))`.
pub fn sample_count(field_count: usize, sampling: u32) -> usize {
    let stride = sampling.max(1) as usize;
    field_count.div_ceil(stride)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn engine_with(excludes: &[(&str, i64)], forces: &[(&str, i64)], samplings: &[(&str, i64)]) -> RuleEngine {
        let mut cfg = Config::default();
        // Mirror Config::parse's insert(0, ..) prepend order: later entries
        // in the slice were "declared later" and end up at the head.
        for (p, i) in excludes {
            cfg.excludes.insert(0, PatternRule::new(*p, *i));
        }
        for (p, i) in forces {
            cfg.forces.insert(0, PatternRule::new(*p, *i));
        }
        for (p, i) in samplings {
            cfg.samplings.insert(0, PatternRule::new(*p, *i));
        }
        RuleEngine::new(&cfg)
    }

    #[test]
    fn hardcoded_excludes_apply_by_default() {
        let engine = engine_with(&[], &[], &[]);
        assert!(engine.get_properties("_internal").exclude);
        assert!(engine.get_properties("sys:_debug").exclude);
        assert!(engine.get_properties("<sentinel").exclude);
        assert!(!engine.get_properties("weather:temp").exclude);
    }

    #[test]
    fn later_include_overrides_hardcoded_exclude() {
        // Matches how Config::parse prepends: the last-declared rule ends
        // up at the head, ahead of the hardcoded rules appended afterward.
        let engine = engine_with(&[("_public:*", 0)], &[], &[]);
        assert!(!engine.get_properties("_public:count").exclude);
        assert!(engine.get_properties("_other").exclude);
    }

    #[test]
    fn force_bypasses_max_age() {
        let mut cfg = Config::default();
        cfg.max_age = 10;
        cfg.forces.push(PatternRule::new("critical:*", 1));
        let engine = RuleEngine::new(&cfg);
        let now = Utc::now();
        let old = now - Duration::seconds(1000);
        assert!(engine.is_logging("critical:temp", old, now));
        assert!(!engine.is_logging("other:temp", old, now));
    }

    #[test]
    fn sampling_matches_first_rule() {
        let engine = engine_with(&[], &[], &[("a:*", 5), ("a:b", 2)]);
        // "a:b" is declared after "a:*" so it is prepended ahead of it.
        assert_eq!(engine.get_properties("a:b").sampling, 2);
        assert_eq!(engine.get_properties("a:c").sampling, 5);
        assert_eq!(engine.get_properties("other").sampling, 1);
    }

    #[test]
    fn sample_count_rounds_up() {
        assert_eq!(sample_count(10, 3), 4);
        assert_eq!(sample_count(10, 1), 10);
        assert_eq!(sample_count(0, 1), 0);
        assert_eq!(sample_count(10, 0), 10); // sampling clamped to >= 1
    }

    #[test]
    fn reload_invalidates_cache() {
        let mut cfg = Config::default();
        let engine = RuleEngine::new(&cfg);
        assert!(!engine.get_properties("weather:temp").exclude);
        cfg.excludes.push(PatternRule::new("weather:*", 1));
        engine.reload(&cfg);
        assert!(engine.get_properties("weather:temp").exclude);
    }
}
