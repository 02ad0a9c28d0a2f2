//! Key relationship analysis.
//!
//! A pure helper that decides whether two opaque record keys are "related"
//! (might be affected by the same logical update) and whether an operation
//! key could fall inside a snapshot's range. Neither predicate ever fails:
//! malformed patterns or a panicking predicate degrade to `false` rather
//! than propagating an error, matching the rest of the core's error-free
//! contract for this component.
//!
//! The only state is two small memoization caches (pattern similarity,
//! semantic token extraction), bounded and clearable at any time, so the
//! public API still reads as pure to callers.

use std::cmp::Ordering;

use parking_lot::Mutex;
use serde_json::Value;

use crate::common::BoundedHashMap;

use super::types::{SnapshotDescriptor, Transaction};

const HIERARCHICAL_SEPARATORS: [char; 5] = [':', '/', '.', '_', '-'];
const COMPOSITE_SEPARATORS: [char; 6] = [':', '#', '|', '@', '_', '-'];

const TEMPORAL_KEYWORDS: &[&str] = &[
    "timestamp", "time", "date", "created", "updated", "modified", "datetime", "ts", "epoch",
    "iso", "utc", "log", "event", "history",
];

const INDEX_MARKERS: &[&str] = &["_index", "_idx", "_key", "_lookup"];

const COLLECTION_MARKERS: &[&str] = &[
    "_list",
    "_array",
    "_set",
    "_collection",
    "_items",
    "_elements",
    "_members",
    "_entries",
];

const ENTITY_RELATIONSHIPS: &[(&str, &str)] = &[
    ("user", "profile"),
    ("user", "order"),
    ("order", "product"),
    ("workspace", "document"),
    ("user", "account"),
    ("customer", "order"),
    ("team", "member"),
];

const FUNCTIONAL_DEPENDENCIES: &[(&str, &str)] = &[
    ("user_id", "user_email"),
    ("order_id", "user_id"),
    ("customer_id", "customer_name"),
    ("product_id", "product_name"),
];

const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Pure(-looking) analyzer of relationships between opaque string keys.
pub struct KeyRelationshipAnalyzer {
    pattern_cache: Mutex<BoundedHashMap<(String, String), bool>>,
    semantic_cache: Mutex<BoundedHashMap<(String, String), bool>>,
}

impl KeyRelationshipAnalyzer {
    pub fn new() -> Self {
        Self {
            pattern_cache: Mutex::new(BoundedHashMap::new(4096)),
            semantic_cache: Mutex::new(BoundedHashMap::new(4096)),
        }
    }

    /// Clears both memoization caches. Observationally transparent: callers
    /// never need to call this for correctness, only for memory pressure.
    pub fn clear_caches(&self) {
        self.pattern_cache.lock().clear();
        self.semantic_cache.lock().clear();
    }

    /// Returns true if `k1` and `k2` could refer to related data.
    pub fn are_keys_related(&self, k1: &str, k2: &str) -> bool {
        if k1 == k2 {
            return true;
        }
        self.is_hierarchical(k1, k2)
            || self.is_semantic(k1, k2)
            || self.is_pattern_related(k1, k2)
            || self.is_composite(k1, k2)
            || self.is_temporal(k1, k2)
            || self.is_index_related(k1, k2)
            || self.is_collection_related(k1, k2)
            || self.is_functional_dependency(k1, k2)
    }

    /// Answers "could an operation on `operation_key` affect the snapshot
    /// anchored at `snapshot_key`?"
    pub fn is_key_in_snapshot_range(
        &self,
        tx: &Transaction,
        operation_key: &str,
        snapshot_key: &str,
        expected_value: &Value,
    ) -> bool {
        if operation_key == snapshot_key {
            return true;
        }

        if let Some(entry) = tx.snapshot.get(snapshot_key) {
            if let Some(descriptor) = &entry.descriptor {
                if self.matches_descriptor(descriptor, operation_key, expected_value) {
                    return true;
                }
            }
        }

        if (has_wildcard(snapshot_key) && glob_match(snapshot_key, operation_key))
            || (has_wildcard(operation_key) && glob_match(operation_key, snapshot_key))
        {
            return true;
        }

        if self.is_hierarchical(operation_key, snapshot_key) {
            return true;
        }
        if expected_value.is_array() && self.is_collection_related(operation_key, snapshot_key) {
            return true;
        }

        if self.is_index_related(operation_key, snapshot_key) {
            return true;
        }

        if self.is_semantic(operation_key, snapshot_key) {
            return true;
        }

        if self.is_temporal(operation_key, snapshot_key) {
            return true;
        }

        self.is_composite(operation_key, snapshot_key)
    }

    fn matches_descriptor(
        &self,
        descriptor: &SnapshotDescriptor,
        operation_key: &str,
        expected_value: &Value,
    ) -> bool {
        match descriptor {
            SnapshotDescriptor::Range { min, max } => {
                value_in_range(expected_value, min.as_ref(), max.as_ref())
            }
            SnapshotDescriptor::Prefix(prefix) => operation_key.starts_with(prefix.as_str()),
            SnapshotDescriptor::Pattern(pattern) => glob_match(pattern, operation_key),
            SnapshotDescriptor::In(values) => values.contains(expected_value),
            SnapshotDescriptor::IndexRange { values, .. } => values.contains(expected_value),
            SnapshotDescriptor::Predicate(predicate) => {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| predicate(operation_key)))
                    .unwrap_or(false)
            }
        }
    }

    fn is_hierarchical(&self, k1: &str, k2: &str) -> bool {
        let p1 = split_multi(k1, &HIERARCHICAL_SEPARATORS);
        let p2 = split_multi(k2, &HIERARCHICAL_SEPARATORS);

        if is_token_prefix(&p1, &p2) || is_token_prefix(&p2, &p1) {
            return true;
        }
        if p1.len() == p2.len() && !p1.is_empty() {
            let n = p1.len();
            if p1[..n - 1] == p2[..n - 1] && p1[n - 1] != p2[n - 1] {
                return true;
            }
        }
        k1.starts_with(k2) || k2.starts_with(k1)
    }

    fn is_semantic(&self, k1: &str, k2: &str) -> bool {
        let cache_key = ordered_pair(k1, k2);
        if let Some(cached) = self.semantic_cache.lock().get(&cache_key) {
            return *cached;
        }

        let tokens1 = extract_identifiers(k1);
        let tokens2 = extract_identifiers(k2);

        let mut related = false;
        'outer: for t1 in &tokens1 {
            for t2 in &tokens2 {
                if t1 != t2 && singularize(t1) == singularize(t2) {
                    related = true;
                    break 'outer;
                }
                for (a, b) in ENTITY_RELATIONSHIPS {
                    if (t1 == a && t2 == b) || (t1 == b && t2 == a) {
                        related = true;
                        break 'outer;
                    }
                }
            }
        }

        self.semantic_cache.lock().insert(cache_key, related);
        related
    }

    fn is_pattern_related(&self, k1: &str, k2: &str) -> bool {
        if (has_wildcard(k1) && glob_match(k1, k2)) || (has_wildcard(k2) && glob_match(k2, k1)) {
            return true;
        }

        let cache_key = ordered_pair(k1, k2);
        if let Some(cached) = self.pattern_cache.lock().get(&cache_key) {
            return *cached;
        }

        let n1 = normalize_pattern(k1);
        let n2 = normalize_pattern(k2);
        let related = similarity(&n1, &n2) > SIMILARITY_THRESHOLD;

        self.pattern_cache.lock().insert(cache_key, related);
        related
    }

    fn is_composite(&self, k1: &str, k2: &str) -> bool {
        let p1 = split_multi(k1, &COMPOSITE_SEPARATORS);
        let p2 = split_multi(k2, &COMPOSITE_SEPARATORS);
        common_prefix_len(&p1, &p2) >= 1
    }

    fn is_temporal(&self, k1: &str, k2: &str) -> bool {
        contains_temporal_keyword(k1)
            && contains_temporal_keyword(k2)
            && has_temporal_pattern(k1)
            && has_temporal_pattern(k2)
    }

    fn is_index_related(&self, k1: &str, k2: &str) -> bool {
        if !has_index_marker(k1) && !has_index_marker(k2) {
            return false;
        }
        let b1 = strip_markers(k1, INDEX_MARKERS);
        let b2 = strip_markers(k2, INDEX_MARKERS);
        b1 == b2 || b1.starts_with(&b2) || b2.starts_with(&b1)
    }

    fn is_collection_related(&self, k1: &str, k2: &str) -> bool {
        if !has_collection_marker(k1) && !has_collection_marker(k2) {
            return false;
        }
        let b1 = strip_markers(k1, COLLECTION_MARKERS);
        let b2 = strip_markers(k2, COLLECTION_MARKERS);
        b1 == b2 || b1.starts_with(&b2) || b2.starts_with(&b1)
    }

    fn is_functional_dependency(&self, k1: &str, k2: &str) -> bool {
        let n1 = normalize_fd(k1);
        let n2 = normalize_fd(k2);
        FUNCTIONAL_DEPENDENCIES.iter().any(|(a, b)| {
            (n1.contains(a) && n2.contains(b)) || (n1.contains(b) && n2.contains(a))
        })
    }
}

impl Default for KeyRelationshipAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn ordered_pair(k1: &str, k2: &str) -> (String, String) {
    if k1 <= k2 {
        (k1.to_string(), k2.to_string())
    } else {
        (k2.to_string(), k1.to_string())
    }
}

fn split_multi(s: &str, separators: &[char]) -> Vec<String> {
    s.split(|c| separators.contains(&c))
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

fn is_token_prefix(a: &[String], b: &[String]) -> bool {
    !a.is_empty() && a.len() <= b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn common_prefix_len(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn extract_identifiers(s: &str) -> Vec<String> {
    split_multi(s, &HIERARCHICAL_SEPARATORS)
        .into_iter()
        .flat_map(|tok| split_camel_case(&tok))
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn split_camel_case(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        if c.is_uppercase() && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn singularize(s: &str) -> String {
    if s.ends_with("ies") && s.len() > 3 {
        format!("{}y", &s[..s.len() - 3])
    } else if s.ends_with("ses") || s.ends_with("xes") || s.ends_with("ches") || s.ends_with("shes")
    {
        s[..s.len() - 2].to_string()
    } else if s.ends_with('s') && !s.ends_with("ss") && s.len() > 1 {
        s[..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains('*')
        || s.contains('?')
        || s.contains('[')
        || s.contains('{')
        || s.ends_with("_range")
        || s.ends_with("_pattern")
}

fn contains_temporal_keyword(s: &str) -> bool {
    let lower = s.to_lowercase();
    TEMPORAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn has_temporal_pattern(s: &str) -> bool {
    contains_date_pattern(s) || contains_time_pattern(s) || contains_digit_run(s, 13) || contains_digit_run(s, 10)
}

fn contains_date_pattern(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < 10 {
        return false;
    }
    for window in chars.windows(10) {
        if window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2].is_ascii_digit()
            && window[3].is_ascii_digit()
            && window[4] == '-'
            && window[5].is_ascii_digit()
            && window[6].is_ascii_digit()
            && window[7] == '-'
            && window[8].is_ascii_digit()
            && window[9].is_ascii_digit()
        {
            return true;
        }
    }
    false
}

fn contains_time_pattern(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < 8 {
        return false;
    }
    for window in chars.windows(8) {
        if window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2] == ':'
            && window[3].is_ascii_digit()
            && window[4].is_ascii_digit()
            && window[5] == ':'
            && window[6].is_ascii_digit()
            && window[7].is_ascii_digit()
        {
            return true;
        }
    }
    false
}

fn contains_digit_run(s: &str, len: usize) -> bool {
    let mut run = 0usize;
    for c in s.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run == len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn has_index_marker(s: &str) -> bool {
    let lower = s.to_lowercase();
    INDEX_MARKERS.iter().any(|m| lower.contains(m)) || lower.starts_with("idx_")
}

fn has_collection_marker(s: &str) -> bool {
    let lower = s.to_lowercase();
    COLLECTION_MARKERS.iter().any(|m| lower.contains(m))
}

fn strip_markers(s: &str, markers: &[&str]) -> String {
    let lower = s.to_lowercase();
    for marker in markers {
        if let Some(pos) = lower.find(marker) {
            return format!("{}{}", &s[..pos], &s[pos + marker.len()..]);
        }
    }
    if lower.starts_with("idx_") {
        return s[4..].to_string();
    }
    s.to_string()
}

fn normalize_fd(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        match c {
            '-' | ':' | '/' | '.' => out.push('_'),
            c if c.is_uppercase() => {
                if !out.is_empty() {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
    }
    out
}

fn normalize_pattern(s: &str) -> String {
    let s = replace_hex_runs(s);
    let s = replace_digit_runs(&s);
    replace_short_prefix(&s)
}

fn replace_hex_runs(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_hexdigit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_hexdigit() {
                i += 1;
            }
            if i - start >= 8 {
                out.push('&');
            } else {
                out.extend(&chars[start..i]);
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn replace_digit_runs(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            out.push('#');
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn replace_short_prefix(s: &str) -> String {
    if let Some(pos) = s.find([':', '_', '-']) {
        if pos > 0 && pos <= 3 {
            return format!("@{}", &s[pos..]);
        }
    }
    s.to_string()
}

/// Full dynamic-programming Levenshtein edit distance.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (edit_distance(a, b) as f64 / max_len as f64)
}

fn value_in_range(value: &Value, min: Option<&Value>, max: Option<&Value>) -> bool {
    let ok_min = match min {
        None => true,
        Some(m) => compare_values(value, m).map(|o| o != Ordering::Less).unwrap_or(false),
    };
    let ok_max = match max {
        None => true,
        Some(m) => compare_values(value, m).map(|o| o != Ordering::Greater).unwrap_or(false),
    };
    ok_min && ok_max
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().and_then(|x| y.as_f64().and_then(|y| x.partial_cmp(&y))),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Expands at most one level of `{a,b,c}` brace alternatives, then matches
/// with `*`/`?`/`[...]` glob semantics.
fn glob_match(pattern: &str, text: &str) -> bool {
    match expand_braces(pattern) {
        Some(alternatives) => alternatives.iter().any(|p| glob_match_simple(p, text)),
        None => glob_match_simple(pattern, text),
    }
}

fn expand_braces(pattern: &str) -> Option<Vec<String>> {
    let start = pattern.find('{')?;
    let end = pattern[start..].find('}')? + start;
    let prefix = &pattern[..start];
    let suffix = &pattern[end + 1..];
    Some(
        pattern[start + 1..end]
            .split(',')
            .map(|alt| format!("{prefix}{alt}{suffix}"))
            .collect(),
    )
}

fn glob_match_simple(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_helper(&p, 0, &t, 0)
}

fn glob_match_helper(p: &[char], pi: usize, t: &[char], ti: usize) -> bool {
    if pi == p.len() {
        return ti == t.len();
    }
    match p[pi] {
        '*' => (ti..=t.len()).any(|k| glob_match_helper(p, pi + 1, t, k)),
        '?' => ti < t.len() && glob_match_helper(p, pi + 1, t, ti + 1),
        '[' => {
            if let Some(rel_close) = p[pi..].iter().position(|&c| c == ']') {
                let close = pi + rel_close;
                if ti >= t.len() {
                    return false;
                }
                let class = &p[pi + 1..close];
                let (negate, class) = if class.first() == Some(&'^') {
                    (true, &class[1..])
                } else {
                    (false, class)
                };
                let matched = class.contains(&t[ti]);
                if matched != negate {
                    glob_match_helper(p, close + 1, t, ti + 1)
                } else {
                    false
                }
            } else {
                ti < t.len() && t[ti] == '[' && glob_match_helper(p, pi + 1, t, ti + 1)
            }
        }
        c => ti < t.len() && t[ti] == c && glob_match_helper(p, pi + 1, t, ti + 1),
    }
}
