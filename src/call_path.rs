//! Call path normalization
//!
//! A raw call path arrives as an ordered list of `"module=callsite"` tokens,
//! root first. Normalization turns it into a cycle-free sequence of
//! `(callsite, module key, level)` entries that the graph builder can group
//! consecutively by module key without ever folding two structurally
//! different call positions into one node.
//!
//! Two disambiguation rules apply while walking left to right:
//!
//! - A module reappearing at a group level it has not occupied before keeps
//!   its plain key. The builder's callback policy handles the resulting
//!   back transition (e.g. `A → B → A`).
//! - A callsite of a module recurring later in the same path (true
//!   recursion through other modules) would fold the recursive instance into
//!   its earlier occurrence. That occurrence is renamed to `module=callsite`
//!   so it becomes a distinct node and the grouped path stays cycle-free.
//!
//! Direct recursion (consecutive entries of one module) is absorbed by the
//! consecutive grouping and produces no self-loop.
//!
//! Everything here is a pure function over one path. No naming state is
//! shared between paths, so normalization is deterministic and could run
//! per-path in parallel.

use std::collections::HashMap;

/// Separator between a module name and a callsite name in a raw path token.
pub const MODULE_SEPARATOR: char = '=';

/// One entry of a normalized call path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    /// Callsite name, unqualified.
    pub callsite: String,
    /// Module key: the plain module name, or `module=callsite` for a
    /// renamed recursive occurrence.
    pub module: String,
    /// Module-group depth; increments whenever the module key changes.
    pub level: usize,
}

/// A normalized path, root first. Empty when the raw path was empty or
/// malformed.
pub type NormalizedPath = Vec<PathEntry>;

/// One consecutive same-module run of a normalized path.
///
/// `first_callsite` is the callsite that enters the group; `last_callsite`
/// is the one that makes the outgoing call to the next group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStep {
    /// Module key shared by every entry of the group.
    pub key: String,
    /// Base module name (key with any rename suffix stripped).
    pub module: String,
    pub first_callsite: String,
    pub last_callsite: String,
    pub level: usize,
}

/// Strip a rename suffix from a module key: `"mod=callsite"` → `"mod"`.
pub fn base_module(key: &str) -> &str {
    key.split(MODULE_SEPARATOR).next().unwrap_or(key)
}

/// Parse one `"module=callsite"` token. Returns `None` for tokens without a
/// separator or with an empty half.
pub fn parse_token(token: &str) -> Option<(&str, &str)> {
    let (module, callsite) = token.split_once(MODULE_SEPARATOR)?;
    if module.is_empty() || callsite.is_empty() {
        return None;
    }
    Some((module, callsite))
}

/// Normalize one raw call path.
///
/// Returns an empty path when the input is empty or any token is malformed;
/// callers skip such records and count them in their diagnostics.
pub fn normalize_path(tokens: &[String]) -> NormalizedPath {
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut entries: NormalizedPath = Vec::with_capacity(tokens.len());
    // (module, callsite) -> level of the first occurrence
    let mut seen_callsites: HashMap<(String, String), usize> = HashMap::new();
    let mut prev_key: Option<String> = None;
    let mut level: usize = 0;

    for token in tokens {
        let Some((module, callsite)) = parse_token(token) else {
            return Vec::new();
        };

        let consecutive = prev_key.as_deref() == Some(module);
        let recursive = !consecutive
            && seen_callsites.contains_key(&(module.to_string(), callsite.to_string()));

        let key = if recursive {
            // True recursion: the same callsite recurs deeper in the path.
            // Rename this occurrence so it cannot fold into the earlier one.
            format!("{module}{MODULE_SEPARATOR}{callsite}")
        } else {
            module.to_string()
        };

        if let Some(prev) = prev_key.as_deref() {
            if prev != key {
                level += 1;
            }
        }

        seen_callsites
            .entry((module.to_string(), callsite.to_string()))
            .or_insert(level);

        entries.push(PathEntry {
            callsite: callsite.to_string(),
            module: key.clone(),
            level,
        });
        prev_key = Some(key);
    }

    entries
}

/// Collapse a normalized path into its consecutive same-key groups.
pub fn group_steps(path: &[PathEntry]) -> Vec<GroupStep> {
    let mut steps: Vec<GroupStep> = Vec::new();
    for entry in path {
        match steps.last_mut() {
            Some(step) if step.key == entry.module => {
                step.last_callsite = entry.callsite.clone();
            }
            _ => steps.push(GroupStep {
                key: entry.module.clone(),
                module: base_module(&entry.module).to_string(),
                first_callsite: entry.callsite.clone(),
                last_callsite: entry.callsite.clone(),
                level: entry.level,
            }),
        }
    }
    steps
}

/// Serialize group steps into the canonical grouping key used to bucket
/// records that traversed the same module-to-module transitions.
pub fn group_path_string(steps: &[GroupStep]) -> String {
    let tokens: Vec<String> = steps
        .iter()
        .map(|s| format!("{}:{}", s.key, s.last_callsite))
        .collect();
    tokens.join("|")
}

/// Component path of a raw path with respect to one focal module: the module
/// name followed by the path's callsites that belong to that module, in
/// order. Renamed recursive occurrences contribute under their base module.
pub fn component_path(tokens: &[String], focal_module: &str) -> Vec<String> {
    let mut out = vec![focal_module.to_string()];
    for token in tokens {
        if let Some((module, callsite)) = parse_token(token) {
            if module == focal_module {
                out.push(callsite.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_path() {
        assert!(normalize_path(&[]).is_empty());
    }

    #[test]
    fn test_malformed_token_yields_empty() {
        assert!(normalize_path(&tokens(&["ModA=f1", "garbage"])).is_empty());
        assert!(normalize_path(&tokens(&["=f1"])).is_empty());
        assert!(normalize_path(&tokens(&["ModA="])).is_empty());
    }

    #[test]
    fn test_plain_two_module_path() {
        let path = normalize_path(&tokens(&["ModA=f1", "ModA=f2", "ModB=g1"]));
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].module, "ModA");
        assert_eq!(path[0].level, 0);
        assert_eq!(path[1].module, "ModA");
        assert_eq!(path[1].level, 0);
        assert_eq!(path[2].module, "ModB");
        assert_eq!(path[2].level, 1);
    }

    #[test]
    fn test_group_steps_collapse_consecutive() {
        let path = normalize_path(&tokens(&["ModA=f1", "ModA=f2", "ModB=g1"]));
        let steps = group_steps(&path);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].key, "ModA");
        assert_eq!(steps[0].first_callsite, "f1");
        assert_eq!(steps[0].last_callsite, "f2");
        assert_eq!(steps[1].key, "ModB");
        assert_eq!(steps[1].first_callsite, "g1");
        assert_eq!(steps[1].last_callsite, "g1");
    }

    #[test]
    fn test_module_reappearing_keeps_plain_key() {
        // A -> B -> A with a fresh callsite stays plain; the builder's
        // callback policy owns the back transition.
        let path = normalize_path(&tokens(&["ModA=f1", "ModB=g1", "ModA=f2"]));
        assert_eq!(path[2].module, "ModA");
        assert_eq!(path[2].level, 2);
    }

    #[test]
    fn test_recursive_callsite_is_renamed() {
        // f1 indirectly calls itself: the deeper occurrence becomes its own
        // node so grouping cannot fold the two call positions together.
        let path = normalize_path(&tokens(&["ModA=f1", "ModB=g1", "ModA=f1"]));
        assert_eq!(path[2].module, "ModA=f1");
        assert_eq!(path[2].callsite, "f1");
        let steps = group_steps(&path);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].key, "ModA=f1");
        assert_eq!(steps[2].module, "ModA");
    }

    #[test]
    fn test_direct_recursion_is_absorbed() {
        let path = normalize_path(&tokens(&["ModA=f1", "ModA=f1", "ModA=f1"]));
        let steps = group_steps(&path);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].level, 0);
    }

    #[test]
    fn test_base_module() {
        assert_eq!(base_module("ModA"), "ModA");
        assert_eq!(base_module("ModA=f1"), "ModA");
    }

    #[test]
    fn test_group_path_string_distinguishes_caller() {
        let a = normalize_path(&tokens(&["ModA=f1", "ModB=g1"]));
        let b = normalize_path(&tokens(&["ModA=f2", "ModB=g1"]));
        assert_ne!(
            group_path_string(&group_steps(&a)),
            group_path_string(&group_steps(&b))
        );
    }

    #[test]
    fn test_component_path() {
        let raw = tokens(&["ModA=f1", "ModB=g1", "ModB=g2", "ModA=f2"]);
        assert_eq!(component_path(&raw, "ModB"), vec!["ModB", "g1", "g2"]);
        assert_eq!(component_path(&raw, "ModA"), vec!["ModA", "f1", "f2"]);
    }
}
