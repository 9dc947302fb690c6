//! ID normalization for extracted tasks.
//!
//! The extractor reuses ids across segments (typically `c1`, `ex1`, …),
//! so every entity id in a validated task is replaced with a freshly
//! generated globally-unique id before persistence. A second pass walks
//! the whole parsed value and rewrites reference fields — any key ending
//! in `_id` (single reference) or `_ids` (array of references) — through
//! the old→new maps, in category order; unmatched values pass through
//! unchanged.
//!
//! A source id emitted more than once *within* a category is a genuine
//! extractor defect (not cross-segment reuse). It is reported as a
//! warning by the orchestrator but never fails the job: each duplicate
//! simply becomes an independent record with its own fresh id.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use uuid::Uuid;

/// Entity categories carrying their own ids, in lookup order for
/// reference rewriting.
pub const ID_CATEGORIES: [&str; 3] = ["criteria", "examples", "interaction_examples"];

/// Outcome of a normalization pass.
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// `(category, source_id, occurrences)` for ids the extractor emitted
    /// more than once within one category.
    pub duplicates: Vec<(String, String, usize)>,
}

/// Replace every entity id in `task` with a fresh unique id and rewrite
/// all internal `_id`/`_ids` cross-references accordingly.
pub fn normalize_ids(task: &mut Value) -> NormalizeReport {
    let mut used: HashSet<String> = HashSet::new();
    let mut maps: Vec<HashMap<String, Vec<String>>> = Vec::with_capacity(ID_CATEGORIES.len());
    let mut report = NormalizeReport::default();

    for category in ID_CATEGORIES {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();

        if let Some(items) = task.get_mut(category).and_then(|v| v.as_array_mut()) {
            for item in items {
                let Some(obj) = item.as_object_mut() else {
                    continue;
                };
                let old = obj
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let fresh = fresh_id(&mut used);
                obj.insert("id".to_string(), json!(fresh));
                map.entry(old).or_default().push(fresh);
            }
        }

        for (old, news) in &map {
            if news.len() > 1 && !old.is_empty() {
                report
                    .duplicates
                    .push((category.to_string(), old.clone(), news.len()));
            }
        }

        maps.push(map);
    }

    rewrite_references(task, &maps);
    report
}

fn fresh_id(used: &mut HashSet<String>) -> String {
    // Collision-checked against the ids already issued in this call.
    loop {
        let id = Uuid::new_v4().to_string();
        if used.insert(id.clone()) {
            return id;
        }
    }
}

/// Look up an old id across the category maps in order, substituting the
/// first generated id. Unmatched values are returned unchanged.
fn remap(old: &str, maps: &[HashMap<String, Vec<String>>]) -> String {
    for map in maps {
        if let Some(news) = map.get(old) {
            if let Some(first) = news.first() {
                return first.clone();
            }
        }
    }
    old.to_string()
}

fn rewrite_references(value: &mut Value, maps: &[HashMap<String, Vec<String>>]) {
    match value {
        Value::Object(obj) => {
            for (key, val) in obj.iter_mut() {
                if key.ends_with("_id") {
                    if let Some(old) = val.as_str() {
                        *val = json!(remap(old, maps));
                        continue;
                    }
                } else if key.ends_with("_ids") {
                    if let Some(items) = val.as_array_mut() {
                        for item in items.iter_mut() {
                            if let Some(old) = item.as_str() {
                                *item = json!(remap(old, maps));
                            }
                        }
                        continue;
                    }
                }
                rewrite_references(val, maps);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                rewrite_references(item, maps);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_uuid(s: &str) -> bool {
        Uuid::parse_str(s).is_ok()
    }

    #[test]
    fn test_all_entity_ids_replaced() {
        let mut task = json!({
            "title": "t",
            "criteria": [{ "id": "c1" }, { "id": "c2" }],
            "examples": [{ "id": "ex1" }],
            "interaction_examples": [{ "id": "ie1" }]
        });
        let report = normalize_ids(&mut task);
        assert!(report.duplicates.is_empty());

        for (cat, count) in [("criteria", 2), ("examples", 1), ("interaction_examples", 1)] {
            let items = task[cat].as_array().unwrap();
            assert_eq!(items.len(), count);
            for item in items {
                assert!(is_uuid(item["id"].as_str().unwrap()));
            }
        }
    }

    #[test]
    fn test_references_rewritten() {
        let mut task = json!({
            "criteria": [{ "id": "c1" }],
            "examples": [{ "id": "ex1", "meta": { "criterion_id": "c1", "related_ids": ["ex1", "unknown"] } }]
        });
        normalize_ids(&mut task);

        let new_c1 = task["criteria"][0]["id"].as_str().unwrap().to_string();
        let new_ex1 = task["examples"][0]["id"].as_str().unwrap().to_string();
        let meta = &task["examples"][0]["meta"];
        assert_eq!(meta["criterion_id"].as_str().unwrap(), new_c1);
        assert_eq!(meta["related_ids"][0].as_str().unwrap(), new_ex1);
        // Unmatched references pass through unchanged.
        assert_eq!(meta["related_ids"][1].as_str().unwrap(), "unknown");
    }

    #[test]
    fn test_duplicate_ids_within_category_reported_not_merged() {
        let mut task = json!({
            "examples": [{ "id": "dup" }, { "id": "dup" }]
        });
        let report = normalize_ids(&mut task);

        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].0, "examples");
        assert_eq!(report.duplicates[0].1, "dup");
        assert_eq!(report.duplicates[0].2, 2);

        // Both records survive with distinct fresh ids.
        let a = task["examples"][0]["id"].as_str().unwrap();
        let b = task["examples"][1]["id"].as_str().unwrap();
        assert_ne!(a, b);
        assert!(is_uuid(a) && is_uuid(b));
    }

    #[test]
    fn test_category_order_wins_on_reference_lookup() {
        // Same source id in two categories: the `_id` reference resolves
        // through the first category (criteria) per the lookup order.
        let mut task = json!({
            "criteria": [{ "id": "shared" }],
            "examples": [{ "id": "shared", "meta": { "anchor_id": "shared" } }]
        });
        normalize_ids(&mut task);

        let crit_id = task["criteria"][0]["id"].as_str().unwrap();
        let anchor = task["examples"][0]["meta"]["anchor_id"].as_str().unwrap();
        assert_eq!(anchor, crit_id);
    }

    #[test]
    fn test_plain_id_keys_untouched_by_reference_pass() {
        // A bare "id" outside the known categories is not a reference
        // field and must pass through.
        let mut task = json!({
            "criteria": [{ "id": "c1" }],
            "meta": { "id": "c1" }
        });
        normalize_ids(&mut task);
        assert_eq!(task["meta"]["id"].as_str().unwrap(), "c1");
    }
}
