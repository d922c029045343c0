//! Descriptive metadata sidecar construction.
//!
//! CMS nodes carry Dublin Core and ISAD(G) fields under `usermeta-*` keys.
//! Nodes with at least one populated field contribute one object to the
//! `metadata.json` sidecar, keyed by the node's path rewritten under the
//! transfer-package objects directory.

use serde_json::{Map, Value};

use crate::cms::Node;

/// CMS metadata key to sidecar key, for every recognised descriptive field.
pub const DESCRIPTIVE_KEYS: [(&str, &str); 41] = [
    ("usermeta-dc-title", "dc.title"),
    ("usermeta-dc-creator", "dc.creator"),
    ("usermeta-dc-subject", "dc.subject"),
    ("usermeta-dc-description", "dc.description"),
    ("usermeta-dc-publisher", "dc.publisher"),
    ("usermeta-dc-contributor", "dc.contributor"),
    ("usermeta-dc-date", "dc.date"),
    ("usermeta-dc-type", "dc.type"),
    ("usermeta-dc-format", "dc.format"),
    ("usermeta-dc-identifier", "dc.identifier"),
    ("usermeta-dc-source", "dc.source"),
    ("usermeta-dc-language", "dc.language"),
    ("usermeta-dc-relation", "dc.relation"),
    ("usermeta-dc-coverage", "dc.coverage"),
    ("usermeta-dc-rights", "dc.rights"),
    ("usermeta-isadg-title", "isadg.title"),
    ("usermeta-isadg-date", "isadg.date"),
    ("usermeta-isadg-level-of-description", "isadg.level-of-description"),
    (
        "usermeta-isadg-extent-and-medium-of-the-unit-of-description",
        "isadg.extent-and-medium-of-the-unit-of-description",
    ),
    ("usermeta-isadg-alternative-identifiers", "isadg.alternative-identifiers"),
    ("usermeta-isadg-name-of-creators", "isadg.name-of-creators"),
    (
        "usermeta-isadg-administrativebiographical-history",
        "isadg.administrativebiographical-history",
    ),
    ("usermeta-isadg-archival-history", "isadg.archival-history"),
    (
        "usermeta-isadg-immediate-source-of-acquisition-or-transfer",
        "isadg.immediate-source-of-acquisition-or-transfer",
    ),
    ("usermeta-isadg-scope-and-content", "isadg.scope-and-content"),
    (
        "usermeta-isadg-appraisal-destruction-and-scheduling-information",
        "isadg.appraisal-destruction-and-scheduling-information",
    ),
    ("usermeta-isadg-accruals", "isadg.accruals"),
    ("usermeta-isadg-system-of-arrangement", "isadg.system-of-arrangement"),
    ("usermeta-isadg-conditions-governing-access", "isadg.conditions-governing-access"),
    (
        "usermeta-isadg-conditions-governing-reproduction",
        "isadg.conditions-governing-reproduction",
    ),
    ("usermeta-isadg-languagescripts-of-material", "isadg.languagescripts-of-material"),
    (
        "usermeta-isadg-physical-characteristics-and-technical-requirements",
        "isadg.physical-characteristics-and-technical-requirements",
    ),
    ("usermeta-isadg-finding-aids", "isadg.finding-aids"),
    (
        "usermeta-isadg-existence-and-location-of-originals",
        "isadg.existence-and-location-of-originals",
    ),
    (
        "usermeta-isadg-existence-and-location-of-copies",
        "isadg.existence-and-location-of-copies",
    ),
    ("usermeta-isadg-related-units-of-description", "isadg.related-units-of-description"),
    ("usermeta-isadg-publication-note", "isadg.publication-note"),
    ("usermeta-isadg-note", "isadg.note"),
    ("usermeta-isadg-archivists-note", "isadg.archivists-note"),
    ("usermeta-isadg-rules-or-conventions", "isadg.rules-or-conventions"),
    ("usermeta-isadg-dates-of-descriptions", "isadg.dates-of-descriptions"),
];

/// Collects the descriptive fields of `node` into a sidecar object, or
/// `None` when the node carries no recognised field. `object_path` becomes
/// the object's `filename`.
pub fn descriptive_entry(node: &Node, object_path: &str) -> Option<Map<String, Value>> {
    let mut entry = Map::new();
    for (store_key, sidecar_key) in DESCRIPTIVE_KEYS {
        if let Some(value) = node.meta_store.get(store_key) {
            if !value.is_empty() {
                entry.insert(sidecar_key.to_string(), Value::String(value.clone()));
            }
        }
    }
    if entry.is_empty() {
        return None;
    }
    entry.insert("filename".to_string(), Value::String(object_path.to_string()));
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(fields: &[(&str, &str)]) -> Node {
        Node {
            uuid: "n1".to_string(),
            path: "personal/admin/pkg/a.txt".to_string(),
            meta_store: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn maps_recognised_fields() {
        let node = node_with(&[
            ("usermeta-dc-title", "A Title"),
            ("usermeta-isadg-archival-history", "donated 1998"),
            ("mime", "\"text/plain\""),
        ]);
        let entry = descriptive_entry(&node, "objects/data/pkg/a.txt").unwrap();
        assert_eq!(entry["dc.title"], "A Title");
        assert_eq!(entry["isadg.archival-history"], "donated 1998");
        assert_eq!(entry["filename"], "objects/data/pkg/a.txt");
        assert!(!entry.contains_key("mime"));
    }

    #[test]
    fn empty_values_are_skipped() {
        let node = node_with(&[("usermeta-dc-title", "")]);
        assert!(descriptive_entry(&node, "objects/data/pkg/a.txt").is_none());
    }

    #[test]
    fn nodes_without_descriptive_fields_yield_nothing() {
        let node = node_with(&[("usermeta-preservation-status", "🔒 Preserved")]);
        assert!(descriptive_entry(&node, "objects/data/pkg").is_none());
    }
}
