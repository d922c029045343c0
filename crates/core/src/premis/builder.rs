//! Assembles PREMIS records and descriptive sidecars from a node tree.

use serde_json::{Map, Value};

use crate::cms::{Node, NodeCollection, UserRecord};
use crate::metadata::descriptive_entry;
use crate::version;

use super::{
    Agent, AgentIdentifier, Event, EventDetailInformation, EventIdentifier, EventOutcomeDetail,
    EventOutcomeInformation, Format, FormatDesignation, LinkingAgentIdentifier,
    LinkingEventIdentifier, Object, ObjectCharacteristics, ObjectIdentifier, Premis, PremisError,
};

/// Stored event JSON lives under this metadata key.
const EVENTS_KEY: &str = "premis";
/// Older deployments stored events here; both sources are honoured.
const EVENTS_KEY_LEGACY: &str = "usermeta-premis-data";

/// Builds the PREMIS record and the descriptive sidecar array for a package.
///
/// Children are visited first, the parent last; output ordering follows the
/// input node order so identical inputs serialise identically. Objects are
/// only emitted for nodes that carry at least one stored event, and the seed
/// agents are only appended when at least one event was emitted.
pub fn build_from_collection(
    collection: &NodeCollection,
    user: &UserRecord,
    organization: &str,
) -> Result<(Premis, Vec<Map<String, Value>>), PremisError> {
    let agents = seed_agents(user, organization);

    let mut record = Premis::default();
    let mut sidecar = Vec::new();

    let parent_prefix = parent_dir(&collection.parent.path);
    for node in collection.children.iter().chain(std::iter::once(&collection.parent)) {
        let object_path = object_path(&node.path, &parent_prefix);

        if let Some((object, events)) = node_object(&agents, node, &object_path)? {
            record.objects.push(object);
            record.events.extend(events);
        }

        if let Some(entry) = descriptive_entry(node, &object_path) {
            sidecar.push(entry);
        }
    }

    if !record.events.is_empty() {
        record.agents.extend(agents);
    }

    Ok((record, sidecar))
}

fn seed_agents(user: &UserRecord, organization: &str) -> Vec<Agent> {
    let mut agents = vec![
        Agent {
            agent_identifier: AgentIdentifier {
                identifier_type: "Preservation System".to_string(),
                identifier_value: version::identifier(),
            },
            agent_name: "Curate Preservation System".to_string(),
            agent_type: "Software".to_string(),
        },
        Agent {
            agent_identifier: AgentIdentifier {
                identifier_type: "Cells User UUID".to_string(),
                identifier_value: user.uuid.clone(),
            },
            agent_name: format!("Login={}, GroupPath={}", user.login, user.group_path),
            agent_type: "Curate User".to_string(),
        },
    ];
    if !organization.is_empty() {
        agents.push(Agent {
            agent_identifier: AgentIdentifier {
                identifier_type: "Organization Name".to_string(),
                identifier_value: organization.to_string(),
            },
            agent_name: organization.to_string(),
            agent_type: "Organization".to_string(),
        });
    }
    agents
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

/// Rewrites a node path under `objects/data` by substituting the parent's
/// directory prefix once.
fn object_path(node_path: &str, parent_prefix: &str) -> String {
    node_path.replacen(parent_prefix, "objects/data", 1)
}

/// Builds the object and its events for one node, or `None` when the node
/// carries no stored events.
fn node_object(
    agents: &[Agent],
    node: &Node,
    object_path: &str,
) -> Result<Option<(Object, Vec<Event>)>, PremisError> {
    let mut stored = decode_events(node, EVENTS_KEY)?;
    stored.extend(decode_events(node, EVENTS_KEY_LEGACY)?);
    if stored.is_empty() {
        return Ok(None);
    }

    let mime = node
        .meta_store
        .get("mime")
        .map(|m| m.trim_matches('"').to_string())
        .unwrap_or_default();

    let mut object = Object {
        xsi_type: "premis:file".to_string(),
        object_identifier: ObjectIdentifier {
            identifier_type: "UUID".to_string(),
            identifier_value: node.uuid.clone(),
        },
        object_characteristics: ObjectCharacteristics {
            format: Format {
                format_designation: FormatDesignation {
                    format_name: mime,
                    format_version: None,
                },
            },
        },
        original_name: object_path.to_string(),
        linking_event_identifiers: Vec::new(),
    };

    let mut events = Vec::with_capacity(stored.len());
    for raw in stored {
        let event = decode_event(&raw, agents)?;
        object
            .linking_event_identifiers
            .push(LinkingEventIdentifier {
                identifier_type: event.event_identifier.identifier_type.clone(),
                identifier_value: event.event_identifier.identifier_value.clone(),
            });
        events.push(event);
    }

    Ok(Some((object, events)))
}

fn decode_events(node: &Node, key: &str) -> Result<Vec<Value>, PremisError> {
    let Some(raw) = node.meta_store.get(key) else {
        return Ok(Vec::new());
    };
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| PremisError::BadEvent {
        detail: format!("stored event array under {key} is not valid JSON: {e}"),
    })
}

fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str, PremisError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| PremisError::BadEvent {
            detail: format!("invalid {field} format"),
        })
}

fn map_field<'a>(value: &'a Value, field: &str) -> Result<&'a Value, PremisError> {
    let inner = value.get(field).ok_or_else(|| PremisError::BadEvent {
        detail: format!("invalid {field} format"),
    })?;
    if !inner.is_object() {
        return Err(PremisError::BadEvent {
            detail: format!("invalid {field} format"),
        });
    }
    Ok(inner)
}

/// Decodes one stored event document, mirroring its fields exactly. Every
/// emitted event links back to every seed agent.
fn decode_event(raw: &Value, agents: &[Agent]) -> Result<Event, PremisError> {
    let identifier = map_field(raw, "event_identifier")?;
    let detail_information = map_field(raw, "event_detail_information")?;
    let outcome_information = map_field(raw, "event_outcome_information")?;
    let outcome_detail = map_field(outcome_information, "event_outcome_detail")?;

    Ok(Event {
        event_identifier: EventIdentifier {
            identifier_type: str_field(identifier, "event_identifier_type")?.to_string(),
            identifier_value: str_field(identifier, "event_identifier_value")?.to_string(),
        },
        event_type: str_field(raw, "event_type")?.to_string(),
        event_date_time: str_field(raw, "event_date_time")?.to_string(),
        event_detail_information: EventDetailInformation {
            event_detail: str_field(detail_information, "event_detail")?.to_string(),
        },
        event_outcome_information: EventOutcomeInformation {
            event_outcome: str_field(outcome_information, "event_outcome")?.to_string(),
            event_outcome_detail: EventOutcomeDetail {
                event_outcome_detail_note: str_field(outcome_detail, "event_outcome_detail_note")?
                    .to_string(),
            },
        },
        linking_agent_identifiers: agents
            .iter()
            .map(|agent| LinkingAgentIdentifier {
                identifier_type: agent.agent_identifier.identifier_type.clone(),
                identifier_value: agent.agent_identifier.identifier_value.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event_json(id: &str) -> String {
        format!(
            r#"[{{
                "event_identifier": {{"event_identifier_type": "UUID", "event_identifier_value": "{id}"}},
                "event_type": "ingestion",
                "event_date_time": "2025-03-11T12:34:56Z",
                "event_detail_information": {{"event_detail": "ingested"}},
                "event_outcome_information": {{
                    "event_outcome": "success",
                    "event_outcome_detail": {{"event_outcome_detail_note": "ok"}}
                }}
            }}]"#
        )
    }

    fn user() -> UserRecord {
        UserRecord {
            uuid: "user-1".to_string(),
            login: "alice".to_string(),
            group_path: "/acme".to_string(),
        }
    }

    fn collection(parent_meta: Vec<(&str, &str)>, child_meta: Vec<(&str, &str)>) -> NodeCollection {
        let store = |fields: Vec<(&str, &str)>| -> HashMap<String, String> {
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        NodeCollection {
            parent: Node {
                uuid: "parent-uuid".to_string(),
                path: "personal/alice/pkg".to_string(),
                meta_store: store(parent_meta),
            },
            children: vec![Node {
                uuid: "child-uuid".to_string(),
                path: "personal/alice/pkg/a.txt".to_string(),
                meta_store: store(child_meta),
            }],
        }
    }

    #[test]
    fn emits_objects_and_events_for_nodes_with_stored_events() {
        let events = event_json("event-1");
        let coll = collection(vec![], vec![("premis", &events), ("mime", "\"text/plain\"")]);

        let (record, sidecar) = build_from_collection(&coll, &user(), "Acme").unwrap();

        assert_eq!(record.objects.len(), 1);
        assert_eq!(record.events.len(), 1);
        // Software, user and organization agents.
        assert_eq!(record.agents.len(), 3);
        assert!(sidecar.is_empty());

        let object = &record.objects[0];
        assert_eq!(object.original_name, "objects/data/pkg/a.txt");
        assert_eq!(
            object.object_characteristics.format.format_designation.format_name,
            "text/plain"
        );
        assert_eq!(object.linking_event_identifiers.len(), 1);
        assert_eq!(record.events[0].linking_agent_identifiers.len(), 3);
    }

    #[test]
    fn legacy_event_store_is_concatenated() {
        let new_events = event_json("event-1");
        let legacy_events = event_json("event-2");
        let coll = collection(
            vec![],
            vec![("premis", &new_events), ("usermeta-premis-data", &legacy_events)],
        );

        let (record, _) = build_from_collection(&coll, &user(), "").unwrap();
        assert_eq!(record.events.len(), 2);
        assert_eq!(record.events[0].event_identifier.identifier_value, "event-1");
        assert_eq!(record.events[1].event_identifier.identifier_value, "event-2");
        // No organization agent without an organization.
        assert_eq!(record.agents.len(), 2);
    }

    #[test]
    fn no_events_means_no_objects_and_no_agents() {
        let coll = collection(vec![("usermeta-dc-title", "T")], vec![]);
        let (record, sidecar) = build_from_collection(&coll, &user(), "Acme").unwrap();
        assert!(record.objects.is_empty());
        assert!(record.agents.is_empty());
        // The parent still contributes its descriptive entry.
        assert_eq!(sidecar.len(), 1);
        assert_eq!(sidecar[0]["filename"], "objects/data/pkg");
    }

    #[test]
    fn malformed_event_json_is_rejected() {
        let coll = collection(vec![], vec![("premis", "[{\"event_type\": 42}]")]);
        let err = build_from_collection(&coll, &user(), "").unwrap_err();
        assert!(matches!(err, PremisError::BadEvent { .. }), "got {err:?}");
    }

    #[test]
    fn children_precede_parent_in_output() {
        let child_events = event_json("event-child");
        let parent_events = event_json("event-parent");
        let coll = collection(vec![("premis", &parent_events)], vec![("premis", &child_events)]);

        let (record, _) = build_from_collection(&coll, &user(), "").unwrap();
        assert_eq!(record.objects[0].object_identifier.identifier_value, "child-uuid");
        assert_eq!(record.objects[1].object_identifier.identifier_value, "parent-uuid");
    }

    #[test]
    fn output_is_deterministic() {
        let events = event_json("event-1");
        let coll = collection(vec![("usermeta-dc-title", "T")], vec![("premis", &events)]);
        let (a, side_a) = build_from_collection(&coll, &user(), "Acme").unwrap();
        let (b, side_b) = build_from_collection(&coll, &user(), "Acme").unwrap();
        assert_eq!(a.to_xml().unwrap(), b.to_xml().unwrap());
        assert_eq!(side_a, side_b);
    }
}
