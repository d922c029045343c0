//! PREMIS 3.0 record model, serialisation and validation.
//!
//! The model covers the vocabulary subset the transfer-package builder
//! emits: file objects with format designations, events decoded from stored
//! CMS metadata, and the fixed set of agents. Serialisation is 4-space
//! indented XML with a leading declaration; records are validated against
//! the embedded schema before they are written.

mod builder;

pub use builder::build_from_collection;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// PREMIS namespace carried on every record.
pub const PREMIS_XMLNS: &str = "http://www.loc.gov/premis/v3";
/// XML Schema instance namespace.
pub const XSI_XMLNS: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// PREMIS vocabulary version.
pub const PREMIS_VERSION: &str = "3.0";
/// Schema location pointing at the stock PREMIS 3 XSD.
pub const PREMIS_SCHEMA_LOCATION: &str =
    "http://www.loc.gov/premis/v3 https://www.loc.gov/standards/premis/premis.xsd";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Embedded schema the validator enforces.
pub const EMBEDDED_SCHEMA: &str = include_str!("premis.xsd");

/// Errors from building, serialising or validating PREMIS records.
#[derive(Debug, Error)]
pub enum PremisError {
    /// A stored event JSON document was missing a field or carried a wrong
    /// type.
    #[error("invalid premis event metadata: {detail}")]
    BadEvent { detail: String },

    /// The serialised record does not conform to the embedded schema.
    #[error("premis schema violation: {detail}")]
    Schema { detail: String },

    /// XML serialisation failed.
    #[error("premis serialisation error: {0}")]
    Serialize(#[from] quick_xml::SeError),

    /// The record could not be written to disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Root element of a PREMIS record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename = "premis:premis")]
pub struct Premis {
    #[serde(rename = "@xmlns:premis")]
    pub xmlns: String,
    #[serde(rename = "@xmlns:xsi")]
    pub xsi: String,
    #[serde(rename = "@version")]
    pub version: String,
    #[serde(rename = "@xsi:schemaLocation")]
    pub schema_location: String,

    #[serde(rename = "premis:object")]
    pub objects: Vec<Object>,
    #[serde(rename = "premis:event")]
    pub events: Vec<Event>,
    #[serde(rename = "premis:agent")]
    pub agents: Vec<Agent>,
}

impl Default for Premis {
    fn default() -> Self {
        Self {
            xmlns: PREMIS_XMLNS.to_string(),
            xsi: XSI_XMLNS.to_string(),
            version: PREMIS_VERSION.to_string(),
            schema_location: PREMIS_SCHEMA_LOCATION.to_string(),
            objects: Vec::new(),
            events: Vec::new(),
            agents: Vec::new(),
        }
    }
}

/// A digital object within the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Object {
    #[serde(rename = "@xsi:type")]
    pub xsi_type: String,
    #[serde(rename = "premis:objectIdentifier")]
    pub object_identifier: ObjectIdentifier,
    #[serde(rename = "premis:objectCharacteristics")]
    pub object_characteristics: ObjectCharacteristics,
    #[serde(rename = "premis:originalName")]
    pub original_name: String,
    #[serde(rename = "premis:linkingEventIdentifier")]
    pub linking_event_identifiers: Vec<LinkingEventIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectIdentifier {
    #[serde(rename = "premis:objectIdentifierType")]
    pub identifier_type: String,
    #[serde(rename = "premis:objectIdentifierValue")]
    pub identifier_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectCharacteristics {
    #[serde(rename = "premis:format")]
    pub format: Format,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Format {
    #[serde(rename = "premis:formatDesignation")]
    pub format_designation: FormatDesignation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDesignation {
    #[serde(rename = "premis:formatName")]
    pub format_name: String,
    #[serde(rename = "premis:formatVersion", skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkingEventIdentifier {
    #[serde(rename = "premis:linkingEventIdentifierType")]
    pub identifier_type: String,
    #[serde(rename = "premis:linkingEventIdentifierValue")]
    pub identifier_value: String,
}

/// An action affecting one or more objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "premis:eventIdentifier")]
    pub event_identifier: EventIdentifier,
    #[serde(rename = "premis:eventType")]
    pub event_type: String,
    #[serde(rename = "premis:eventDateTime")]
    pub event_date_time: String,
    #[serde(rename = "premis:eventDetailInformation")]
    pub event_detail_information: EventDetailInformation,
    #[serde(rename = "premis:eventOutcomeInformation")]
    pub event_outcome_information: EventOutcomeInformation,
    #[serde(rename = "premis:linkingAgentIdentifier")]
    pub linking_agent_identifiers: Vec<LinkingAgentIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventIdentifier {
    #[serde(rename = "premis:eventIdentifierType")]
    pub identifier_type: String,
    #[serde(rename = "premis:eventIdentifierValue")]
    pub identifier_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDetailInformation {
    #[serde(rename = "premis:eventDetail")]
    pub event_detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcomeInformation {
    #[serde(rename = "premis:eventOutcome")]
    pub event_outcome: String,
    #[serde(rename = "premis:eventOutcomeDetail")]
    pub event_outcome_detail: EventOutcomeDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcomeDetail {
    #[serde(rename = "premis:eventOutcomeDetailNote")]
    pub event_outcome_detail_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkingAgentIdentifier {
    #[serde(rename = "premis:linkingAgentIdentifierType")]
    pub identifier_type: String,
    #[serde(rename = "premis:linkingAgentIdentifierValue")]
    pub identifier_value: String,
}

/// An entity responsible for events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    #[serde(rename = "premis:agentIdentifier")]
    pub agent_identifier: AgentIdentifier,
    #[serde(rename = "premis:agentName")]
    pub agent_name: String,
    #[serde(rename = "premis:agentType")]
    pub agent_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentIdentifier {
    #[serde(rename = "premis:agentIdentifierType")]
    pub identifier_type: String,
    #[serde(rename = "premis:agentIdentifierValue")]
    pub identifier_value: String,
}

impl Premis {
    /// Serialises the record to XML with a leading declaration and 4-space
    /// indentation.
    pub fn to_xml(&self) -> Result<String, PremisError> {
        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut body);
        serializer.indent(' ', 4);
        self.serialize(serializer)?;
        Ok(format!("{XML_DECLARATION}\n{body}"))
    }

    /// Writes the record to `path` with owner-only permissions. Callers
    /// validate first; see [`Premis::validate`].
    pub fn write(&self, path: &Path) -> Result<(), PremisError> {
        let xml = self.to_xml()?;
        std::fs::write(path, xml)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Validates the serialised form of the record.
    pub fn validate(&self) -> Result<(), PremisError> {
        validate_xml(&self.to_xml()?)
    }
}

// ---------------------------------------------------------------------------
// Schema validation
// ---------------------------------------------------------------------------

struct ElementNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<ElementNode>,
}

/// Validates serialised PREMIS XML against the embedded schema. The check is
/// a pure function of the document text: element order, required children
/// and the root attribute set are enforced exactly as the schema declares
/// them.
pub fn validate_xml(xml: &str) -> Result<(), PremisError> {
    let root = parse_tree(xml)?;
    if root.name != "premis:premis" {
        return Err(schema_error(format!("unexpected root element {}", root.name)));
    }
    require_attr(&root, "xmlns:premis", PREMIS_XMLNS)?;
    require_attr(&root, "version", PREMIS_VERSION)?;
    check_element(&root)
}

fn schema_error(detail: impl Into<String>) -> PremisError {
    PremisError::Schema {
        detail: detail.into(),
    }
}

fn require_attr(elem: &ElementNode, name: &str, expected: &str) -> Result<(), PremisError> {
    match elem.attrs.iter().find(|(k, _)| k == name) {
        Some((_, value)) if value == expected => Ok(()),
        Some((_, value)) => Err(schema_error(format!(
            "attribute {name} is {value:?}, expected {expected:?}"
        ))),
        None => Err(schema_error(format!("missing attribute {name}"))),
    }
}

const MANY: usize = usize::MAX;

/// Expected child sequence per element, as (name, min, max).
fn child_spec(name: &str) -> Option<&'static [(&'static str, usize, usize)]> {
    match name {
        "premis:premis" => Some(&[
            ("premis:object", 0, MANY),
            ("premis:event", 0, MANY),
            ("premis:agent", 0, MANY),
        ]),
        "premis:object" => Some(&[
            ("premis:objectIdentifier", 1, 1),
            ("premis:objectCharacteristics", 1, 1),
            ("premis:originalName", 1, 1),
            ("premis:linkingEventIdentifier", 0, MANY),
        ]),
        "premis:objectIdentifier" => Some(&[
            ("premis:objectIdentifierType", 1, 1),
            ("premis:objectIdentifierValue", 1, 1),
        ]),
        "premis:objectCharacteristics" => Some(&[("premis:format", 1, 1)]),
        "premis:format" => Some(&[("premis:formatDesignation", 1, 1)]),
        "premis:formatDesignation" => Some(&[
            ("premis:formatName", 1, 1),
            ("premis:formatVersion", 0, 1),
        ]),
        "premis:linkingEventIdentifier" => Some(&[
            ("premis:linkingEventIdentifierType", 1, 1),
            ("premis:linkingEventIdentifierValue", 1, 1),
        ]),
        "premis:event" => Some(&[
            ("premis:eventIdentifier", 1, 1),
            ("premis:eventType", 1, 1),
            ("premis:eventDateTime", 1, 1),
            ("premis:eventDetailInformation", 1, 1),
            ("premis:eventOutcomeInformation", 1, 1),
            ("premis:linkingAgentIdentifier", 0, MANY),
            ("premis:linkingObjectIdentifier", 0, MANY),
        ]),
        "premis:eventIdentifier" => Some(&[
            ("premis:eventIdentifierType", 1, 1),
            ("premis:eventIdentifierValue", 1, 1),
        ]),
        "premis:eventDetailInformation" => Some(&[("premis:eventDetail", 1, 1)]),
        "premis:eventOutcomeInformation" => Some(&[
            ("premis:eventOutcome", 1, 1),
            ("premis:eventOutcomeDetail", 1, 1),
        ]),
        "premis:eventOutcomeDetail" => Some(&[("premis:eventOutcomeDetailNote", 1, 1)]),
        "premis:linkingAgentIdentifier" => Some(&[
            ("premis:linkingAgentIdentifierType", 1, 1),
            ("premis:linkingAgentIdentifierValue", 1, 1),
        ]),
        "premis:linkingObjectIdentifier" => Some(&[
            ("premis:linkingObjectIdentifierType", 1, 1),
            ("premis:linkingObjectIdentifierValue", 1, 1),
        ]),
        "premis:agent" => Some(&[
            ("premis:agentIdentifier", 1, 1),
            ("premis:agentName", 1, 1),
            ("premis:agentType", 1, 1),
        ]),
        "premis:agentIdentifier" => Some(&[
            ("premis:agentIdentifierType", 1, 1),
            ("premis:agentIdentifierValue", 1, 1),
        ]),
        _ => None,
    }
}

fn check_element(elem: &ElementNode) -> Result<(), PremisError> {
    let Some(spec) = child_spec(&elem.name) else {
        // Leaf elements carry text only.
        if let Some(child) = elem.children.first() {
            return Err(schema_error(format!(
                "element {} may not contain {}",
                elem.name, child.name
            )));
        }
        return Ok(());
    };

    let mut index = 0;
    for (name, min, max) in spec {
        let mut count = 0;
        while index < elem.children.len() && elem.children[index].name == *name && count < *max {
            count += 1;
            index += 1;
        }
        if count < *min {
            return Err(schema_error(format!(
                "element {} requires child {name}",
                elem.name
            )));
        }
    }
    if let Some(extra) = elem.children.get(index) {
        return Err(schema_error(format!(
            "unexpected element {} inside {}",
            extra.name, elem.name
        )));
    }

    elem.children.iter().try_for_each(check_element)
}

fn parse_tree(xml: &str) -> Result<ElementNode, PremisError> {
    use quick_xml::events::Event as XmlEvent;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut stack: Vec<ElementNode> = Vec::new();
    let mut root = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| schema_error(format!("malformed XML: {e}")))?;
        match event {
            XmlEvent::Start(ref start) | XmlEvent::Empty(ref start) => {
                let node = ElementNode {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    attrs: start
                        .attributes()
                        .filter_map(|a| a.ok())
                        .map(|a| {
                            (
                                String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                                String::from_utf8_lossy(&a.value).into_owned(),
                            )
                        })
                        .collect(),
                    children: Vec::new(),
                };
                if matches!(event, XmlEvent::Empty(_)) {
                    attach(&mut stack, &mut root, node);
                } else {
                    stack.push(node);
                }
            }
            XmlEvent::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| schema_error("unbalanced end tag"))?;
                attach(&mut stack, &mut root, node);
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| schema_error("document has no root element"))
}

fn attach(stack: &mut [ElementNode], root: &mut Option<ElementNode>, node: ElementNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else {
        *root = Some(node);
    }
}
