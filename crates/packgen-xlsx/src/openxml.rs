//! Open Packaging Convention relationship helpers.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::package::{XlsxError, XlsxPackage};

pub(crate) const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub(crate) const REL_TYPE_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

/// The `.rels` part that holds the relationships of `part_name`.
///
/// The package root (`""`) maps to `_rels/.rels`.
pub fn rels_part_name(part_name: &str) -> String {
    let part_name = part_name.strip_prefix('/').unwrap_or(part_name);
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

/// Resolve the internal target of relationship `relationship_id` declared by `part_name`.
///
/// Returns `Ok(None)` when the relationship part or the id does not exist, or when the
/// relationship points outside the package.
pub fn resolve_relationship_target(
    package: &XlsxPackage,
    part_name: &str,
    relationship_id: &str,
) -> Result<Option<String>, XlsxError> {
    let Some(rels) = package.part(&rels_part_name(part_name)) else {
        return Ok(None);
    };
    Ok(parse_relationships(rels)?
        .into_iter()
        .find(|rel| rel.id == relationship_id)
        .filter(|rel| !rel.is_external())
        .map(|rel| resolve_target(part_name, &rel.target)))
}

/// Resolve the first internal relationship of `type_uri` declared by `part_name`.
pub fn resolve_relationship_by_type(
    package: &XlsxPackage,
    part_name: &str,
    type_uri: &str,
) -> Result<Option<String>, XlsxError> {
    let Some(rels) = package.part(&rels_part_name(part_name)) else {
        return Ok(None);
    };
    Ok(parse_relationships(rels)?
        .into_iter()
        .filter(|rel| !rel.is_external())
        .find(|rel| rel.type_uri == type_uri)
        .map(|rel| resolve_target(part_name, &rel.target)))
}

/// Resolve a relationship `target` relative to the folder of `base_part`.
///
/// Absolute targets (`/xl/worksheets/sheet1.xml`) are rooted at the package root. URI
/// fragments are dropped since OPC part names never carry them.
pub fn resolve_target(base_part: &str, target: &str) -> String {
    let target = target
        .split_once('#')
        .map(|(base, _)| base)
        .unwrap_or(target);

    let (target, base_dir) = match target.strip_prefix('/') {
        Some(absolute) => (absolute, ""),
        None => (
            target,
            base_part
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .unwrap_or(""),
        ),
    };

    let mut components: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }
    components.join("/")
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) | Event::Empty(start)
                if local_name(start.name().as_ref()).eq_ignore_ascii_case(b"Relationship") =>
            {
                let mut id = None;
                let mut target = None;
                let mut type_uri = None;
                let mut target_mode = None;
                for attr in start.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?.into_owned();
                    match local_name(attr.key.as_ref()) {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        b"Type" => type_uri = Some(value),
                        b"TargetMode" => target_mode = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target), Some(type_uri)) = (id, target, type_uri) {
                    relationships.push(Relationship {
                        id,
                        type_uri,
                        target,
                        target_mode,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}
