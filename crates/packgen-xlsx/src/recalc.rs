//! Invalidating cached calculation state after a formula cell is overwritten.
//!
//! A template's `calcChain.xml` lists every formula cell. Once one of them holds a literal
//! value the chain is stale, and Excel reports the file as corrupt unless the chain is
//! removed. The workbook is also flagged to recalculate on open so cached results of
//! formulas that referenced the overwritten cell are refreshed.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::{local_name, rels_part_name, REL_TYPE_CALC_CHAIN};
use crate::XlsxError;

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Drop the calc chain of `workbook_part` and set `fullCalcOnLoad`.
///
/// `calc_chain_part` is the resolved chain part, if the workbook declares one.
pub(crate) fn invalidate_calc_chain(
    parts: &mut BTreeMap<String, Vec<u8>>,
    workbook_part: &str,
    calc_chain_part: Option<&str>,
) -> Result<(), XlsxError> {
    if let Some(workbook_xml) = parts.get(workbook_part) {
        let updated = workbook_xml_force_full_calc_on_load(workbook_xml)?;
        parts.insert(workbook_part.to_string(), updated);
    }

    let Some(calc_chain_part) = calc_chain_part else {
        return Ok(());
    };
    log::debug!("dropping stale calc chain `{calc_chain_part}`");
    parts.remove(calc_chain_part);

    let rels_part = rels_part_name(workbook_part);
    if let Some(rels_xml) = parts.get(&rels_part) {
        let updated = workbook_rels_remove_calc_chain(rels_xml)?;
        parts.insert(rels_part, updated);
    }
    if let Some(ct_xml) = parts.get(CONTENT_TYPES_PART) {
        let updated = content_types_remove_override(ct_xml, calc_chain_part)?;
        parts.insert(CONTENT_TYPES_PART.to_string(), updated);
    }
    Ok(())
}

fn workbook_xml_force_full_calc_on_load(workbook_xml: &[u8]) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len() + 64));

    let mut buf = Vec::new();
    let mut saw_calc_pr = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                writer.write_event(Event::Empty(patched_calc_pr(e)?))?;
            }
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                writer.write_event(Event::Start(patched_calc_pr(e)?))?;
            }
            Event::End(ref e) if local_name(e.name().as_ref()) == b"workbook" => {
                if !saw_calc_pr {
                    let tag = match e.name().prefix() {
                        Some(prefix) => {
                            format!("{}:calcPr", String::from_utf8_lossy(prefix.as_ref()))
                        }
                        None => "calcPr".to_string(),
                    };
                    let mut calc_pr = BytesStart::new(tag);
                    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
                    writer.write_event(Event::Empty(calc_pr))?;
                }
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Eof => break,
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn patched_calc_pr(e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
    let name = String::from_utf8(e.name().as_ref().to_vec())?;
    let mut calc_pr = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"fullCalcOnLoad" {
            continue;
        }
        calc_pr.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    Ok(calc_pr)
}

fn workbook_rels_remove_calc_chain(rels_xml: &[u8]) -> Result<Vec<u8>, XlsxError> {
    filter_elements(rels_xml, b"Relationship", |e| {
        let mut is_calc_chain = false;
        for attr in e.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"Type" => is_calc_chain |= attr.unescape_value()? == REL_TYPE_CALC_CHAIN,
                b"Target" => is_calc_chain |= attr.unescape_value()?.ends_with("calcChain.xml"),
                _ => {}
            }
        }
        Ok(!is_calc_chain)
    })
}

fn content_types_remove_override(ct_xml: &[u8], part: &str) -> Result<Vec<u8>, XlsxError> {
    filter_elements(ct_xml, b"Override", |e| {
        for attr in e.attributes() {
            let attr = attr?;
            if attr.key.as_ref() == b"PartName" {
                let value = attr.unescape_value()?;
                return Ok(value.trim_start_matches('/') != part.trim_start_matches('/'));
            }
        }
        Ok(true)
    })
}

/// Re-emit `xml`, dropping every `local` element for which `keep` returns false.
fn filter_elements(
    xml: &[u8],
    local: &[u8],
    keep: impl Fn(&BytesStart<'_>) -> Result<bool, XlsxError>,
) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    let mut buf = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(_) if skip_depth > 0 => skip_depth -= 1,
            _ if skip_depth > 0 => {}
            Event::Start(ref e) if local_name(e.name().as_ref()) == local && !keep(e)? => {
                skip_depth = 1;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == local && !keep(e)? => {}
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}
