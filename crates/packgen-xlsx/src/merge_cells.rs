use packgen_model::{MergedRegions, Range};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::openxml::local_name;
use crate::XlsxError;

/// Read the `<mergeCells>` declarations of a worksheet part.
pub fn read_merge_cells_from_worksheet_xml(xml: &[u8]) -> Result<MergedRegions, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut merges = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"mergeCell" => {
                for attr in e.attributes() {
                    let attr = attr?;
                    if local_name(attr.key.as_ref()) == b"ref" {
                        let value = attr.unescape_value()?;
                        let range = Range::from_a1(&value)
                            .map_err(|err| XlsxError::InvalidMergeRef(value.to_string(), err))?;
                        merges.push(range);
                    }
                }
            }
            // Merge declarations never precede sheet data, but they can follow a large
            // `<sheetData>`; nothing after `</mergeCells>` is relevant.
            Event::End(e) if local_name(e.name().as_ref()) == b"mergeCells" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(MergedRegions::new(merges))
}
