use std::io::Read;

use crate::XlsxError;

/// Running total of inflated bytes across one package load.
pub(crate) struct InflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl InflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }

    fn consume(&mut self, bytes: u64) -> Result<(), XlsxError> {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
        if self.used_bytes > self.max_total_bytes {
            return Err(XlsxError::PackageTooLarge {
                total: self.used_bytes,
                max: self.max_total_bytes,
            });
        }
        Ok(())
    }
}

/// Inflate one ZIP entry, enforcing both a per-part limit and the shared package budget.
///
/// The declared size is only a fast-path check: reads are capped at `limit + 1` bytes so a
/// forged size field cannot cause an unbounded allocation.
pub(crate) fn read_entry_limited(
    entry: impl Read,
    part: &str,
    declared_size: u64,
    max_part_bytes: u64,
    budget: &mut InflateBudget,
) -> Result<Vec<u8>, XlsxError> {
    if declared_size > max_part_bytes {
        return Err(XlsxError::PartTooLarge {
            part: part.to_string(),
            size: declared_size,
            max: max_part_bytes,
        });
    }

    let limit = max_part_bytes.min(budget.remaining());
    let mut buf = Vec::with_capacity(declared_size.min(limit) as usize);
    entry.take(limit.saturating_add(1)).read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > max_part_bytes {
        return Err(XlsxError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_part_bytes,
        });
    }
    budget.consume(observed)?;
    Ok(buf)
}

/// Compare two OPC part names the way producers in the wild expect.
///
/// Leading separators are ignored, `\` is treated as `/`, and ASCII case is folded. Stored
/// part names are never rewritten; this only drives lookups.
pub(crate) fn part_names_equivalent(a: &str, b: &str) -> bool {
    fn normalized(s: &str) -> impl Iterator<Item = u8> + '_ {
        s.bytes()
            .map(|b| if b == b'\\' { b'/' } else { b.to_ascii_lowercase() })
            .skip_while(|b| *b == b'/')
    }
    normalized(a).eq(normalized(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_handles_case_separators_and_leading_slashes() {
        assert!(part_names_equivalent("XL\\Workbook.xml", "xl/workbook.xml"));
        assert!(part_names_equivalent("/xl/workbook.xml", "xl/workbook.xml"));
        assert!(!part_names_equivalent("xl/workbook.xml", "xl/workbook2.xml"));
    }

    #[test]
    fn read_entry_limited_rejects_oversized_parts() {
        let data = b"hello world";
        let mut budget = InflateBudget::new(1024);
        let err = read_entry_limited(&data[..], "a.txt", 0, 10, &mut budget).unwrap_err();
        assert!(matches!(err, XlsxError::PartTooLarge { size: 11, .. }));

        let mut budget = InflateBudget::new(1024);
        let ok = read_entry_limited(&data[..], "a.txt", 11, 11, &mut budget).unwrap();
        assert_eq!(ok, data);
    }

    #[test]
    fn read_entry_limited_enforces_total_budget() {
        let mut budget = InflateBudget::new(15);
        read_entry_limited(&b"0123456789"[..], "a", 10, 100, &mut budget).unwrap();
        let err = read_entry_limited(&b"0123456789"[..], "b", 10, 100, &mut budget).unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 15, .. }));
    }
}
