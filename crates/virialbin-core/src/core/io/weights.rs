use super::header::WeightHeader;
use super::raw::staging_file;
use crate::core::bins::{BinKey, StoreShape};
use crate::engine::error::{ParseErrorKind, VirialError};
use crate::engine::weights::WeightTable;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Writes `table` to `path`, replacing any previous weight file only once the new one
/// is complete.
pub fn write_weights(
    table: &WeightTable,
    shape: StoreShape,
    path: &Path,
) -> Result<(), VirialError> {
    let mut out = BufWriter::new(staging_file(path)?);
    let header = WeightHeader {
        shape,
        nominal: table.nominal(),
    };
    let io = |e| VirialError::io(path, e);
    writeln!(out, "{header}").map_err(io)?;
    for (key, weight) in table.iter() {
        writeln!(out, "{key} {weight:e}").map_err(io)?;
    }
    let staged = out.into_inner().map_err(|e| io(e.into_error()))?;
    staged.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

/// Reads a weight table whose dimensions must match `expected` (the covariance flag is
/// irrelevant to weights).
pub fn read_weights(path: &Path, expected: StoreShape) -> Result<WeightTable, VirialError> {
    let file = File::open(path).map_err(|e| VirialError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();
    let first = match lines.next() {
        Some(line) => line.map_err(|e| VirialError::io(path, e))?,
        None => return Err(VirialError::parse(path, 1, ParseErrorKind::MissingHeader)),
    };
    let header = WeightHeader::parse(&first).map_err(|kind| VirialError::parse(path, 1, kind))?;
    if !header.shape.same_dimensions(&expected) {
        return Err(VirialError::parse(
            path,
            1,
            ParseErrorKind::DimensionMismatch {
                expected: expected.without_covariance().to_string(),
                found: header.shape.to_string(),
            },
        ));
    }
    check_weight(header.nominal).map_err(|kind| VirialError::parse(path, 1, kind))?;

    let mut table = WeightTable::uniform(header.nominal);
    for (index, line) in lines.enumerate() {
        let line_no = index + 2;
        let line = line.map_err(|e| VirialError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let (key, weight) = parse_entry(&line, expected.key_len)
            .map_err(|kind| VirialError::parse(path, line_no, kind))?;
        table.insert(key, weight);
    }
    Ok(table)
}

fn parse_entry(line: &str, key_len: usize) -> Result<(BinKey, f64), ParseErrorKind> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != key_len + 1 {
        return Err(ParseErrorKind::FieldCount {
            expected: key_len + 1,
            found: fields.len(),
        });
    }
    let key = fields[..key_len]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.parse::<u32>().map_err(|_| ParseErrorKind::InvalidInt {
                field: i + 1,
                value: v.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let raw = fields[key_len];
    let weight: f64 = raw.parse().map_err(|_| ParseErrorKind::InvalidFloat {
        field: key_len + 1,
        value: raw.to_string(),
    })?;
    check_weight(weight)?;
    Ok((BinKey::from(key), weight))
}

fn check_weight(weight: f64) -> Result<(), ParseErrorKind> {
    if weight > 0.0 && weight <= 1.0 {
        Ok(())
    } else {
        Err(ParseErrorKind::WeightOutOfRange(weight))
    }
}
