use super::header::RawHeader;
use crate::core::bins::{BinAccumulator, BinKey, StoreShape};
use crate::engine::config::ConfigError;
use crate::engine::error::{ParseErrorKind, VirialError};
use crate::engine::store::{AggregationStore, BinView};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Streams the bins of a raw statistics file in key order.
///
/// Every record is validated as it is read: field count and numeric syntax, counters
/// consistency, and strictly increasing keys.
pub struct RawReader {
    path: PathBuf,
    header: RawHeader,
    drop_covariance: bool,
    records: csv::Reader<BufReader<File>>,
    record: csv::StringRecord,
    previous: Option<BinKey>,
}

impl RawReader {
    pub fn open(path: &Path) -> Result<Self, VirialError> {
        let file = File::open(path).map_err(|e| VirialError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut first = String::new();
        let read = reader
            .read_line(&mut first)
            .map_err(|e| VirialError::io(path, e))?;
        if read == 0 {
            return Err(VirialError::parse(path, 1, ParseErrorKind::MissingHeader));
        }
        let header = RawHeader::parse(&first).map_err(|kind| VirialError::parse(path, 1, kind))?;

        let records = csv::ReaderBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        Ok(Self {
            path: path.to_path_buf(),
            header,
            drop_covariance: false,
            records,
            record: csv::StringRecord::new(),
            previous: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &RawHeader {
        &self.header
    }

    pub fn total_steps(&self) -> u64 {
        self.header.total_steps
    }

    /// The shape of the bins this reader yields.
    pub fn shape(&self) -> StoreShape {
        if self.drop_covariance {
            self.header.shape.without_covariance()
        } else {
            self.header.shape
        }
    }

    /// Makes the reader yield bins of `target` shape.
    ///
    /// A file with cross moments read into a shape without them has its cross moments
    /// discarded; any other difference is a dimension mismatch.
    pub fn conform(&mut self, target: StoreShape) -> Result<(), VirialError> {
        let found = self.header.shape;
        if !found.same_dimensions(&target) || (target.covariance && !found.covariance) {
            return Err(VirialError::parse(
                &self.path,
                1,
                ParseErrorKind::DimensionMismatch {
                    expected: target.to_string(),
                    found: found.to_string(),
                },
            ));
        }
        self.drop_covariance = found.covariance && !target.covariance;
        Ok(())
    }

    pub fn next_bin(&mut self) -> Result<Option<(BinKey, BinAccumulator)>, VirialError> {
        let more = self.records.read_record(&mut self.record).map_err(|e| {
            let line = e.position().map_or(0, |p| p.line() as usize + 1);
            VirialError::parse(&self.path, line, ParseErrorKind::Malformed(e))
        })?;
        if !more {
            return Ok(None);
        }
        let line = self
            .record
            .position()
            .map_or(0, |p| p.line() as usize + 1);
        let (key, mut acc) = self
            .parse_record()
            .map_err(|kind| VirialError::parse(&self.path, line, kind))?;

        if let Some(previous) = &self.previous
            && previous >= &key
        {
            return Err(VirialError::parse(
                &self.path,
                line,
                ParseErrorKind::UnsortedKeys {
                    previous: previous.to_string(),
                    current: key.to_string(),
                },
            ));
        }
        self.previous = Some(key.clone());

        if self.drop_covariance {
            acc.drop_covariance();
        }
        Ok(Some((key, acc)))
    }

    fn parse_record(&self) -> Result<(BinKey, BinAccumulator), ParseErrorKind> {
        let shape = self.header.shape;
        let expected = self.header.record_len();
        if self.record.len() != expected {
            return Err(ParseErrorKind::FieldCount {
                expected,
                found: self.record.len(),
            });
        }

        let mut fields = self.record.iter().enumerate();
        let key: Vec<u32> = fields
            .by_ref()
            .take(shape.key_len)
            .map(|(i, v)| parse_int(i, v))
            .collect::<Result<_, _>>()?;
        let mut counter = || -> Result<u64, ParseErrorKind> {
            let (i, v) = fields.next().unwrap_or((expected, ""));
            parse_int(i, v)
        };
        let unscreened = counter()?;
        let samples = counter()?;
        if samples > unscreened {
            return Err(ParseErrorKind::SampleCountExceedsUnscreened {
                samples,
                unscreened,
            });
        }

        let mut floats = |count: usize| -> Result<Vec<f64>, ParseErrorKind> {
            fields
                .by_ref()
                .take(count)
                .map(|(i, v)| parse_float(i, v))
                .collect()
        };
        let sum = floats(shape.nn)?;
        let sum_sq = floats(shape.nn)?;
        let pair_sum = if shape.covariance {
            Some(floats(shape.pair_count())?)
        } else {
            None
        };

        Ok((
            BinKey::from(key),
            BinAccumulator::from_parts(unscreened, samples, sum, sum_sq, pair_sum),
        ))
    }
}

fn parse_int<T: std::str::FromStr>(field: usize, value: &str) -> Result<T, ParseErrorKind> {
    value.parse().map_err(|_| ParseErrorKind::InvalidInt {
        field: field + 1,
        value: value.to_string(),
    })
}

fn parse_float(field: usize, value: &str) -> Result<f64, ParseErrorKind> {
    value.parse().map_err(|_| ParseErrorKind::InvalidFloat {
        field: field + 1,
        value: value.to_string(),
    })
}

impl Iterator for RawReader {
    type Item = Result<(BinKey, BinAccumulator), VirialError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_bin().transpose()
    }
}

/// Writes bins one at a time under a raw header.
///
/// Floats are written in shortest round-trip scientific notation, so reading the file
/// back reproduces every accumulator exactly.
pub struct RawWriter<W: Write> {
    path: PathBuf,
    shape: StoreShape,
    writer: csv::Writer<W>,
    fields: Vec<String>,
}

impl RawWriter<BufWriter<NamedTempFile>> {
    /// Stages the output in a temporary file next to `path`. Nothing appears at `path`
    /// until [`RawWriter::persist`] succeeds.
    pub fn create(path: &Path, header: RawHeader) -> Result<Self, VirialError> {
        let file = staging_file(path)?;
        Self::new(BufWriter::new(file), path, header)
    }

    /// Flushes the staged file and moves it to its final path.
    pub fn persist(self) -> Result<(), VirialError> {
        let path = self.path.clone();
        let staged = self
            .into_inner()?
            .into_inner()
            .map_err(|e| VirialError::io(&path, e.into_error()))?;
        staged
            .persist(&path)
            .map_err(|e| VirialError::io(&path, e.error))?;
        Ok(())
    }
}

/// An unnamed-until-persisted file in the directory of `path`.
pub(crate) fn staging_file(path: &Path) -> Result<NamedTempFile, VirialError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir).map_err(|e| VirialError::io(path, e))
}

impl<W: Write> RawWriter<W> {
    /// Wraps `inner`, writing the header immediately. `path` is only used in errors.
    pub fn new(mut inner: W, path: &Path, header: RawHeader) -> Result<Self, VirialError> {
        writeln!(inner, "{header}").map_err(|e| VirialError::io(path, e))?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(inner);
        Ok(Self {
            path: path.to_path_buf(),
            shape: header.shape,
            writer,
            fields: Vec::new(),
        })
    }

    pub fn write_bin(&mut self, key: &BinKey, acc: &BinAccumulator) -> Result<(), VirialError> {
        self.fields.clear();
        self.fields.extend(key.values().iter().map(u32::to_string));
        self.fields.push(acc.unscreened_count().to_string());
        self.fields.push(acc.sample_count().to_string());
        self.fields.extend(acc.sums().iter().map(|v| format!("{v:e}")));
        self.fields.extend(acc.sums_sq().iter().map(|v| format!("{v:e}")));
        if self.shape.covariance {
            let pairs = acc.pair_sums().ok_or_else(|| {
                VirialError::Internal(format!("bin {key} has no cross moments to write"))
            })?;
            self.fields.extend(pairs.iter().map(|v| format!("{v:e}")));
        }
        self.writer
            .write_record(&self.fields)
            .map_err(|e| VirialError::io(&self.path, e.into()))
    }

    /// Flushes everything to the underlying writer.
    pub fn finish(self) -> Result<(), VirialError> {
        self.into_inner().map(drop)
    }

    fn into_inner(self) -> Result<W, VirialError> {
        let mut inner = self
            .writer
            .into_inner()
            .map_err(|e| VirialError::io(&self.path, e.into_error()))?;
        inner.flush().map_err(|e| VirialError::io(&self.path, e))?;
        Ok(inner)
    }
}

/// Writes every bin of `view`, sorted by key, to `path`.
///
/// The file only appears at `path` once it is complete.
pub fn write_raw(
    view: &(impl BinView + ?Sized),
    total_steps: u64,
    path: &Path,
) -> Result<(), VirialError> {
    let mut writer = RawWriter::create(path, raw_header(view, total_steps))?;
    write_bins(view, &mut writer)?;
    writer.persist()
}

/// Like [`write_raw`], to an already open writer.
pub fn write_raw_to<W: Write>(
    view: &(impl BinView + ?Sized),
    total_steps: u64,
    writer: W,
    path: &Path,
) -> Result<(), VirialError> {
    let mut writer = RawWriter::new(writer, path, raw_header(view, total_steps))?;
    write_bins(view, &mut writer)?;
    writer.finish()
}

fn raw_header(view: &(impl BinView + ?Sized), total_steps: u64) -> RawHeader {
    RawHeader {
        shape: view.shape(),
        total_steps,
    }
}

fn write_bins<W: Write>(
    view: &(impl BinView + ?Sized),
    writer: &mut RawWriter<W>,
) -> Result<(), VirialError> {
    let mut failure = None;
    view.for_each_bin(&mut |key, acc| {
        if failure.is_none()
            && let Err(e) = writer.write_bin(key, acc)
        {
            failure = Some(e);
        }
    });
    failure.map_or(Ok(()), Err)
}

/// Reads a whole raw file into a store, returning it with the file's step count.
pub fn read_raw(
    path: &Path,
    expected: Option<StoreShape>,
) -> Result<(AggregationStore, u64), VirialError> {
    let mut reader = RawReader::open(path)?;
    if let Some(target) = expected {
        reader.conform(target)?;
    }
    let steps = reader.total_steps();
    let mut store = AggregationStore::new(reader.shape());
    for bin in reader {
        let (key, acc) = bin?;
        store.absorb(key, acc);
    }
    Ok((store, steps))
}

/// Opens every file and conforms them to one shape.
///
/// Without an expected shape, the shape is that of the first file, with cross moments
/// kept only if every file has them.
pub fn open_all(
    paths: &[PathBuf],
    expected: Option<StoreShape>,
) -> Result<(Vec<RawReader>, StoreShape), VirialError> {
    let mut readers = paths
        .iter()
        .map(|p| RawReader::open(p))
        .collect::<Result<Vec<_>, _>>()?;
    let target = match expected {
        Some(shape) => shape,
        None => {
            let first = readers.first().ok_or(ConfigError::Invalid {
                parameter: "inputs",
                reason: "no raw files given".into(),
            })?;
            let covariance = readers.iter().all(|r| r.header().shape.covariance);
            StoreShape {
                covariance,
                ..first.header().shape
            }
        }
    };
    for reader in &mut readers {
        reader.conform(target)?;
    }
    Ok((readers, target))
}

/// Merges several raw files in memory.
pub fn merge_raw_files(
    paths: &[PathBuf],
    expected: Option<StoreShape>,
) -> Result<(AggregationStore, u64), VirialError> {
    let (readers, shape) = open_all(paths, expected)?;
    let mut store = AggregationStore::new(shape);
    let mut steps = 0;
    for reader in readers {
        steps += reader.total_steps();
        for bin in reader {
            let (key, acc) = bin?;
            store.absorb(key, acc);
        }
    }
    Ok((store, steps))
}
