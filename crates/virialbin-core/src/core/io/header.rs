use crate::core::bins::StoreShape;
use crate::engine::error::ParseErrorKind;
use std::collections::HashMap;
use std::fmt;

pub const RAW_MAGIC: &str = "virialbin-raw";
pub const WEIGHTS_MAGIC: &str = "virialbin-weights";

/// First line of a raw statistics file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub shape: StoreShape,
    pub total_steps: u64,
}

/// First line of a weight file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightHeader {
    pub shape: StoreShape,
    pub nominal: f64,
}

impl fmt::Display for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "# {} {} steps={}", RAW_MAGIC, self.shape, self.total_steps)
    }
}

impl fmt::Display for WeightHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "# {} n={} nn={} key={} nominal={:e}",
            WEIGHTS_MAGIC, self.shape.n, self.shape.nn, self.shape.key_len, self.nominal
        )
    }
}

struct HeaderFields<'a>(HashMap<&'a str, &'a str>);

impl<'a> HeaderFields<'a> {
    fn parse(line: &'a str, magic: &str) -> Result<Self, ParseErrorKind> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("#") || tokens.next() != Some(magic) {
            return Err(ParseErrorKind::InvalidHeader(format!(
                "expected '# {magic} ...', found '{}'",
                line.trim_end()
            )));
        }
        let mut fields = HashMap::new();
        for token in tokens {
            let (name, value) = token.split_once('=').ok_or_else(|| {
                ParseErrorKind::InvalidHeader(format!("'{token}' is not a name=value pair"))
            })?;
            fields.insert(name, value);
        }
        Ok(Self(fields))
    }

    fn get<T: std::str::FromStr>(&self, name: &str) -> Result<T, ParseErrorKind> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| ParseErrorKind::InvalidHeader(format!("missing field '{name}'")))?;
        value.parse().map_err(|_| {
            ParseErrorKind::InvalidHeader(format!("invalid value '{value}' for '{name}'"))
        })
    }

    fn shape(&self, covariance: bool) -> Result<StoreShape, ParseErrorKind> {
        let shape = StoreShape {
            n: self.get("n")?,
            nn: self.get("nn")?,
            key_len: self.get("key")?,
            covariance,
        };
        if !shape.is_consistent() {
            return Err(ParseErrorKind::InvalidHeader(format!(
                "nn={} does not match n={}",
                shape.nn, shape.n
            )));
        }
        Ok(shape)
    }
}

impl RawHeader {
    pub fn parse(line: &str) -> Result<Self, ParseErrorKind> {
        let fields = HeaderFields::parse(line, RAW_MAGIC)?;
        let covariance = match fields.get::<u8>("cov")? {
            0 => false,
            1 => true,
            other => {
                return Err(ParseErrorKind::InvalidHeader(format!(
                    "cov must be 0 or 1, found {other}"
                )));
            }
        };
        Ok(Self {
            shape: fields.shape(covariance)?,
            total_steps: fields.get("steps")?,
        })
    }

    /// Number of whitespace-separated fields in every record of this file.
    pub fn record_len(&self) -> usize {
        record_len(&self.shape)
    }
}

/// Fields per raw record: key, two counters, sums, sums of squares and cross moments.
pub fn record_len(shape: &StoreShape) -> usize {
    let pairs = if shape.covariance {
        shape.pair_count()
    } else {
        0
    };
    shape.key_len + 2 + 2 * shape.nn + pairs
}

impl WeightHeader {
    pub fn parse(line: &str) -> Result<Self, ParseErrorKind> {
        let fields = HeaderFields::parse(line, WEIGHTS_MAGIC)?;
        Ok(Self {
            shape: fields.shape(false)?,
            nominal: fields.get("nominal")?,
        })
    }
}
