//! Statsd line parser.
//!
//! Accepts the DogStatsD dialect of the statsd line protocol:
//!
//! ```text
//! <name>:<value>[:<value>...]|<type>[|@<sample_rate>][|#<tag>[,<tag>...]]
//! ```
//!
//! where `<type>` is one of `c`, `g`, `ms`, `h`, `d` or `s`, and each tag is
//! either `key:value` or a bare `key`. Event (`_e{...}`) and service check
//! (`_sc|...`) lines are recognized and ignored.
use std::collections::BTreeMap;

/// Kind of a statsd sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Timing,
    Set,
}

impl MetricType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Counter),
            "g" => Some(Self::Gauge),
            "ms" | "h" | "d" => Some(Self::Timing),
            "s" => Some(Self::Set),
            _ => None,
        }
    }
}

/// Value carried by a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue<'a> {
    Number(f64),
    /// A gauge value prefixed with `+` or `-`, applied to the current value.
    Delta(f64),
    /// A set member, kept verbatim.
    Member(&'a str),
}

/// One decoded sample. A packed line yields one sample per value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub metric_type: MetricType,
    pub value: SampleValue<'a>,
    pub sample_rate: f64,
    pub tags: BTreeMap<String, String>,
}

/// Errors that may occur when parsing a statsd line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing `:` between name and value in line: `{0}`")]
    MissingValue(String),
    #[error("missing metric type in line: `{0}`")]
    MissingType(String),
    #[error("unknown metric type `{kind}` in line: `{line}`")]
    UnknownType { kind: String, line: String },
    #[error("invalid value `{value}` in line: `{line}`")]
    InvalidValue { value: String, line: String },
    #[error("invalid sample rate `{rate}` in line: `{line}`")]
    InvalidSampleRate { rate: String, line: String },
}

/// Parses a single statsd line into its samples.
///
/// Returns an empty vector for events and service checks.
///
/// # Errors
///
/// Returns [`ParseError`] variants for malformed names, values, types or
/// sample rates.
pub fn parse_line(line: &str) -> Result<Vec<Sample<'_>>, ParseError> {
    if line.starts_with("_e{") || line.starts_with("_sc|") {
        return Ok(Vec::new());
    }

    let mut sections = line.split('|');
    let head = sections.next().unwrap_or_default();
    let (name, values) = head
        .split_once(':')
        .filter(|(name, values)| !name.is_empty() && !values.is_empty())
        .ok_or_else(|| ParseError::MissingValue(line.to_owned()))?;

    let code = sections
        .next()
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ParseError::MissingType(line.to_owned()))?;
    let metric_type = MetricType::from_code(code).ok_or_else(|| ParseError::UnknownType {
        kind: code.to_owned(),
        line: line.to_owned(),
    })?;

    let mut sample_rate = 1.0;
    let mut tags = BTreeMap::new();
    for section in sections {
        if let Some(rate) = section.strip_prefix('@') {
            sample_rate = rate
                .parse::<f64>()
                .ok()
                .filter(|r| *r > 0.0 && *r <= 1.0)
                .ok_or_else(|| ParseError::InvalidSampleRate {
                    rate: rate.to_owned(),
                    line: line.to_owned(),
                })?;
        } else if let Some(raw_tags) = section.strip_prefix('#') {
            parse_tags(raw_tags, &mut tags);
        }
    }

    values
        .split(':')
        .map(|raw| {
            let value = parse_value(raw, metric_type).ok_or_else(|| ParseError::InvalidValue {
                value: raw.to_owned(),
                line: line.to_owned(),
            })?;
            Ok(Sample {
                name,
                metric_type,
                value,
                sample_rate,
                tags: tags.clone(),
            })
        })
        .collect()
}

fn parse_value(raw: &str, metric_type: MetricType) -> Option<SampleValue<'_>> {
    match metric_type {
        MetricType::Set => (!raw.is_empty()).then_some(SampleValue::Member(raw)),
        MetricType::Gauge if raw.starts_with(['+', '-']) => {
            raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(SampleValue::Delta)
        }
        _ => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(SampleValue::Number),
    }
}

fn parse_tags(raw: &str, tags: &mut BTreeMap<String, String>) {
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match tag.split_once(':') {
            Some((key, value)) => tags.insert(key.to_owned(), value.to_owned()),
            None => tags.insert(tag.to_owned(), "true".to_owned()),
        };
    }
}
