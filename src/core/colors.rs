// Color tables: the `colr` text format, value lookup, and integer range derivation.
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(level: u8) -> Self {
        Self::new(level, level, level)
    }

    fn blend(self, other: Rgb, t: f64) -> Rgb {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

/// One linear ramp between two cell values. A single-value rule has `low == high`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ColorRule {
    pub low: f64,
    pub low_color: Rgb,
    pub high: f64,
    pub high_color: Rgb,
}

impl ColorRule {
    fn contains(&self, value: f64) -> bool {
        self.low <= value && value <= self.high
    }

    fn color_at(&self, value: f64) -> Rgb {
        if self.high <= self.low {
            return self.low_color;
        }
        let t = (value - self.low) / (self.high - self.low);
        self.low_color.blend(self.high_color, t)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColorTable {
    min: f64,
    max: f64,
    rules: Vec<ColorRule>,
    null_color: Option<Rgb>,
    default_color: Option<Rgb>,
}

impl ColorTable {
    /// Builds a table from rules alone; the value range is the span of the rules.
    pub fn from_rules(rules: Vec<ColorRule>) -> Result<Self, Error> {
        let (min, max) = span_of(&rules).ok_or_else(|| {
            Error::new(ErrorKind::Corrupt).with_message("color table has no rules")
        })?;
        if !in_cell_range(min) || !in_cell_range(max) {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("color rule value outside the cell value range"));
        }
        Ok(Self {
            min,
            max,
            rules,
            null_color: None,
            default_color: None,
        })
    }

    /// A gray ramp from black at `min` to white at `max`.
    pub fn grey_ramp(min: i32, max: i32) -> Self {
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: low as f64,
            max: high as f64,
            rules: vec![ColorRule {
                low: low as f64,
                low_color: Rgb::gray(0),
                high: high as f64,
                high_color: Rgb::gray(255),
            }],
            null_color: None,
            default_color: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut header: Option<(f64, f64)> = None;
        let mut rules = Vec::new();
        let mut null_color = None;
        let mut default_color = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('%') {
                header = Some(parse_range_header(rest, line_no)?);
                continue;
            }
            if let Some(rest) = line.strip_prefix("nv:") {
                null_color = Some(parse_components(rest, line_no)?);
                continue;
            }
            if let Some(rest) = line.strip_prefix("*:") {
                default_color = Some(parse_components(rest, line_no)?);
                continue;
            }

            let mut tokens = line.split_whitespace();
            let (low, low_color) = parse_point(tokens.next().unwrap_or_default(), line_no)?;
            let (high, high_color) = match tokens.next() {
                Some(token) => parse_point(token, line_no)?,
                None => (low, low_color),
            };
            if tokens.next().is_some() {
                return Err(corrupt_line(line_no, "too many points in rule"));
            }
            let rule = if low <= high {
                ColorRule {
                    low,
                    low_color,
                    high,
                    high_color,
                }
            } else {
                ColorRule {
                    low: high,
                    low_color: high_color,
                    high: low,
                    high_color: low_color,
                }
            };
            rules.push(rule);
        }

        let (min, max) = match header.or_else(|| span_of(&rules)) {
            Some(range) => range,
            None => {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message("color table has neither a range header nor rules"));
            }
        };

        Ok(Self {
            min,
            max,
            rules,
            null_color,
            default_color,
        })
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Integer range covering the table: `(floor(min), ceil(max))`.
    pub fn int_range(&self) -> (i32, i32) {
        (self.min.floor() as i32, self.max.ceil() as i32)
    }

    pub fn rules(&self) -> &[ColorRule] {
        &self.rules
    }

    pub fn null_color(&self) -> Option<Rgb> {
        self.null_color
    }

    pub fn default_color(&self) -> Option<Rgb> {
        self.default_color
    }

    pub fn lookup(&self, value: f64) -> Option<Rgb> {
        if value.is_nan() {
            return self.null_color;
        }
        self.rules
            .iter()
            .find(|rule| rule.contains(value))
            .map(|rule| rule.color_at(value))
            .or(self.default_color)
    }
}

fn span_of(rules: &[ColorRule]) -> Option<(f64, f64)> {
    let min = rules.iter().map(|rule| rule.low).reduce(f64::min)?;
    let max = rules.iter().map(|rule| rule.high).reduce(f64::max)?;
    Some((min, max))
}

// Cell values are 32-bit integers, so the integer range must fit in an i32.
fn in_cell_range(value: f64) -> bool {
    value.is_finite() && value >= i32::MIN as f64 && value <= i32::MAX as f64
}

fn parse_range_header(rest: &str, line_no: usize) -> Result<(f64, f64), Error> {
    let mut parts = rest.split_whitespace();
    let min = parse_value(parts.next(), line_no)?;
    let max = parse_value(parts.next(), line_no)?;
    if parts.next().is_some() {
        return Err(corrupt_line(line_no, "trailing data after range header"));
    }
    if min > max {
        return Err(corrupt_line(line_no, "range header min exceeds max"));
    }
    Ok((min, max))
}

fn parse_point(token: &str, line_no: usize) -> Result<(f64, Rgb), Error> {
    let (value, components) = token
        .split_once(':')
        .ok_or_else(|| corrupt_line(line_no, "expected value:color"))?;
    let value = parse_value(Some(value), line_no)?;
    Ok((value, parse_components(components, line_no)?))
}

fn parse_value(token: Option<&str>, line_no: usize) -> Result<f64, Error> {
    let token = token.ok_or_else(|| corrupt_line(line_no, "missing value"))?;
    match token.parse::<f64>() {
        Ok(value) if in_cell_range(value) => Ok(value),
        _ => Err(corrupt_line(line_no, "invalid value")),
    }
}

fn parse_components(text: &str, line_no: usize) -> Result<Rgb, Error> {
    let parts = text
        .split(':')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| corrupt_line(line_no, "color component must be 0..=255"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [level] => Ok(Rgb::gray(*level)),
        [r, g, b] => Ok(Rgb::new(*r, *g, *b)),
        _ => Err(corrupt_line(line_no, "expected 1 or 3 color components")),
    }
}

fn corrupt_line(line_no: usize, message: &str) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(format!("line {line_no}: {message}"))
}
