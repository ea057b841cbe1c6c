//! Typed value catalogue entries: storage, per-type render/parse, and the
//! change-tracking flags transmitted alongside every update.
//!
//! Replaces the original polymorphic `Value` class hierarchy with a single
//! tagged-variant type (`ValueData`) carrying the storage, paired with a
//! `ValueTypeTag` used for the wire's type bits — per the REDESIGN note on
//! the value type hierarchy.
pub mod catalogue;
pub mod types;

use crate::error::{ProtoError, ProtoErrorKind};
pub use catalogue::Catalogue;
pub use types::{ValueTypeTag, flags};

#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    Str(String),
    Int(Option<i64>),
    LongInt(Option<i64>),
    Double(f64),
    Float(f64),
    Time(f64),
    Bool(Option<bool>),
    Selection { index: i64, labels: Vec<String> },
    RaDec { ra: f64, dec: f64 },
    AltAz { alt: f64, az: f64 },
    Stat { value: f64, stats: Statistics },
    /// PID/MMAX/RECTANGLE/ARRAY/TIMESERIE: the runtime has no behavior
    /// specific to these beyond metadata announcement, so they carry an
    /// opaque, verbatim-rendered payload (see SPEC_FULL.md §3).
    Opaque(String),
}

/// Running statistics (Welford's algorithm), carried by `ValueData::Stat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub count: u64,
    pub mean: f64,
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Statistics {
    fn default() -> Self {
        Statistics {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Statistics {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / self.count as f64
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    name: String,
    description: String,
    type_tag: ValueTypeTag,
    /// Flag bits only (WRITABLE/FITS/CHANGED/... — never the type bits).
    flag_bits: u32,
    data: ValueData,
}

impl Value {
    fn new(name: impl Into<String>, description: impl Into<String>, type_tag: ValueTypeTag, data: ValueData) -> Self {
        Value {
            name: name.into(),
            description: description.into(),
            type_tag,
            // A freshly registered value is always announced on first connect.
            flag_bits: flags::FITS | flags::NEED_SEND,
            data,
        }
    }

    pub fn new_string(name: impl Into<String>, description: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, description, ValueTypeTag::String, ValueData::Str(default.into()))
    }

    pub fn new_integer(name: impl Into<String>, description: impl Into<String>, default: Option<i64>) -> Self {
        Self::new(name, description, ValueTypeTag::Integer, ValueData::Int(default))
    }

    pub fn new_long_int(name: impl Into<String>, description: impl Into<String>, default: Option<i64>) -> Self {
        Self::new(name, description, ValueTypeTag::LongInt, ValueData::LongInt(default))
    }

    pub fn new_double(name: impl Into<String>, description: impl Into<String>, default: Option<f64>) -> Self {
        Self::new(
            name,
            description,
            ValueTypeTag::Double,
            ValueData::Double(default.unwrap_or(f64::NAN)),
        )
    }

    pub fn new_float(name: impl Into<String>, description: impl Into<String>, default: Option<f64>) -> Self {
        Self::new(
            name,
            description,
            ValueTypeTag::Float,
            ValueData::Float(default.unwrap_or(f64::NAN)),
        )
    }

    pub fn new_time(name: impl Into<String>, description: impl Into<String>, default: Option<f64>) -> Self {
        let mut v = Self::new(
            name,
            description,
            ValueTypeTag::Time,
            ValueData::Time(default.unwrap_or(f64::NAN)),
        );
        v.flag_bits &= !flags::FITS; // times are not archived to FITS by default
        v
    }

    pub fn new_bool(name: impl Into<String>, description: impl Into<String>, default: Option<bool>) -> Self {
        Self::new(name, description, ValueTypeTag::Bool, ValueData::Bool(default))
    }

    pub fn new_selection(name: impl Into<String>, description: impl Into<String>, labels: Vec<String>, default: i64) -> Self {
        Self::new(
            name,
            description,
            ValueTypeTag::Selection,
            ValueData::Selection { index: default, labels },
        )
    }

    pub fn new_radec(name: impl Into<String>, description: impl Into<String>, default: Option<(f64, f64)>) -> Self {
        let (ra, dec) = default.unwrap_or((f64::NAN, f64::NAN));
        Self::new(name, description, ValueTypeTag::RaDec, ValueData::RaDec { ra, dec })
    }

    pub fn new_altaz(name: impl Into<String>, description: impl Into<String>, default: Option<(f64, f64)>) -> Self {
        let (alt, az) = default.unwrap_or((f64::NAN, f64::NAN));
        Self::new(name, description, ValueTypeTag::AltAz, ValueData::AltAz { alt, az })
    }

    pub fn new_stat(name: impl Into<String>, description: impl Into<String>, default: Option<f64>) -> Self {
        Self::new(
            name,
            description,
            ValueTypeTag::Stat,
            ValueData::Stat {
                value: default.unwrap_or(f64::NAN),
                stats: Statistics::default(),
            },
        )
    }

    pub fn with_writable(mut self, writable: bool) -> Self {
        if writable {
            self.flag_bits |= flags::WRITABLE;
        } else {
            self.flag_bits &= !flags::WRITABLE;
        }
        self
    }

    pub fn with_fits(mut self, fits: bool) -> Self {
        if fits {
            self.flag_bits |= flags::FITS;
        } else {
            self.flag_bits &= !flags::FITS;
        }
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        if autosave {
            self.flag_bits |= flags::AUTOSAVE;
        } else {
            self.flag_bits &= !flags::AUTOSAVE;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn is_writable(&self) -> bool {
        self.flag_bits & flags::WRITABLE != 0
    }

    pub fn was_changed(&self) -> bool {
        self.flag_bits & flags::CHANGED != 0
    }

    pub fn need_send(&self) -> bool {
        self.flag_bits & flags::NEED_SEND != 0
    }

    pub fn reset_need_send(&mut self) {
        self.flag_bits &= !flags::NEED_SEND;
    }

    pub fn reset_changed(&mut self) {
        self.flag_bits &= !flags::CHANGED;
    }

    /// Sets the CHANGED and NEED_SEND bits, invariant (b) of §3.
    fn mark_changed(&mut self) {
        self.flag_bits |= flags::CHANGED | flags::NEED_SEND;
    }

    pub fn mask_error(&mut self, error: u32) {
        self.flag_bits = (self.flag_bits & !flags::ERROR_MASK) | (error & flags::ERROR_MASK);
    }

    pub fn is_error(&self) -> bool {
        self.flag_bits & flags::ERROR != 0
    }

    pub fn is_warning(&self) -> bool {
        self.flag_bits & flags::WARNING != 0
    }

    /// The combined word sent as `M <bits> ...`.
    pub fn meta_type_bits(&self) -> u32 {
        self.type_tag.bits() | self.flag_bits
    }

    pub fn type_tag(&self) -> ValueTypeTag {
        self.type_tag
    }

    pub fn selection_labels(&self) -> Option<&[String]> {
        match &self.data {
            ValueData::Selection { labels, .. } => Some(labels),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match &self.data {
            ValueData::Str(s) => s.is_empty(),
            ValueData::Int(v) | ValueData::LongInt(v) => v.is_none(),
            ValueData::Double(v) | ValueData::Float(v) | ValueData::Time(v) => v.is_nan(),
            ValueData::Bool(v) => v.is_none(),
            ValueData::Selection { .. } => false,
            ValueData::RaDec { ra, dec } => ra.is_nan() || dec.is_nan(),
            ValueData::AltAz { alt, az } => alt.is_nan() || az.is_nan(),
            ValueData::Stat { value, .. } => value.is_nan(),
            ValueData::Opaque(s) => s.is_empty(),
        }
    }

    /// Renders the current value per the §4.6 table.
    pub fn render(&self) -> String {
        match &self.data {
            ValueData::Str(s) => s.clone(),
            ValueData::Int(v) | ValueData::LongInt(v) => v.map(|n| n.to_string()).unwrap_or_default(),
            ValueData::Double(v) | ValueData::Float(v) | ValueData::Time(v) => render_double(*v),
            ValueData::Bool(v) => match v {
                Some(true) => "true".to_string(),
                Some(false) => "false".to_string(),
                None => "unknown".to_string(),
            },
            ValueData::Selection { index, labels } => {
                if labels.is_empty() || (*index >= 0 && (*index as usize) < labels.len()) {
                    index.to_string()
                } else {
                    "0".to_string()
                }
            }
            ValueData::RaDec { ra, dec } => format!("{} {}", render_double(*ra), render_double(*dec)),
            ValueData::AltAz { alt, az } => format!("{} {}", render_double(*alt), render_double(*az)),
            ValueData::Stat { value, .. } => render_double(*value),
            ValueData::Opaque(s) => s.clone(),
        }
    }

    /// Applies a locally-originated (hardware-driver) change. Returns
    /// `true` if the stored value actually changed.
    pub fn set_local(&mut self, new_data: ValueData) -> Result<bool, ProtoError> {
        let changed = self.data != new_data;
        if let ValueData::Stat { value, stats } = &mut self.data {
            if let ValueData::Stat { value: new_value, .. } = &new_data {
                *value = *new_value;
                if !new_value.is_nan() {
                    stats.update(*new_value);
                }
            }
        } else {
            self.data = new_data;
        }
        if changed {
            self.mark_changed();
        }
        Ok(changed)
    }

    /// Parses and applies a network-originated write (`X <name> = <raw>`),
    /// per the §4.6 parse table. Returns `true` if the value actually
    /// changed. Does not mutate on parse failure (invariant: preserve old
    /// value, §7).
    pub fn update_from_network(&mut self, raw: &str) -> Result<bool, ProtoError> {
        let parsed = self.parse(raw)?;
        let changed = self.data != parsed;
        self.data = parsed;
        if changed {
            self.mark_changed();
        }
        Ok(changed)
    }

    fn parse(&self, raw: &str) -> Result<ValueData, ProtoError> {
        match &self.data {
            ValueData::Str(_) => Ok(ValueData::Str(raw.to_string())),
            ValueData::Int(_) => Ok(ValueData::Int(parse_opt_int(raw)?)),
            ValueData::LongInt(_) => Ok(ValueData::LongInt(parse_opt_int(raw)?)),
            ValueData::Double(_) => Ok(ValueData::Double(parse_double(raw)?)),
            ValueData::Float(_) => Ok(ValueData::Float(parse_double(raw)?)),
            ValueData::Time(_) => Ok(ValueData::Time(parse_double(raw)?)),
            ValueData::Bool(_) => Ok(ValueData::Bool(parse_bool(raw)?)),
            ValueData::Selection { labels, .. } => {
                let index = parse_selection(raw, labels)?;
                Ok(ValueData::Selection { index, labels: labels.clone() })
            }
            ValueData::RaDec { .. } => {
                let (a, b) = parse_pair(raw)?;
                Ok(ValueData::RaDec { ra: a, dec: b })
            }
            ValueData::AltAz { .. } => {
                let (a, b) = parse_pair(raw)?;
                Ok(ValueData::AltAz { alt: a, az: b })
            }
            ValueData::Stat { stats, .. } => {
                let v = parse_double(raw)?;
                let mut stats = *stats;
                if !v.is_nan() {
                    stats.update(v);
                }
                Ok(ValueData::Stat { value: v, stats })
            }
            ValueData::Opaque(_) => Ok(ValueData::Opaque(raw.to_string())),
        }
    }

    pub fn add_selection_label(&mut self, label: impl Into<String>) {
        if let ValueData::Selection { labels, .. } = &mut self.data {
            labels.push(label.into());
        }
    }
}

/// `%.20e`-equivalent rendering with C-style `e+NN`/`e-NN` exponent.
fn render_double(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    let s = format!("{v:.20e}");
    let (mantissa, exp) = s.split_once('e').expect("Rust exponential format always has 'e'");
    let exp_val: i32 = exp.parse().expect("exponent is a valid integer");
    format!("{mantissa}e{}{:02}", if exp_val < 0 { "-" } else { "+" }, exp_val.abs())
}

fn parse_double(raw: &str) -> Result<f64, ProtoError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    trimmed
        .parse::<f64>()
        .map_err(|e| ProtoError::conversion(format!("invalid double '{raw}': {e}")))
}

fn parse_opt_int(raw: &str) -> Result<Option<i64>, ProtoError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|e| ProtoError::conversion(format!("invalid integer '{raw}': {e}")))
}

fn parse_bool(raw: &str) -> Result<Option<bool>, ProtoError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(Some(true)),
        "false" | "off" | "0" | "no" => Ok(Some(false)),
        other => Err(ProtoError::conversion(format!("invalid boolean '{other}'"))),
    }
}

fn parse_selection(raw: &str, labels: &[String]) -> Result<i64, ProtoError> {
    let trimmed = raw.trim();
    if let Ok(idx) = trimmed.parse::<i64>() {
        if idx >= 0 && (idx as usize) < labels.len() {
            return Ok(idx);
        }
        return Err(ProtoError::invalid_selection(format!(
            "selection index {idx} out of range (0..{})",
            labels.len()
        )));
    }
    labels
        .iter()
        .position(|l| l == trimmed)
        .map(|i| i as i64)
        .ok_or_else(|| ProtoError::invalid_selection(format!("unknown selection label '{trimmed}'")))
}

fn parse_pair(raw: &str) -> Result<(f64, f64), ProtoError> {
    let mut parts = raw.split_whitespace();
    let a = parts
        .next()
        .ok_or_else(|| ProtoError::conversion("expected two whitespace-separated floats"))?;
    let b = parts
        .next()
        .ok_or_else(|| ProtoError::conversion("expected two whitespace-separated floats"))?;
    if parts.next().is_some() {
        return Err(ProtoError::conversion("expected exactly two floats"));
    }
    Ok((parse_double(a)?, parse_double(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_round_trips_through_render_and_parse() {
        let v = Value::new_double("foo", "", Some(2.5));
        let rendered = v.render();
        assert!(rendered.starts_with("2.5"));
        assert!(rendered.contains("e+00"));
        let parsed = parse_double(&rendered).unwrap();
        assert_eq!(parsed, 2.5);
    }

    #[test]
    fn nan_double_renders_as_nan() {
        let v = Value::new_double("foo", "", None);
        assert_eq!(v.render(), "nan");
        assert!(v.is_null());
    }

    #[test]
    fn bool_renders_true_false_unknown() {
        assert_eq!(Value::new_bool("b", "", Some(true)).render(), "true");
        assert_eq!(Value::new_bool("b", "", Some(false)).render(), "false");
        assert_eq!(Value::new_bool("b", "", None).render(), "unknown");
    }

    #[test]
    fn bool_parse_accepts_aliases_case_insensitively() {
        let mut v = Value::new_bool("b", "", None);
        assert!(v.update_from_network("ON").unwrap());
        assert_eq!(v.render(), "true");
        assert!(v.update_from_network("No").unwrap());
        assert_eq!(v.render(), "false");
    }

    #[test]
    fn selection_accepts_index_or_label() {
        let mut v = Value::new_selection("filter", "", vec!["B".into(), "V".into(), "R".into()], 0);
        assert!(v.update_from_network("R").unwrap());
        assert_eq!(v.render(), "2");
        assert!(v.update_from_network("1").unwrap());
        assert_eq!(v.render(), "1");
        assert!(!v.update_from_network("V").unwrap());
        assert_eq!(v.render(), "1");
    }

    #[test]
    fn selection_rejects_unknown_label_and_keeps_old_value() {
        let mut v = Value::new_selection("filter", "", vec!["B".into(), "V".into()], 0);
        let err = v.update_from_network("Z").unwrap_err();
        assert_eq!(err.kind, ProtoErrorKind::InvalidSelection);
        assert_eq!(v.render(), "0");
    }

    #[test]
    fn radec_renders_two_floats() {
        let v = Value::new_radec("pos", "", Some((180.0, -30.0)));
        let rendered = v.render();
        assert_eq!(rendered.split_whitespace().count(), 2);
    }

    #[test]
    fn stat_tracks_running_statistics() {
        let mut v = Value::new_stat("temp", "", None);
        v.update_from_network("1.0").unwrap();
        v.update_from_network("2.0").unwrap();
        v.update_from_network("3.0").unwrap();
        if let ValueData::Stat { stats, .. } = v.data() {
            assert_eq!(stats.count, 3);
            assert!((stats.mean - 2.0).abs() < 1e-9);
        } else {
            panic!("expected Stat variant");
        }
    }

    #[test]
    fn conversion_failure_preserves_old_value() {
        let mut v = Value::new_integer("n", "", Some(5));
        let err = v.update_from_network("not-a-number").unwrap_err();
        assert_eq!(err.kind, ProtoErrorKind::Conversion);
        assert_eq!(v.render(), "5");
    }

    #[test]
    fn writable_flag_and_meta_bits() {
        let v = Value::new_integer("n", "", Some(1)).with_writable(true);
        assert!(v.is_writable());
        assert_eq!(v.meta_type_bits() & types::TYPE_MASK, ValueTypeTag::Integer.bits());
        assert_eq!(v.meta_type_bits() & flags::WRITABLE, flags::WRITABLE);
    }
}
