//! Typed node options.
//!
//! A node type describes its configuration as an ordered member table
//! ([`OptionsLayout`]). During parsing and resolution values travel as
//! [`NamedOptions`], an unordered name/value list; a node is opened with
//! the resolved [`Options`] map, defaults applied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::packet::{Direction, FloatRange, IntRange, Rgb};
use crate::FlowError;

/// Data type tag of an option member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Boolean,
    Byte,
    Int,
    IntRange,
    Float,
    FloatRange,
    Rgb,
    Direction,
    String,
}

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Boolean(bool),
    Byte(u8),
    Int(i32),
    IntRange(IntRange),
    Float(f64),
    FloatRange(FloatRange),
    Rgb(Rgb),
    Direction(Direction),
    String(String),
}

impl OptionValue {
    pub fn data_type(&self) -> OptionType {
        match self {
            OptionValue::Boolean(_) => OptionType::Boolean,
            OptionValue::Byte(_) => OptionType::Byte,
            OptionValue::Int(_) => OptionType::Int,
            OptionValue::IntRange(_) => OptionType::IntRange,
            OptionValue::Float(_) => OptionType::Float,
            OptionValue::FloatRange(_) => OptionType::FloatRange,
            OptionValue::Rgb(_) => OptionType::Rgb,
            OptionValue::Direction(_) => OptionType::Direction,
            OptionValue::String(_) => OptionType::String,
        }
    }

    /// Parse the textual form of a value of type `data_type`. `name` is
    /// the member the text belongs to, used in diagnostics.
    pub fn parse(data_type: OptionType, name: &str, text: &str) -> Result<OptionValue, FlowError> {
        let invalid = |reason: String| FlowError::InvalidOption {
            name: name.to_string(),
            reason,
        };
        if data_type != OptionType::String && text.starts_with('"') {
            return Err(invalid("quoted value for a non-string member".into()));
        }
        match data_type {
            OptionType::Boolean => parse_boolean(text).map(OptionValue::Boolean).map_err(invalid),
            OptionType::Byte => parse_byte(text).map(OptionValue::Byte).map_err(invalid),
            OptionType::Int => parse_i32(text).map(OptionValue::Int).map_err(invalid),
            OptionType::IntRange => parse_int_range(text).map(OptionValue::IntRange).map_err(invalid),
            OptionType::Float => parse_f64(text).map(OptionValue::Float).map_err(invalid),
            OptionType::FloatRange => parse_float_range(text)
                .map(OptionValue::FloatRange)
                .map_err(invalid),
            OptionType::Rgb => parse_rgb(text).map(OptionValue::Rgb).map_err(invalid),
            OptionType::Direction => parse_direction(text).map(OptionValue::Direction).map_err(invalid),
            OptionType::String => {
                if text.starts_with('"') {
                    unquote(text).map(OptionValue::String).map_err(invalid)
                } else {
                    Ok(OptionValue::String(text.to_string()))
                }
            }
        }
    }
}

impl std::fmt::Display for OptionValue {
    /// The parseable textual form: what [`OptionValue::parse`] accepts.
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            OptionValue::Boolean(v) => write!(fmt, "{v}"),
            OptionValue::Byte(v) => write!(fmt, "{v}"),
            OptionValue::Int(v) => write!(fmt, "{v}"),
            OptionValue::IntRange(r) => write!(fmt, "{}|{}|{}|{}", r.value, r.min, r.max, r.step),
            OptionValue::Float(v) => write!(fmt, "{v}"),
            OptionValue::FloatRange(r) => write!(fmt, "{}|{}|{}|{}", r.value, r.min, r.max, r.step),
            OptionValue::Rgb(c) => write!(
                fmt,
                "{}|{}|{}|{}|{}|{}",
                c.red, c.green, c.blue, c.red_max, c.green_max, c.blue_max
            ),
            OptionValue::Direction(d) => {
                write!(fmt, "{}|{}|{}|{}|{}", d.x, d.y, d.z, d.min, d.max)
            }
            OptionValue::String(s) => {
                write!(fmt, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(fmt, "\\\"")?,
                        '\\' => write!(fmt, "\\\\")?,
                        '\n' => write!(fmt, "\\n")?,
                        '\r' => write!(fmt, "\\r")?,
                        '\t' => write!(fmt, "\\t")?,
                        _ => write!(fmt, "{c}")?,
                    }
                }
                write!(fmt, "\"")
            }
        }
    }
}

fn parse_boolean(text: &str) -> Result<bool, String> {
    let lower = text.trim().to_ascii_lowercase();
    match lower.as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("{text:?} is not a boolean")),
    }
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        text.parse::<u8>()
    };
    parsed.map_err(|_| format!("{text:?} is not a byte in [0,255]"))
}

fn parse_i32(text: &str) -> Result<i32, String> {
    text.trim()
        .parse::<i32>()
        .map_err(|_| format!("{text:?} is not a 32-bit integer"))
}

fn parse_f64(text: &str) -> Result<f64, String> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| format!("{text:?} is not a number"))
}

/// Composite form `value|min|max|step`, trailing fields optional.
fn parse_int_range(text: &str) -> Result<IntRange, String> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.is_empty() || parts.len() > 4 {
        return Err(format!("{text:?} has {} fields, expected 1 to 4", parts.len()));
    }
    let mut range = IntRange::new(parse_i32(parts[0])?);
    if let Some(p) = parts.get(1) {
        range.min = parse_i32(p)?;
    }
    if let Some(p) = parts.get(2) {
        range.max = parse_i32(p)?;
    }
    if let Some(p) = parts.get(3) {
        range.step = parse_i32(p)?;
    }
    Ok(range)
}

fn parse_float_range(text: &str) -> Result<FloatRange, String> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.is_empty() || parts.len() > 4 {
        return Err(format!("{text:?} has {} fields, expected 1 to 4", parts.len()));
    }
    let mut range = FloatRange::new(parse_f64(parts[0])?);
    if let Some(p) = parts.get(1) {
        range.min = parse_f64(p)?;
    }
    if let Some(p) = parts.get(2) {
        range.max = parse_f64(p)?;
    }
    if let Some(p) = parts.get(3) {
        range.step = parse_f64(p)?;
    }
    Ok(range)
}

/// `r|g|b` or `r|g|b|rmax|gmax|bmax`.
fn parse_rgb(text: &str) -> Result<Rgb, String> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.len() != 3 && parts.len() != 6 {
        return Err(format!("{text:?} has {} fields, expected 3 or 6", parts.len()));
    }
    let chan = |p: &str| {
        p.trim()
            .parse::<u32>()
            .map_err(|_| format!("{p:?} is not a colour channel"))
    };
    let mut rgb = Rgb {
        red: chan(parts[0])?,
        green: chan(parts[1])?,
        blue: chan(parts[2])?,
        ..Default::default()
    };
    if parts.len() == 6 {
        rgb.red_max = chan(parts[3])?;
        rgb.green_max = chan(parts[4])?;
        rgb.blue_max = chan(parts[5])?;
    }
    Ok(rgb)
}

/// `x|y|z` or `x|y|z|min|max`.
fn parse_direction(text: &str) -> Result<Direction, String> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.len() != 3 && parts.len() != 5 {
        return Err(format!("{text:?} has {} fields, expected 3 or 5", parts.len()));
    }
    let mut dir = Direction {
        x: parse_f64(parts[0])?,
        y: parse_f64(parts[1])?,
        z: parse_f64(parts[2])?,
        ..Default::default()
    };
    if parts.len() == 5 {
        dir.min = parse_f64(parts[3])?;
        dir.max = parse_f64(parts[4])?;
    }
    Ok(dir)
}

/// Unescape a `"`-delimited string. The closing quote must end the text.
pub fn unquote(text: &str) -> Result<String, String> {
    let mut chars = text.chars();
    if chars.next() != Some('"') {
        return Err("missing opening quote".into());
    }
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated string".into()),
            Some('"') => break,
            Some('\\') => match chars.next() {
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('\'') => out.push('\''),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('v') => out.push('\u{b}'),
                Some('a') => out.push('\u{7}'),
                Some(other) => return Err(format!("unknown escape \\{other}")),
                None => return Err("unterminated escape".into()),
            },
            Some(c) => out.push(c),
        }
    }
    if chars.next().is_some() {
        return Err("trailing characters after closing quote".into());
    }
    Ok(out)
}

/// Description of one option member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub data_type: OptionType,
    pub required: bool,
    pub default: Option<OptionValue>,
    pub description: Option<String>,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>, data_type: OptionType) -> Self {
        OptionSpec {
            name: name.into(),
            data_type,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: OptionValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// The ordered member table of a node type's options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsLayout {
    members: Vec<OptionSpec>,
}

impl OptionsLayout {
    pub fn new(members: Vec<OptionSpec>) -> Result<Self, FlowError> {
        for (i, member) in members.iter().enumerate() {
            if member.name.is_empty() {
                return Err(FlowError::InvalidArgument("empty option name".into()));
            }
            if members[..i].iter().any(|m| m.name == member.name) {
                return Err(FlowError::DuplicateName(member.name.clone()));
            }
            if let Some(default) = &member.default {
                if default.data_type() != member.data_type {
                    return Err(FlowError::InvalidOption {
                        name: member.name.clone(),
                        reason: "default value has the wrong type".into(),
                    });
                }
            }
        }
        Ok(OptionsLayout { members })
    }

    pub fn members(&self) -> &[OptionSpec] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&OptionSpec> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resolve named options against this layout: member order, named
    /// value if mentioned, default otherwise. A required member absent
    /// from both fails, as does a name this layout does not know.
    pub fn resolve(&self, named: &NamedOptions) -> Result<Options, FlowError> {
        for (name, _) in named.iter() {
            if self.member(name).is_none() {
                return Err(FlowError::NotFound(format!("option {name:?}")));
            }
        }
        let mut values = BTreeMap::new();
        for member in &self.members {
            let value = match named.get(&member.name) {
                Some(value) => {
                    if value.data_type() != member.data_type {
                        return Err(FlowError::InvalidOption {
                            name: member.name.clone(),
                            reason: "value has the wrong type".into(),
                        });
                    }
                    Some(value.clone())
                }
                None => member.default.clone(),
            };
            match value {
                Some(value) => {
                    values.insert(member.name.clone(), value);
                }
                None if member.required => {
                    return Err(FlowError::MissingOption(member.name.clone()))
                }
                None => {}
            }
        }
        Ok(Options { values })
    }
}

/// Unordered name/value pairs, the shape options take between parsing
/// and resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedOptions(Vec<(String, OptionValue)>);

impl NamedOptions {
    pub fn new() -> Self {
        NamedOptions::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: OptionValue) {
        let name = name.into();
        self.0.retain(|(n, _)| *n != name);
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, OptionValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of these options; `other` wins on
    /// conflicting names.
    pub fn merge_from(&mut self, other: NamedOptions) {
        for (name, value) in other.0 {
            self.push(name, value);
        }
    }

    /// Parse `"name=value"` strings against a layout. Each entry splits
    /// at the first `=`; the name selects the member whose data type
    /// drives the value parse.
    pub fn from_strv<S: AsRef<str>>(
        entries: &[S],
        layout: &OptionsLayout,
    ) -> Result<NamedOptions, FlowError> {
        let mut named = NamedOptions::new();
        for entry in entries {
            let entry = entry.as_ref();
            let (name, value) = entry.split_once('=').ok_or_else(|| {
                FlowError::InvalidArgument(format!("option entry {entry:?} has no '='"))
            })?;
            let member = layout
                .member(name)
                .ok_or_else(|| FlowError::NotFound(format!("option {name:?}")))?;
            named.push(name, OptionValue::parse(member.data_type, name, value)?);
        }
        Ok(named)
    }
}

impl FromIterator<(String, OptionValue)> for NamedOptions {
    fn from_iter<T: IntoIterator<Item = (String, OptionValue)>>(iter: T) -> Self {
        let mut named = NamedOptions::new();
        for (name, value) in iter {
            named.push(name, value);
        }
        named
    }
}

/// Resolved options a node is opened with. Immutable for the node's
/// lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    values: BTreeMap<String, OptionValue>,
}

impl Options {
    pub fn empty() -> Self {
        Options::default()
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: OptionValue) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.values.iter()
    }

    /// The named form of these options, member names sorted.
    pub fn to_named(&self) -> NamedOptions {
        self.values
            .iter()
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect()
    }

    fn typed<T>(&self, name: &str, extract: impl Fn(&OptionValue) -> Option<T>, expected: &str) -> Result<T, FlowError> {
        let value = self
            .get(name)
            .ok_or_else(|| FlowError::NotFound(format!("option {name:?}")))?;
        extract(value).ok_or_else(|| FlowError::WrongType {
            expected: expected.to_string(),
            actual: format!("{:?}", value.data_type()),
        })
    }

    pub fn boolean(&self, name: &str) -> Result<bool, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::Boolean(b) => Some(*b),
                _ => None,
            },
            "Boolean",
        )
    }

    pub fn byte(&self, name: &str) -> Result<u8, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::Byte(b) => Some(*b),
                _ => None,
            },
            "Byte",
        )
    }

    pub fn int(&self, name: &str) -> Result<i32, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::Int(i) => Some(*i),
                _ => None,
            },
            "Int",
        )
    }

    pub fn int_range(&self, name: &str) -> Result<IntRange, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::IntRange(r) => Some(*r),
                _ => None,
            },
            "IntRange",
        )
    }

    pub fn float(&self, name: &str) -> Result<f64, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::Float(f) => Some(*f),
                _ => None,
            },
            "Float",
        )
    }

    pub fn float_range(&self, name: &str) -> Result<FloatRange, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::FloatRange(r) => Some(*r),
                _ => None,
            },
            "FloatRange",
        )
    }

    pub fn rgb(&self, name: &str) -> Result<Rgb, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::Rgb(c) => Some(*c),
                _ => None,
            },
            "Rgb",
        )
    }

    pub fn direction(&self, name: &str) -> Result<Direction, FlowError> {
        self.typed(
            name,
            |v| match v {
                OptionValue::Direction(d) => Some(*d),
                _ => None,
            },
            "Direction",
        )
    }

    pub fn string(&self, name: &str) -> Result<&str, FlowError> {
        let value = self
            .get(name)
            .ok_or_else(|| FlowError::NotFound(format!("option {name:?}")))?;
        match value {
            OptionValue::String(s) => Ok(s),
            other => Err(FlowError::WrongType {
                expected: "String".to_string(),
                actual: format!("{:?}", other.data_type()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> OptionsLayout {
        OptionsLayout::new(vec![
            OptionSpec::new("enabled", OptionType::Boolean)
                .with_default(OptionValue::Boolean(true)),
            OptionSpec::new("value", OptionType::IntRange).required(),
            OptionSpec::new("gain", OptionType::FloatRange)
                .with_default(OptionValue::FloatRange(FloatRange::new(1.0))),
            OptionSpec::new("label", OptionType::String),
        ])
        .expect("valid layout")
    }

    #[test]
    fn boolean_forms() {
        for text in ["true", "1", "YES", "On"] {
            assert_eq!(
                OptionValue::parse(OptionType::Boolean, "b", text),
                Ok(OptionValue::Boolean(true)),
                "{text}"
            );
        }
        for text in ["false", "0", "no", "OFF"] {
            assert_eq!(
                OptionValue::parse(OptionType::Boolean, "b", text),
                Ok(OptionValue::Boolean(false)),
                "{text}"
            );
        }
        assert!(OptionValue::parse(OptionType::Boolean, "b", "maybe").is_err());
    }

    #[test]
    fn byte_forms() {
        assert_eq!(
            OptionValue::parse(OptionType::Byte, "b", "0x2A"),
            Ok(OptionValue::Byte(42))
        );
        assert_eq!(
            OptionValue::parse(OptionType::Byte, "b", "255"),
            Ok(OptionValue::Byte(255))
        );
        assert!(OptionValue::parse(OptionType::Byte, "b", "256").is_err());
        assert!(OptionValue::parse(OptionType::Byte, "b", "-1").is_err());
    }

    #[test]
    fn range_composites() {
        assert_eq!(
            OptionValue::parse(OptionType::IntRange, "v", "5|0|10|2"),
            Ok(OptionValue::IntRange(IntRange {
                value: 5,
                min: 0,
                max: 10,
                step: 2
            }))
        );
        assert_eq!(
            OptionValue::parse(OptionType::IntRange, "v", "-3"),
            Ok(OptionValue::IntRange(IntRange::new(-3)))
        );
        let v = OptionValue::parse(OptionType::FloatRange, "v", "2.5e1|0|100|0.5")
            .expect("float range");
        match v {
            OptionValue::FloatRange(r) => {
                assert_eq!(r.value, 25.0);
                assert_eq!(r.step, 0.5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(OptionValue::parse(OptionType::IntRange, "v", "1|2|3|4|5").is_err());
    }

    #[test]
    fn rgb_and_direction_composites() {
        assert_eq!(
            OptionValue::parse(OptionType::Rgb, "c", "10|20|30"),
            Ok(OptionValue::Rgb(Rgb {
                red: 10,
                green: 20,
                blue: 30,
                ..Default::default()
            }))
        );
        let v = OptionValue::parse(OptionType::Direction, "d", "1|0|0|-1|1").expect("direction");
        match v {
            OptionValue::Direction(d) => {
                assert_eq!(d.x, 1.0);
                assert_eq!(d.min, -1.0);
                assert_eq!(d.max, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn quoted_strings() {
        assert_eq!(
            OptionValue::parse(OptionType::String, "s", "\"a \\\"b\\\"\\n\\t\\\\\""),
            Ok(OptionValue::String("a \"b\"\n\t\\".to_string()))
        );
        assert_eq!(
            OptionValue::parse(OptionType::String, "s", "plain"),
            Ok(OptionValue::String("plain".to_string()))
        );
        assert!(OptionValue::parse(OptionType::String, "s", "\"open").is_err());
        assert!(OptionValue::parse(OptionType::String, "s", "\"a\"b").is_err());
    }

    #[test]
    fn quoted_value_for_non_string_member_fails() {
        let err = OptionValue::parse(OptionType::Int, "v", "\"5\"").expect_err("must fail");
        assert!(matches!(err, FlowError::InvalidOption { .. }));
    }

    #[test]
    fn resolve_applies_defaults_and_requires() {
        let layout = layout();
        let mut named = NamedOptions::new();
        named.push("value", OptionValue::IntRange(IntRange::new(7)));
        let opts = layout.resolve(&named).expect("resolves");
        assert_eq!(opts.boolean("enabled"), Ok(true));
        assert_eq!(opts.int_range("value").map(|r| r.value), Ok(7));
        assert_eq!(opts.float_range("gain").map(|r| r.value), Ok(1.0));
        // label has no default and is not required.
        assert!(opts.get("label").is_none());

        let missing = layout.resolve(&NamedOptions::new());
        assert_eq!(missing.err(), Some(FlowError::MissingOption("value".into())));

        let mut unknown = NamedOptions::new();
        unknown.push("value", OptionValue::IntRange(IntRange::new(1)));
        unknown.push("bogus", OptionValue::Boolean(false));
        assert!(matches!(
            layout.resolve(&unknown),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn strv_round_trip() {
        let layout = layout();
        let named = NamedOptions::from_strv(
            &["enabled=no", "value=3|0|10|1", "label=\"hi there\""],
            &layout,
        )
        .expect("parses");
        let opts = layout.resolve(&named).expect("resolves");
        assert_eq!(opts.boolean("enabled"), Ok(false));
        assert_eq!(opts.string("label"), Ok("hi there"));

        // named -> resolved -> named is stable for everything mentioned.
        let back = opts.to_named();
        for (name, value) in named.iter() {
            assert_eq!(back.get(name), Some(value), "{name}");
        }
    }

    #[test]
    fn display_is_parseable() {
        let values = [
            OptionValue::Boolean(true),
            OptionValue::Byte(9),
            OptionValue::Int(-5),
            OptionValue::IntRange(IntRange {
                value: 1,
                min: 0,
                max: 2,
                step: 1,
            }),
            OptionValue::Float(2.25),
            OptionValue::String("a \"quoted\" line\n".to_string()),
        ];
        for value in values {
            let text = value.to_string();
            let parsed =
                OptionValue::parse(value.data_type(), "x", &text).expect("display parses back");
            assert_eq!(parsed, value, "{text}");
        }
    }

    #[test]
    fn merge_prefers_overlay() {
        let mut base = NamedOptions::new();
        base.push("a", OptionValue::Int(1));
        base.push("b", OptionValue::Int(2));
        let mut top = NamedOptions::new();
        top.push("b", OptionValue::Int(20));
        base.merge_from(top);
        assert_eq!(base.get("a"), Some(&OptionValue::Int(1)));
        assert_eq!(base.get("b"), Some(&OptionValue::Int(20)));
    }
}
