//! Parameter type model
//!
//! Every parameter type implements a two-stage conversion contract between
//! **user space** (textual literals or typed values) and a **blackboard
//! word** (`u32` holding the low `size` bytes that actually land in the
//! board). The type owns its byte size (1/2/4), sign extension, range checks
//! and value-space interpretation; it never touches the blackboard itself.
//!
//! Conversions consult two flags carried by the [`AccessContext`]: the value
//! space (raw memory words vs real values) and the raw output format
//! (decimal vs hex). Hex literals are parsed as unsigned and, for signed
//! types, sign-extended from the declared size, uniformly across integer,
//! enum and fixed-point (raw space) types.
//!
//! Words returned by `*_to_word` conversions may carry a sign extension in
//! their high bits (the blackboard only stores the low `size` bytes); words
//! read back from the board always have clean high bits.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::access::AccessContext;

/// Conversion and declaration failures of the type model.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("invalid type declaration: {0}")]
    Declaration(String),
    #[error("value {literal} is invalid for {kind}; expected {expected}")]
    InvalidLiteral {
        literal: String,
        kind: &'static str,
        expected: &'static str,
    },
    #[error("value {literal} out of admitted {space} range {range} for {kind}")]
    OutOfRange {
        literal: String,
        kind: &'static str,
        space: &'static str,
        range: String,
    },
    #[error("hexadecimal values are only supported in raw value space for {kind}")]
    HexInRealSpace { kind: &'static str },
    #[error("value {literal} is not part of the {space} space of {kind}")]
    Unrepresentable {
        literal: String,
        kind: &'static str,
        space: &'static str,
    },
    #[error("value {value} is not a finite number")]
    NotFinite { value: String },
    #[error("{kind} is {actual}")]
    AccessMismatch {
        kind: &'static str,
        actual: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Word helpers (shared by all sized types)
// ---------------------------------------------------------------------------

/// Sign-extend the low `size` bytes of `word` to a full `i32`.
#[inline]
pub(crate) fn sign_extend(word: u32, size: usize) -> i32 {
    let shift = 32 - 8 * size as u32;
    ((word as i32) << shift) >> shift
}

/// True when no bit is set above the low `size` bytes.
#[inline]
pub(crate) fn is_encodable(word: u32, size: usize) -> bool {
    size == 4 || word >> (8 * size) == 0
}

/// Clear every bit above the low `size` bytes.
#[inline]
pub(crate) fn make_encodable(word: u32, size: usize) -> u32 {
    if size == 4 {
        word
    } else {
        word & ((1u32 << (8 * size)) - 1)
    }
}

/// Sign-aware high-bit check: the word either fits `size` bytes outright or
/// is the sign extension of a negative `size`-byte value.
#[inline]
fn is_consistent(word: u32, size: usize) -> bool {
    if size == 4 {
        return true;
    }
    let negative = word & (1 << (8 * size - 1)) != 0;
    if negative {
        !word >> (8 * size) == 0
    } else {
        word >> (8 * size) == 0
    }
}

#[inline]
fn is_hex_literal(s: &str) -> bool {
    s.starts_with("0x") || s.starts_with("0X")
}

/// Parse an integer literal: `0x` prefixed as unsigned hex (32-bit max),
/// otherwise signed decimal.
fn parse_int_literal(s: &str) -> Option<i64> {
    if is_hex_literal(s) {
        u32::from_str_radix(&s[2..], 16).ok().map(i64::from)
    } else {
        s.parse::<i64>().ok()
    }
}

#[inline]
fn hex_string(word: u32, size: usize) -> String {
    format!("0x{:0width$X}", word, width = size * 2)
}

// ---------------------------------------------------------------------------
// Auxiliary declarations
// ---------------------------------------------------------------------------

/// One (literal, numerical) pair of an enum type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumPair {
    pub literal: String,
    pub numerical: i32,
}

impl EnumPair {
    pub fn new(literal: impl Into<String>, numerical: i32) -> Self {
        Self {
            literal: literal.into(),
            numerical,
        }
    }
}

/// Linear adaptation `user = slope * raw + offset` for integer parameters
/// accessed as floating point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearAdaptation {
    pub slope: f64,
    pub offset: f64,
}

impl LinearAdaptation {
    pub fn new(slope: f64, offset: f64) -> Self {
        Self { slope, offset }
    }

    fn to_user(&self, raw: f64) -> f64 {
        self.slope * raw + self.offset
    }

    fn from_user(&self, user: f64) -> f64 {
        (user - self.offset) / self.slope
    }
}

/// One named field of a bit parameter block. `pos`/`width` are in bits within
/// the block word; `max` bounds the raw (unsigned) field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitField {
    pub name: String,
    pub pos: u32,
    pub width: u32,
    pub signed: bool,
    pub max: u32,
}

impl BitField {
    pub fn new(name: impl Into<String>, pos: u32, width: u32, signed: bool) -> Self {
        let max = width_mask(width);
        Self {
            name: name.into(),
            pos,
            width,
            signed,
            max,
        }
    }

    pub fn with_max(mut self, max: u32) -> Self {
        self.max = max;
        self
    }

    #[inline]
    fn mask(&self) -> u32 {
        width_mask(self.width)
    }

    /// Insert this field's value, parsed from `literal`, into `block_word`,
    /// preserving sibling bits.
    pub fn set_in_word(&self, literal: &str, block_word: u32) -> Result<u32, TypeError> {
        const KIND: &str = "BitParameter";
        let hex = is_hex_literal(literal);
        let mut data = parse_int_literal(literal).ok_or_else(|| TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind: KIND,
            expected: "a decimal or 0x-prefixed integer",
        })?;
        if hex && self.signed && (data as u64) <= u64::from(self.mask()) {
            // Sign extend from the field width.
            let shift = 64 - self.width;
            data = (data << shift) >> shift;
        }
        let in_range = if self.signed {
            let min = -(1i64 << (self.width - 1));
            let max = (i64::from(self.max)).min((1i64 << (self.width - 1)) - 1);
            data >= min && data <= max
        } else {
            data >= 0 && data <= i64::from(self.max)
        };
        if !in_range {
            return Err(TypeError::OutOfRange {
                literal: literal.to_string(),
                kind: KIND,
                space: "raw",
                range: if self.signed {
                    format!("[{}, {}]", -(1i64 << (self.width - 1)), self.max)
                } else {
                    format!("[0, {}]", self.max)
                },
            });
        }
        let raw = (data as u32) & self.mask();
        Ok((block_word & !(self.mask() << self.pos)) | (raw << self.pos))
    }

    /// Extract this field's value from `block_word`, sign-extending when the
    /// field is signed.
    pub fn get_from_word(&self, block_word: u32, ctx: &AccessContext) -> String {
        let raw = (block_word >> self.pos) & self.mask();
        if ctx.value_space_raw && ctx.output_raw_hex {
            return format!("0x{:X}", raw);
        }
        if self.signed {
            let shift = 32 - self.width;
            (((raw as i32) << shift) >> shift).to_string()
        } else {
            raw.to_string()
        }
    }
}

#[inline]
fn width_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

// ---------------------------------------------------------------------------
// The type model proper
// ---------------------------------------------------------------------------

/// Sum type over every parameter type the framework knows how to convert.
///
/// `min`/`max` of `Integer` are stored in encoded (`u32`) form, interpreted
/// through `signed`, the same trick the range checks use, which keeps all
/// three widths on one code path.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterType {
    Boolean,
    Integer {
        signed: bool,
        size: usize,
        min: u32,
        max: u32,
        adaptation: Option<LinearAdaptation>,
    },
    FixedPoint {
        size: usize,
        integral: u32,
        fractional: u32,
    },
    Float {
        min: f32,
        max: f32,
    },
    Enum {
        size: usize,
        pairs: Vec<EnumPair>,
    },
}

fn check_size_bits(bits: usize) -> Result<usize, TypeError> {
    match bits {
        8 | 16 | 32 => Ok(bits / 8),
        _ => Err(TypeError::Declaration(format!(
            "size must be 8, 16 or 32 bits (got {bits})"
        ))),
    }
}

impl ParameterType {
    pub fn boolean() -> Self {
        Self::Boolean
    }

    /// Integer type of `bits` ∈ {8, 16, 32}. Omitted bounds default to the
    /// full range of the declared width and signedness.
    pub fn integer(
        signed: bool,
        bits: usize,
        min: Option<i64>,
        max: Option<i64>,
    ) -> Result<Self, TypeError> {
        let size = check_size_bits(bits)?;
        let (type_min, type_max) = if signed {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        };
        let min = min.unwrap_or(type_min);
        let max = max.unwrap_or(type_max);
        if min > max {
            return Err(TypeError::Declaration(format!(
                "min ({min}) must not exceed max ({max})"
            )));
        }
        if min < type_min || max > type_max {
            return Err(TypeError::Declaration(format!(
                "bounds [{min}, {max}] exceed the {bits}-bit {} range",
                if signed { "signed" } else { "unsigned" }
            )));
        }
        Ok(Self::Integer {
            signed,
            size,
            min: min as u32,
            max: max as u32,
            adaptation: None,
        })
    }

    /// Same as [`integer`](Self::integer), with a linear adaptation for
    /// floating-point user access.
    pub fn integer_adapted(
        signed: bool,
        bits: usize,
        min: Option<i64>,
        max: Option<i64>,
        adaptation: LinearAdaptation,
    ) -> Result<Self, TypeError> {
        if adaptation.slope == 0.0 {
            return Err(TypeError::Declaration(
                "adaptation slope must be non-zero".into(),
            ));
        }
        match Self::integer(signed, bits, min, max)? {
            Self::Integer {
                signed,
                size,
                min,
                max,
                ..
            } => Ok(Self::Integer {
                signed,
                size,
                min,
                max,
                adaptation: Some(adaptation),
            }),
            _ => unreachable!(),
        }
    }

    /// Q(I.F) fixed point stored in `bits` ∈ {8, 16, 32}. The utilized width
    /// `I + F + 1` must fit the declared size.
    pub fn fixed_point(bits: usize, integral: u32, fractional: u32) -> Result<Self, TypeError> {
        let size = check_size_bits(bits)?;
        let util = integral + fractional + 1;
        if util as usize > bits {
            return Err(TypeError::Declaration(format!(
                "Q{integral}.{fractional} needs {util} bits, more than the declared {bits}"
            )));
        }
        Ok(Self::FixedPoint {
            size,
            integral,
            fractional,
        })
    }

    /// IEEE-754 binary32 with a closed [min, max] acceptance range.
    pub fn float(min: f32, max: f32) -> Result<Self, TypeError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(TypeError::Declaration(
                "float bounds must be finite".into(),
            ));
        }
        if min > max {
            return Err(TypeError::Declaration(format!(
                "min ({min}) must not exceed max ({max})"
            )));
        }
        Ok(Self::Float { min, max })
    }

    /// Enum over (literal, numerical) pairs, stored in `bits` ∈ {8, 16, 32}.
    pub fn enumeration(bits: usize, pairs: Vec<EnumPair>) -> Result<Self, TypeError> {
        let size = check_size_bits(bits)?;
        let lo = -(1i64 << (bits - 1));
        let hi = (1i64 << bits) - 1;
        for (i, pair) in pairs.iter().enumerate() {
            let n = i64::from(pair.numerical);
            if n < lo || n > hi {
                return Err(TypeError::Declaration(format!(
                    "numerical value {n} of literal {} is not representable in {bits} bits",
                    pair.literal
                )));
            }
            for other in &pairs[..i] {
                if other.literal == pair.literal || other.numerical == pair.numerical {
                    return Err(TypeError::Declaration(format!(
                        "duplicate enum pair ({}, {})",
                        pair.literal, pair.numerical
                    )));
                }
            }
        }
        Ok(Self::Enum { size, pairs })
    }

    /// Human-readable kind, used in error messages and element dumps.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Boolean => "BooleanParameter",
            Self::Integer { .. } => "IntegerParameter",
            Self::FixedPoint { .. } => "FixedPointParameter",
            Self::Float { .. } => "FloatingPointParameter",
            Self::Enum { .. } => "EnumParameter",
        }
    }

    /// Stored byte size (1, 2 or 4).
    pub fn size(&self) -> usize {
        match self {
            Self::Boolean => 1,
            Self::Integer { size, .. } | Self::FixedPoint { size, .. } | Self::Enum { size, .. } => {
                *size
            }
            Self::Float { .. } => 4,
        }
    }

    /// Word written at blackboard-initialization time for elements no syncer
    /// back-fills: `min` for integers, the first pair for enums, zero
    /// otherwise.
    pub fn default_word(&self) -> u32 {
        match self {
            Self::Integer { min, .. } => *min,
            Self::Enum { pairs, .. } => pairs.first().map_or(0, |p| p.numerical as u32),
            _ => 0,
        }
    }

    // -- user literal -> word ------------------------------------------------

    /// Convert a user literal into a blackboard word, honoring the context's
    /// value space.
    pub fn user_to_word(&self, literal: &str, ctx: &AccessContext) -> Result<u32, TypeError> {
        match self {
            Self::Boolean => boolean_to_word(literal, self.kind()),
            Self::Integer {
                signed, size, min, max, ..
            } => integer_to_word(literal, *signed, *size, *min, *max, self.kind()),
            Self::FixedPoint {
                size,
                integral,
                fractional,
            } => fixed_to_word(literal, *size, *integral, *fractional, ctx, self.kind()),
            Self::Float { min, max } => float_to_word(literal, *min, *max, ctx, self.kind()),
            Self::Enum { size, pairs } => enum_to_word(literal, *size, pairs, self.kind()),
        }
    }

    // -- word -> user literal ------------------------------------------------

    /// Render a blackboard word (clean high bits) as a user literal, honoring
    /// the context's value space and raw output format.
    pub fn word_to_user(&self, word: u32, ctx: &AccessContext) -> String {
        match self {
            Self::Boolean => {
                let s = if word != 0 { "1" } else { "0" };
                if ctx.value_space_raw && ctx.output_raw_hex {
                    format!("0x{s}")
                } else {
                    s.to_string()
                }
            }
            Self::Integer { signed, size, .. } => {
                if ctx.value_space_raw && ctx.output_raw_hex {
                    hex_string(word, *size)
                } else if *signed {
                    sign_extend(word, *size).to_string()
                } else {
                    word.to_string()
                }
            }
            Self::FixedPoint {
                size,
                integral,
                fractional,
            } => {
                if ctx.value_space_raw {
                    if ctx.output_raw_hex {
                        hex_string(make_encodable(word, *size), *size)
                    } else {
                        sign_extend(word, *size).to_string()
                    }
                } else {
                    let real = q_from_word(word, *size, *integral, *fractional);
                    let precision = (f64::from(fractional + 1) * 2f64.log10()) as usize;
                    format!("{real:.precision$}")
                }
            }
            Self::Float { .. } => {
                if ctx.value_space_raw {
                    if ctx.output_raw_hex {
                        hex_string(word, 4)
                    } else {
                        word.to_string()
                    }
                } else {
                    format!("{}", f32::from_bits(word))
                }
            }
            Self::Enum { size, pairs } => {
                if ctx.value_space_raw {
                    if ctx.output_raw_hex {
                        hex_string(make_encodable(word, *size), *size)
                    } else {
                        sign_extend(word, *size).to_string()
                    }
                } else {
                    let numerical = sign_extend(word, *size);
                    pairs
                        .iter()
                        .find(|p| p.numerical == numerical)
                        .map(|p| p.literal.clone())
                        .unwrap_or_else(|| numerical.to_string())
                }
            }
        }
    }

    // -- typed access --------------------------------------------------------

    pub fn bool_to_word(&self, value: bool) -> Result<u32, TypeError> {
        match self {
            Self::Boolean => Ok(u32::from(value)),
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not a boolean",
            }),
        }
    }

    pub fn word_to_bool(&self, word: u32) -> Result<bool, TypeError> {
        match self {
            Self::Boolean => Ok(word != 0),
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not a boolean",
            }),
        }
    }

    pub fn u32_to_word(&self, value: u32) -> Result<u32, TypeError> {
        match self {
            Self::Integer {
                signed: false,
                min,
                max,
                ..
            } => {
                if value < *min || value > *max {
                    return Err(TypeError::OutOfRange {
                        literal: value.to_string(),
                        kind: self.kind(),
                        space: "real",
                        range: format!("[{min}, {max}]"),
                    });
                }
                Ok(value)
            }
            Self::Integer { signed: true, .. } => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "signed",
            }),
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not an integer",
            }),
        }
    }

    pub fn word_to_u32(&self, word: u32) -> Result<u32, TypeError> {
        match self {
            Self::Integer { signed: false, .. } => Ok(word),
            Self::Integer { signed: true, .. } => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "signed",
            }),
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not an integer",
            }),
        }
    }

    pub fn i32_to_word(&self, value: i32) -> Result<u32, TypeError> {
        match self {
            Self::Integer {
                signed: true,
                min,
                max,
                ..
            } => {
                let (min, max) = (*min as i32, *max as i32);
                if value < min || value > max {
                    return Err(TypeError::OutOfRange {
                        literal: value.to_string(),
                        kind: self.kind(),
                        space: "real",
                        range: format!("[{min}, {max}]"),
                    });
                }
                Ok(value as u32)
            }
            Self::Integer { signed: false, .. } => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "unsigned",
            }),
            Self::Enum { pairs, .. } => {
                if pairs.iter().any(|p| p.numerical == value) {
                    Ok(value as u32)
                } else {
                    Err(TypeError::Unrepresentable {
                        literal: value.to_string(),
                        kind: self.kind(),
                        space: "numerical",
                    })
                }
            }
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not an integer",
            }),
        }
    }

    pub fn word_to_i32(&self, word: u32) -> Result<i32, TypeError> {
        match self {
            Self::Integer {
                signed: true, size, ..
            }
            | Self::Enum { size, .. } => Ok(sign_extend(word, *size)),
            Self::Integer { signed: false, .. } => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "unsigned",
            }),
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not an integer",
            }),
        }
    }

    pub fn f64_to_word(&self, value: f64) -> Result<u32, TypeError> {
        match self {
            Self::FixedPoint {
                size,
                integral,
                fractional,
            } => q_to_word(value, *size, *integral, *fractional).map_err(|range| {
                TypeError::OutOfRange {
                    literal: value.to_string(),
                    kind: self.kind(),
                    space: "real",
                    range,
                }
            }),
            Self::Float { min, max } => {
                if !value.is_finite() {
                    return Err(TypeError::NotFinite {
                        value: value.to_string(),
                    });
                }
                if value < f64::from(*min) || value > f64::from(*max) {
                    return Err(TypeError::OutOfRange {
                        literal: value.to_string(),
                        kind: self.kind(),
                        space: "real",
                        range: format!("[{min}, {max}]"),
                    });
                }
                Ok((value as f32).to_bits())
            }
            Self::Integer {
                signed,
                adaptation: Some(adapt),
                ..
            } => {
                let raw = adapt.from_user(value).round();
                if *signed {
                    self.i32_to_word(raw as i32)
                } else if raw < 0.0 {
                    Err(TypeError::OutOfRange {
                        literal: value.to_string(),
                        kind: self.kind(),
                        space: "real",
                        range: "[0, ..]".into(),
                    })
                } else {
                    self.u32_to_word(raw as u32)
                }
            }
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not floating-point accessible",
            }),
        }
    }

    pub fn word_to_f64(&self, word: u32) -> Result<f64, TypeError> {
        match self {
            Self::FixedPoint {
                size,
                integral,
                fractional,
            } => Ok(q_from_word(word, *size, *integral, *fractional)),
            Self::Float { .. } => Ok(f64::from(f32::from_bits(word))),
            Self::Integer {
                signed,
                size,
                adaptation: Some(adapt),
                ..
            } => {
                let raw = if *signed {
                    f64::from(sign_extend(word, *size))
                } else {
                    f64::from(word)
                };
                Ok(adapt.to_user(raw))
            }
            _ => Err(TypeError::AccessMismatch {
                kind: self.kind(),
                actual: "not floating-point accessible",
            }),
        }
    }

    /// Append a property dump of this type (kind, size, type-specific
    /// attributes) for element inspection.
    pub fn describe(&self, out: &mut String) {
        use std::fmt::Write as _;
        let _ = writeln!(out, "Kind: {}", self.kind());
        let _ = writeln!(out, "Scalar size: {} byte(s)", self.size());
        match self {
            Self::Integer {
                signed, min, max, ..
            } => {
                let _ = writeln!(out, "Signed: {}", if *signed { "yes" } else { "no" });
                if *signed {
                    let _ = writeln!(out, "Min: {}", *min as i32);
                    let _ = writeln!(out, "Max: {}", *max as i32);
                } else {
                    let _ = writeln!(out, "Min: {min}");
                    let _ = writeln!(out, "Max: {max}");
                }
            }
            Self::FixedPoint {
                integral,
                fractional,
                ..
            } => {
                let _ = writeln!(out, "Notation: Q{integral}.{fractional}");
            }
            Self::Float { min, max } => {
                let _ = writeln!(out, "Min: {min}");
                let _ = writeln!(out, "Max: {max}");
            }
            Self::Enum { pairs, .. } => {
                let _ = writeln!(out, "Value pairs:");
                for pair in pairs {
                    let _ = writeln!(
                        out,
                        "\tLiteral: \"{}\", Numerical: {}",
                        pair.literal, pair.numerical
                    );
                }
            }
            Self::Boolean => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Per-kind conversion bodies
// ---------------------------------------------------------------------------

fn boolean_to_word(literal: &str, kind: &'static str) -> Result<u32, TypeError> {
    match literal {
        "0" | "0x0" | "false" => Ok(0),
        "1" | "0x1" | "true" => Ok(1),
        _ => Err(TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind,
            expected: "one of {0, 1, 0x0, 0x1, true, false}",
        }),
    }
}

fn integer_to_word(
    literal: &str,
    signed: bool,
    size: usize,
    min: u32,
    max: u32,
    kind: &'static str,
) -> Result<u32, TypeError> {
    let hex = is_hex_literal(literal);
    let mut data = parse_int_literal(literal).ok_or_else(|| TypeError::InvalidLiteral {
        literal: literal.to_string(),
        kind,
        expected: "a decimal or 0x-prefixed integer",
    })?;
    if hex && signed && is_encodable(data as u32, size) {
        data = i64::from(sign_extend(data as u32, size));
    }
    let in_range = if signed {
        data >= i64::from(min as i32) && data <= i64::from(max as i32)
    } else {
        data >= i64::from(min) && data <= i64::from(max)
    };
    if !in_range {
        let range = if hex {
            format!(
                "[{}, {}]",
                hex_string(make_encodable(min, size), size),
                hex_string(make_encodable(max, size), size)
            )
        } else if signed {
            format!("[{}, {}]", min as i32, max as i32)
        } else {
            format!("[{min}, {max}]")
        };
        return Err(TypeError::OutOfRange {
            literal: literal.to_string(),
            kind,
            space: "real",
            range,
        });
    }
    Ok(data as u32)
}

/// Round a real value to its left-justified Q representation. The error
/// payload is the formatted admitted range.
fn q_to_word(real: f64, size: usize, integral: u32, fractional: u32) -> Result<u32, String> {
    let util = integral + fractional + 1;
    // Half-away-from-zero rounding, truncated like the integer cast it
    // replaces.
    let scaled =
        (real * f64::from(1u32 << fractional) + 0.5 - f64::from(u8::from(real < 0.0))) as i64;
    let lo = -(1i64 << (util - 1));
    let hi = (1i64 << (util - 1)) - 1;
    if scaled < lo || scaled > hi {
        let denom = f64::from(1u32 << fractional);
        return Err(format!("[{}, {}]", lo as f64 / denom, hi as f64 / denom));
    }
    let shift = 8 * size as u32 - util;
    Ok((scaled << shift) as u32)
}

fn q_from_word(word: u32, size: usize, integral: u32, fractional: u32) -> f64 {
    let util = integral + fractional + 1;
    let shift = 8 * size as u32 - util;
    let unjustified = sign_extend(word, size) >> shift;
    f64::from(unjustified) / f64::from(1u32 << fractional)
}

fn fixed_to_word(
    literal: &str,
    size: usize,
    integral: u32,
    fractional: u32,
    ctx: &AccessContext,
    kind: &'static str,
) -> Result<u32, TypeError> {
    let hex = is_hex_literal(literal);
    if hex && !ctx.value_space_raw {
        return Err(TypeError::HexInRealSpace { kind });
    }
    if ctx.value_space_raw {
        let mut data = parse_int_literal(literal).ok_or_else(|| TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind,
            expected: "a decimal or 0x-prefixed integer",
        })?;
        if hex && is_encodable(data as u32, size) {
            data = i64::from(sign_extend(data as u32, size));
        }
        let word = data as u32;
        if !is_consistent(word, size) || data != i64::from(word as i32) {
            let hi = (1i64 << (8 * size - 1)) - 1;
            return Err(TypeError::OutOfRange {
                literal: literal.to_string(),
                kind,
                space: "raw",
                range: format!("[{}, {}]", -hi - 1, hi),
            });
        }
        Ok(word)
    } else {
        let real: f64 = literal.parse().map_err(|_| TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind,
            expected: "a decimal real number",
        })?;
        q_to_word(real, size, integral, fractional).map_err(|range| TypeError::OutOfRange {
            literal: literal.to_string(),
            kind,
            space: "real",
            range,
        })
    }
}

fn float_to_word(
    literal: &str,
    min: f32,
    max: f32,
    ctx: &AccessContext,
    kind: &'static str,
) -> Result<u32, TypeError> {
    let hex = is_hex_literal(literal);
    if hex && !ctx.value_space_raw {
        return Err(TypeError::HexInRealSpace { kind });
    }
    if ctx.value_space_raw {
        let word = if hex {
            u32::from_str_radix(&literal[2..], 16).ok()
        } else {
            literal.parse::<u32>().ok()
        }
        .ok_or_else(|| TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind,
            expected: "a decimal or 0x-prefixed 32-bit pattern",
        })?;
        let value = f32::from_bits(word);
        if !value.is_finite() {
            return Err(TypeError::NotFinite {
                value: literal.to_string(),
            });
        }
        if value < min || value > max {
            return Err(TypeError::OutOfRange {
                literal: literal.to_string(),
                kind,
                space: "raw",
                range: format!("[{}, {}]", min.to_bits(), max.to_bits()),
            });
        }
        Ok(word)
    } else {
        let value: f32 = literal.parse().map_err(|_| TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind,
            expected: "a decimal real number",
        })?;
        if !value.is_finite() {
            return Err(TypeError::NotFinite {
                value: literal.to_string(),
            });
        }
        if value < min || value > max {
            return Err(TypeError::OutOfRange {
                literal: literal.to_string(),
                kind,
                space: "real",
                range: format!("[{min}, {max}]"),
            });
        }
        Ok(value.to_bits())
    }
}

fn enum_to_word(
    literal: &str,
    size: usize,
    pairs: &[EnumPair],
    kind: &'static str,
) -> Result<u32, TypeError> {
    let first = literal.chars().next();
    let numeric = matches!(first, Some(c) if c.is_ascii_digit() || c == '+' || c == '-');
    if numeric {
        let hex = is_hex_literal(literal);
        let mut data = parse_int_literal(literal).ok_or_else(|| TypeError::InvalidLiteral {
            literal: literal.to_string(),
            kind,
            expected: "a literal or a decimal/0x-prefixed integer",
        })?;
        if hex && is_encodable(data as u32, size) {
            data = i64::from(sign_extend(data as u32, size));
        }
        let valid = i32::try_from(data)
            .map(|n| pairs.iter().any(|p| p.numerical == n))
            .unwrap_or(false);
        if !valid {
            return Err(TypeError::Unrepresentable {
                literal: literal.to_string(),
                kind,
                space: "numerical",
            });
        }
        Ok(data as u32)
    } else {
        pairs
            .iter()
            .find(|p| p.literal == literal)
            .map(|p| p.numerical as u32)
            .ok_or_else(|| TypeError::Unrepresentable {
                literal: literal.to_string(),
                kind,
                space: "lexical",
            })
    }
}
