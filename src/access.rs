//! Parameter access context
//!
//! A small bag of flags threaded through every textual conversion: which
//! value space the user is talking in (raw memory words vs real values),
//! how raw output should be rendered (decimal vs hex), whether the subsystem
//! being traversed stores big-endian, and whether a successful write should
//! trigger the covering syncer. The framework owns the sticky user-facing
//! flags; the endianness bit is stamped on while descending into a subsystem.

#![forbid(unsafe_code)]

/// Conversion/access flags for one parameter operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessContext {
    /// Interpret user literals as raw memory words instead of real values.
    pub value_space_raw: bool,
    /// Render raw output in hexadecimal instead of decimal.
    pub output_raw_hex: bool,
    /// The subsystem owning the accessed element stores big-endian.
    pub big_endian: bool,
    /// Trigger the covering syncer after a successful write.
    pub auto_sync: bool,
}

impl AccessContext {
    /// Context with the default real/decimal interpretation and no auto-sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same context, re-stamped with a subsystem's endianness.
    pub fn for_subsystem(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Raw value space selected (affects hex literal acceptance).
    pub fn raw(mut self, raw: bool) -> Self {
        self.value_space_raw = raw;
        self
    }

    /// Hexadecimal raw output selected.
    pub fn hex(mut self, hex: bool) -> Self {
        self.output_raw_hex = hex;
        self
    }
}
