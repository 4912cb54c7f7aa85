//! Parameter Blackboard
//!
//! The blackboard is the single contiguous byte buffer holding the live value
//! of every parameter in the system. Offsets into it are assigned once, at
//! structure freeze time, by a depth-first walk of the element tree; after
//! that the buffer itself is a passive container: all serialization happens
//! around it and all concurrency control is the holder's business.
//!
//! Two access families coexist:
//! - **width-limited accesses** (`write_word`/`read_word`, 1/2/4 bytes) used
//!   by the type model for integer-shaped conversions. These honor the
//!   per-subsystem endianness flag: big-endian access reverses byte order on
//!   the way in and out.
//! - **raw accesses** (`raw_write`/`raw_read`/`region`) used by syncers and
//!   configuration snapshots. These never swap bytes.
//!
//! Area configurations are themselves small blackboards; `save_to` and
//! `restore_from` move a snapshot-sized window between a snapshot and the
//! main board.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

/// Errors surfaced by blackboard accesses. Every offset is bounds-checked.
#[derive(Debug, thiserror::Error)]
pub enum BlackboardError {
    #[error("access of {size} byte(s) at offset {offset} overruns blackboard of {board} byte(s)")]
    OutOfBounds {
        offset: usize,
        size: usize,
        board: usize,
    },
}

/// Flat byte buffer of fixed size, zero-initialized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blackboard {
    data: Vec<u8>,
}

impl Blackboard {
    /// Allocate a zeroed board of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn check(&self, offset: usize, size: usize) -> Result<(), BlackboardError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(BlackboardError::OutOfBounds {
                offset,
                size,
                board: self.data.len(),
            }),
        }
    }

    /// Copy `src` into the board at `offset`, reversing byte order when the
    /// owning subsystem is big-endian.
    pub fn write(
        &mut self,
        src: &[u8],
        offset: usize,
        big_endian: bool,
    ) -> Result<(), BlackboardError> {
        self.check(offset, src.len())?;
        let dst = &mut self.data[offset..offset + src.len()];
        if big_endian {
            for (d, s) in dst.iter_mut().zip(src.iter().rev()) {
                *d = *s;
            }
        } else {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes out of the board at `offset`, reversing byte
    /// order when the owning subsystem is big-endian.
    pub fn read(
        &self,
        dst: &mut [u8],
        offset: usize,
        big_endian: bool,
    ) -> Result<(), BlackboardError> {
        self.check(offset, dst.len())?;
        let src = &self.data[offset..offset + dst.len()];
        if big_endian {
            for (d, s) in dst.iter_mut().zip(src.iter().rev()) {
                *d = *s;
            }
        } else {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Store the low `size` bytes of `word` at `offset` (width ∈ {1, 2, 4}).
    pub fn write_word(
        &mut self,
        word: u32,
        size: usize,
        offset: usize,
        big_endian: bool,
    ) -> Result<(), BlackboardError> {
        debug_assert!(matches!(size, 1 | 2 | 4));
        let bytes = word.to_le_bytes();
        self.write(&bytes[..size], offset, big_endian)
    }

    /// Load a `size`-byte word from `offset` (width ∈ {1, 2, 4}). High bytes
    /// of the result are zero.
    pub fn read_word(
        &self,
        size: usize,
        offset: usize,
        big_endian: bool,
    ) -> Result<u32, BlackboardError> {
        debug_assert!(matches!(size, 1 | 2 | 4));
        let mut bytes = [0u8; 4];
        self.read(&mut bytes[..size], offset, big_endian)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Endianness-free write, used by syncers and snapshot plumbing.
    pub fn raw_write(&mut self, src: &[u8], offset: usize) -> Result<(), BlackboardError> {
        self.check(offset, src.len())?;
        self.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Endianness-free read, used by syncers and snapshot plumbing.
    pub fn raw_read(&self, dst: &mut [u8], offset: usize) -> Result<(), BlackboardError> {
        self.check(offset, dst.len())?;
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }

    /// Borrow a region of the board.
    pub fn region(&self, offset: usize, size: usize) -> Result<&[u8], BlackboardError> {
        self.check(offset, size)?;
        Ok(&self.data[offset..offset + size])
    }

    /// Copy the whole of `other` into this board at `offset` (snapshot
    /// restore: `other` is an area image, `self` the main board).
    pub fn restore_from(
        &mut self,
        other: &Blackboard,
        offset: usize,
    ) -> Result<(), BlackboardError> {
        self.raw_write(&other.data, offset)
    }

    /// Fill the whole of `other` from this board at `offset` (snapshot save).
    pub fn save_to(&self, other: &mut Blackboard, offset: usize) -> Result<(), BlackboardError> {
        self.check(offset, other.data.len())?;
        let size = other.data.len();
        other.data.copy_from_slice(&self.data[offset..offset + size]);
        Ok(())
    }

    /// Full image, for binary settings serialization.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Full image, mutable; binary settings import writes through this.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_word_round_trip() {
        let mut bb = Blackboard::new(8);
        bb.write_word(0x1234_5678, 4, 2, false).unwrap();
        assert_eq!(bb.bytes(), &[0, 0, 0x78, 0x56, 0x34, 0x12, 0, 0]);
        assert_eq!(bb.read_word(4, 2, false).unwrap(), 0x1234_5678);
    }

    #[test]
    fn big_endian_reverses_bytes_on_both_directions() {
        let mut bb = Blackboard::new(4);
        bb.write_word(0x1234_5678, 4, 0, true).unwrap();
        assert_eq!(bb.bytes(), &[0x12, 0x34, 0x56, 0x78]);
        // A big-endian read undoes the reversal.
        assert_eq!(bb.read_word(4, 0, true).unwrap(), 0x1234_5678);
        // A raw read sees stored order.
        let mut raw = [0u8; 4];
        bb.raw_read(&mut raw, 0).unwrap();
        assert_eq!(raw, [0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn short_word_keeps_high_bytes_clear() {
        let mut bb = Blackboard::new(2);
        bb.write_word(0xABCD, 2, 0, false).unwrap();
        assert_eq!(bb.read_word(2, 0, false).unwrap(), 0xABCD);
        assert_eq!(bb.read_word(1, 0, false).unwrap(), 0xCD);
    }

    #[test]
    fn out_of_bounds_is_reported_not_panicked() {
        let mut bb = Blackboard::new(4);
        assert!(matches!(
            bb.write_word(0, 4, 1, false),
            Err(BlackboardError::OutOfBounds { offset: 1, size: 4, board: 4 })
        ));
        assert!(bb.read_word(2, 3, false).is_err());
        // Offset arithmetic must not wrap.
        assert!(bb.raw_write(&[0], usize::MAX).is_err());
    }

    #[test]
    fn save_and_restore_move_snapshot_windows() {
        let mut main = Blackboard::new(8);
        main.raw_write(&[1, 2, 3, 4, 5, 6, 7, 8], 0).unwrap();

        let mut area = Blackboard::new(4);
        main.save_to(&mut area, 2).unwrap();
        assert_eq!(area.bytes(), &[3, 4, 5, 6]);

        // Scribble over the main board, then restore the snapshot.
        main.raw_write(&[0; 8], 0).unwrap();
        main.restore_from(&area, 2).unwrap();
        assert_eq!(main.bytes(), &[0, 0, 3, 4, 5, 6, 0, 0]);
    }
}
