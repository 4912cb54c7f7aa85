//! Area configurations
//!
//! An area configuration is the byte snapshot of **one element for one
//! configuration**, paired with a validity bit. The image is itself a small
//! blackboard sized to the element's footprint; save/restore move the window
//! between it and the main board at the element's offset.
//!
//! Validity gates restore: an invalid area must first be validated, from
//! the main blackboard, from a sibling configuration's matching area, or by
//! an incoming binary image. Merge and split between nested elements copy
//! sub-windows between areas (`copy_from_inner` / `copy_to_inner`).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::blackboard::{Blackboard, BlackboardError};
use crate::element::{ElementId, ElementTree};

#[derive(Debug, thiserror::Error)]
pub enum AreaError {
    #[error("area configuration of element {path} is not valid, restore forbidden")]
    NotValid { path: String },
    #[error("area configurations cover different elements")]
    ElementMismatch,
    #[error("validating area requires a valid source area")]
    SourceNotValid,
    #[error("element {inner} is not a descendant of {outer}")]
    NotInner { inner: String, outer: String },
    #[error("settings image of {expected} byte(s) cannot be loaded from {got} byte(s)")]
    ImageSize { expected: usize, got: usize },
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
}

/// Byte snapshot of one element for one configuration.
#[derive(Clone, Debug)]
pub struct AreaConfiguration {
    element: ElementId,
    image: Blackboard,
    valid: bool,
}

impl AreaConfiguration {
    pub fn new(tree: &ElementTree, element: ElementId) -> Self {
        Self {
            element,
            image: Blackboard::new(tree.footprint(element)),
            valid: false,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn size(&self) -> usize {
        self.image.size()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn bytes(&self) -> &[u8] {
        self.image.bytes()
    }

    /// Snapshot the element's blackboard slice; the area becomes valid.
    pub fn save(&mut self, tree: &ElementTree, main: &Blackboard) -> Result<(), AreaError> {
        main.save_to(&mut self.image, tree.offset(self.element))?;
        self.valid = true;
        Ok(())
    }

    /// Write the snapshot back to the main board. Requires validity.
    pub fn restore(&self, tree: &ElementTree, main: &mut Blackboard) -> Result<(), AreaError> {
        if !self.valid {
            return Err(AreaError::NotValid {
                path: tree.path(self.element),
            });
        }
        main.restore_from(&self.image, tree.offset(self.element))?;
        Ok(())
    }

    /// Make the area valid if it is not, by saving from the main board.
    pub fn validate(&mut self, tree: &ElementTree, main: &Blackboard) -> Result<(), AreaError> {
        if !self.valid {
            self.save(tree, main)?;
        }
        Ok(())
    }

    /// Make the area valid by copying a sibling configuration's area for the
    /// same element.
    pub fn validate_against(&mut self, other: &AreaConfiguration) -> Result<(), AreaError> {
        if self.element != other.element {
            return Err(AreaError::ElementMismatch);
        }
        if !other.valid {
            return Err(AreaError::SourceNotValid);
        }
        self.image.restore_from(&other.image, 0)?;
        self.valid = true;
        Ok(())
    }

    /// Merge: copy a descendant element's area into the matching window of
    /// this area. Validity of the receiver is left alone.
    pub fn copy_from_inner(
        &mut self,
        tree: &ElementTree,
        inner: &AreaConfiguration,
    ) -> Result<(), AreaError> {
        if !tree.is_descendant_of(inner.element, self.element) {
            return Err(AreaError::NotInner {
                inner: tree.path(inner.element),
                outer: tree.path(self.element),
            });
        }
        let window = tree.offset(inner.element) - tree.offset(self.element);
        self.image.raw_write(inner.image.bytes(), window)?;
        Ok(())
    }

    /// Split: fill a descendant element's area from the matching window of
    /// this area; the inner area becomes valid.
    pub fn copy_to_inner(
        &self,
        tree: &ElementTree,
        inner: &mut AreaConfiguration,
    ) -> Result<(), AreaError> {
        if !tree.is_descendant_of(inner.element, self.element) {
            return Err(AreaError::NotInner {
                inner: tree.path(inner.element),
                outer: tree.path(self.element),
            });
        }
        let window = tree.offset(inner.element) - tree.offset(self.element);
        let size = inner.image.size();
        inner.image.raw_write(self.image.region(window, size)?, 0)?;
        inner.valid = true;
        Ok(())
    }

    /// Load the image from an incoming binary settings window; the area
    /// becomes valid.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), AreaError> {
        if bytes.len() != self.image.size() {
            return Err(AreaError::ImageSize {
                expected: self.image.size(),
                got: bytes.len(),
            });
        }
        self.image.raw_write(bytes, 0)?;
        self.valid = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::sample_tree;

    #[test]
    fn save_then_restore_recovers_saved_bytes_exactly() {
        let tree = sample_tree();
        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        let mut main = Blackboard::new(tree.blackboard_size());
        let mut area = AreaConfiguration::new(&tree, gains);
        assert_eq!(area.size(), 4);

        main.raw_write(&[1, 2, 3, 4], tree.offset(gains)).unwrap();
        area.save(&tree, &main).unwrap();
        assert!(area.is_valid());

        // Scribble arbitrary bytes, then restore.
        main.raw_write(&[9; 4], tree.offset(gains)).unwrap();
        area.restore(&tree, &mut main).unwrap();
        assert_eq!(
            main.region(tree.offset(gains), 4).unwrap(),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn restore_of_invalid_area_is_refused() {
        let tree = sample_tree();
        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        let mut main = Blackboard::new(tree.blackboard_size());
        let area = AreaConfiguration::new(&tree, gains);
        let err = area.restore(&tree, &mut main).unwrap_err();
        assert!(matches!(err, AreaError::NotValid { .. }));
        assert!(err.to_string().contains("/Audio/Gains"));
    }

    #[test]
    fn validate_saves_once_and_validate_against_copies() {
        let tree = sample_tree();
        let volume = tree.resolve("/Audio/Volume").unwrap().element();
        let mut main = Blackboard::new(tree.blackboard_size());
        main.raw_write(&[7], tree.offset(volume)).unwrap();

        let mut a = AreaConfiguration::new(&tree, volume);
        a.validate(&tree, &main).unwrap();
        assert_eq!(a.bytes(), &[7]);
        // Already valid: a later validate is a no-op.
        main.raw_write(&[8], tree.offset(volume)).unwrap();
        a.validate(&tree, &main).unwrap();
        assert_eq!(a.bytes(), &[7]);

        let mut b = AreaConfiguration::new(&tree, volume);
        b.validate_against(&a).unwrap();
        assert!(b.is_valid());
        assert_eq!(b.bytes(), &[7]);

        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        let mut c = AreaConfiguration::new(&tree, gains);
        assert!(matches!(
            c.validate_against(&a),
            Err(AreaError::ElementMismatch)
        ));
        let d = AreaConfiguration::new(&tree, volume);
        assert!(matches!(
            b.validate_against(&d),
            Err(AreaError::SourceNotValid)
        ));
    }

    #[test]
    fn arbitrary_images_survive_save_restore_cycles() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let tree = sample_tree();
        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        let mut main = Blackboard::new(tree.blackboard_size());
        let mut area = AreaConfiguration::new(&tree, gains);

        for _ in 0..64 {
            let mut image = [0u8; 4];
            rng.fill(&mut image[..]);
            main.raw_write(&image, tree.offset(gains)).unwrap();
            area.save(&tree, &main).unwrap();

            let mut noise = [0u8; 4];
            rng.fill(&mut noise[..]);
            main.raw_write(&noise, tree.offset(gains)).unwrap();

            area.restore(&tree, &mut main).unwrap();
            assert_eq!(main.region(tree.offset(gains), 4).unwrap(), &image);
        }
    }

    #[test]
    fn inner_copies_address_the_right_window() {
        let tree = sample_tree();
        let power = tree.resolve("/Modem/Power").unwrap().element();
        let limit = tree.resolve("/Modem/Power/Limit").unwrap().element();
        let flags = tree.resolve("/Modem/Power/Flags").unwrap().element();

        let mut outer = AreaConfiguration::new(&tree, power);
        outer.load_bytes(&[0xAA, 0xBB, 0xCC]).unwrap();

        // Split: children pick up their slices and become valid.
        let mut limit_area = AreaConfiguration::new(&tree, limit);
        let mut flags_area = AreaConfiguration::new(&tree, flags);
        outer.copy_to_inner(&tree, &mut limit_area).unwrap();
        outer.copy_to_inner(&tree, &mut flags_area).unwrap();
        assert_eq!(limit_area.bytes(), &[0xAA, 0xBB]);
        assert_eq!(flags_area.bytes(), &[0xCC]);
        assert!(limit_area.is_valid() && flags_area.is_valid());

        // Merge back: the inner window lands inside the outer image.
        flags_area.load_bytes(&[0x11]).unwrap();
        outer.copy_from_inner(&tree, &flags_area).unwrap();
        assert_eq!(outer.bytes(), &[0xAA, 0xBB, 0x11]);

        // Unrelated elements are rejected.
        let volume = tree.resolve("/Audio/Volume").unwrap().element();
        let volume_area = AreaConfiguration::new(&tree, volume);
        assert!(matches!(
            outer.copy_from_inner(&tree, &volume_area),
            Err(AreaError::NotInner { .. })
        ));
    }
}
