//! Domain configurations
//!
//! A domain configuration is a named, ordered list of area configurations
//! (one per element associated to the owning domain) plus an optional
//! applicability rule. The list order **is** the restore order; it starts as
//! the association order and can be reordered through
//! [`set_element_sequence`](DomainConfiguration::set_element_sequence),
//! which is what sequence-aware domains are about.
//!
//! All byte-level work delegates to the areas; rule evaluation delegates to
//! the rule engine. Areas are looked up by element id, never positionally,
//! so two configurations of one domain may carry different orders.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::area::{AreaConfiguration, AreaError};
use crate::blackboard::Blackboard;
use crate::criteria::Criteria;
use crate::element::{ElementId, ElementTree};
use crate::rules::Rule;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("element sequence of configuration {config} must list every associated element exactly once")]
    BadSequence { config: String },
    #[error("configuration {config} has no area for element {path}")]
    NoArea { config: String, path: String },
    #[error(transparent)]
    Area(#[from] AreaError),
}

/// Named set of area configurations with an optional compound rule.
#[derive(Clone, Debug)]
pub struct DomainConfiguration {
    name: String,
    rule: Option<Rule>,
    /// Restore order; one entry per associated element.
    areas: Vec<AreaConfiguration>,
}

impl DomainConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: None,
            areas: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn rule(&self) -> Option<&Rule> {
        self.rule.as_ref()
    }

    pub fn set_rule(&mut self, rule: Rule) {
        self.rule = Some(rule);
    }

    pub fn clear_rule(&mut self) {
        self.rule = None;
    }

    pub fn has_rule(&self) -> bool {
        self.rule.is_some()
    }

    /// A configuration applies when it has a rule and the rule matches.
    pub fn is_applicable(&self, criteria: &Criteria) -> bool {
        self.rule.as_ref().is_some_and(|r| r.matches(criteria))
    }

    // -- element association -------------------------------------------------

    /// Append a (not yet valid) area for a newly associated element.
    pub fn add_element(&mut self, tree: &ElementTree, element: ElementId) {
        self.areas.push(AreaConfiguration::new(tree, element));
    }

    pub fn remove_element(&mut self, element: ElementId) {
        self.areas.retain(|a| a.element() != element);
    }

    pub fn area(&self, element: ElementId) -> Option<&AreaConfiguration> {
        self.areas.iter().find(|a| a.element() == element)
    }

    pub fn area_mut(&mut self, element: ElementId) -> Option<&mut AreaConfiguration> {
        self.areas.iter_mut().find(|a| a.element() == element)
    }

    /// Areas in restore order.
    pub fn areas(&self) -> &[AreaConfiguration] {
        &self.areas
    }

    pub fn areas_mut(&mut self) -> &mut [AreaConfiguration] {
        &mut self.areas
    }

    /// Elements in the current restore order.
    pub fn element_sequence(&self) -> Vec<ElementId> {
        self.areas.iter().map(|a| a.element()).collect()
    }

    /// Reorder the areas to match `sequence`, which must list every
    /// associated element exactly once.
    pub fn set_element_sequence(&mut self, sequence: &[ElementId]) -> Result<(), ConfigError> {
        let bad = |config: &str| ConfigError::BadSequence {
            config: config.to_string(),
        };
        if sequence.len() != self.areas.len() {
            return Err(bad(&self.name));
        }
        // Check the permutation before touching the list.
        let mut indices = Vec::with_capacity(sequence.len());
        for &element in sequence {
            let pos = self
                .areas
                .iter()
                .position(|a| a.element() == element)
                .ok_or_else(|| bad(&self.name))?;
            if indices.contains(&pos) {
                return Err(bad(&self.name));
            }
            indices.push(pos);
        }
        let mut taken: Vec<Option<AreaConfiguration>> = self.areas.drain(..).map(Some).collect();
        self.areas = indices.into_iter().filter_map(|i| taken[i].take()).collect();
        debug_assert_eq!(self.areas.len(), sequence.len());
        Ok(())
    }

    // -- byte-image operations ----------------------------------------------

    /// Snapshot every area from the main board.
    pub fn save(&mut self, tree: &ElementTree, main: &Blackboard) -> Result<(), ConfigError> {
        for area in &mut self.areas {
            area.save(tree, main)?;
        }
        Ok(())
    }

    /// Restore every area, in restore order.
    pub fn restore(&self, tree: &ElementTree, main: &mut Blackboard) -> Result<(), ConfigError> {
        for area in &self.areas {
            area.restore(tree, main)?;
        }
        Ok(())
    }

    /// Ensure every area is valid, saving missing ones from the main board.
    pub fn validate(&mut self, tree: &ElementTree, main: &Blackboard) -> Result<(), ConfigError> {
        for area in &mut self.areas {
            area.validate(tree, main)?;
        }
        Ok(())
    }

    /// Ensure one element's area is valid.
    pub fn validate_element(
        &mut self,
        tree: &ElementTree,
        element: ElementId,
        main: &Blackboard,
    ) -> Result<(), ConfigError> {
        let name = self.name.clone();
        let area = self
            .area_mut(element)
            .ok_or_else(|| ConfigError::NoArea {
                config: name,
                path: tree.path(element),
            })?;
        area.validate(tree, main)?;
        Ok(())
    }

    /// Validate every area against the matching area of a sibling
    /// configuration (matched by element, not by position). Areas with no
    /// valid counterpart are left for a later blackboard validation.
    pub fn validate_against(&mut self, other: &DomainConfiguration) -> Result<(), ConfigError> {
        for area in &mut self.areas {
            if area.is_valid() {
                continue;
            }
            if let Some(source) = other.area(area.element()) {
                if source.is_valid() {
                    area.validate_against(source)?;
                }
            }
        }
        Ok(())
    }

    /// Merge a descendant element's area into its ascendant's area.
    pub fn merge(
        &mut self,
        tree: &ElementTree,
        to: ElementId,
        from: ElementId,
    ) -> Result<(), ConfigError> {
        let from_area = self
            .area(from)
            .ok_or_else(|| ConfigError::NoArea {
                config: self.name.clone(),
                path: tree.path(from),
            })?
            .clone();
        let name = self.name.clone();
        let to_area = self.area_mut(to).ok_or_else(|| ConfigError::NoArea {
            config: name,
            path: tree.path(to),
        })?;
        to_area.copy_from_inner(tree, &from_area)?;
        Ok(())
    }

    /// Split an element's area into its children's areas (which must already
    /// be present); the children become valid.
    pub fn split(&mut self, tree: &ElementTree, from: ElementId) -> Result<(), ConfigError> {
        let from_area = self
            .area(from)
            .ok_or_else(|| ConfigError::NoArea {
                config: self.name.clone(),
                path: tree.path(from),
            })?
            .clone();
        for &child in tree.children(from) {
            let name = self.name.clone();
            let child_area = self.area_mut(child).ok_or_else(|| ConfigError::NoArea {
                config: name,
                path: tree.path(child),
            })?;
            from_area.copy_to_inner(tree, child_area)?;
        }
        Ok(())
    }

    /// Total byte size of the areas, in restore order (binary settings
    /// layout).
    pub fn data_size(&self) -> usize {
        self.areas.iter().map(|a| a.size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::sample_tree;

    fn config_with_all(tree: &ElementTree) -> (DomainConfiguration, Vec<ElementId>) {
        let volume = tree.resolve("/Audio/Volume").unwrap().element();
        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        let mut config = DomainConfiguration::new("boot");
        config.add_element(tree, volume);
        config.add_element(tree, gains);
        (config, vec![volume, gains])
    }

    #[test]
    fn save_restore_round_trip_over_all_areas() {
        let tree = sample_tree();
        let (mut config, elements) = config_with_all(&tree);
        let mut main = Blackboard::new(tree.blackboard_size());
        main.raw_write(&[1], tree.offset(elements[0])).unwrap();
        main.raw_write(&[2, 3, 4, 5], tree.offset(elements[1])).unwrap();

        config.save(&tree, &main).unwrap();
        main.raw_write(&[0; 5], tree.offset(elements[0])).unwrap();
        config.restore(&tree, &mut main).unwrap();
        assert_eq!(main.region(tree.offset(elements[0]), 5).unwrap(), &[
            1, 2, 3, 4, 5
        ]);
        assert_eq!(config.data_size(), 5);
    }

    #[test]
    fn element_sequence_reorders_and_rejects_non_permutations() {
        let tree = sample_tree();
        let (mut config, elements) = config_with_all(&tree);
        let (volume, gains) = (elements[0], elements[1]);

        assert_eq!(config.element_sequence(), vec![volume, gains]);
        config.set_element_sequence(&[gains, volume]).unwrap();
        assert_eq!(config.element_sequence(), vec![gains, volume]);

        // Missing, duplicated and stray elements are all rejected.
        assert!(config.set_element_sequence(&[gains]).is_err());
        assert!(config.set_element_sequence(&[gains, gains]).is_err());
        let stray = tree.resolve("/Audio/Mode").unwrap().element();
        assert!(config.set_element_sequence(&[gains, stray]).is_err());
        // The failed calls left the association intact.
        assert_eq!(config.element_sequence().len(), 2);
    }

    #[test]
    fn applicability_requires_a_matching_rule() {
        let tree = sample_tree();
        let (mut config, _) = config_with_all(&tree);
        let mut criteria = Criteria::new();
        criteria
            .create_exclusive("Mode", &[(0, "Production"), (1, "Test")])
            .unwrap();

        // No rule: never applicable.
        assert!(!config.is_applicable(&criteria));

        config.set_rule(Rule::parse("Mode Is Test", &criteria).unwrap());
        assert!(!config.is_applicable(&criteria));
        let mode = criteria.find("Mode").unwrap();
        criteria.get_mut(mode).set_state(1).unwrap();
        assert!(config.is_applicable(&criteria));

        config.clear_rule();
        assert!(!config.is_applicable(&criteria));
    }

    #[test]
    fn validate_against_fills_only_invalid_areas() {
        let tree = sample_tree();
        let (mut source, elements) = config_with_all(&tree);
        let mut main = Blackboard::new(tree.blackboard_size());
        main.raw_write(&[9], tree.offset(elements[0])).unwrap();
        source.save(&tree, &main).unwrap();

        let (mut fresh, _) = config_with_all(&tree);
        // Give the fresh config one pre-validated area with its own data.
        main.raw_write(&[4], tree.offset(elements[0])).unwrap();
        fresh
            .validate_element(&tree, elements[0], &main)
            .unwrap();
        fresh.validate_against(&source).unwrap();

        assert_eq!(fresh.area(elements[0]).unwrap().bytes(), &[4]);
        assert!(fresh.area(elements[1]).unwrap().is_valid());
    }
}
