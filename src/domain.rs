//! Configurable domains
//!
//! A domain owns a set of associated elements (each paired with the syncer
//! set covering it) and the configurations that can be applied to them. The
//! structural invariant the whole engine leans on: **every configuration of
//! a domain carries exactly one area configuration per associated element**.
//! Association changes (add, remove, split, merge) rewrite every
//! configuration in lockstep.
//!
//! Applying a domain picks the first configuration whose rule matches the
//! current criteria, restores its byte image if it differs from the last
//! applied one, and either syncs immediately (sequence-aware domains) or
//! contributes its syncer set to the caller's batch.
//!
//! The [`Domains`] collection adds the declaration-order apply cycle, the
//! element→domain attachment side map, and the binary settings walk
//! (domains → configurations → areas, all in declaration order).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::area::AreaError;
use crate::blackboard::Blackboard;
use crate::config::{ConfigError, DomainConfiguration};
use crate::criteria::Criteria;
use crate::element::{ElementId, ElementKind, ElementTree};
use crate::rules::Rule;
use crate::sync::{SyncError, SyncerRegistry, SyncerSet};

/// Stable identity of a domain, never reused after deletion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("configurable domain {0} not found")]
    DomainNotFound(String),
    #[error("configurable domain {0} already exists")]
    DomainExists(String),
    #[error("configuration {config} not found in domain {domain}")]
    ConfigNotFound { domain: String, config: String },
    #[error("configuration {config} already exists in domain {domain}")]
    ConfigExists { domain: String, config: String },
    #[error("element {path} already associated to domain {domain}")]
    AlreadyAssociated { domain: String, path: String },
    #[error("element {path} already owned by domain {domain} through an associated ancestor")]
    AlreadyOwned { domain: String, path: String },
    #[error("element {path} not associated to domain {domain}")]
    NotAssociated { domain: String, path: String },
    #[error("element {path} has no children to split into")]
    NoChildren { path: String },
    #[error(
        "configuration {config} of domain {domain} carries a rule; clear the rule before deleting"
    )]
    RuleProtected { domain: String, config: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Area(#[from] AreaError),
}

struct DomainElement {
    id: ElementId,
    syncers: SyncerSet,
}

/// One configurable domain: associated elements, configurations, last
/// applied state and the union syncer set.
pub struct ConfigurableDomain {
    id: DomainId,
    name: String,
    sequence_aware: bool,
    elements: Vec<DomainElement>,
    configurations: Vec<DomainConfiguration>,
    last_applied: Option<String>,
    syncer_set: SyncerSet,
}

impl ConfigurableDomain {
    fn new(id: DomainId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sequence_aware: false,
            elements: Vec::new(),
            configurations: Vec::new(),
            last_applied: None,
            syncer_set: SyncerSet::new(),
        }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_sequence_aware(&self) -> bool {
        self.sequence_aware
    }

    pub fn set_sequence_aware(&mut self, aware: bool) {
        if self.sequence_aware != aware {
            info!(
                domain = %self.name,
                "making domain sequence {}",
                if aware { "aware" } else { "unaware" }
            );
            self.sequence_aware = aware;
        }
    }

    pub fn element_ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.elements.iter().map(|e| e.id)
    }

    pub fn contains_element(&self, element: ElementId) -> bool {
        self.elements.iter().any(|e| e.id == element)
    }

    pub fn configurations(&self) -> impl Iterator<Item = &DomainConfiguration> {
        self.configurations.iter()
    }

    pub fn last_applied(&self) -> Option<&str> {
        self.last_applied.as_deref()
    }

    pub fn syncer_set(&self) -> &SyncerSet {
        &self.syncer_set
    }

    fn find_config(&self, name: &str) -> Result<usize, DomainError> {
        self.configurations
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| DomainError::ConfigNotFound {
                domain: self.name.clone(),
                config: name.to_string(),
            })
    }

    pub fn config(&self, name: &str) -> Result<&DomainConfiguration, DomainError> {
        let index = self.find_config(name)?;
        Ok(&self.configurations[index])
    }

    pub fn config_mut(&mut self, name: &str) -> Result<&mut DomainConfiguration, DomainError> {
        let index = self.find_config(name)?;
        Ok(&mut self.configurations[index])
    }

    // -- element association -------------------------------------------------

    fn do_add_element(&mut self, tree: &ElementTree, element: ElementId) {
        let mut syncers = SyncerSet::new();
        tree.fill_syncer_set(element, &mut syncers);
        self.syncer_set.add_all(&syncers);
        for config in &mut self.configurations {
            config.add_element(tree, element);
        }
        self.elements.push(DomainElement {
            id: element,
            syncers,
        });
    }

    fn do_remove_element(&mut self, element: ElementId, recompute_syncers: bool) {
        self.elements.retain(|e| e.id != element);
        for config in &mut self.configurations {
            config.remove_element(element);
        }
        if recompute_syncers {
            self.syncer_set.clear();
            let sets: Vec<SyncerSet> = self.elements.iter().map(|e| e.syncers.clone()).collect();
            for set in &sets {
                self.syncer_set.add_all(set);
            }
        }
    }

    /// Associate an element. Already-associated descendants are merged into
    /// the newcomer (their area bytes land in its areas) and dissociated;
    /// the dissociated ids are returned for attachment bookkeeping.
    pub fn add_element(
        &mut self,
        tree: &ElementTree,
        element: ElementId,
        main: Option<&Blackboard>,
    ) -> Result<Vec<ElementId>, DomainError> {
        if self.contains_element(element) {
            return Err(DomainError::AlreadyAssociated {
                domain: self.name.clone(),
                path: tree.path(element),
            });
        }
        if self
            .elements
            .iter()
            .any(|e| tree.is_descendant_of(element, e.id))
        {
            return Err(DomainError::AlreadyOwned {
                domain: self.name.clone(),
                path: tree.path(element),
            });
        }
        info!(domain = %self.name, element = %tree.path(element), "adding element to domain");
        self.do_add_element(tree, element);

        // Make the fresh areas valid first, so merged descendant data is laid
        // over a coherent full-footprint image rather than zeroes.
        if let Some(main) = main {
            for config in &mut self.configurations {
                config.validate_element(tree, element, main)?;
            }
        }

        let merged: Vec<ElementId> = self
            .elements
            .iter()
            .map(|e| e.id)
            .filter(|&e| tree.is_descendant_of(e, element))
            .collect();
        for &descendant in &merged {
            debug!(
                domain = %self.name,
                from = %tree.path(descendant),
                to = %tree.path(element),
                "merging descendant configurations into ascendant"
            );
            for config in &mut self.configurations {
                config.merge(tree, element, descendant)?;
            }
            // The newcomer's syncer coverage includes the descendants'.
            self.do_remove_element(descendant, false);
        }
        Ok(merged)
    }

    /// Dissociate an element; the domain syncer set is re-derived.
    pub fn remove_element(
        &mut self,
        tree: &ElementTree,
        element: ElementId,
    ) -> Result<(), DomainError> {
        if !self.contains_element(element) {
            return Err(DomainError::NotAssociated {
                domain: self.name.clone(),
                path: tree.path(element),
            });
        }
        info!(domain = %self.name, element = %tree.path(element), "removing element from domain");
        self.do_remove_element(element, true);
        Ok(())
    }

    /// Replace an element's association by associations to each of its
    /// children; every configuration's area is split into child areas.
    /// Returns the children for attachment bookkeeping.
    pub fn split_element(
        &mut self,
        tree: &ElementTree,
        element: ElementId,
    ) -> Result<Vec<ElementId>, DomainError> {
        if !self.contains_element(element) {
            return Err(DomainError::NotAssociated {
                domain: self.name.clone(),
                path: tree.path(element),
            });
        }
        let children = tree.children(element).to_vec();
        if children.is_empty() {
            return Err(DomainError::NoChildren {
                path: tree.path(element),
            });
        }
        info!(domain = %self.name, element = %tree.path(element), "splitting domain element");
        for &child in &children {
            self.do_add_element(tree, child);
        }
        for config in &mut self.configurations {
            config.split(tree, element)?;
        }
        // The split element's syncer coverage is included in its children's.
        self.do_remove_element(element, false);
        Ok(children)
    }

    // -- configuration management --------------------------------------------

    /// Create a configuration holding one area per associated element, and
    /// validate it: from a sibling configuration where possible, from the
    /// main blackboard for whatever remains.
    pub fn create_configuration(
        &mut self,
        name: &str,
        tree: &ElementTree,
        main: &Blackboard,
    ) -> Result<(), DomainError> {
        if self.find_config(name).is_ok() {
            return Err(DomainError::ConfigExists {
                domain: self.name.clone(),
                config: name.to_string(),
            });
        }
        info!(domain = %self.name, config = name, "creating domain configuration");
        let mut config = DomainConfiguration::new(name);
        for element in &self.elements {
            config.add_element(tree, element.id);
        }
        if let Some(other) = self.configurations.first() {
            config.validate_against(other)?;
        }
        config.validate(tree, main)?;
        self.configurations.push(config);
        Ok(())
    }

    /// Delete a configuration. Refused while it carries a rule, against
    /// accidental loss.
    pub fn delete_configuration(&mut self, name: &str) -> Result<(), DomainError> {
        let index = self.find_config(name)?;
        if self.configurations[index].has_rule() {
            return Err(DomainError::RuleProtected {
                domain: self.name.clone(),
                config: name.to_string(),
            });
        }
        info!(domain = %self.name, config = name, "deleting domain configuration");
        if self.last_applied.as_deref() == Some(name) {
            self.last_applied = None;
        }
        self.configurations.remove(index);
        Ok(())
    }

    pub fn rename_configuration(&mut self, name: &str, new_name: &str) -> Result<(), DomainError> {
        if self.find_config(new_name).is_ok() {
            return Err(DomainError::ConfigExists {
                domain: self.name.clone(),
                config: new_name.to_string(),
            });
        }
        let index = self.find_config(name)?;
        info!(domain = %self.name, config = name, new = new_name, "renaming configuration");
        if self.last_applied.as_deref() == Some(name) {
            self.last_applied = Some(new_name.to_string());
        }
        self.configurations[index].rename(new_name);
        Ok(())
    }

    /// Snapshot the current blackboard state into a configuration.
    pub fn save_configuration(
        &mut self,
        name: &str,
        tree: &ElementTree,
        main: &Blackboard,
    ) -> Result<(), DomainError> {
        let index = self.find_config(name)?;
        info!(domain = %self.name, config = name, "saving configuration from blackboard");
        self.configurations[index].save(tree, main)?;
        Ok(())
    }

    /// Restore a configuration by name; with `auto_sync`, the domain's
    /// syncers run immediately and failures are appended to `sync_errors`.
    #[allow(clippy::too_many_arguments)]
    pub fn restore_configuration(
        &mut self,
        name: &str,
        tree: &ElementTree,
        main: &mut Blackboard,
        registry: &mut SyncerRegistry,
        auto_sync: bool,
        sync_errors: &mut Vec<SyncError>,
    ) -> Result<(), DomainError> {
        let index = self.find_config(name)?;
        info!(domain = %self.name, config = name, "restoring configuration to blackboard");
        self.configurations[index].restore(tree, main)?;
        self.last_applied = Some(name.to_string());
        if auto_sync {
            if let Err(failures) = self.syncer_set.sync(registry, main, false) {
                sync_errors.extend(failures.failures);
            }
        }
        Ok(())
    }

    pub fn set_rule(&mut self, config: &str, rule: Rule) -> Result<(), DomainError> {
        let index = self.find_config(config)?;
        self.configurations[index].set_rule(rule);
        Ok(())
    }

    pub fn clear_rule(&mut self, config: &str) -> Result<(), DomainError> {
        let index = self.find_config(config)?;
        self.configurations[index].clear_rule();
        Ok(())
    }

    /// Ensure every area of every configuration is valid.
    pub fn validate(&mut self, tree: &ElementTree, main: &Blackboard) -> Result<(), DomainError> {
        debug!(domain = %self.name, "validating domain against main blackboard");
        for config in &mut self.configurations {
            config.validate(tree, main)?;
        }
        Ok(())
    }

    // -- application ---------------------------------------------------------

    /// Apply the first applicable configuration, if it differs from the last
    /// applied one (or `force`). Sequence-aware domains sync their own set
    /// right after restoring; others contribute it to `batch`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &mut self,
        tree: &ElementTree,
        main: &mut Blackboard,
        registry: &mut SyncerRegistry,
        criteria: &Criteria,
        batch: &mut SyncerSet,
        force: bool,
        sync_errors: &mut Vec<SyncError>,
    ) -> Result<(), DomainError> {
        if force {
            // Forget the last applied configuration so the restore happens.
            self.last_applied = None;
        }
        let Some(index) = self
            .configurations
            .iter()
            .position(|c| c.is_applicable(criteria))
        else {
            return Ok(());
        };
        let name = self.configurations[index].name().to_string();
        if self.last_applied.as_deref() == Some(name.as_str()) {
            return Ok(());
        }
        info!(domain = %self.name, config = %name, "applying configuration");
        self.configurations[index].restore(tree, main)?;
        self.last_applied = Some(name);
        if self.sequence_aware {
            if let Err(failures) = self.syncer_set.sync(registry, main, false) {
                sync_errors.extend(failures.failures);
            }
        } else {
            batch.add_all(&self.syncer_set);
        }
        Ok(())
    }

    /// Total settings byte size: every configuration's areas in declaration
    /// order.
    pub fn data_size(&self) -> usize {
        self.configurations.iter().map(|c| c.data_size()).sum()
    }
}

// ---------------------------------------------------------------------------
// The domain collection
// ---------------------------------------------------------------------------

/// All configurable domains, in declaration order, plus the element→domain
/// attachment side map.
#[derive(Default)]
pub struct Domains {
    domains: Vec<ConfigurableDomain>,
    next_id: usize,
    attachments: BTreeMap<ElementId, Vec<DomainId>>,
}

impl Domains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigurableDomain> {
        self.domains.iter()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    fn index_of(&self, name: &str) -> Result<usize, DomainError> {
        self.domains
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| DomainError::DomainNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&ConfigurableDomain, DomainError> {
        let index = self.index_of(name)?;
        Ok(&self.domains[index])
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut ConfigurableDomain, DomainError> {
        let index = self.index_of(name)?;
        Ok(&mut self.domains[index])
    }

    pub fn create_domain(&mut self, name: &str) -> Result<DomainId, DomainError> {
        if self.index_of(name).is_ok() {
            return Err(DomainError::DomainExists(name.to_string()));
        }
        info!(domain = name, "creating configurable domain");
        let id = DomainId(self.next_id);
        self.next_id += 1;
        self.domains.push(ConfigurableDomain::new(id, name));
        Ok(id)
    }

    pub fn delete_domain(&mut self, name: &str) -> Result<(), DomainError> {
        let index = self.index_of(name)?;
        info!(domain = name, "deleting configurable domain");
        let domain = self.domains.remove(index);
        for list in self.attachments.values_mut() {
            list.retain(|&d| d != domain.id);
        }
        self.attachments.retain(|_, list| !list.is_empty());
        Ok(())
    }

    pub fn rename_domain(&mut self, name: &str, new_name: &str) -> Result<(), DomainError> {
        if self.index_of(new_name).is_ok() {
            return Err(DomainError::DomainExists(new_name.to_string()));
        }
        let index = self.index_of(name)?;
        info!(domain = name, new = new_name, "renaming configurable domain");
        self.domains[index].name = new_name.to_string();
        Ok(())
    }

    // -- association bookkeeping --------------------------------------------

    fn attach(&mut self, element: ElementId, domain: DomainId) {
        let list = self.attachments.entry(element).or_default();
        if !list.contains(&domain) {
            list.push(domain);
        }
    }

    fn detach(&mut self, element: ElementId, domain: DomainId) {
        if let Some(list) = self.attachments.get_mut(&element) {
            list.retain(|&d| d != domain);
            if list.is_empty() {
                self.attachments.remove(&element);
            }
        }
    }

    pub fn add_element_to_domain(
        &mut self,
        name: &str,
        tree: &ElementTree,
        element: ElementId,
        main: Option<&Blackboard>,
    ) -> Result<(), DomainError> {
        let index = self.index_of(name)?;
        let domain_id = self.domains[index].id;
        let merged = self.domains[index].add_element(tree, element, main)?;
        self.attach(element, domain_id);
        for e in merged {
            self.detach(e, domain_id);
        }
        Ok(())
    }

    pub fn remove_element_from_domain(
        &mut self,
        name: &str,
        tree: &ElementTree,
        element: ElementId,
    ) -> Result<(), DomainError> {
        let index = self.index_of(name)?;
        let domain_id = self.domains[index].id;
        self.domains[index].remove_element(tree, element)?;
        self.detach(element, domain_id);
        Ok(())
    }

    pub fn split_domain(
        &mut self,
        name: &str,
        tree: &ElementTree,
        element: ElementId,
    ) -> Result<(), DomainError> {
        let index = self.index_of(name)?;
        let domain_id = self.domains[index].id;
        let children = self.domains[index].split_element(tree, element)?;
        self.detach(element, domain_id);
        for child in children {
            self.attach(child, domain_id);
        }
        Ok(())
    }

    /// Domains directly attached to an element.
    pub fn attached_domains(&self, element: ElementId) -> &[DomainId] {
        self.attachments
            .get(&element)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Domains an element belongs to: attachments of itself and of every
    /// ancestor.
    pub fn belonging_domains(&self, tree: &ElementTree, element: ElementId) -> Vec<DomainId> {
        let mut out = Vec::new();
        let mut cur = Some(element);
        while let Some(e) = cur {
            for &d in self.attached_domains(e) {
                if !out.contains(&d) {
                    out.push(d);
                }
            }
            cur = tree.parent(e);
        }
        out
    }

    pub fn domain_name(&self, id: DomainId) -> Option<&str> {
        self.domains
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.as_str())
    }

    /// Every element associated to at least one domain, in element order.
    pub fn associated_elements(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.attachments.keys().copied()
    }

    /// Leaf elements (parameters, bit blocks) not belonging to any domain.
    pub fn rogue_elements(&self, tree: &ElementTree) -> Vec<ElementId> {
        tree.ids()
            .filter(|&id| {
                matches!(
                    tree.kind(id),
                    ElementKind::Parameter { .. } | ElementKind::BitBlock { .. }
                ) && self.belonging_domains(tree, id).is_empty()
            })
            .collect()
    }

    // -- apply cycle ---------------------------------------------------------

    /// One apply cycle: every domain in declaration order, then the batched
    /// sync. Sync failures are collected, not fatal; a restore failure is a
    /// logic error and aborts.
    pub fn apply(
        &mut self,
        tree: &ElementTree,
        main: &mut Blackboard,
        registry: &mut SyncerRegistry,
        criteria: &Criteria,
        force: bool,
    ) -> Result<Vec<SyncError>, DomainError> {
        debug!(force, "applying configurations");
        let mut batch = SyncerSet::new();
        let mut sync_errors = Vec::new();
        for domain in &mut self.domains {
            domain.apply(
                tree,
                main,
                registry,
                criteria,
                &mut batch,
                force,
                &mut sync_errors,
            )?;
        }
        if let Err(failures) = batch.sync(registry, main, false) {
            sync_errors.extend(failures.failures);
        }
        Ok(sync_errors)
    }

    /// Ensure every area of every configuration of every domain is valid.
    pub fn validate_all(
        &mut self,
        tree: &ElementTree,
        main: &Blackboard,
    ) -> Result<(), DomainError> {
        for domain in &mut self.domains {
            domain.validate(tree, main)?;
        }
        Ok(())
    }

    // -- binary settings walk ------------------------------------------------

    /// Sum of all areas' sizes in declaration order.
    pub fn settings_data_size(&self) -> usize {
        self.domains.iter().map(|d| d.data_size()).sum()
    }

    /// Concatenate every area's bytes in declaration order (domains →
    /// configurations → areas).
    pub fn export_settings_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.settings_data_size());
        for domain in &self.domains {
            for config in &domain.configurations {
                for area in config.areas() {
                    out.extend_from_slice(area.bytes());
                }
            }
        }
        out
    }

    /// Load every area's bytes from a settings payload laid out in
    /// declaration order; loaded areas become valid.
    pub fn import_settings_data(&mut self, data: &[u8]) -> Result<(), AreaError> {
        let expected = self.settings_data_size();
        if data.len() != expected {
            return Err(AreaError::ImageSize {
                expected,
                got: data.len(),
            });
        }
        let mut pos = 0;
        for domain in &mut self.domains {
            for config in &mut domain.configurations {
                for area in config.areas_mut() {
                    let size = area.size();
                    area.load_bytes(&data[pos..pos + size])?;
                    pos += size;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::sample_tree;
    use crate::sync::LoopbackSyncer;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        tree: ElementTree,
        bb: Blackboard,
        registry: SyncerRegistry,
        criteria: Criteria,
        domains: Domains,
    }

    /// Tree + criteria + one "D" domain over /Audio/Gains with loopback
    /// syncer coverage of the Audio subsystem.
    fn fixture() -> (Fixture, Arc<Mutex<Vec<u8>>>) {
        let mut tree = sample_tree();
        let mut registry = SyncerRegistry::new();
        let audio = tree.resolve("/Audio").unwrap().element();
        let store = Arc::new(Mutex::new(vec![0u8; tree.footprint(audio)]));
        let syncer = registry.register(Box::new(LoopbackSyncer::new(
            "/Audio",
            tree.offset(audio),
            store.clone(),
        )));
        tree.set_syncer(audio, syncer);

        let mut criteria = Criteria::new();
        criteria
            .create_exclusive("Mode", &[(0, "Production"), (1, "Test"), (2, "Unknown")])
            .unwrap();

        let bb = Blackboard::new(tree.blackboard_size());
        let mut domains = Domains::new();
        domains.create_domain("D").unwrap();
        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        domains
            .add_element_to_domain("D", &tree, gains, Some(&bb))
            .unwrap();
        (
            Fixture {
                tree,
                bb,
                registry,
                criteria,
                domains,
            },
            store,
        )
    }

    fn gains(f: &Fixture) -> ElementId {
        f.tree.resolve("/Audio/Gains").unwrap().element()
    }

    /// Build configuration `name` capturing `bytes` at the gains image, with
    /// rule `Mode Is <mode>`.
    fn add_config(f: &mut Fixture, name: &str, bytes: [u8; 4], mode: &str) {
        let gains = gains(f);
        f.bb.raw_write(&bytes, f.tree.offset(gains)).unwrap();
        let domain = f.domains.get_mut("D").unwrap();
        domain.create_configuration(name, &f.tree, &f.bb).unwrap();
        domain.save_configuration(name, &f.tree, &f.bb).unwrap();
        let rule = Rule::parse(&format!("Mode Is {mode}"), &f.criteria).unwrap();
        domain.set_rule(name, rule).unwrap();
    }

    fn set_mode(f: &mut Fixture, literal: &str) {
        let mode = f.criteria.find("Mode").unwrap();
        f.criteria
            .get_mut(mode)
            .set_state_lexical(literal)
            .unwrap();
    }

    #[test]
    fn apply_follows_criterion_state_and_tracks_last_applied() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");
        add_config(&mut f, "B", [9, 9, 9, 9], "Test");
        let offset = f.tree.offset(gains(&f));

        set_mode(&mut f, "Production");
        let errors = f
            .domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, false)
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(f.bb.region(offset, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(f.domains.get("D").unwrap().last_applied(), Some("A"));

        set_mode(&mut f, "Test");
        f.domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, false)
            .unwrap();
        assert_eq!(f.bb.region(offset, 4).unwrap(), &[9, 9, 9, 9]);
        assert_eq!(f.domains.get("D").unwrap().last_applied(), Some("B"));

        // No configuration matches: apply is a no-op, last applied stays.
        set_mode(&mut f, "Unknown");
        f.bb.raw_write(&[7; 4], offset).unwrap();
        f.domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, false)
            .unwrap();
        assert_eq!(f.bb.region(offset, 4).unwrap(), &[7; 4]);
        assert_eq!(f.domains.get("D").unwrap().last_applied(), Some("B"));
    }

    #[test]
    fn apply_skips_redundant_restores_until_forced() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");
        let offset = f.tree.offset(gains(&f));

        set_mode(&mut f, "Production");
        f.domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, false)
            .unwrap();
        // Scribble, re-apply without force: last-applied shortcut skips.
        f.bb.raw_write(&[0; 4], offset).unwrap();
        f.domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, false)
            .unwrap();
        assert_eq!(f.bb.region(offset, 4).unwrap(), &[0; 4]);
        // Forced apply ignores last-applied.
        f.domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, true)
            .unwrap();
        assert_eq!(f.bb.region(offset, 4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn batched_sync_pushes_the_restored_image() {
        let (mut f, store) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");
        set_mode(&mut f, "Production");
        f.domains
            .apply(&f.tree, &mut f.bb, &mut f.registry, &f.criteria, false)
            .unwrap();
        // The loopback store saw the restored image (gains sit at offset 1
        // of the audio region).
        assert_eq!(&store.lock().unwrap()[1..5], &[1, 2, 3, 4]);
    }

    #[test]
    fn every_configuration_keeps_one_area_per_element() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");
        add_config(&mut f, "B", [9, 9, 9, 9], "Test");

        let volume = f.tree.resolve("/Audio/Volume").unwrap().element();
        f.domains
            .add_element_to_domain("D", &f.tree, volume, Some(&f.bb))
            .unwrap();
        let domain = f.domains.get("D").unwrap();
        let elements: Vec<ElementId> = domain.element_ids().collect();
        assert_eq!(elements.len(), 2);
        for config in domain.configurations() {
            let mut areas: Vec<ElementId> = config.areas().iter().map(|a| a.element()).collect();
            let mut expected = elements.clone();
            areas.sort();
            expected.sort();
            assert_eq!(areas, expected);
            assert!(config.areas().iter().all(|a| a.is_valid()));
        }

        f.domains
            .remove_element_from_domain("D", &f.tree, volume)
            .unwrap();
        let domain = f.domains.get("D").unwrap();
        for config in domain.configurations() {
            assert_eq!(config.areas().len(), 1);
        }
    }

    #[test]
    fn add_rejects_duplicates_and_covered_descendants() {
        let (mut f, _) = fixture();
        let gains = gains(&f);
        let audio = f.tree.resolve("/Audio").unwrap().element();

        assert!(matches!(
            f.domains
                .add_element_to_domain("D", &f.tree, gains, Some(&f.bb)),
            Err(DomainError::AlreadyAssociated { .. })
        ));

        // Associate the whole subsystem: the gains association merges away.
        f.domains
            .add_element_to_domain("D", &f.tree, audio, Some(&f.bb))
            .unwrap();
        let domain = f.domains.get("D").unwrap();
        assert_eq!(domain.element_ids().collect::<Vec<_>>(), vec![audio]);

        // Now a child of an associated ancestor is refused.
        assert!(matches!(
            f.domains
                .add_element_to_domain("D", &f.tree, gains, Some(&f.bb)),
            Err(DomainError::AlreadyOwned { .. })
        ));
    }

    #[test]
    fn merge_preserves_descendant_configuration_bytes() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");

        let audio = f.tree.resolve("/Audio").unwrap().element();
        let gains = gains(&f);
        f.domains
            .add_element_to_domain("D", &f.tree, audio, Some(&f.bb))
            .unwrap();

        // The audio-wide area of configuration A carries the gains bytes at
        // the right window.
        let domain = f.domains.get("D").unwrap();
        let config = domain.config("A").unwrap();
        let area = config.area(audio).unwrap();
        let window = f.tree.offset(gains) - f.tree.offset(audio);
        assert_eq!(&area.bytes()[window..window + 4], &[1, 2, 3, 4]);
        assert!(area.is_valid());
    }

    #[test]
    fn split_replaces_parent_area_with_child_slices() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());

        let power = tree.resolve("/Modem/Power").unwrap().element();
        let limit = tree.resolve("/Modem/Power/Limit").unwrap().element();
        let flags = tree.resolve("/Modem/Power/Flags").unwrap().element();

        let mut domains = Domains::new();
        domains.create_domain("P").unwrap();
        domains
            .add_element_to_domain("P", &tree, power, Some(&bb))
            .unwrap();
        bb.raw_write(&[0xAA, 0xBB, 0xCC], tree.offset(power)).unwrap();
        domains
            .get_mut("P")
            .unwrap()
            .create_configuration("C", &tree, &bb)
            .unwrap();
        domains
            .get_mut("P")
            .unwrap()
            .save_configuration("C", &tree, &bb)
            .unwrap();

        domains.split_domain("P", &tree, power).unwrap();
        let domain = domains.get("P").unwrap();
        let mut elements: Vec<ElementId> = domain.element_ids().collect();
        elements.sort();
        assert_eq!(elements, vec![limit, flags]);

        let config = domain.config("C").unwrap();
        assert!(config.area(power).is_none());
        assert_eq!(config.area(limit).unwrap().bytes(), &[0xAA, 0xBB]);
        assert_eq!(config.area(flags).unwrap().bytes(), &[0xCC]);
        assert!(config.area(limit).unwrap().is_valid());

        // Splitting a leaf fails.
        let err = domains.split_domain("P", &tree, limit).unwrap_err();
        assert!(matches!(err, DomainError::NoChildren { .. }));
    }

    #[test]
    fn configuration_crud_guards() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");

        let domain = f.domains.get_mut("D").unwrap();
        assert!(matches!(
            domain.create_configuration("A", &f.tree, &f.bb),
            Err(DomainError::ConfigExists { .. })
        ));
        // Deleting a rule-bearing configuration is refused until the rule is
        // cleared.
        assert!(matches!(
            domain.delete_configuration("A"),
            Err(DomainError::RuleProtected { .. })
        ));
        domain.clear_rule("A").unwrap();
        domain.delete_configuration("A").unwrap();
        assert!(matches!(
            domain.delete_configuration("A"),
            Err(DomainError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn new_configuration_auto_validates_against_existing_one() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");

        // Blackboard now holds different bytes; the new configuration must
        // copy A's image, not the board's.
        let offset = f.tree.offset(gains(&f));
        f.bb.raw_write(&[6; 4], offset).unwrap();
        let gains_id = gains(&f);
        let domain = f.domains.get_mut("D").unwrap();
        domain.create_configuration("B", &f.tree, &f.bb).unwrap();
        let area = domain.config("B").unwrap().area(gains_id).unwrap();
        assert_eq!(area.bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn attachment_map_tracks_membership() {
        let (mut f, _) = fixture();
        let gains = gains(&f);
        let volume = f.tree.resolve("/Audio/Volume").unwrap().element();
        let d = f.domains.get("D").unwrap().id();

        assert_eq!(f.domains.attached_domains(gains), &[d]);
        assert!(f.domains.belonging_domains(&f.tree, gains).contains(&d));
        // A sibling element does not belong to D.
        assert!(f.domains.belonging_domains(&f.tree, volume).is_empty());
        assert!(f.domains.rogue_elements(&f.tree).contains(&volume));
        assert!(!f.domains.rogue_elements(&f.tree).contains(&gains));

        f.domains.delete_domain("D").unwrap();
        assert!(f.domains.attached_domains(gains).is_empty());
    }

    #[test]
    fn settings_payload_round_trips_and_rejects_bad_sizes() {
        let (mut f, _) = fixture();
        add_config(&mut f, "A", [1, 2, 3, 4], "Production");
        add_config(&mut f, "B", [9, 8, 7, 6], "Test");

        let data = f.domains.export_settings_data();
        assert_eq!(data.len(), f.domains.settings_data_size());
        assert_eq!(data, vec![1, 2, 3, 4, 9, 8, 7, 6]);

        let mut altered = data.clone();
        altered[0] = 0xFF;
        f.domains.import_settings_data(&altered).unwrap();
        assert_eq!(
            f.domains
                .get("D")
                .unwrap()
                .config("A")
                .unwrap()
                .area(gains(&f))
                .unwrap()
                .bytes(),
            &[0xFF, 2, 3, 4]
        );

        assert!(matches!(
            f.domains.import_settings_data(&data[1..]),
            Err(AreaError::ImageSize { .. })
        ));
    }
}
