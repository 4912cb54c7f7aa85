//! Framework manager and apply engine
//!
//! [`ParameterFramework`] is the single aggregate owning the element tree,
//! the main blackboard, the syncer registry, the criteria and the domains.
//! There are no process-wide singletons; embedders construct it, register
//! criteria and subsystem descriptors, `start()` it, and drive it through
//! the typed methods or the textual command surface.
//!
//! Every public operation acquires the **parameter lock** (one mutex around
//! the whole mutable aggregate) on entry and releases it on return; nothing
//! yields the lock mid-operation. Criterion changes arriving while an apply
//! cycle runs serialize behind it.
//!
//! The apply pipeline: a criterion change (outside tuning mode) walks the
//! domains in declaration order, restores winning configurations, then runs
//! one batched sync. Tuning mode freezes automatic application; leaving it
//! force-applies. Structure-mutating commands are rejected outside tuning
//! mode.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::access::AccessContext;
use crate::blackboard::{Blackboard, BlackboardError};
use crate::criteria::{Criteria, CriterionError, CriterionFormat};
use crate::domain::{DomainError, Domains};
use crate::element::{AccessError, ElementId, ElementTree, PathTarget};
use crate::mapper::{map_subsystem, MapperError, SubsystemDescriptor};
use crate::rules::{Rule, RuleError};
use crate::settings::{self, DocumentError, SettingsError};
use crate::sync::{SyncFailures, SyncerRegistry, SyncerSet};

/// Failures of the framework surface. Every variant carries or wraps the
/// offending detail; textual commands render them through `Display`.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("tuning mode required for this operation")]
    TuningModeRequired,
    #[error("feature unavailable when auto sync is on")]
    AutoSyncOn,
    #[error("command {0} not found")]
    UnknownCommand(String),
    #[error("invalid or missing arguments; usage: {0}")]
    Usage(&'static str),
    #[error("{source} ({path})")]
    SyncAt {
        path: String,
        #[source]
        source: SyncFailures,
    },
    #[error(transparent)]
    Sync(#[from] SyncFailures),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Criterion(#[from] CriterionError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
}

struct Core {
    tree: ElementTree,
    blackboard: Blackboard,
    registry: SyncerRegistry,
    criteria: Criteria,
    domains: Domains,
    structure_checksum: u8,
    tuning_mode: bool,
    value_space_raw: bool,
    output_raw_hex: bool,
    auto_sync: bool,
}

/// The framework aggregate behind the parameter lock.
pub struct ParameterFramework {
    inner: Mutex<Core>,
}

impl ParameterFramework {
    /// Take ownership of a frozen structure; the blackboard is sized from
    /// it, zeroed.
    pub fn new(tree: ElementTree) -> Self {
        let blackboard = Blackboard::new(tree.blackboard_size());
        Self {
            inner: Mutex::new(Core {
                tree,
                blackboard,
                registry: SyncerRegistry::new(),
                criteria: Criteria::new(),
                domains: Domains::new(),
                structure_checksum: 0,
                tuning_mode: false,
                value_space_raw: false,
                output_raw_hex: false,
                auto_sync: true,
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- criteria registration (pre-start) -----------------------------------

    pub fn create_exclusive_criterion(
        &self,
        name: &str,
        pairs: &[(u32, &str)],
    ) -> Result<(), FrameworkError> {
        self.core().criteria.create_exclusive(name, pairs)?;
        Ok(())
    }

    pub fn create_inclusive_criterion(
        &self,
        name: &str,
        pairs: &[(u32, &str)],
    ) -> Result<(), FrameworkError> {
        self.core().criteria.create_inclusive(name, pairs)?;
        Ok(())
    }

    // -- lifecycle -----------------------------------------------------------

    /// Bring the framework up: default-fill the blackboard, map subsystems
    /// (instantiating syncers), back-synchronize hardware state into the
    /// board, compute the structure checksum, validate every domain and
    /// force-apply.
    pub fn start(
        &self,
        descriptors: &[(&str, SubsystemDescriptor)],
    ) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        info!(system_class = %core.tree.system_class(), "starting parameter framework");
        core.tree.init_defaults(&mut core.blackboard)?;

        for (name, descriptor) in descriptors {
            let subsystem = core
                .tree
                .resolve(&format!("/{name}"))?
                .element();
            map_subsystem(&mut core.tree, subsystem, descriptor, &mut core.registry)?;
        }

        info!("main blackboard back synchronization");
        core.registry.sync_all(&mut core.blackboard, true)?;

        core.structure_checksum =
            settings::structure_checksum(&core.tree, &core.criteria, &core.domains);

        core.domains.validate_all(&core.tree, &core.blackboard)?;
        core.apply_configurations(true);
        Ok(())
    }

    // -- criteria ------------------------------------------------------------

    /// Numerical criterion state change; outside tuning mode a change kicks
    /// an apply cycle.
    pub fn set_criterion_state(&self, name: &str, state: u32) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        let id = core
            .criteria
            .find(name)
            .ok_or_else(|| CriterionError::Unknown(name.to_string()))?;
        let changed = core.criteria.get_mut(id).set_state(state)?;
        info!(criterion = name, state, changed, "criterion state set");
        if changed && !core.tuning_mode {
            core.apply_configurations(false);
        }
        Ok(())
    }

    /// Lexical criterion state change (space-separated literals for
    /// inclusive criteria).
    pub fn set_criterion_state_lexical(
        &self,
        name: &str,
        expression: &str,
    ) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        let id = core
            .criteria
            .find(name)
            .ok_or_else(|| CriterionError::Unknown(name.to_string()))?;
        let changed = core.criteria.get_mut(id).set_state_lexical(expression)?;
        info!(criterion = name, expression, changed, "criterion state set");
        if changed && !core.tuning_mode {
            core.apply_configurations(false);
        }
        Ok(())
    }

    pub fn criterion_state(&self, name: &str) -> Result<u32, FrameworkError> {
        let core = self.core();
        let id = core
            .criteria
            .find(name)
            .ok_or_else(|| CriterionError::Unknown(name.to_string()))?;
        Ok(core.criteria.get(id).state())
    }

    pub fn list_criteria(&self, format: CriterionFormat) -> String {
        self.core().criteria.list(format)
    }

    // -- mode flags ----------------------------------------------------------

    /// Enter or leave tuning mode. Leaving force-applies the selected
    /// configurations and turns auto sync back on.
    pub fn set_tuning_mode(&self, on: bool) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        if !on && core.tuning_mode {
            core.apply_configurations(true);
            core.auto_sync = true;
        }
        core.tuning_mode = on;
        info!(tuning = on, "tuning mode set");
        Ok(())
    }

    pub fn tuning_mode(&self) -> bool {
        self.core().tuning_mode
    }

    pub fn set_value_space(&self, raw: bool) {
        self.core().value_space_raw = raw;
    }

    pub fn value_space_is_raw(&self) -> bool {
        self.core().value_space_raw
    }

    pub fn set_output_raw_format(&self, hex: bool) {
        self.core().output_raw_hex = hex;
    }

    pub fn output_raw_format_is_hex(&self) -> bool {
        self.core().output_raw_hex
    }

    /// Auto sync control (tuning sessions only). Turning it back on
    /// force-applies.
    pub fn set_auto_sync(&self, on: bool) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        if !core.tuning_mode {
            return Err(FrameworkError::TuningModeRequired);
        }
        if on && !core.auto_sync {
            core.apply_configurations(true);
        }
        core.auto_sync = on;
        Ok(())
    }

    pub fn auto_sync(&self) -> bool {
        self.core().auto_sync
    }

    /// Manual whole-system synchronization, for tuning sessions with auto
    /// sync off.
    pub fn sync(&self) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        if !core.tuning_mode {
            return Err(FrameworkError::TuningModeRequired);
        }
        if core.auto_sync {
            return Err(FrameworkError::AutoSyncOn);
        }
        core.registry.sync_all(&mut core.blackboard, false)?;
        Ok(())
    }

    // -- parameter access ----------------------------------------------------

    /// Set a parameter from a user literal (tuning mode). With auto sync,
    /// the covering syncer runs; a sync failure keeps the in-memory change
    /// and reports the element path.
    pub fn set_parameter(&self, path: &str, value: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        if !core.tuning_mode {
            return Err(FrameworkError::TuningModeRequired);
        }
        let ctx = core.access_context();
        let element = core
            .tree
            .set_parameter(&mut core.blackboard, path, value, &ctx)?;
        if core.auto_sync {
            let mut set = SyncerSet::new();
            core.tree.fill_syncer_set(element, &mut set);
            set.sync(&mut core.registry, &mut core.blackboard, false)
                .map_err(|source| FrameworkError::SyncAt {
                    path: core.tree.path(element),
                    source,
                })?;
        }
        Ok(())
    }

    /// Read a parameter as a user literal (any mode).
    pub fn get_parameter(&self, path: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let ctx = core.access_context();
        Ok(core.tree.get_parameter(&core.blackboard, path, &ctx)?)
    }

    // -- domain management ---------------------------------------------------

    pub fn create_domain(&self, name: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains.create_domain(name)?;
        Ok(())
    }

    pub fn delete_domain(&self, name: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains.delete_domain(name)?;
        Ok(())
    }

    pub fn rename_domain(&self, name: &str, new_name: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains.rename_domain(name, new_name)?;
        Ok(())
    }

    pub fn set_sequence_awareness(&self, domain: &str, aware: bool) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains.get_mut(domain)?.set_sequence_aware(aware);
        Ok(())
    }

    pub fn sequence_awareness(&self, domain: &str) -> Result<bool, FrameworkError> {
        Ok(self.core().domains.get(domain)?.is_sequence_aware())
    }

    pub fn add_element(&self, domain: &str, path: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let element = core.resolve_element(path)?;
        core.domains
            .add_element_to_domain(domain, &core.tree, element, Some(&core.blackboard))?;
        Ok(())
    }

    pub fn remove_element(&self, domain: &str, path: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let element = core.resolve_element(path)?;
        core.domains
            .remove_element_from_domain(domain, &core.tree, element)?;
        Ok(())
    }

    pub fn split_domain(&self, domain: &str, path: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let element = core.resolve_element(path)?;
        core.domains.split_domain(domain, &core.tree, element)?;
        Ok(())
    }

    // -- configuration management --------------------------------------------

    pub fn create_configuration(&self, domain: &str, config: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let (tree, blackboard) = (&core.tree, &core.blackboard);
        core.domains
            .get_mut(domain)?
            .create_configuration(config, tree, blackboard)?;
        Ok(())
    }

    pub fn delete_configuration(&self, domain: &str, config: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains.get_mut(domain)?.delete_configuration(config)?;
        Ok(())
    }

    pub fn rename_configuration(
        &self,
        domain: &str,
        config: &str,
        new_name: &str,
    ) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains
            .get_mut(domain)?
            .rename_configuration(config, new_name)?;
        Ok(())
    }

    pub fn save_configuration(&self, domain: &str, config: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let (tree, blackboard) = (&core.tree, &core.blackboard);
        core.domains
            .get_mut(domain)?
            .save_configuration(config, tree, blackboard)?;
        Ok(())
    }

    /// Manual restore; honors the auto sync flag. Sync failures are
    /// reported but the restore stands.
    pub fn restore_configuration(&self, domain: &str, config: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let mut sync_errors = Vec::new();
        let auto_sync = core.auto_sync;
        let Core {
            ref tree,
            ref mut blackboard,
            ref mut registry,
            ref mut domains,
            ..
        } = *core;
        domains.get_mut(domain)?.restore_configuration(
            config,
            tree,
            blackboard,
            registry,
            auto_sync,
            &mut sync_errors,
        )?;
        if !sync_errors.is_empty() {
            return Err(SyncFailures {
                failures: sync_errors,
            }
            .into());
        }
        Ok(())
    }

    pub fn set_element_sequence(
        &self,
        domain: &str,
        config: &str,
        paths: &[&str],
    ) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let mut sequence = Vec::with_capacity(paths.len());
        for path in paths {
            sequence.push(core.resolve_element(path)?);
        }
        core.domains
            .get_mut(domain)?
            .config_mut(config)?
            .set_element_sequence(&sequence)
            .map_err(DomainError::from)?;
        Ok(())
    }

    pub fn get_element_sequence(&self, domain: &str, config: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let sequence = core.domains.get(domain)?.config(config)?.element_sequence();
        Ok(sequence
            .iter()
            .map(|&e| core.tree.path(e))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Set a configuration's applicability rule from its textual form; the
    /// empty string clears it.
    pub fn set_rule(&self, domain: &str, config: &str, rule: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        if rule.trim().is_empty() {
            core.domains.get_mut(domain)?.clear_rule(config)?;
            return Ok(());
        }
        let parsed = Rule::parse(rule, &core.criteria)?;
        core.domains.get_mut(domain)?.set_rule(config, parsed)?;
        Ok(())
    }

    pub fn clear_rule(&self, domain: &str, config: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        core.domains.get_mut(domain)?.clear_rule(config)?;
        Ok(())
    }

    pub fn get_rule(&self, domain: &str, config: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        Ok(core
            .domains
            .get(domain)?
            .config(config)?
            .rule()
            .map(|r| r.dump(&core.criteria))
            .unwrap_or_else(|| "<none>".to_string()))
    }

    // -- settings ------------------------------------------------------------

    /// Export the binary settings image (all areas in declaration order,
    /// one-byte checksum trailer).
    pub fn export_settings(&self, path: &Path) -> Result<(), FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let data = core.domains.export_settings_data();
        settings::write_image_file(path, &data, core.structure_checksum)?;
        Ok(())
    }

    /// Import a binary settings image; sizes and checksum must match the
    /// loaded structure.
    pub fn import_settings(&self, path: &Path) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let data = settings::read_image_file(
            path,
            core.domains.settings_data_size(),
            core.structure_checksum,
        )?;
        core.domains.import_settings_data(&data).map_err(DomainError::from)?;
        Ok(())
    }

    /// Export the domains document as JSON, with or without settings
    /// payloads.
    pub fn export_domains(&self, with_settings: bool) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let doc =
            settings::export_domains(&core.tree, &core.criteria, &core.domains, with_settings);
        Ok(serde_json::to_string_pretty(&doc).map_err(SettingsError::from)?)
    }

    /// Replace the domains from a JSON document.
    pub fn import_domains(&self, json: &str) -> Result<(), FrameworkError> {
        let mut guard = self.core();
        let core = &mut *guard;
        core.check_tuning_mode()?;
        let doc: settings::DomainsDocument =
            serde_json::from_str(json).map_err(SettingsError::from)?;
        let Core {
            ref tree,
            ref blackboard,
            ref criteria,
            ref mut domains,
            ..
        } = *core;
        settings::import_domains(&doc, tree, criteria, domains, blackboard)?;
        Ok(())
    }

    // -- listings ------------------------------------------------------------

    pub fn status(&self) -> String {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        let _ = writeln!(out, "System Class: {}", core.tree.system_class());
        let _ = writeln!(
            out,
            "Tuning Mode: {}",
            if core.tuning_mode { "on" } else { "off" }
        );
        let _ = writeln!(
            out,
            "Value Space: {}",
            if core.value_space_raw { "raw" } else { "real" }
        );
        let _ = writeln!(
            out,
            "Output Raw Format: {}",
            if core.output_raw_hex { "hex" } else { "dec" }
        );
        let _ = writeln!(
            out,
            "Auto Sync: {}",
            if core.auto_sync { "on" } else { "off" }
        );
        out.push_str("\nSubsystems:\n");
        for &child in core.tree.children(core.tree.root()) {
            let _ = writeln!(out, "  {}", core.tree.name(child));
        }
        out.push_str("\nLast applied configurations:\n");
        out.push_str(&core.list_last_applied());
        out.push_str("\nSelection criteria:\n");
        out.push_str(&core.criteria.list(CriterionFormat::Csv));
        out
    }

    pub fn list_domains(&self) -> String {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        for domain in core.domains.iter() {
            let _ = write!(out, "{}", domain.name());
            if domain.is_sequence_aware() {
                out.push_str(" [sequence aware]");
            }
            out.push('\n');
        }
        out
    }

    pub fn list_configurations(&self, domain: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        for config in core.domains.get(domain)?.configurations() {
            let _ = writeln!(out, "{}", config.name());
        }
        Ok(out)
    }

    pub fn list_domain_elements(&self, domain: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        for element in core.domains.get(domain)?.element_ids() {
            let _ = writeln!(out, "{}", core.tree.path(element));
        }
        Ok(out)
    }

    pub fn list_last_applied_configurations(&self) -> String {
        self.core().list_last_applied()
    }

    /// Domains the element at `path` belongs to (itself or through an
    /// associated ancestor).
    pub fn list_belonging_domains(&self, path: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let element = core.resolve_element(path)?;
        let names: Vec<&str> = core
            .domains
            .belonging_domains(&core.tree, element)
            .into_iter()
            .filter_map(|id| core.domains.domain_name(id))
            .collect();
        Ok(names.join("\n"))
    }

    /// Domains the element at `path` is directly associated to.
    pub fn list_associated_domains(&self, path: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let element = core.resolve_element(path)?;
        let names: Vec<&str> = core
            .domains
            .attached_domains(element)
            .iter()
            .filter_map(|&id| core.domains.domain_name(id))
            .collect();
        Ok(names.join("\n"))
    }

    /// Every associated element with its attached domains.
    pub fn list_associated_elements(&self) -> String {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        for element in core.domains.associated_elements() {
            let names: Vec<&str> = core
                .domains
                .attached_domains(element)
                .iter()
                .filter_map(|&id| core.domains.domain_name(id))
                .collect();
            let _ = writeln!(out, "{} [{}]", core.tree.path(element), names.join(", "));
        }
        out
    }

    /// Elements belonging to more than one domain.
    pub fn list_conflicting_elements(&self) -> String {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        for element in core.domains.associated_elements() {
            let domains = core.domains.belonging_domains(&core.tree, element);
            if domains.len() > 1 {
                let names: Vec<&str> = domains
                    .into_iter()
                    .filter_map(|id| core.domains.domain_name(id))
                    .collect();
                let _ = writeln!(
                    out,
                    "{} contained in multiple domains: {}",
                    core.tree.path(element),
                    names.join(", ")
                );
            }
        }
        out
    }

    /// Leaf elements not covered by any domain.
    pub fn list_rogue_elements(&self) -> String {
        let guard = self.core();
        let core = &*guard;
        let mut out = String::new();
        for element in core.domains.rogue_elements(&core.tree) {
            let _ = writeln!(out, "{}", core.tree.path(element));
        }
        out
    }

    /// Child elements of the element at `path` (`/` lists the subsystems).
    pub fn list_elements(&self, path: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let element = if path == "/" {
            core.tree.root()
        } else {
            core.resolve_element(path)?
        };
        let mut out = String::new();
        for &child in core.tree.children(element) {
            let _ = writeln!(out, "{}", core.tree.path(child));
        }
        Ok(out)
    }

    /// Property dump of the element at `path`.
    pub fn dump_element(&self, path: &str) -> Result<String, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let element = core.resolve_element(path)?;
        Ok(core.tree.describe(element))
    }

    pub fn get_element_size(&self, path: &str) -> Result<usize, FrameworkError> {
        let guard = self.core();
        let core = &*guard;
        let element = core.resolve_element(path)?;
        Ok(core.tree.footprint(element))
    }

    // -- textual command surface ---------------------------------------------

    /// Dispatch one textual command. Mutating commands answer `Done`;
    /// queries answer their payload; failures render the error message.
    pub fn process_command(
        &self,
        command: &str,
        args: &[&str],
    ) -> Result<String, FrameworkError> {
        let item = COMMANDS
            .iter()
            .find(|item| item.name == command)
            .ok_or_else(|| FrameworkError::UnknownCommand(command.to_string()))?;
        if args.len() < item.min_args {
            return Err(FrameworkError::Usage(item.usage));
        }
        (item.handler)(self, args)
    }

    /// Usage/description lines of every command.
    pub fn help(&self) -> String {
        let width = COMMANDS.iter().map(|c| c.usage.len()).max().unwrap_or(0);
        let mut out = String::new();
        for item in COMMANDS {
            let _ = writeln!(out, "{:width$} => {}", item.usage, item.description);
        }
        out
    }
}

impl Core {
    fn access_context(&self) -> AccessContext {
        AccessContext {
            value_space_raw: self.value_space_raw,
            output_raw_hex: self.output_raw_hex,
            big_endian: false,
            auto_sync: self.auto_sync,
        }
    }

    fn check_tuning_mode(&self) -> Result<(), FrameworkError> {
        if self.tuning_mode {
            Ok(())
        } else {
            Err(FrameworkError::TuningModeRequired)
        }
    }

    fn resolve_element(&self, path: &str) -> Result<ElementId, FrameworkError> {
        match self.tree.resolve(path)? {
            PathTarget::Element(id) => Ok(id),
            _ => Err(AccessError::PathNotFound {
                path: path.to_string(),
            }
            .into()),
        }
    }

    /// Run one apply cycle; sync failures are logged, never fatal. A
    /// restore failure is a logic error (areas are validated on creation
    /// and import) and is logged loudly.
    fn apply_configurations(&mut self, force: bool) {
        match self.domains.apply(
            &self.tree,
            &mut self.blackboard,
            &mut self.registry,
            &self.criteria,
            force,
        ) {
            Ok(errors) => {
                for error in errors {
                    warn!(%error, "synchronization failure during apply");
                }
            }
            Err(error) => warn!(%error, "failed to apply configurations"),
        }
    }

    fn list_last_applied(&self) -> String {
        let mut out = String::new();
        for domain in self.domains.iter() {
            let _ = writeln!(
                out,
                "{}: {}",
                domain.name(),
                domain.last_applied().unwrap_or("<none>")
            );
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

struct CommandItem {
    name: &'static str,
    min_args: usize,
    usage: &'static str,
    description: &'static str,
    handler: fn(&ParameterFramework, &[&str]) -> Result<String, FrameworkError>,
}

fn done() -> Result<String, FrameworkError> {
    Ok("Done".to_string())
}

fn parse_on_off(arg: &str, usage: &'static str) -> Result<bool, FrameworkError> {
    match arg {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(FrameworkError::Usage(usage)),
    }
}

const COMMANDS: &[CommandItem] = &[
    CommandItem {
        name: "help",
        min_args: 0,
        usage: "help",
        description: "show command list",
        handler: |pfw, _| Ok(pfw.help()),
    },
    CommandItem {
        name: "status",
        min_args: 0,
        usage: "status",
        description: "show current status",
        handler: |pfw, _| Ok(pfw.status()),
    },
    CommandItem {
        name: "setTuningMode",
        min_args: 1,
        usage: "setTuningMode on|off",
        description: "turn tuning mode on or off",
        handler: |pfw, args| {
            pfw.set_tuning_mode(parse_on_off(args[0], "setTuningMode on|off")?)?;
            done()
        },
    },
    CommandItem {
        name: "getTuningMode",
        min_args: 0,
        usage: "getTuningMode",
        description: "show tuning mode",
        handler: |pfw, _| Ok(if pfw.tuning_mode() { "on" } else { "off" }.to_string()),
    },
    CommandItem {
        name: "setValueSpace",
        min_args: 1,
        usage: "setValueSpace raw|real",
        description: "select parameter value interpretation space",
        handler: |pfw, args| {
            match args[0] {
                "raw" => pfw.set_value_space(true),
                "real" => pfw.set_value_space(false),
                _ => return Err(FrameworkError::Usage("setValueSpace raw|real")),
            }
            done()
        },
    },
    CommandItem {
        name: "getValueSpace",
        min_args: 0,
        usage: "getValueSpace",
        description: "show value space",
        handler: |pfw, _| Ok(if pfw.value_space_is_raw() { "raw" } else { "real" }.to_string()),
    },
    CommandItem {
        name: "setOutputRawFormat",
        min_args: 1,
        usage: "setOutputRawFormat hex|dec",
        description: "select raw output format",
        handler: |pfw, args| {
            match args[0] {
                "hex" => pfw.set_output_raw_format(true),
                "dec" => pfw.set_output_raw_format(false),
                _ => {
                    return Err(FrameworkError::Usage(
                        "setOutputRawFormat hex|dec",
                    ))
                }
            }
            done()
        },
    },
    CommandItem {
        name: "getOutputRawFormat",
        min_args: 0,
        usage: "getOutputRawFormat",
        description: "show raw output format",
        handler: |pfw, _| {
            Ok(if pfw.output_raw_format_is_hex() { "hex" } else { "dec" }.to_string())
        },
    },
    CommandItem {
        name: "setAutoSync",
        min_args: 1,
        usage: "setAutoSync on|off",
        description: "turn automatic synchronization on or off (tuning mode)",
        handler: |pfw, args| {
            pfw.set_auto_sync(parse_on_off(args[0], "setAutoSync on|off")?)?;
            done()
        },
    },
    CommandItem {
        name: "getAutoSync",
        min_args: 0,
        usage: "getAutoSync",
        description: "show auto sync state",
        handler: |pfw, _| Ok(if pfw.auto_sync() { "on" } else { "off" }.to_string()),
    },
    CommandItem {
        name: "sync",
        min_args: 0,
        usage: "sync",
        description: "synchronize the whole system (auto sync off)",
        handler: |pfw, _| {
            pfw.sync()?;
            done()
        },
    },
    CommandItem {
        name: "listCriteria",
        min_args: 0,
        usage: "listCriteria [xml]",
        description: "list selection criteria and their states",
        handler: |pfw, args| {
            let format = if args.first() == Some(&"xml") {
                CriterionFormat::Xml
            } else {
                CriterionFormat::Csv
            };
            Ok(pfw.list_criteria(format))
        },
    },
    CommandItem {
        name: "setCriterionState",
        min_args: 1,
        usage: "setCriterionState <criterion> [<value> ...]",
        description: "set a criterion state from literal values",
        handler: |pfw, args| {
            pfw.set_criterion_state_lexical(args[0], &args[1..].join(" "))?;
            done()
        },
    },
    CommandItem {
        name: "createDomain",
        min_args: 1,
        usage: "createDomain <domain>",
        description: "create a configurable domain",
        handler: |pfw, args| {
            pfw.create_domain(args[0])?;
            done()
        },
    },
    CommandItem {
        name: "deleteDomain",
        min_args: 1,
        usage: "deleteDomain <domain>",
        description: "delete a configurable domain",
        handler: |pfw, args| {
            pfw.delete_domain(args[0])?;
            done()
        },
    },
    CommandItem {
        name: "renameDomain",
        min_args: 2,
        usage: "renameDomain <domain> <new name>",
        description: "rename a configurable domain",
        handler: |pfw, args| {
            pfw.rename_domain(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "listDomains",
        min_args: 0,
        usage: "listDomains",
        description: "list configurable domains",
        handler: |pfw, _| Ok(pfw.list_domains()),
    },
    CommandItem {
        name: "listDomainElements",
        min_args: 1,
        usage: "listDomainElements <domain>",
        description: "list elements associated to a domain",
        handler: |pfw, args| pfw.list_domain_elements(args[0]),
    },
    CommandItem {
        name: "setSequenceAwareness",
        min_args: 2,
        usage: "setSequenceAwareness <domain> on|off",
        description: "set a domain's sequence awareness",
        handler: |pfw, args| {
            pfw.set_sequence_awareness(
                args[0],
                parse_on_off(args[1], "setSequenceAwareness <domain> on|off")?,
            )?;
            done()
        },
    },
    CommandItem {
        name: "getSequenceAwareness",
        min_args: 1,
        usage: "getSequenceAwareness <domain>",
        description: "show a domain's sequence awareness",
        handler: |pfw, args| {
            Ok(if pfw.sequence_awareness(args[0])? { "on" } else { "off" }.to_string())
        },
    },
    CommandItem {
        name: "addElement",
        min_args: 2,
        usage: "addElement <domain> <element path>",
        description: "associate an element to a domain",
        handler: |pfw, args| {
            pfw.add_element(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "removeElement",
        min_args: 2,
        usage: "removeElement <domain> <element path>",
        description: "dissociate an element from a domain",
        handler: |pfw, args| {
            pfw.remove_element(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "splitDomain",
        min_args: 2,
        usage: "splitDomain <domain> <element path>",
        description: "split an associated element into its children",
        handler: |pfw, args| {
            pfw.split_domain(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "listConfigurations",
        min_args: 1,
        usage: "listConfigurations <domain>",
        description: "list a domain's configurations",
        handler: |pfw, args| pfw.list_configurations(args[0]),
    },
    CommandItem {
        name: "createConfiguration",
        min_args: 2,
        usage: "createConfiguration <domain> <configuration>",
        description: "create a configuration in a domain",
        handler: |pfw, args| {
            pfw.create_configuration(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "deleteConfiguration",
        min_args: 2,
        usage: "deleteConfiguration <domain> <configuration>",
        description: "delete a configuration (rule must be cleared first)",
        handler: |pfw, args| {
            pfw.delete_configuration(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "renameConfiguration",
        min_args: 3,
        usage: "renameConfiguration <domain> <configuration> <new name>",
        description: "rename a configuration",
        handler: |pfw, args| {
            pfw.rename_configuration(args[0], args[1], args[2])?;
            done()
        },
    },
    CommandItem {
        name: "saveConfiguration",
        min_args: 2,
        usage: "saveConfiguration <domain> <configuration>",
        description: "save the blackboard into a configuration",
        handler: |pfw, args| {
            pfw.save_configuration(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "restoreConfiguration",
        min_args: 2,
        usage: "restoreConfiguration <domain> <configuration>",
        description: "restore a configuration into the blackboard",
        handler: |pfw, args| {
            pfw.restore_configuration(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "setElementSequence",
        min_args: 3,
        usage: "setElementSequence <domain> <configuration> <element path> ...",
        description: "reorder a configuration's restore sequence",
        handler: |pfw, args| {
            pfw.set_element_sequence(args[0], args[1], &args[2..])?;
            done()
        },
    },
    CommandItem {
        name: "getElementSequence",
        min_args: 2,
        usage: "getElementSequence <domain> <configuration>",
        description: "show a configuration's restore sequence",
        handler: |pfw, args| pfw.get_element_sequence(args[0], args[1]),
    },
    CommandItem {
        name: "setRule",
        min_args: 2,
        usage: "setRule <domain> <configuration> [<rule>]",
        description: "set a configuration's applicability rule (empty clears)",
        handler: |pfw, args| {
            pfw.set_rule(args[0], args[1], &args[2..].join(" "))?;
            done()
        },
    },
    CommandItem {
        name: "clearRule",
        min_args: 2,
        usage: "clearRule <domain> <configuration>",
        description: "clear a configuration's applicability rule",
        handler: |pfw, args| {
            pfw.clear_rule(args[0], args[1])?;
            done()
        },
    },
    CommandItem {
        name: "getRule",
        min_args: 2,
        usage: "getRule <domain> <configuration>",
        description: "show a configuration's applicability rule",
        handler: |pfw, args| pfw.get_rule(args[0], args[1]),
    },
    CommandItem {
        name: "getParameter",
        min_args: 1,
        usage: "getParameter <parameter path>",
        description: "read a parameter value",
        handler: |pfw, args| pfw.get_parameter(args[0]),
    },
    CommandItem {
        name: "setParameter",
        min_args: 2,
        usage: "setParameter <parameter path> <value> ...",
        description: "write a parameter value (tuning mode)",
        handler: |pfw, args| {
            pfw.set_parameter(args[0], &args[1..].join(" "))?;
            done()
        },
    },
    CommandItem {
        name: "listElements",
        min_args: 1,
        usage: "listElements <element path>",
        description: "list an element's children (/ lists the subsystems)",
        handler: |pfw, args| pfw.list_elements(args[0]),
    },
    CommandItem {
        name: "dumpElement",
        min_args: 1,
        usage: "dumpElement <element path>",
        description: "show an element's properties",
        handler: |pfw, args| pfw.dump_element(args[0]),
    },
    CommandItem {
        name: "getElementSize",
        min_args: 1,
        usage: "getElementSize <element path>",
        description: "show an element's byte size",
        handler: |pfw, args| Ok(format!("{} byte(s)", pfw.get_element_size(args[0])?)),
    },
    CommandItem {
        name: "listBelongingDomains",
        min_args: 1,
        usage: "listBelongingDomains <element path>",
        description: "list domains an element belongs to",
        handler: |pfw, args| pfw.list_belonging_domains(args[0]),
    },
    CommandItem {
        name: "listAssociatedDomains",
        min_args: 1,
        usage: "listAssociatedDomains <element path>",
        description: "list domains an element is associated to",
        handler: |pfw, args| pfw.list_associated_domains(args[0]),
    },
    CommandItem {
        name: "listAssociatedElements",
        min_args: 0,
        usage: "listAssociatedElements",
        description: "list elements associated to domains",
        handler: |pfw, _| Ok(pfw.list_associated_elements()),
    },
    CommandItem {
        name: "listConflictingElements",
        min_args: 0,
        usage: "listConflictingElements",
        description: "list elements belonging to multiple domains",
        handler: |pfw, _| Ok(pfw.list_conflicting_elements()),
    },
    CommandItem {
        name: "listRogueElements",
        min_args: 0,
        usage: "listRogueElements",
        description: "list leaf elements not covered by any domain",
        handler: |pfw, _| Ok(pfw.list_rogue_elements()),
    },
    CommandItem {
        name: "listLastAppliedConfigurations",
        min_args: 0,
        usage: "listLastAppliedConfigurations",
        description: "list each domain's last applied configuration",
        handler: |pfw, _| Ok(pfw.list_last_applied_configurations()),
    },
    CommandItem {
        name: "exportDomains",
        min_args: 1,
        usage: "exportDomains <file>",
        description: "export the domains document (without settings)",
        handler: |pfw, args| {
            std::fs::write(args[0], pfw.export_domains(false)?)
                .map_err(SettingsError::from)?;
            done()
        },
    },
    CommandItem {
        name: "exportDomainsWithSettings",
        min_args: 1,
        usage: "exportDomainsWithSettings <file>",
        description: "export the domains document with settings payloads",
        handler: |pfw, args| {
            std::fs::write(args[0], pfw.export_domains(true)?)
                .map_err(SettingsError::from)?;
            done()
        },
    },
    CommandItem {
        name: "importDomains",
        min_args: 1,
        usage: "importDomains <file>",
        description: "import a domains document (tuning mode)",
        handler: |pfw, args| {
            let json = std::fs::read_to_string(args[0]).map_err(SettingsError::from)?;
            pfw.import_domains(&json)?;
            done()
        },
    },
    CommandItem {
        name: "exportSettings",
        min_args: 1,
        usage: "exportSettings <file>",
        description: "export the binary settings image",
        handler: |pfw, args| {
            pfw.export_settings(Path::new(args[0]))?;
            done()
        },
    },
    CommandItem {
        name: "importSettings",
        min_args: 1,
        usage: "importSettings <file>",
        description: "import a binary settings image (tuning mode)",
        handler: |pfw, args| {
            pfw.import_settings(Path::new(args[0]))?;
            done()
        },
    },
];
