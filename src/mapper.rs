//! Subsystem mapping
//!
//! Walks a subsystem's element subtree with a **mapping context**: one
//! optional string slot per context key the subsystem declares. Component
//! nodes fill slots from their mapping metadata, scoped to their subtree
//! (the context is copied on descent, so a sibling subtree starts from its
//! parent's view again). Leaf-shaped nodes (parameters, parameter blocks,
//! bit parameter blocks) whose metadata carries a registered creator's key
//! get a subsystem object built and its syncer attached to the element.
//!
//! Mapping values may embed amendments: `%N` (N in 1..9) substitutes the
//! value of context slot N. A value wrapped in single quotes is captured
//! first (quotes stripped), then amended; resolution recurses over the rest
//! of the value after each substitution.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use tracing::debug;

use crate::element::{ElementId, ElementKind, ElementTree};
use crate::sync::{Syncer, SyncerRegistry};

/// Mapping failures, naming the path and the key at fault.
#[derive(Debug, thiserror::Error)]
#[error("{subsystem} subsystem mapping: {key} error: \"{reason}\" for element {path}")]
pub struct MapperError {
    pub subsystem: String,
    pub key: String,
    pub reason: String,
    pub path: String,
}

/// One optional string slot per declared context key, scoped per subtree.
#[derive(Clone, Debug, Default)]
pub struct MappingContext {
    items: Vec<Option<String>>,
}

impl MappingContext {
    pub fn new(slots: usize) -> Self {
        Self {
            items: vec![None; slots],
        }
    }

    /// Assign a slot; refuses when an ancestor already set it.
    pub fn set_item(&mut self, slot: usize, value: &str) -> bool {
        if self.items[slot].is_some() {
            return false;
        }
        self.items[slot] = Some(value.to_string());
        true
    }

    pub fn is_set(&self, slot: usize) -> bool {
        self.items.get(slot).is_some_and(|i| i.is_some())
    }

    pub fn item(&self, slot: usize) -> Option<&str> {
        self.items.get(slot).and_then(|i| i.as_deref())
    }
}

/// Builds one kind of subsystem object from a mapping value. The builder
/// callback is embedder-supplied, so it reports whatever error type it likes
/// through `anyhow`.
pub struct SubsystemObjectCreator {
    /// The metadata field selecting this creator.
    pub mapping_key: String,
    /// Bitmask of context slots that must be populated by ancestors.
    pub ancestor_mask: u32,
    /// Upper bound on the mapped element's footprint.
    pub max_element_size: usize,
    #[allow(clippy::type_complexity)]
    build: Box<
        dyn Fn(&str, ElementId, &MappingContext, &ElementTree) -> anyhow::Result<Box<dyn Syncer>>,
    >,
}

impl SubsystemObjectCreator {
    pub fn new(
        mapping_key: impl Into<String>,
        ancestor_mask: u32,
        max_element_size: usize,
        build: impl Fn(&str, ElementId, &MappingContext, &ElementTree) -> anyhow::Result<Box<dyn Syncer>>
            + 'static,
    ) -> Self {
        Self {
            mapping_key: mapping_key.into(),
            ancestor_mask,
            max_element_size,
            build: Box::new(build),
        }
    }
}

/// What a subsystem publishes for mapping: its context keys (slot order is
/// the declaration order) and its object creators.
#[derive(Default)]
pub struct SubsystemDescriptor {
    pub context_keys: Vec<String>,
    pub creators: Vec<SubsystemObjectCreator>,
}

impl SubsystemDescriptor {
    pub fn new(context_keys: Vec<String>) -> Self {
        Self {
            context_keys,
            creators: Vec::new(),
        }
    }

    pub fn with_creator(mut self, creator: SubsystemObjectCreator) -> Self {
        self.creators.push(creator);
        self
    }
}

/// Resolve `%N` amendments in a mapping value against the context. A
/// single-quoted value is captured (quotes stripped) before amendment.
pub fn amend_mapping_value(value: &str, context: &MappingContext) -> String {
    let captured = if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        &value[1..value.len() - 1]
    } else {
        value
    };
    amend(captured, context)
}

fn amend(value: &str, context: &MappingContext) -> String {
    if let Some(pos) = value.find('%') {
        if pos + 1 < value.len() {
            let digit = value.as_bytes()[pos + 1];
            if digit.is_ascii_digit() && digit != b'0' {
                let slot = (digit - b'1') as usize;
                if let Some(item) = context.item(slot) {
                    let rest = amend(&value[pos + 2..], context);
                    return format!("{}{}{}", &value[..pos], item, rest);
                }
            }
        }
    }
    value.to_string()
}

/// Walk a subsystem and instantiate its objects. Syncers are attached to
/// their elements as a side effect; objects land in the registry.
pub fn map_subsystem(
    tree: &mut ElementTree,
    subsystem: ElementId,
    descriptor: &SubsystemDescriptor,
    registry: &mut SyncerRegistry,
) -> Result<(), MapperError> {
    debug!(subsystem = %tree.name(subsystem), "mapping subsystem");
    let context = MappingContext::new(descriptor.context_keys.len());
    let children = tree.children(subsystem).to_vec();
    for child in children {
        map_element(tree, subsystem, child, descriptor, &context, registry)?;
    }
    Ok(())
}

fn map_element(
    tree: &mut ElementTree,
    subsystem: ElementId,
    element: ElementId,
    descriptor: &SubsystemDescriptor,
    inherited: &MappingContext,
    registry: &mut SyncerRegistry,
) -> Result<(), MapperError> {
    // Context mutations are scoped to this subtree.
    let mut context = inherited.clone();

    if !tree.mapping(element).is_empty() {
        if matches!(tree.kind(element), ElementKind::Component) {
            fill_context(tree, subsystem, element, descriptor, &mut context)?;
        } else if matches!(
            tree.kind(element),
            ElementKind::Parameter { .. } | ElementKind::Block | ElementKind::BitBlock { .. }
        ) {
            create_object(tree, subsystem, element, descriptor, &context, registry)?;
        }
    }

    let children = tree.children(element).to_vec();
    for child in children {
        map_element(tree, subsystem, child, descriptor, &context, registry)?;
    }
    Ok(())
}

fn fill_context(
    tree: &ElementTree,
    subsystem: ElementId,
    element: ElementId,
    descriptor: &SubsystemDescriptor,
    context: &mut MappingContext,
) -> Result<(), MapperError> {
    for (slot, key) in descriptor.context_keys.iter().enumerate() {
        if let Some(value) = tree.mapping(element).get(key) {
            if !context.set_item(slot, value) {
                return Err(mapping_error(tree, subsystem, element, key, "Already set"));
            }
        }
    }
    Ok(())
}

fn create_object(
    tree: &mut ElementTree,
    subsystem: ElementId,
    element: ElementId,
    descriptor: &SubsystemDescriptor,
    context: &MappingContext,
    registry: &mut SyncerRegistry,
) -> Result<(), MapperError> {
    for creator in &descriptor.creators {
        let Some(value) = tree.mapping(element).get(&creator.mapping_key) else {
            continue;
        };
        // Required ancestors must have populated their slots first.
        for (slot, key) in descriptor.context_keys.iter().enumerate() {
            if creator.ancestor_mask & (1 << slot) != 0 && !context.is_set(slot) {
                return Err(mapping_error(
                    tree,
                    subsystem,
                    element,
                    &creator.mapping_key,
                    &format!("{key} not set"),
                ));
            }
        }
        if tree.footprint(element) > creator.max_element_size {
            return Err(mapping_error(
                tree,
                subsystem,
                element,
                &creator.mapping_key,
                &format!("Size should not exceed {} byte(s)", creator.max_element_size),
            ));
        }
        let amended = amend_mapping_value(value, context);
        let syncer = (creator.build)(&amended, element, context, tree).map_err(|e| {
            mapping_error(tree, subsystem, element, &creator.mapping_key, &format!("{e:#}"))
        })?;
        let id = registry.register(syncer);
        tree.set_syncer(element, id);
        debug!(element = %tree.path(element), value = %amended, "subsystem object created");
        return Ok(());
    }
    Err(mapping_error(
        tree,
        subsystem,
        element,
        "Mapping key",
        "Not found",
    ))
}

fn mapping_error(
    tree: &ElementTree,
    subsystem: ElementId,
    element: ElementId,
    key: &str,
    reason: &str,
) -> MapperError {
    MapperError {
        subsystem: tree.name(subsystem).to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
        path: tree.path(element),
    }
}
