//! Configurable element tree
//!
//! Elements form a rooted tree held in an arena and addressed by the stable
//! newtype index [`ElementId`]: parent/child edges and every cross-module
//! reference (domains, area configurations, syncer coverage) go through ids,
//! never through pointers. The tree is produced by [`StructureBuilder`] and
//! is immutable after `freeze()` apart from syncer attachment, which happens
//! once during subsystem mapping.
//!
//! `freeze()` computes footprints bottom-up and then assigns offsets in a
//! single depth-first pass: each composite hands offsets to its children
//! left-to-right, accumulating footprints, so sibling ranges partition the
//! parent's range contiguously.
//!
//! Parameter access navigates a `/Subsystem/Component/.../Parameter[/index]`
//! path; an array segment is a bounds-checked numeric index, and a trailing
//! segment under a bit parameter block names one of its fields.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::access::AccessContext;
use crate::blackboard::{Blackboard, BlackboardError};
use crate::sync::{SyncerId, SyncerSet};
use crate::types::{BitField, ParameterType, TypeError};

/// Stable index of an element in the tree arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub usize);

impl ElementId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Structure declaration failures (builder / freeze time). These are the
/// only fatal conditions of the framework.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("duplicate element name {name} under {parent}")]
    DuplicateName { parent: String, name: String },
    #[error("{child} cannot be declared under {parent}")]
    InvalidParent { parent: String, child: String },
    #[error("invalid declaration of {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Navigation and access failures, always carrying the offending path.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("path not well formed: {path}")]
    MalformedPath { path: String },
    #[error("path not found: {path}")]
    PathNotFound { path: String },
    #[error("path not exhausted: {path} is not a settable element")]
    PathNotExhausted { path: String },
    #[error("too many values provided for {path}")]
    TooManyValues { path: String },
    #[error("{source} ({path})")]
    Type {
        path: String,
        #[source]
        source: TypeError,
    },
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
}

/// What an element is, and the data its variant carries.
#[derive(Clone, Debug)]
pub enum ElementKind {
    /// The root; its name is the system class name.
    System,
    Subsystem { big_endian: bool },
    Component,
    Block,
    BitBlock { size: usize, fields: Vec<BitField> },
    Parameter {
        ty: ParameterType,
        /// `Some(len)` for arrays, `None` for scalars.
        count: Option<usize>,
    },
}

impl ElementKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::System => "SystemClass",
            Self::Subsystem { .. } => "Subsystem",
            Self::Component => "Component",
            Self::Block => "ParameterBlock",
            Self::BitBlock { .. } => "BitParameterBlock",
            Self::Parameter { count: None, .. } => "Parameter",
            Self::Parameter { count: Some(_), .. } => "ArrayParameter",
        }
    }

}

#[derive(Clone, Debug)]
struct ElementNode {
    name: String,
    kind: ElementKind,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    offset: usize,
    footprint: usize,
    syncer: Option<SyncerId>,
    mapping: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Grows the element tree; consumed by `freeze()` so the frozen tree cannot
/// be grown further.
pub struct StructureBuilder {
    nodes: Vec<ElementNode>,
}

impl StructureBuilder {
    pub fn new(system_class: impl Into<String>) -> Self {
        Self {
            nodes: vec![ElementNode {
                name: system_class.into(),
                kind: ElementKind::System,
                parent: None,
                children: Vec::new(),
                offset: 0,
                footprint: 0,
                syncer: None,
                mapping: BTreeMap::new(),
            }],
        }
    }

    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    fn add(
        &mut self,
        parent: ElementId,
        name: String,
        kind: ElementKind,
    ) -> Result<ElementId, StructureError> {
        let parent_node = &self.nodes[parent.0];
        let parent_ok = match (&parent_node.kind, &kind) {
            (ElementKind::System, ElementKind::Subsystem { .. }) => true,
            (ElementKind::System, _) | (_, ElementKind::Subsystem { .. }) => false,
            (ElementKind::Subsystem { .. } | ElementKind::Component | ElementKind::Block, _) => {
                true
            }
            _ => false,
        };
        if !parent_ok {
            return Err(StructureError::InvalidParent {
                parent: parent_node.name.clone(),
                child: name,
            });
        }
        if parent_node
            .children
            .iter()
            .any(|&c| self.nodes[c.0].name == name)
        {
            return Err(StructureError::DuplicateName {
                parent: parent_node.name.clone(),
                name,
            });
        }
        let id = ElementId(self.nodes.len());
        self.nodes.push(ElementNode {
            name,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            offset: 0,
            footprint: 0,
            syncer: None,
            mapping: BTreeMap::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Declare a subsystem (directly under the system class).
    pub fn create_subsystem(
        &mut self,
        name: impl Into<String>,
        big_endian: bool,
    ) -> Result<ElementId, StructureError> {
        self.add(
            self.root(),
            name.into(),
            ElementKind::Subsystem { big_endian },
        )
    }

    pub fn create_component(
        &mut self,
        parent: ElementId,
        name: impl Into<String>,
    ) -> Result<ElementId, StructureError> {
        self.add(parent, name.into(), ElementKind::Component)
    }

    pub fn create_block(
        &mut self,
        parent: ElementId,
        name: impl Into<String>,
    ) -> Result<ElementId, StructureError> {
        self.add(parent, name.into(), ElementKind::Block)
    }

    pub fn create_bit_block(
        &mut self,
        parent: ElementId,
        name: impl Into<String>,
        size_bits: usize,
        fields: Vec<BitField>,
    ) -> Result<ElementId, StructureError> {
        let name = name.into();
        let size = match size_bits {
            8 | 16 | 32 => size_bits / 8,
            _ => {
                return Err(StructureError::Invalid {
                    name,
                    reason: format!("bit block size must be 8, 16 or 32 bits (got {size_bits})"),
                })
            }
        };
        for (i, field) in fields.iter().enumerate() {
            if field.width == 0 || field.width > 32 {
                return Err(StructureError::Invalid {
                    name,
                    reason: format!("field {} has width {}", field.name, field.width),
                });
            }
            if field.pos as usize + field.width as usize > size_bits {
                return Err(StructureError::Invalid {
                    name,
                    reason: format!(
                        "field {} ({} bits at position {}) overruns the {size_bits}-bit block",
                        field.name, field.width, field.pos
                    ),
                });
            }
            let width_limit = if field.width >= 32 {
                u32::MAX
            } else {
                (1u32 << field.width) - 1
            };
            if field.max > width_limit {
                return Err(StructureError::Invalid {
                    name,
                    reason: format!("field {} max does not fit its width", field.name),
                });
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(StructureError::Invalid {
                    name,
                    reason: format!("duplicate field name {}", field.name),
                });
            }
        }
        self.add(parent, name, ElementKind::BitBlock { size, fields })
    }

    pub fn create_scalar(
        &mut self,
        parent: ElementId,
        name: impl Into<String>,
        ty: ParameterType,
    ) -> Result<ElementId, StructureError> {
        self.add(parent, name.into(), ElementKind::Parameter { ty, count: None })
    }

    pub fn create_array(
        &mut self,
        parent: ElementId,
        name: impl Into<String>,
        ty: ParameterType,
        length: usize,
    ) -> Result<ElementId, StructureError> {
        let name = name.into();
        if length == 0 {
            return Err(StructureError::Invalid {
                name,
                reason: "array length must be positive".into(),
            });
        }
        self.add(
            parent,
            name,
            ElementKind::Parameter {
                ty,
                count: Some(length),
            },
        )
    }

    /// Attach one key/value of mapping metadata to an element.
    pub fn set_mapping(
        &mut self,
        id: ElementId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.nodes[id.0].mapping.insert(key.into(), value.into());
    }

    /// Freeze the structure: compute footprints bottom-up, assign offsets
    /// depth-first, and hand back the immutable tree.
    pub fn freeze(mut self) -> Result<ElementTree, StructureError> {
        fn compute_footprint(nodes: &mut [ElementNode], id: ElementId) -> usize {
            let leaf_footprint = match &nodes[id.0].kind {
                ElementKind::Parameter { ty, count } => Some(ty.size() * count.unwrap_or(1)),
                ElementKind::BitBlock { size, .. } => Some(*size),
                _ => None,
            };
            let footprint = match leaf_footprint {
                Some(footprint) => footprint,
                None => {
                    let children = nodes[id.0].children.clone();
                    children
                        .iter()
                        .map(|&c| compute_footprint(nodes, c))
                        .sum()
                }
            };
            nodes[id.0].footprint = footprint;
            footprint
        }
        fn assign_offsets(nodes: &mut [ElementNode], id: ElementId, base: usize) {
            nodes[id.0].offset = base;
            let children = nodes[id.0].children.clone();
            let mut offset = base;
            for child in children {
                assign_offsets(nodes, child, offset);
                offset += nodes[child.0].footprint;
            }
        }

        compute_footprint(&mut self.nodes, ElementId(0));
        assign_offsets(&mut self.nodes, ElementId(0), 0);
        Ok(ElementTree { nodes: self.nodes })
    }
}

// ---------------------------------------------------------------------------
// The frozen tree
// ---------------------------------------------------------------------------

/// Result of resolving an element path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathTarget {
    Element(ElementId),
    ArrayItem(ElementId, usize),
    /// (owning bit block, field index)
    BitField(ElementId, usize),
}

impl PathTarget {
    pub fn element(&self) -> ElementId {
        match *self {
            Self::Element(id) | Self::ArrayItem(id, _) | Self::BitField(id, _) => id,
        }
    }
}

/// The immutable element tree (syncer attachment aside, which happens once
/// during subsystem mapping).
#[derive(Clone, Debug)]
pub struct ElementTree {
    nodes: Vec<ElementNode>,
}

impl ElementTree {
    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    pub fn system_class(&self) -> &str {
        &self.nodes[0].name
    }

    pub fn ids(&self) -> impl Iterator<Item = ElementId> {
        (0..self.nodes.len()).map(ElementId)
    }

    pub fn name(&self, id: ElementId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn kind(&self, id: ElementId) -> &ElementKind {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        &self.nodes[id.0].children
    }

    pub fn offset(&self, id: ElementId) -> usize {
        self.nodes[id.0].offset
    }

    pub fn footprint(&self, id: ElementId) -> usize {
        self.nodes[id.0].footprint
    }

    pub fn mapping(&self, id: ElementId) -> &BTreeMap<String, String> {
        &self.nodes[id.0].mapping
    }

    /// Blackboard size: the root footprint.
    pub fn blackboard_size(&self) -> usize {
        self.nodes[0].footprint
    }

    /// Full path from the root, e.g. `/Audio/Codec/Volume`. The system class
    /// name is not part of the path.
    pub fn path(&self, id: ElementId) -> String {
        if id.0 == 0 {
            return "/".into();
        }
        let mut segments = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c.0 == 0 {
                break;
            }
            segments.push(self.nodes[c.0].name.as_str());
            cur = self.nodes[c.0].parent;
        }
        let mut out = String::new();
        for seg in segments.iter().rev() {
            out.push('/');
            out.push_str(seg);
        }
        out
    }

    pub fn is_descendant_of(&self, id: ElementId, ancestor: ElementId) -> bool {
        let mut cur = self.nodes[id.0].parent;
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.nodes[c.0].parent;
        }
        false
    }

    /// Endianness of the subsystem an element lives under.
    pub fn big_endian(&self, id: ElementId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let ElementKind::Subsystem { big_endian } = self.nodes[c.0].kind {
                return big_endian;
            }
            cur = self.nodes[c.0].parent;
        }
        false
    }

    // -- syncer coverage -----------------------------------------------------

    pub(crate) fn set_syncer(&mut self, id: ElementId, syncer: SyncerId) {
        debug_assert!(self.nodes[id.0].syncer.is_none());
        self.nodes[id.0].syncer = Some(syncer);
    }

    /// The syncer covering this element: its own, or the nearest ancestor's.
    pub fn covering_syncer(&self, id: ElementId) -> Option<SyncerId> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let Some(s) = self.nodes[c.0].syncer {
                return Some(s);
            }
            cur = self.nodes[c.0].parent;
        }
        None
    }

    /// Gather the syncers of a subtree, stopping descent at each covered
    /// node.
    pub fn fill_syncer_set_from_descendants(&self, id: ElementId, set: &mut SyncerSet) {
        if let Some(s) = self.nodes[id.0].syncer {
            set.add(s);
            return;
        }
        for &child in &self.nodes[id.0].children {
            self.fill_syncer_set_from_descendants(child, set);
        }
    }

    /// Syncers relevant to this element: the covering one if any, otherwise
    /// every descendant one.
    pub fn fill_syncer_set(&self, id: ElementId, set: &mut SyncerSet) {
        if let Some(s) = self.covering_syncer(id) {
            set.add(s);
        } else {
            self.fill_syncer_set_from_descendants(id, set);
        }
    }

    // -- path navigation -----------------------------------------------------

    /// Resolve `/Subsystem/.../Parameter[/index-or-field]`.
    pub fn resolve(&self, path: &str) -> Result<PathTarget, AccessError> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(AccessError::MalformedPath { path: path.into() });
        }
        let mut current = self.root();
        let mut segments = path[1..].split('/');
        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return Err(AccessError::MalformedPath { path: path.into() });
            }
            match &self.nodes[current.0].kind {
                ElementKind::Parameter {
                    count: Some(len), ..
                } => {
                    // Array: the segment must be a valid index, and final.
                    let index: usize = segment
                        .parse()
                        .ok()
                        .filter(|i| i < len)
                        .ok_or_else(|| AccessError::PathNotFound { path: path.into() })?;
                    if segments.next().is_some() {
                        return Err(AccessError::PathNotFound { path: path.into() });
                    }
                    return Ok(PathTarget::ArrayItem(current, index));
                }
                ElementKind::BitBlock { fields, .. } => {
                    let field = fields
                        .iter()
                        .position(|f| f.name == segment)
                        .ok_or_else(|| AccessError::PathNotFound { path: path.into() })?;
                    if segments.next().is_some() {
                        return Err(AccessError::PathNotFound { path: path.into() });
                    }
                    return Ok(PathTarget::BitField(current, field));
                }
                ElementKind::Parameter { count: None, .. } => {
                    // Scalars have no children.
                    return Err(AccessError::PathNotFound { path: path.into() });
                }
                _ => {
                    let child = self.nodes[current.0]
                        .children
                        .iter()
                        .copied()
                        .find(|&c| self.nodes[c.0].name == segment)
                        .ok_or_else(|| AccessError::PathNotFound { path: path.into() })?;
                    current = child;
                }
            }
        }
        Ok(PathTarget::Element(current))
    }

    /// Stamp the access context with the endianness of the subsystem owning
    /// `id`.
    pub fn access_context(&self, id: ElementId, ctx: &AccessContext) -> AccessContext {
        ctx.for_subsystem(self.big_endian(id))
    }

    // -- parameter access ----------------------------------------------------

    /// Set a parameter (scalar, array slice or bit field) from a user
    /// literal. Returns the written element for syncer triggering.
    pub fn set_parameter(
        &self,
        blackboard: &mut Blackboard,
        path: &str,
        value: &str,
        ctx: &AccessContext,
    ) -> Result<ElementId, AccessError> {
        let target = self.resolve(path)?;
        let id = target.element();
        let ctx = self.access_context(id, ctx);
        match target {
            PathTarget::Element(id) => match &self.nodes[id.0].kind {
                ElementKind::Parameter { ty, count: None } => {
                    let word = ty
                        .user_to_word(value, &ctx)
                        .map_err(|source| self.type_error(id, source))?;
                    blackboard.write_word(word, ty.size(), self.nodes[id.0].offset, ctx.big_endian)?;
                    Ok(id)
                }
                ElementKind::Parameter {
                    ty,
                    count: Some(len),
                } => self.set_array_values(blackboard, id, ty, *len, 0, value, &ctx),
                _ => Err(AccessError::PathNotExhausted { path: path.into() }),
            },
            PathTarget::ArrayItem(id, index) => match &self.nodes[id.0].kind {
                ElementKind::Parameter {
                    ty,
                    count: Some(len),
                } => self.set_array_values(blackboard, id, ty, *len, index, value, &ctx),
                _ => unreachable!("array item resolved on non-array"),
            },
            PathTarget::BitField(id, field) => {
                let ElementKind::BitBlock { size, fields } = &self.nodes[id.0].kind else {
                    unreachable!("bit field resolved on non-bit-block");
                };
                let offset = self.nodes[id.0].offset;
                let block = blackboard.read_word(*size, offset, ctx.big_endian)?;
                let block = fields[field]
                    .set_in_word(value, block)
                    .map_err(|source| AccessError::Type {
                        path: format!("{}/{}", self.path(id), fields[field].name),
                        source,
                    })?;
                blackboard.write_word(block, *size, offset, ctx.big_endian)?;
                Ok(id)
            }
        }
    }

    /// Get a parameter as a user literal. Whole arrays render as a
    /// space-separated value list.
    pub fn get_parameter(
        &self,
        blackboard: &Blackboard,
        path: &str,
        ctx: &AccessContext,
    ) -> Result<String, AccessError> {
        let target = self.resolve(path)?;
        let id = target.element();
        let ctx = self.access_context(id, ctx);
        match target {
            PathTarget::Element(id) => match &self.nodes[id.0].kind {
                ElementKind::Parameter { ty, count: None } => {
                    let word =
                        blackboard.read_word(ty.size(), self.nodes[id.0].offset, ctx.big_endian)?;
                    Ok(ty.word_to_user(word, &ctx))
                }
                ElementKind::Parameter {
                    ty,
                    count: Some(len),
                } => {
                    let mut values = Vec::with_capacity(*len);
                    for i in 0..*len {
                        let word = blackboard.read_word(
                            ty.size(),
                            self.nodes[id.0].offset + i * ty.size(),
                            ctx.big_endian,
                        )?;
                        values.push(ty.word_to_user(word, &ctx));
                    }
                    Ok(values.join(" "))
                }
                _ => Err(AccessError::PathNotExhausted { path: path.into() }),
            },
            PathTarget::ArrayItem(id, index) => {
                let ElementKind::Parameter {
                    ty,
                    count: Some(_),
                } = &self.nodes[id.0].kind
                else {
                    unreachable!("array item resolved on non-array");
                };
                let word = blackboard.read_word(
                    ty.size(),
                    self.nodes[id.0].offset + index * ty.size(),
                    ctx.big_endian,
                )?;
                Ok(ty.word_to_user(word, &ctx))
            }
            PathTarget::BitField(id, field) => {
                let ElementKind::BitBlock { size, fields } = &self.nodes[id.0].kind else {
                    unreachable!("bit field resolved on non-bit-block");
                };
                let block = blackboard.read_word(*size, self.nodes[id.0].offset, ctx.big_endian)?;
                Ok(fields[field].get_from_word(block, &ctx))
            }
        }
    }

    fn set_array_values(
        &self,
        blackboard: &mut Blackboard,
        id: ElementId,
        ty: &ParameterType,
        len: usize,
        start: usize,
        value: &str,
        ctx: &AccessContext,
    ) -> Result<ElementId, AccessError> {
        let values: Vec<&str> = value.split_whitespace().collect();
        if start + values.len() > len {
            return Err(AccessError::TooManyValues {
                path: self.path(id),
            });
        }
        let mut offset = self.nodes[id.0].offset + start * ty.size();
        for (i, literal) in values.iter().enumerate() {
            let word = ty
                .user_to_word(literal, ctx)
                .map_err(|source| AccessError::Type {
                    path: format!("{}/{}", self.path(id), start + i),
                    source,
                })?;
            blackboard.write_word(word, ty.size(), offset, ctx.big_endian)?;
            offset += ty.size();
        }
        Ok(id)
    }

    fn type_error(&self, id: ElementId, source: TypeError) -> AccessError {
        AccessError::Type {
            path: self.path(id),
            source,
        }
    }

    // -- bring-up helpers ----------------------------------------------------

    /// Write every parameter's default word into the blackboard (used at
    /// start for regions no syncer back-fills).
    pub fn init_defaults(&self, blackboard: &mut Blackboard) -> Result<(), BlackboardError> {
        for id in self.ids() {
            if let ElementKind::Parameter { ty, count } = &self.nodes[id.0].kind {
                let word = ty.default_word();
                let big_endian = self.big_endian(id);
                let mut offset = self.nodes[id.0].offset;
                for _ in 0..count.unwrap_or(1) {
                    blackboard.write_word(word, ty.size(), offset, big_endian)?;
                    offset += ty.size();
                }
            }
        }
        Ok(())
    }

    /// Property dump of one element: identity, layout, type details.
    pub fn describe(&self, id: ElementId) -> String {
        let node = &self.nodes[id.0];
        let mut out = String::new();
        let _ = writeln!(out, "Path: {}", self.path(id));
        let _ = writeln!(out, "Kind: {}", node.kind.kind_name());
        let _ = writeln!(out, "Offset: {}", node.offset);
        let _ = writeln!(out, "Total size: {} byte(s)", node.footprint);
        match &node.kind {
            ElementKind::Parameter { ty, count } => {
                if let Some(len) = count {
                    let _ = writeln!(out, "Length: {len}");
                }
                ty.describe(&mut out);
            }
            ElementKind::BitBlock { fields, .. } => {
                let _ = writeln!(out, "Fields:");
                for f in fields {
                    let _ = writeln!(
                        out,
                        "\t{}: pos {}, width {}, {}",
                        f.name,
                        f.pos,
                        f.width,
                        if f.signed { "signed" } else { "unsigned" }
                    );
                }
            }
            ElementKind::Subsystem { big_endian } => {
                let _ = writeln!(
                    out,
                    "Endianness: {}",
                    if *big_endian { "Big" } else { "Little" }
                );
            }
            _ => {}
        }
        if !node.mapping.is_empty() {
            let _ = writeln!(out, "Mapping:");
            for (k, v) in &node.mapping {
                let _ = writeln!(out, "\t{k}: {v}");
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::types::EnumPair;

    /// A small two-subsystem structure reused across module tests:
    ///
    /// ```text
    /// /Audio            (little endian)
    ///   /Volume         i8   [-10, 10]
    ///   /Gains          Q0.15 x 2
    ///   /Mode           enum8 {normal=0, boost=1}
    /// /Modem            (big endian)
    ///   /Power          block
    ///     /Limit        u16
    ///     /Flags        bit block 8 {low:1@0, level:3@1}
    /// ```
    pub fn sample_tree() -> ElementTree {
        let mut b = StructureBuilder::new("Test");
        let audio = b.create_subsystem("Audio", false).unwrap();
        b.create_scalar(
            audio,
            "Volume",
            ParameterType::integer(true, 8, Some(-10), Some(10)).unwrap(),
        )
        .unwrap();
        b.create_array(
            audio,
            "Gains",
            ParameterType::fixed_point(16, 0, 15).unwrap(),
            2,
        )
        .unwrap();
        b.create_scalar(
            audio,
            "Mode",
            ParameterType::enumeration(
                8,
                vec![EnumPair::new("normal", 0), EnumPair::new("boost", 1)],
            )
            .unwrap(),
        )
        .unwrap();
        let modem = b.create_subsystem("Modem", true).unwrap();
        let power = b.create_block(modem, "Power").unwrap();
        b.create_scalar(
            power,
            "Limit",
            ParameterType::integer(false, 16, None, None).unwrap(),
        )
        .unwrap();
        b.create_bit_block(
            power,
            "Flags",
            8,
            vec![
                BitField::new("low", 0, 1, false),
                BitField::new("level", 1, 3, false),
            ],
        )
        .unwrap();
        b.freeze().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::sample_tree;
    use super::*;

    #[test]
    fn offsets_partition_parent_ranges_contiguously() {
        let tree = sample_tree();
        // Audio: Volume(1) + Gains(4) + Mode(1) = 6; Modem: Limit(2) + Flags(1) = 3.
        assert_eq!(tree.blackboard_size(), 9);
        for id in tree.ids() {
            let children = tree.children(id).to_vec();
            if children.is_empty() {
                continue;
            }
            let mut expected = tree.offset(id);
            let mut sum = 0;
            for child in children {
                assert_eq!(tree.offset(child), expected);
                expected += tree.footprint(child);
                sum += tree.footprint(child);
            }
            assert_eq!(tree.footprint(id), sum);
            assert!(tree.offset(id) + tree.footprint(id) <= tree.blackboard_size());
        }
    }

    #[test]
    fn duplicate_sibling_names_are_rejected() {
        let mut b = StructureBuilder::new("Test");
        let s = b.create_subsystem("S", false).unwrap();
        b.create_scalar(s, "P", ParameterType::boolean()).unwrap();
        assert!(matches!(
            b.create_scalar(s, "P", ParameterType::boolean()),
            Err(StructureError::DuplicateName { .. })
        ));
        // Subsystems only live under the root.
        assert!(b.create_subsystem("T", false).is_ok());
    }

    #[test]
    fn path_resolution_and_failures() {
        let tree = sample_tree();
        let volume = tree.resolve("/Audio/Volume").unwrap();
        assert_eq!(tree.path(volume.element()), "/Audio/Volume");

        assert!(matches!(
            tree.resolve("/Audio/Gains/1"),
            Ok(PathTarget::ArrayItem(_, 1))
        ));
        // Out-of-range and non-numeric indices fail as not-found.
        assert!(matches!(
            tree.resolve("/Audio/Gains/2"),
            Err(AccessError::PathNotFound { .. })
        ));
        assert!(matches!(
            tree.resolve("/Audio/Gains/x"),
            Err(AccessError::PathNotFound { .. })
        ));
        assert!(matches!(
            tree.resolve("/Audio/Nope"),
            Err(AccessError::PathNotFound { .. })
        ));
        assert!(matches!(
            tree.resolve("Audio/Volume"),
            Err(AccessError::MalformedPath { .. })
        ));
        assert!(matches!(
            tree.resolve("/Modem/Power/Flags/level"),
            Ok(PathTarget::BitField(_, 1))
        ));
    }

    #[test]
    fn scalar_set_lands_at_the_element_offset() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());
        let ctx = AccessContext::new();

        tree.set_parameter(&mut bb, "/Audio/Volume", "10", &ctx)
            .unwrap();
        let volume = tree.resolve("/Audio/Volume").unwrap().element();
        assert_eq!(bb.bytes()[tree.offset(volume)], 0x0A);
        assert_eq!(
            tree.get_parameter(&bb, "/Audio/Volume", &ctx).unwrap(),
            "10"
        );

        // Composite elements are not settable.
        assert!(matches!(
            tree.set_parameter(&mut bb, "/Audio", "1", &ctx),
            Err(AccessError::PathNotExhausted { .. })
        ));
    }

    #[test]
    fn q_array_stores_little_endian_and_lists_whole_array() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());
        let ctx = AccessContext::new();

        tree.set_parameter(&mut bb, "/Audio/Gains", "0.5 -0.5", &ctx)
            .unwrap();
        let gains = tree.resolve("/Audio/Gains").unwrap().element();
        let off = tree.offset(gains);
        assert_eq!(&bb.bytes()[off..off + 4], &[0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(
            tree.get_parameter(&bb, "/Audio/Gains", &ctx).unwrap(),
            "0.5000 -0.5000"
        );
        assert_eq!(
            tree.get_parameter(&bb, "/Audio/Gains/1", &ctx).unwrap(),
            "-0.5000"
        );

        // Start index honored, over-long lists rejected.
        tree.set_parameter(&mut bb, "/Audio/Gains/1", "0.25", &ctx)
            .unwrap();
        assert!(matches!(
            tree.set_parameter(&mut bb, "/Audio/Gains/1", "0.25 0.25", &ctx),
            Err(AccessError::TooManyValues { .. })
        ));
    }

    #[test]
    fn big_endian_subsystem_reverses_stored_bytes() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());
        let ctx = AccessContext::new();

        tree.set_parameter(&mut bb, "/Modem/Power/Limit", "0x1234", &ctx)
            .unwrap();
        let limit = tree.resolve("/Modem/Power/Limit").unwrap().element();
        let off = tree.offset(limit);
        assert_eq!(&bb.bytes()[off..off + 2], &[0x12, 0x34]);
        assert_eq!(
            tree.get_parameter(&bb, "/Modem/Power/Limit", &ctx).unwrap(),
            "4660"
        );
    }

    #[test]
    fn bit_fields_share_a_block_byte() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());
        let ctx = AccessContext::new();

        tree.set_parameter(&mut bb, "/Modem/Power/Flags/low", "1", &ctx)
            .unwrap();
        tree.set_parameter(&mut bb, "/Modem/Power/Flags/level", "5", &ctx)
            .unwrap();
        let flags = tree.resolve("/Modem/Power/Flags").unwrap().element();
        assert_eq!(bb.bytes()[tree.offset(flags)], 0b1011);
        assert_eq!(
            tree.get_parameter(&bb, "/Modem/Power/Flags/low", &ctx)
                .unwrap(),
            "1"
        );
        assert_eq!(
            tree.get_parameter(&bb, "/Modem/Power/Flags/level", &ctx)
                .unwrap(),
            "5"
        );
    }

    #[test]
    fn type_errors_carry_the_offending_path() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());
        let ctx = AccessContext::new();

        let err = tree
            .set_parameter(&mut bb, "/Audio/Volume", "-11", &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("/Audio/Volume"), "{err}");

        let err = tree
            .set_parameter(&mut bb, "/Audio/Gains", "0.1 7.0", &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("/Audio/Gains/1"), "{err}");
    }

    #[test]
    fn defaults_fill_integer_minimums() {
        let tree = sample_tree();
        let mut bb = Blackboard::new(tree.blackboard_size());
        tree.init_defaults(&mut bb).unwrap();
        let ctx = AccessContext::new();
        assert_eq!(
            tree.get_parameter(&bb, "/Audio/Volume", &ctx).unwrap(),
            "-10"
        );
        assert_eq!(
            tree.get_parameter(&bb, "/Audio/Mode", &ctx).unwrap(),
            "normal"
        );
    }
}
