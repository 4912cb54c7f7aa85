//! Crate root: public surface and framework-wide invariants
//!
//! This crate is a **parameter framework**: a runtime exposing a tree of
//! typed hardware/subsystem tuning parameters, laying them out in one
//! contiguous byte image (the *blackboard*), and selecting between
//! pre-authored configurations at runtime based on selection criteria.
//! Whenever a criterion changes, the framework evaluates each configurable
//! domain's applicability rules, restores the winning configuration's bytes
//! into the blackboard and synchronizes the affected regions to the
//! underlying subsystems.
//!
//! ## Invariants
//!
//! - **Layout.** Offsets are assigned once, at structure freeze, by a
//!   depth-first walk; a composite's footprint is exactly the sum of its
//!   children's, and every element's `offset + footprint` fits the board.
//!   The tree is immutable afterwards.
//! - **Domains.** Every configuration of a domain holds exactly one area
//!   configuration per associated element; association changes rewrite all
//!   configurations in lockstep. Invalid areas are never restored.
//! - **Apply cycle.** Domains apply in declaration order, areas in each
//!   configuration's restore order, and the batched sync runs each syncer
//!   at most once per cycle. Sync failures are reported, never fatal.
//! - **Locking.** One parameter lock guards the whole mutable aggregate;
//!   public operations hold it from entry to return. The structure and the
//!   type model are immutable post-load and freely shared.
//!
//! XML handling, the remote command transport and concrete hardware I/O are
//! external collaborators: the crate exposes the structure builder, the
//! serde domains document and the [`Syncer`] trait as its seams.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Access context flags (value space, raw format, endianness, auto sync).
pub mod access;
/// Area configurations: per-(configuration, element) byte snapshots.
pub mod area;
/// The blackboard: flat byte buffer with endianness-aware accesses.
pub mod blackboard;
/// Domain configurations: ordered area lists plus applicability rules.
pub mod config;
/// Selection criteria (exclusive / inclusive) and their value mappings.
pub mod criteria;
/// Configurable domains and the declaration-ordered apply cycle.
pub mod domain;
/// The element tree: arena, builder, offsets, path navigation.
pub mod element;
/// Subsystem mapping: context slots, object creators, `%N` amendments.
pub mod mapper;
/// The framework aggregate: lifecycle, parameter lock, command surface.
pub mod manager;
/// Rule engine: All/Any trees over criterion matches, textual grammar.
pub mod rules;
/// Binary settings images, the domains document, structure checksums.
pub mod settings;
/// Syncers, the syncer registry and deduplicating syncer sets.
pub mod sync;
/// The parameter type model and its conversion contracts.
pub mod types;

pub use crate::access::AccessContext;
pub use crate::area::AreaConfiguration;
pub use crate::blackboard::Blackboard;
pub use crate::config::DomainConfiguration;
pub use crate::criteria::{Criteria, CriterionFormat, CriterionId};
pub use crate::domain::{ConfigurableDomain, DomainId, Domains};
pub use crate::element::{ElementId, ElementKind, ElementTree, PathTarget, StructureBuilder};
pub use crate::manager::{FrameworkError, ParameterFramework};
pub use crate::mapper::{MappingContext, SubsystemDescriptor, SubsystemObjectCreator};
pub use crate::rules::{MatchOp, Rule};
pub use crate::settings::DomainsDocument;
pub use crate::sync::{LoopbackSyncer, Syncer, SyncerId, SyncerRegistry, SyncerSet};
pub use crate::types::{BitField, EnumPair, LinearAdaptation, ParameterType};
