//! # Strata
//!
//! Archetype-based entity/component store with deferred structural commands
//! and stage-barrier parallel execution.
//!
//! ## Design Goals
//! - Columnar storage per component signature for cache-friendly iteration
//! - An entity directory that stays consistent across row relocation
//! - Parallel system execution with structural changes confined to one thread
//! - Deterministic command replay
//!
//! ## Quick start
//! ```rust
//! use strata::prelude::*;
//!
//! struct Position(f32);
//! struct Velocity(f32);
//!
//! let mut world = World::new();
//! world.spawn((Position(0.0), Velocity(1.5))).unwrap();
//!
//! let mut stage = Stage::new("move").with_system(FnSystem::new(
//!     "integrate",
//!     AccessSets::default().write::<Position>().read::<Velocity>(),
//!     |ctx: SystemContext<'_>| {
//!         let mut query = ctx.query::<(&mut Position, &Velocity), ()>()?;
//!         query.borrow()?.for_each(|(mut p, v)| p.0 += v.0);
//!         Ok(())
//!     },
//! ));
//!
//! let report = StageRunner::default().run_stage(&mut world, &mut stage);
//! assert!(report.is_clean());
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::World;

pub use engine::config::WorldConfig;

pub use engine::entity::{
    Entities,
    Entity,
    EntityLocation,
};

pub use engine::archetype::Archetype;

pub use engine::resources::Resources;

pub use engine::component::{
    Bundle,
    Component,
    ComponentSet,
    IntoBundle,
    component_id_of,
    register_component,
};

pub use engine::query::{
    query_access,
    Changed,
    Mut,
    Query,
    QueryBorrow,
    QueryData,
    QueryFilter,
    TableView,
    With,
    Without,
};

pub use engine::commands::{
    ApplyReport,
    Command,
    CommandFailure,
    Commands,
    EntityRef,
    PendingEntity,
};

pub use engine::systems::{
    FnSystem,
    Locals,
    System,
    SystemContext,
};

pub use engine::scheduler::{
    plan_stages,
    Executor,
    RayonExecutor,
    Schedule,
    SequentialExecutor,
    Stage,
    StagePhase,
    StageReport,
    StageRunner,
    SystemFailure,
};

pub use engine::error::{
    CapacityError,
    ConfigError,
    ECSError,
    ECSResult,
    NotFoundError,
    SignatureMismatchError,
};

pub use engine::types::{
    AccessSets,
    ArchetypeID,
    ComponentID,
    QuerySignature,
    RowID,
    Signature,
    SystemTicks,
    Tick,
    WorkerID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use strata::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AccessSets,
        Bundle,
        Changed,
        Commands,
        ECSError,
        ECSResult,
        Entity,
        FnSystem,
        Mut,
        Query,
        Stage,
        StageRunner,
        System,
        SystemContext,
        With,
        Without,
        World,
    };
}
