mod bank;
pub use bank::{Bank, Disposition};

pub mod memory;
pub use memory::{
  FactKind, FactType, MemoryUnit, RecallFilters, RecallLimits, RecalledUnit, RetainOutcome,
  TagsMatch, recall, retain,
};

mod entity_resolver;
pub use entity_resolver::{EntityType, ResolvedEntity, resolve_entity};

pub mod mental_model;
pub use mental_model::MentalModel;

pub mod reflect;
pub use reflect::{ReflectOutcome, reflect};
