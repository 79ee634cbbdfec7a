mod engine;
pub use engine::Engine;

pub use engram_core::{
  FactType, RecallFilters, RecallLimits, RecalledUnit, ReflectOutcome, RetainOutcome, TagsMatch,
};
pub use engram_shared::{EngramError, ErrorKind};
