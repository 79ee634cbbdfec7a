pub mod async_operation;
pub mod bank;
pub mod chunk;
pub mod document;
pub mod entity;
pub mod entity_cooccurrence;
pub mod memory_link;
pub mod memory_unit;
pub mod mental_model;
pub mod unit_entity;
