pub use sea_orm_migration::*;

mod m20260305_01_create_extensions;
mod m20260305_02_create_short_term_tables;
mod m20260305_03_create_mid_term_tables;
mod m20260305_04_create_long_term_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260305_01_create_extensions::Migration),
      Box::new(m20260305_02_create_short_term_tables::Migration),
      Box::new(m20260305_03_create_mid_term_tables::Migration),
      Box::new(m20260305_04_create_long_term_tables::Migration),
    ]
  }
}
