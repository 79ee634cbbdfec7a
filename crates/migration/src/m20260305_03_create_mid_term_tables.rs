use sea_orm_migration::{
  prelude::*,
  schema::{
    float, integer, json_binary, json_binary_null, text, text_null, timestamp_with_time_zone,
    timestamp_with_time_zone_null, uuid, uuid_null,
  },
  sea_orm::Statement,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(MemoryLinks::Table)
          .if_not_exists()
          .col(uuid(MemoryLinks::Id).primary_key())
          .col(uuid(MemoryLinks::FromUnitId))
          .col(uuid(MemoryLinks::ToUnitId))
          .col(text(MemoryLinks::LinkType))
          .col(uuid_null(MemoryLinks::EntityId))
          .col(float(MemoryLinks::Weight).default(1.0))
          .col(timestamp_with_time_zone(MemoryLinks::CreatedAt).default(Expr::current_timestamp()))
          .foreign_key(
            ForeignKey::create()
              .from(MemoryLinks::Table, MemoryLinks::FromUnitId)
              .to(Alias::new("memory_units"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .from(MemoryLinks::Table, MemoryLinks::ToUnitId)
              .to(Alias::new("memory_units"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            // Entity deletion keeps the edge, drops the provenance.
            ForeignKey::create()
              .from(MemoryLinks::Table, MemoryLinks::EntityId)
              .to(Alias::new("entities"), Alias::new("id"))
              .on_delete(ForeignKeyAction::SetNull),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(EntityCooccurrences::Table)
          .if_not_exists()
          .col(uuid(EntityCooccurrences::EntityAId))
          .col(uuid(EntityCooccurrences::EntityBId))
          .col(integer(EntityCooccurrences::CooccurrenceCount).default(1))
          .col(
            timestamp_with_time_zone(EntityCooccurrences::LastCooccurred)
              .default(Expr::current_timestamp()),
          )
          .primary_key(
            Index::create()
              .col(EntityCooccurrences::EntityAId)
              .col(EntityCooccurrences::EntityBId),
          )
          .foreign_key(
            ForeignKey::create()
              .from(EntityCooccurrences::Table, EntityCooccurrences::EntityAId)
              .to(Alias::new("entities"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .from(EntityCooccurrences::Table, EntityCooccurrences::EntityBId)
              .to(Alias::new("entities"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(AsyncOperations::Table)
          .if_not_exists()
          .col(uuid(AsyncOperations::Id).primary_key())
          .col(uuid(AsyncOperations::BankId))
          .col(text(AsyncOperations::OperationType))
          .col(text(AsyncOperations::Status).default("pending"))
          .col(text_null(AsyncOperations::WorkerId))
          .col(json_binary(AsyncOperations::Payload).default(Expr::cust("'{}'::jsonb")))
          .col(json_binary_null(AsyncOperations::Result))
          .col(text_null(AsyncOperations::ErrorMessage))
          .col(
            timestamp_with_time_zone(AsyncOperations::CreatedAt)
              .default(Expr::current_timestamp()),
          )
          .col(timestamp_with_time_zone_null(AsyncOperations::StartedAt))
          .col(timestamp_with_time_zone_null(AsyncOperations::CompletedAt))
          .foreign_key(
            ForeignKey::create()
              .from(AsyncOperations::Table, AsyncOperations::BankId)
              .to(Alias::new("banks"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    for sql in [
      "ALTER TABLE memory_links ADD CONSTRAINT chk_memory_links_type CHECK (link_type IN \
       ('temporal', 'semantic', 'entity', 'causes', 'caused_by'));",
      "ALTER TABLE memory_links ADD CONSTRAINT chk_memory_links_weight \
       CHECK (weight >= 0 AND weight <= 1);",
      "CREATE UNIQUE INDEX idx_memory_links_tuple ON memory_links \
       (from_unit_id, to_unit_id, link_type, coalesce(entity_id, '00000000-0000-0000-0000-000000000000'::uuid));",
      "CREATE INDEX idx_memory_links_from ON memory_links (from_unit_id, link_type);",
      "CREATE INDEX idx_memory_links_to ON memory_links (to_unit_id, link_type);",
      "CREATE INDEX idx_memory_links_weight ON memory_links (link_type, weight DESC);",
      "ALTER TABLE entity_cooccurrences ADD CONSTRAINT chk_cooccurrence_order \
       CHECK (entity_a_id < entity_b_id);",
      "ALTER TABLE async_operations ADD CONSTRAINT chk_async_operations_status CHECK (status IN \
       ('pending', 'processing', 'completed', 'failed'));",
      "CREATE INDEX idx_async_operations_pending ON async_operations \
       (bank_id, created_at) WHERE status = 'pending';",
    ] {
      manager
        .get_connection()
        .execute_raw(Statement::from_string(manager.get_database_backend(), sql))
        .await?;
    }

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    for table in [
      Table::drop().table(AsyncOperations::Table).to_owned(),
      Table::drop().table(EntityCooccurrences::Table).to_owned(),
      Table::drop().table(MemoryLinks::Table).to_owned(),
    ] {
      manager.drop_table(table).await?;
    }

    Ok(())
  }
}

#[derive(Iden)]
enum MemoryLinks {
  Table,
  Id,
  FromUnitId,
  ToUnitId,
  LinkType, // temporal | semantic | entity | causes | caused_by
  EntityId, // provenance, nulled when the entity is deleted
  Weight,
  CreatedAt,
}

#[derive(Iden)]
enum EntityCooccurrences {
  Table,
  EntityAId, // canonical order: a < b
  EntityBId,
  CooccurrenceCount,
  LastCooccurred,
}

#[derive(Iden)]
enum AsyncOperations {
  Table,
  Id,
  BankId,
  OperationType,
  Status, // pending | processing | completed | failed
  WorkerId,
  Payload,
  Result,
  ErrorMessage,
  CreatedAt,
  StartedAt,
  CompletedAt,
}
