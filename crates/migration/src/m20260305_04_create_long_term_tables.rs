use sea_orm_migration::{
  prelude::*,
  schema::{
    boolean, custom, integer, text, timestamp_with_time_zone, timestamp_with_time_zone_null, uuid,
    uuid_null,
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
          .table(MentalModels::Table)
          .if_not_exists()
          .col(uuid(MentalModels::Id).primary_key())
          .col(uuid(MentalModels::BankId))
          .col(text(MentalModels::Name))
          .col(text(MentalModels::Description).default(""))
          .col(text(MentalModels::Content))
          .col(text(MentalModels::SourceQuery))
          .col(custom(MentalModels::Embedding, "vector(1024)"))
          .col(uuid_null(MentalModels::EntityId))
          .col(custom(MentalModels::SourceObservationIds, "UUID[] NOT NULL DEFAULT '{}'"))
          .col(custom(MentalModels::Tags, "TEXT[] NOT NULL DEFAULT '{}'"))
          .col(integer(MentalModels::MaxTokens).default(2048))
          .col(boolean(MentalModels::RefreshAfterConsolidation).default(true))
          .col(timestamp_with_time_zone_null(MentalModels::LastRefreshedAt))
          .col(timestamp_with_time_zone(MentalModels::CreatedAt).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(MentalModels::UpdatedAt).default(Expr::current_timestamp()))
          .foreign_key(
            ForeignKey::create()
              .from(MentalModels::Table, MentalModels::BankId)
              .to(Alias::new("banks"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .from(MentalModels::Table, MentalModels::EntityId)
              .to(Alias::new("entities"), Alias::new("id"))
              .on_delete(ForeignKeyAction::SetNull),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(Chunks::Table)
          .if_not_exists()
          .col(uuid(Chunks::Id).primary_key())
          .col(uuid(Chunks::UnitId))
          .col(integer(Chunks::ChunkIndex))
          .col(text(Chunks::Text))
          .col(custom(Chunks::Embedding, "vector(1024)"))
          .col(timestamp_with_time_zone(Chunks::CreatedAt).default(Expr::current_timestamp()))
          .foreign_key(
            ForeignKey::create()
              .from(Chunks::Table, Chunks::UnitId)
              .to(Alias::new("memory_units"), Alias::new("id"))
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    for sql in [
      "ALTER TABLE mental_models ALTER COLUMN embedding DROP NOT NULL;",
      "ALTER TABLE chunks ALTER COLUMN embedding DROP NOT NULL;",
      // Last line of duplicate defense for per-entity models.
      "CREATE UNIQUE INDEX idx_mental_models_bank_entity ON mental_models \
       (bank_id, entity_id) WHERE entity_id IS NOT NULL;",
      "CREATE INDEX idx_mental_models_embedding_hnsw ON mental_models \
       USING hnsw (embedding vector_cosine_ops);",
      "CREATE INDEX idx_mental_models_tags ON mental_models USING gin (tags);",
      "CREATE UNIQUE INDEX idx_chunks_unit_index ON chunks (unit_id, chunk_index);",
      "CREATE INDEX idx_chunks_embedding_hnsw ON chunks USING hnsw (embedding vector_cosine_ops);",
      "CREATE TRIGGER trg_mental_models_updated_at BEFORE UPDATE ON mental_models \
       FOR EACH ROW EXECUTE FUNCTION set_updated_at();",
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
      Table::drop().table(Chunks::Table).to_owned(),
      Table::drop().table(MentalModels::Table).to_owned(),
    ] {
      manager.drop_table(table).await?;
    }

    Ok(())
  }
}

#[derive(Iden)]
enum MentalModels {
  Table,
  Id,
  BankId,
  Name,
  Description,
  Content,
  SourceQuery, // rerun verbatim on refresh
  Embedding,
  EntityId,
  SourceObservationIds,
  Tags,
  MaxTokens,
  RefreshAfterConsolidation,
  LastRefreshedAt,
  CreatedAt,
  UpdatedAt,
}

#[derive(Iden)]
enum Chunks {
  Table,
  Id,
  UnitId,
  ChunkIndex,
  Text,
  Embedding,
  CreatedAt,
}
