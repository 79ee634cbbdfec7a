use sea_orm_migration::{
  prelude::*,
  schema::{
    custom, float_null, integer, json_binary, text, text_null, timestamp_with_time_zone,
    timestamp_with_time_zone_null, uuid, uuid_null,
  },
  sea_orm::Statement,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

async fn execute_all(manager: &SchemaManager<'_>, statements: &[&str]) -> Result<(), DbErr> {
  for sql in statements {
    manager
      .get_connection()
      .execute_raw(Statement::from_string(manager.get_database_backend(), *sql))
      .await?;
  }
  Ok(())
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Banks::Table)
          .if_not_exists()
          .col(uuid(Banks::Id).primary_key())
          .col(text(Banks::Name))
          .col(text(Banks::Mission).default(""))
          .col(text(Banks::Background).default(""))
          .col(json_binary(Banks::Disposition).default(Expr::cust(
            r#"'{"skepticism": 3, "literalism": 3, "empathy": 3}'::jsonb"#,
          )))
          .col(custom(Banks::Directives, "TEXT[] NOT NULL DEFAULT '{}'"))
          .col(timestamp_with_time_zone(Banks::CreatedAt).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(Banks::UpdatedAt).default(Expr::current_timestamp()))
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(Documents::Table)
          .if_not_exists()
          .col(uuid(Documents::Id).primary_key())
          .col(uuid(Documents::BankId))
          .col(text(Documents::Title).default(""))
          .col(json_binary(Documents::Metadata).default(Expr::cust("'{}'::jsonb")))
          .col(timestamp_with_time_zone(Documents::CreatedAt).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(Documents::UpdatedAt).default(Expr::current_timestamp()))
          .foreign_key(
            ForeignKey::create()
              .from(Documents::Table, Documents::BankId)
              .to(Banks::Table, Banks::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(MemoryUnits::Table)
          .if_not_exists()
          .col(uuid(MemoryUnits::Id).primary_key())
          .col(uuid(MemoryUnits::BankId))
          .col(uuid_null(MemoryUnits::DocumentId))
          .col(text(MemoryUnits::Text))
          .col(text_null(MemoryUnits::Context))
          .col(custom(MemoryUnits::Embedding, "vector(1024)"))
          .col(text(MemoryUnits::FactType))
          .col(text_null(MemoryUnits::FactKind))
          .col(text_null(MemoryUnits::What))
          .col(custom(MemoryUnits::Who, "TEXT[] NOT NULL DEFAULT '{}'"))
          .col(text_null(MemoryUnits::WhenDescription))
          .col(text_null(MemoryUnits::WhereDescription))
          .col(text_null(MemoryUnits::WhyDescription))
          .col(timestamp_with_time_zone_null(MemoryUnits::EventDate))
          .col(timestamp_with_time_zone_null(MemoryUnits::OccurredStart))
          .col(timestamp_with_time_zone_null(MemoryUnits::OccurredEnd))
          .col(timestamp_with_time_zone(MemoryUnits::MentionedAt).default(Expr::current_timestamp()))
          .col(integer(MemoryUnits::ProofCount).default(0))
          .col(custom(MemoryUnits::SourceMemoryIds, "UUID[] NOT NULL DEFAULT '{}'"))
          .col(json_binary(MemoryUnits::History).default(Expr::cust("'[]'::jsonb")))
          .col(float_null(MemoryUnits::ConfidenceScore))
          .col(timestamp_with_time_zone_null(MemoryUnits::ConsolidatedAt))
          .col(custom(MemoryUnits::Tags, "TEXT[] NOT NULL DEFAULT '{}'"))
          .col(json_binary(MemoryUnits::Metadata).default(Expr::cust("'{}'::jsonb")))
          .col(timestamp_with_time_zone(MemoryUnits::CreatedAt).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(MemoryUnits::UpdatedAt).default(Expr::current_timestamp()))
          .foreign_key(
            ForeignKey::create()
              .from(MemoryUnits::Table, MemoryUnits::BankId)
              .to(Banks::Table, Banks::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .from(MemoryUnits::Table, MemoryUnits::DocumentId)
              .to(Documents::Table, Documents::Id)
              .on_delete(ForeignKeyAction::SetNull),
          )
          .to_owned(),
      )
      .await?;

    execute_all(
      manager,
      &[
        // Allow nullable embedding ("never computed" marker) but pin the width when present.
        "ALTER TABLE memory_units ALTER COLUMN embedding DROP NOT NULL;",
        "ALTER TABLE memory_units ADD CONSTRAINT chk_memory_units_fact_type \
         CHECK (fact_type IN ('world', 'experience', 'observation'));",
        "ALTER TABLE memory_units ADD CONSTRAINT chk_memory_units_fact_kind \
         CHECK (fact_kind IS NULL OR fact_kind IN ('event', 'conversation'));",
        "ALTER TABLE memory_units ADD CONSTRAINT chk_memory_units_proof_count \
         CHECK (proof_count >= 0);",
        "ALTER TABLE memory_units ADD CONSTRAINT chk_memory_units_confidence \
         CHECK (confidence_score IS NULL OR (confidence_score >= 0 AND confidence_score <= 1));",
        // Lexical search vector: text weighted high, context lower. Stored-generated,
        // so changing the definition requires a column rebuild.
        "ALTER TABLE memory_units ADD COLUMN search_vector tsvector GENERATED ALWAYS AS (
           setweight(to_tsvector('english', coalesce(text, '')), 'A') ||
           setweight(to_tsvector('english', coalesce(context, '')), 'B')
         ) STORED;",
        // ANN: one global HNSW index plus partial ones per fact_type so
        // type-filtered searches stay on an index.
        "CREATE INDEX idx_memory_units_embedding_hnsw ON memory_units \
         USING hnsw (embedding vector_cosine_ops);",
        "CREATE INDEX idx_memory_units_embedding_world ON memory_units \
         USING hnsw (embedding vector_cosine_ops) WHERE fact_type = 'world';",
        "CREATE INDEX idx_memory_units_embedding_experience ON memory_units \
         USING hnsw (embedding vector_cosine_ops) WHERE fact_type = 'experience';",
        "CREATE INDEX idx_memory_units_embedding_observation ON memory_units \
         USING hnsw (embedding vector_cosine_ops) WHERE fact_type = 'observation';",
        "CREATE INDEX idx_memory_units_search_vector ON memory_units USING gin (search_vector);",
        "CREATE INDEX idx_memory_units_tags ON memory_units USING gin (tags);",
        "CREATE INDEX idx_memory_units_bank_type_event_date ON memory_units \
         (bank_id, fact_type, event_date DESC NULLS LAST);",
        "CREATE INDEX idx_memory_units_unconsolidated ON memory_units \
         (bank_id, created_at ASC) WHERE consolidated_at IS NULL;",
        "CREATE TRIGGER trg_banks_updated_at BEFORE UPDATE ON banks \
         FOR EACH ROW EXECUTE FUNCTION set_updated_at();",
        "CREATE TRIGGER trg_documents_updated_at BEFORE UPDATE ON documents \
         FOR EACH ROW EXECUTE FUNCTION set_updated_at();",
        "CREATE TRIGGER trg_memory_units_updated_at BEFORE UPDATE ON memory_units \
         FOR EACH ROW EXECUTE FUNCTION set_updated_at();",
      ],
    )
    .await?;

    manager
      .create_table(
        Table::create()
          .table(Entities::Table)
          .if_not_exists()
          .col(uuid(Entities::Id).primary_key())
          .col(uuid(Entities::BankId))
          .col(text(Entities::CanonicalName))
          .col(text(Entities::EntityType).default("other"))
          .col(integer(Entities::MentionCount).default(1))
          .col(timestamp_with_time_zone(Entities::FirstSeen).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(Entities::LastSeen).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(Entities::CreatedAt).default(Expr::current_timestamp()))
          .col(timestamp_with_time_zone(Entities::UpdatedAt).default(Expr::current_timestamp()))
          .foreign_key(
            ForeignKey::create()
              .from(Entities::Table, Entities::BankId)
              .to(Banks::Table, Banks::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(UnitEntities::Table)
          .if_not_exists()
          .col(uuid(UnitEntities::UnitId))
          .col(uuid(UnitEntities::EntityId))
          .col(timestamp_with_time_zone(UnitEntities::CreatedAt).default(Expr::current_timestamp()))
          .primary_key(
            Index::create()
              .col(UnitEntities::UnitId)
              .col(UnitEntities::EntityId),
          )
          .foreign_key(
            ForeignKey::create()
              .from(UnitEntities::Table, UnitEntities::UnitId)
              .to(MemoryUnits::Table, MemoryUnits::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .from(UnitEntities::Table, UnitEntities::EntityId)
              .to(Entities::Table, Entities::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    execute_all(
      manager,
      &[
        "ALTER TABLE entities ADD CONSTRAINT chk_entities_type CHECK (entity_type IN \
         ('person', 'organization', 'location', 'concept', 'event', 'other'));",
        "CREATE UNIQUE INDEX idx_entities_bank_lower_name ON entities \
         (bank_id, lower(canonical_name));",
        // Trigram index backing alias resolution.
        "CREATE INDEX idx_entities_name_trgm ON entities USING gin (canonical_name gin_trgm_ops);",
        "CREATE TRIGGER trg_entities_updated_at BEFORE UPDATE ON entities \
         FOR EACH ROW EXECUTE FUNCTION set_updated_at();",
      ],
    )
    .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    for table in [
      Table::drop().table(UnitEntities::Table).to_owned(),
      Table::drop().table(Entities::Table).to_owned(),
      Table::drop().table(MemoryUnits::Table).to_owned(),
      Table::drop().table(Documents::Table).to_owned(),
      Table::drop().table(Banks::Table).to_owned(),
    ] {
      manager.drop_table(table).await?;
    }

    Ok(())
  }
}

#[derive(Iden)]
enum Banks {
  Table,
  Id,
  Name,
  Mission,
  Background,
  Disposition, // jsonb {skepticism, literalism, empathy}
  Directives,  // ordered persona rules (TEXT[])
  CreatedAt,
  UpdatedAt,
}

#[derive(Iden)]
enum Documents {
  Table,
  Id,
  BankId,
  Title,
  Metadata,
  CreatedAt,
  UpdatedAt,
}

#[derive(Iden)]
enum MemoryUnits {
  Table,

  Id,     // uuid v7
  BankId, // owning tenant
  DocumentId,

  Text,
  Context,
  Embedding, // vector(1024), NULL = never computed

  FactType, // world | experience | observation
  FactKind, // event | conversation | NULL

  // 5W1H
  What,
  Who,
  WhenDescription,
  WhereDescription,
  WhyDescription,

  // temporal markers
  EventDate,
  OccurredStart,
  OccurredEnd,
  MentionedAt,

  // observation-only
  ProofCount,
  SourceMemoryIds,
  History,
  ConfidenceScore,

  ConsolidatedAt, // NULL = eligible for consolidation

  Tags,
  Metadata,
  CreatedAt,
  UpdatedAt,
}

#[derive(Iden)]
enum Entities {
  Table,
  Id,
  BankId,
  CanonicalName,
  EntityType,
  MentionCount,
  FirstSeen,
  LastSeen,
  CreatedAt,
  UpdatedAt,
}

#[derive(Iden)]
enum UnitEntities {
  Table,
  UnitId,
  EntityId,
  CreatedAt,
}
