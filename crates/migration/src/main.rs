use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
  cli::run_cli(engram_migration::Migrator).await
}
