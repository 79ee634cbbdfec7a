use engram_entities::bank;
use engram_shared::EngramError;
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persona stance triple, each axis in 1..=5 with 3 as neutral.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Disposition {
  pub skepticism: u8,
  pub literalism: u8,
  pub empathy: u8,
}

impl Default for Disposition {
  fn default() -> Self {
    Self {
      skepticism: 3,
      literalism: 3,
      empathy: 3,
    }
  }
}

impl Disposition {
  /// Clamp all axes into the valid range. Out-of-range values from hand-edited
  /// rows degrade to the nearest bound instead of skewing prompt selection.
  #[must_use]
  pub fn clamped(self) -> Self {
    Self {
      skepticism: self.skepticism.clamp(1, 5),
      literalism: self.literalism.clamp(1, 5),
      empathy: self.empathy.clamp(1, 5),
    }
  }
}

/// Tenant partition: owns every downstream row and carries the persona that
/// frames extraction, consolidation, and reflection.
#[derive(Debug, Clone)]
pub struct Bank {
  pub id: Uuid,
  pub name: String,
  pub mission: String,
  pub background: String,
  pub disposition: Disposition,
  pub directives: Vec<String>,
}

impl Bank {
  pub fn from_model(model: bank::Model) -> Self {
    let disposition = serde_json::from_value::<Disposition>(model.disposition)
      .unwrap_or_default()
      .clamped();

    Self {
      id: model.id,
      name: model.name,
      mission: model.mission,
      background: model.background,
      disposition,
      directives: model.directives,
    }
  }

  /// Load a bank by id. Unknown ids are a caller error, not an internal one.
  pub async fn load<C: ConnectionTrait>(id: Uuid, db: &C) -> Result<Self, EngramError> {
    let model = bank::Entity::find_by_id(id)
      .one(db)
      .await?
      .ok_or_else(|| EngramError::invalid_input(format!("unknown bank {id}")))?;

    Ok(Self::from_model(model))
  }

  /// All bank ids, for the consolidation sweep.
  pub async fn all_ids<C: ConnectionTrait>(db: &C) -> Result<Vec<Uuid>, EngramError> {
    let models = bank::Entity::find().all(db).await?;
    Ok(models.into_iter().map(|m| m.id).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::Disposition;

  #[test]
  fn disposition_clamps_out_of_range_axes() {
    let d = Disposition {
      skepticism: 0,
      literalism: 9,
      empathy: 3,
    }
    .clamped();
    assert_eq!((d.skepticism, d.literalism, d.empathy), (1, 5, 3));
  }

  #[test]
  fn disposition_defaults_to_neutral() {
    let d = Disposition::default();
    assert_eq!((d.skepticism, d.literalism, d.empathy), (3, 3, 3));
  }
}
