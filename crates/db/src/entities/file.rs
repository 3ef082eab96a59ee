//! File entity (media attached to a note).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning note
    pub note_id: String,

    /// Object key of the blob as uploaded
    #[sea_orm(unique)]
    pub original_object_key: String,

    /// Object key of the transcoded blob, once processing has finished
    #[sea_orm(nullable)]
    pub processed_object_key: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Key to serve the file from: the processed blob when there is one.
    #[must_use]
    pub fn serving_key(&self) -> &str {
        self.processed_object_key
            .as_deref()
            .unwrap_or(&self.original_object_key)
    }

    /// Every object key this row references.
    pub fn object_keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.original_object_key.as_str())
            .chain(self.processed_object_key.as_deref())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::note::Entity",
        from = "Column::NoteId",
        to = "super::note::Column::Id",
        on_delete = "Cascade"
    )]
    Note,
}

impl Related<super::note::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Note.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
