use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "delegations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub organization_id: String,
    pub delegator_id: i64,
    pub delegate_id: i64,
    /// None = global delegation, applies to every proposal without a more
    /// specific delegation or a direct vote by the delegator
    pub proposal_url: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::participant::Entity",
        from = "Column::DelegatorId",
        to = "super::participant::Column::Id",
        on_delete = "Cascade"
    )]
    Delegator,
    #[sea_orm(
        belongs_to = "super::participant::Entity",
        from = "Column::DelegateId",
        to = "super::participant::Column::Id",
        on_delete = "Cascade"
    )]
    Delegate,
}

impl ActiveModelBehavior for ActiveModel {}
