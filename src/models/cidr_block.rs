//! CIDR block entity model
//!
//! The pool of /16 network blocks handed out to tenant VPCs.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cidr_blocks")]
pub struct Model {
    /// Network address of the block, e.g. `10.3.0.0`
    #[sea_orm(primary_key, auto_increment = false)]
    pub cidr_block: String,

    /// Owning tenant; `None` while the block is free
    pub tenant_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_available(&self) -> bool {
        self.tenant_id.is_none()
    }
}
