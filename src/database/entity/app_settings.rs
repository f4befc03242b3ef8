use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "app_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub connection_timeout: i32,
    pub command_timeout: i32,
    pub keep_alive_interval: i32,
    pub metrics_interval: i32,
    pub container_poll_interval: i32,
    pub metrics_history_size: i32,
    pub log_tail_lines: i32,
    pub use_sudo: bool,
    pub strict_host_key_checking: bool,
    pub default_ssh_key: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
