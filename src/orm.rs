#[allow(warnings, clippy::all)]
pub(crate) mod short_url {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub slug: String,
        pub original_url: String,
        pub short_url: String,
    }

    impl ActiveModelBehavior for ActiveModel {}
}
