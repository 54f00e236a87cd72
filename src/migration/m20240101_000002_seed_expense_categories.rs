use sea_orm_migration::{prelude::*, sea_orm::ConnectionTrait};

use super::m20240101_000001_create_table::ExpenseCategories;

const DEFAULT_CATEGORIES: [(&str, &str); 8] = [
    (
        "Office Supplies",
        "Stationery, printing materials, and office equipment",
    ),
    ("Maintenance", "Building and equipment maintenance costs"),
    ("Utilities", "Electricity, water, and internet bills"),
    ("Events", "Community events and celebrations"),
    ("Transportation", "Travel and transportation expenses"),
    ("Food & Beverages", "Catering and refreshments for meetings"),
    ("Communications", "Phone, internet, and messaging services"),
    ("Miscellaneous", "Other general expenses"),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut insert = Query::insert();
        insert
            .into_table(ExpenseCategories::Table)
            .columns([ExpenseCategories::Name, ExpenseCategories::Description]);
        for (name, description) in DEFAULT_CATEGORIES {
            insert
                .values([name.into(), description.into()])
                .map_err(|err| DbErr::Custom(err.to_string()))?;
        }

        let db = manager.get_connection();
        db.execute(db.get_database_backend().build(&insert)).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let names: Vec<&str> = DEFAULT_CATEGORIES.iter().map(|(name, _)| *name).collect();
        let delete = Query::delete()
            .from_table(ExpenseCategories::Table)
            .and_where(Expr::col(ExpenseCategories::Name).is_in(names))
            .to_owned();

        let db = manager.get_connection();
        db.execute(db.get_database_backend().build(&delete)).await?;

        Ok(())
    }
}
