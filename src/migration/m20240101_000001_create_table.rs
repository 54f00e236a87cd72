use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Name).string().not_null())
                    .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                    .col(ColumnDef::new(Users::Role).string().not_null())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Members::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Members::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Members::Name).string().not_null())
                    .col(
                        ColumnDef::new(Members::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Members::Phone).string().not_null())
                    .col(
                        ColumnDef::new(Members::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Members::CashBalance)
                            .decimal_len(15, 2)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Members::ProfilePhoto).string())
                    .col(
                        ColumnDef::new(Members::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Members::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Contributions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Contributions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Contributions::MemberId).integer().not_null())
                    .col(ColumnDef::new(Contributions::Month).integer().not_null())
                    .col(ColumnDef::new(Contributions::Year).integer().not_null())
                    .col(
                        ColumnDef::new(Contributions::Amount)
                            .decimal_len(15, 2)
                            .not_null()
                            .default(30000),
                    )
                    .col(
                        ColumnDef::new(Contributions::Status)
                            .string()
                            .not_null()
                            .default("unpaid"),
                    )
                    .col(ColumnDef::new(Contributions::PaidAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Contributions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Contributions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-contributions-member_id")
                            .from(Contributions::Table, Contributions::MemberId)
                            .to(Members::Table, Members::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Backstop for idempotent row generation: inserts conflict on this key.
        manager
            .create_index(
                Index::create()
                    .name("idx-contributions-member-period")
                    .table(Contributions::Table)
                    .col(Contributions::MemberId)
                    .col(Contributions::Month)
                    .col(Contributions::Year)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-contributions-period")
                    .table(Contributions::Table)
                    .col(Contributions::Month)
                    .col(Contributions::Year)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-contributions-status")
                    .table(Contributions::Table)
                    .col(Contributions::Status)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-contributions-paid_at")
                    .table(Contributions::Table)
                    .col(Contributions::PaidAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ExpenseCategories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExpenseCategories::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExpenseCategories::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ExpenseCategories::Description)
                            .string()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Expenses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Expenses::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Expenses::ExpenseDate).date().not_null())
                    .col(
                        ColumnDef::new(Expenses::ExpenseCategoryId)
                            .integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-expenses-expense_category_id")
                            .from(Expenses::Table, Expenses::ExpenseCategoryId)
                            .to(ExpenseCategories::Table, ExpenseCategories::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .col(
                        ColumnDef::new(Expenses::Amount)
                            .decimal_len(15, 2)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Expenses::Description).text().not_null())
                    .col(ColumnDef::new(Expenses::UserId).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-expenses-user_id")
                            .from(Expenses::Table, Expenses::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .col(
                        ColumnDef::new(Expenses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Expenses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-expenses-expense_date")
                    .table(Expenses::Table)
                    .col(Expenses::ExpenseDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Notifications::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Notifications::Title).string().not_null())
                    .col(ColumnDef::new(Notifications::Message).text().not_null())
                    .col(ColumnDef::new(Notifications::Type).string().not_null())
                    .col(ColumnDef::new(Notifications::RecipientIds).json().not_null())
                    .col(ColumnDef::new(Notifications::SentAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Notifications::UserId).integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-notifications-user_id")
                            .from(Notifications::Table, Notifications::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .col(
                        ColumnDef::new(Notifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Notifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-notifications-type")
                    .table(Notifications::Table)
                    .col(Notifications::Type)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-notifications-sent_at")
                    .table(Notifications::Table)
                    .col(Notifications::SentAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Expenses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ExpenseCategories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Contributions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Members::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Name,
    Email,
    Role,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Members {
    Table,
    Id,
    Name,
    Email,
    Phone,
    Status,
    CashBalance,
    ProfilePhoto,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Contributions {
    Table,
    Id,
    MemberId,
    Month,
    Year,
    Amount,
    Status,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(super) enum ExpenseCategories {
    Table,
    Id,
    Name,
    Description,
}

#[derive(DeriveIden)]
enum Expenses {
    Table,
    Id,
    ExpenseDate,
    ExpenseCategoryId,
    Amount,
    Description,
    UserId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Notifications {
    Table,
    Id,
    Title,
    Message,
    Type,
    RecipientIds,
    SentAt,
    UserId,
    CreatedAt,
    UpdatedAt,
}
