use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    db::{check_amount, Database, Error, FieldError},
    entity::{expense, expense_category},
    period::Period,
};

const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Clone, Debug, Deserialize)]
pub struct ExpenseInput {
    pub expense_date: NaiveDate,
    pub expense_category_id: i64,
    pub amount: Decimal,
    pub description: String,
}

impl ExpenseInput {
    fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        if let Err(Error::Validation(amount_errors)) = check_amount(self.amount) {
            errors.extend(amount_errors);
        }
        let description = self.description.trim();
        if description.is_empty() {
            errors.push(FieldError::new("description", "Description is required."));
        } else if description.chars().count() > MAX_DESCRIPTION_CHARS {
            errors.push(FieldError::new(
                "description",
                "Description cannot exceed 1000 characters.",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

/// An expense with its category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseEntry {
    #[serde(flatten)]
    pub expense: expense::Model,
    pub category: Option<expense_category::Model>,
}

impl From<(expense::Model, Option<expense_category::Model>)> for ExpenseEntry {
    fn from((expense, category): (expense::Model, Option<expense_category::Model>)) -> Self {
        Self { expense, category }
    }
}

impl Database {
    pub async fn list_categories(&self) -> Result<Vec<expense_category::Model>, Error> {
        Ok(expense_category::Entity::find()
            .order_by_asc(expense_category::Column::Name)
            .all(&self.pool)
            .await?)
    }

    pub async fn create_category(
        &self,
        name: &str,
        description: &str,
    ) -> Result<expense_category::Model, Error> {
        if name.trim().is_empty() {
            return Err(Error::invalid("name", "Category name is required."));
        }
        let category = expense_category::ActiveModel {
            id: NotSet,
            name: Set(name.trim().to_owned()),
            description: Set(description.trim().to_owned()),
        }
        .insert(&self.pool)
        .await?;

        info!(category_id = category.id, name = %category.name, "Expense category created");
        Ok(category)
    }

    async fn check_category(&self, category_id: i64) -> Result<(), Error> {
        expense_category::Entity::find_by_id(category_id)
            .one(&self.pool)
            .await?
            .map(|_| ())
            .ok_or_else(|| Error::not_found("expense category", category_id))
    }

    /// Records an expense on behalf of `user_id`.
    pub async fn create_expense(
        &self,
        input: ExpenseInput,
        user_id: i64,
    ) -> Result<expense::Model, Error> {
        input.validate()?;
        self.check_category(input.expense_category_id).await?;
        self.get_user(user_id).await?;

        let now = self.now();
        let expense = expense::ActiveModel {
            id: NotSet,
            expense_date: Set(input.expense_date),
            expense_category_id: Set(input.expense_category_id),
            amount: Set(input.amount),
            description: Set(input.description.trim().to_owned()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.pool)
        .await?;

        info!(
            expense_id = expense.id,
            user_id,
            amount = %expense.amount,
            date = %expense.expense_date,
            "Expense recorded"
        );
        Ok(expense)
    }

    pub async fn get_expense(&self, expense_id: i64) -> Result<ExpenseEntry, Error> {
        expense::Entity::find_by_id(expense_id)
            .find_also_related(expense_category::Entity)
            .one(&self.pool)
            .await?
            .map(ExpenseEntry::from)
            .ok_or_else(|| Error::not_found("expense", expense_id))
    }

    /// All expenses, latest expense date first.
    pub async fn list_expenses(&self) -> Result<Vec<ExpenseEntry>, Error> {
        self.latest_expenses(None).await
    }

    pub async fn recent_expenses(&self, limit: u64) -> Result<Vec<ExpenseEntry>, Error> {
        self.latest_expenses(Some(limit)).await
    }

    async fn latest_expenses(&self, limit: Option<u64>) -> Result<Vec<ExpenseEntry>, Error> {
        let mut query = expense::Entity::find()
            .find_also_related(expense_category::Entity)
            .order_by_desc(expense::Column::ExpenseDate)
            .order_by_desc(expense::Column::Id);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        let rows = query.all(&self.pool).await?;
        Ok(rows.into_iter().map(ExpenseEntry::from).collect())
    }

    /// Expenses dated inside `period`.
    pub async fn expenses_in(&self, period: Period) -> Result<Vec<expense::Model>, Error> {
        let (start, end) = period.date_range();
        Ok(expense::Entity::find()
            .filter(expense::Column::ExpenseDate.gte(start))
            .filter(expense::Column::ExpenseDate.lt(end))
            .all(&self.pool)
            .await?)
    }

    pub async fn update_expense(
        &self,
        expense_id: i64,
        input: ExpenseInput,
    ) -> Result<expense::Model, Error> {
        input.validate()?;
        let existing = expense::Entity::find_by_id(expense_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("expense", expense_id))?;
        self.check_category(input.expense_category_id).await?;

        let mut expense: expense::ActiveModel = existing.into();
        expense.expense_date = Set(input.expense_date);
        expense.expense_category_id = Set(input.expense_category_id);
        expense.amount = Set(input.amount);
        expense.description = Set(input.description.trim().to_owned());
        expense.updated_at = Set(self.now());

        Ok(expense.update(&self.pool).await?)
    }

    pub async fn delete_expense(&self, expense_id: i64) -> Result<(), Error> {
        let deleted = expense::Entity::delete_by_id(expense_id)
            .exec(&self.pool)
            .await?
            .rows_affected;
        if deleted == 0 {
            return Err(Error::not_found("expense", expense_id));
        }
        info!(expense_id, "Expense deleted");
        Ok(())
    }
}
