//! Read-only rollups over both ledgers.

use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, Expr, Func, SimpleExpr},
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Select,
};
use serde::Serialize;

use crate::{
    db::{Database, Error},
    entity::{
        contribution::{self, PaymentStatus},
        expense, member,
    },
    ledger::in_period,
    period::Period,
};

/// Income and spending of one period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub period: Period,
    pub label: String,
    pub income: Decimal,
    pub expenses: Decimal,
}

/// `SUM(column)` read back as REAL, NULL over no rows.
fn sum_of<C: ColumnTrait>(column: C) -> SimpleExpr {
    Func::cast_as(Func::sum(Expr::col(column)), Alias::new("REAL")).into()
}

impl Database {
    async fn sum_column<E, C>(&self, query: Select<E>, column: C) -> Result<Decimal, Error>
    where
        E: EntityTrait,
        C: ColumnTrait,
    {
        let total = query
            .select_only()
            .column_as(sum_of(column), "total")
            .into_tuple::<Option<Decimal>>()
            .one(&self.pool)
            .await?;
        Ok(total.flatten().unwrap_or_default())
    }

    /// Sum of every member's balance.
    pub async fn total_cash(&self) -> Result<Decimal, Error> {
        self.sum_column(member::Entity::find(), member::Column::CashBalance)
            .await
    }

    /// Sum of paid contribution amounts for `period`.
    pub async fn monthly_income(&self, period: Period) -> Result<Decimal, Error> {
        let paid = contribution::Entity::find()
            .filter(in_period(period))
            .filter(contribution::Column::Status.eq(PaymentStatus::Paid));
        self.sum_column(paid, contribution::Column::Amount).await
    }

    /// Sum of expenses dated inside `period`.
    pub async fn monthly_expense(&self, period: Period) -> Result<Decimal, Error> {
        let (start, end) = period.date_range();
        let dated = expense::Entity::find()
            .filter(expense::Column::ExpenseDate.gte(start))
            .filter(expense::Column::ExpenseDate.lt(end));
        self.sum_column(dated, expense::Column::Amount).await
    }

    /// Number of unpaid contribution rows for `period`.
    pub async fn members_in_arrears(&self, period: Period) -> Result<u64, Error> {
        Ok(contribution::Entity::find()
            .filter(in_period(period))
            .filter(contribution::Column::Status.eq(PaymentStatus::Unpaid))
            .count(&self.pool)
            .await?)
    }

    pub async fn summarize(&self, period: Period) -> Result<PeriodSummary, Error> {
        Ok(PeriodSummary {
            period,
            label: period.label(),
            income: self.monthly_income(period).await?,
            expenses: self.monthly_expense(period).await?,
        })
    }

    /// The last `months` periods ending with the current one, walking backward.
    pub fn trend_periods(&self, months: usize) -> impl Iterator<Item = Period> + Clone {
        self.current_period().walk_back().take(months)
    }

    /// Summaries for the last `months` periods, oldest first. Computed fresh on every call.
    pub async fn trend(&self, months: usize) -> Result<Vec<PeriodSummary>, Error> {
        let mut summaries = Vec::with_capacity(months);
        for period in self.trend_periods(months) {
            summaries.push(self.summarize(period).await?);
        }
        summaries.reverse();
        Ok(summaries)
    }
}
