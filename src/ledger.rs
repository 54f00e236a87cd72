//! Monthly contribution rows and the paid/unpaid transitions that feed member balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait,
    DatabaseTransaction, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    db::{check_amount, Database, Error, DEFAULT_DUES},
    entity::{
        contribution::{self, PaymentStatus},
        member,
    },
    period::Period,
    registry::{active_member_ids, adjust_balance},
};

/// A contribution row together with the member who owes it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub contribution: contribution::Model,
    pub member: member::Model,
}

fn into_entries(rows: Vec<(contribution::Model, Option<member::Model>)>) -> Vec<LedgerEntry> {
    rows.into_iter()
        .filter_map(|(contribution, member)| match member {
            Some(member) => Some(LedgerEntry {
                contribution,
                member,
            }),
            None => {
                warn!(
                    contribution_id = contribution.id,
                    member_id = contribution.member_id,
                    "Contribution row without a member"
                );
                None
            }
        })
        .collect()
}

pub(crate) fn in_period(period: Period) -> Condition {
    Condition::all()
        .add(contribution::Column::Month.eq(period.month_column()))
        .add(contribution::Column::Year.eq(period.year))
}

/// Inserts an unpaid, default-amount row for each `(member, period)` pair that has none yet.
///
/// Pairs that already have a row are skipped by the unique key, so racing callers
/// cannot create duplicates. Returns how many rows were inserted.
pub(crate) async fn insert_unpaid_rows<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<(i64, Period)>,
    now: DateTime<Utc>,
) -> Result<u64, Error> {
    if rows.is_empty() {
        return Ok(0);
    }

    let models = rows
        .into_iter()
        .map(|(member_id, period)| contribution::ActiveModel {
            id: NotSet,
            member_id: Set(member_id),
            month: Set(period.month_column()),
            year: Set(period.year),
            amount: Set(DEFAULT_DUES),
            status: Set(PaymentStatus::Unpaid),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        });

    let inserted = contribution::Entity::insert_many(models)
        .on_conflict(
            OnConflict::columns([
                contribution::Column::MemberId,
                contribution::Column::Month,
                contribution::Column::Year,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await;

    match inserted {
        Ok(count) => Ok(count),
        Err(DbErr::RecordNotInserted) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

/// Opens the write on a contribution row and returns it.
///
/// Writing before reading keeps the transaction from holding a read lock it would
/// later have to upgrade, which SQLite refuses while another writer is active.
async fn claim_row(
    txn: &DatabaseTransaction,
    contribution_id: i64,
    now: DateTime<Utc>,
) -> Result<contribution::Model, Error> {
    let touched = contribution::Entity::update_many()
        .col_expr(contribution::Column::UpdatedAt, Expr::value(now))
        .filter(contribution::Column::Id.eq(contribution_id))
        .exec(txn)
        .await?
        .rows_affected;
    if touched == 0 {
        return Err(Error::not_found("contribution", contribution_id));
    }

    contribution::Entity::find_by_id(contribution_id)
        .one(txn)
        .await?
        .ok_or_else(|| Error::not_found("contribution", contribution_id))
}

impl Database {
    /// Generates one unpaid row per active member if `period` has no rows at all.
    ///
    /// A period that already has any row is left alone, so members who joined after
    /// it was first generated are not backfilled here. The insert is one statement
    /// whose conflicts are skipped, so racing callers generate each row once.
    pub async fn ensure_rows_for(&self, period: Period) -> Result<u64, Error> {
        let existing = contribution::Entity::find()
            .filter(in_period(period))
            .count(&self.pool)
            .await?;
        if existing > 0 {
            return Ok(0);
        }

        let rows = active_member_ids(&self.pool)
            .await?
            .into_iter()
            .map(|member_id| (member_id, period))
            .collect();
        let inserted = insert_unpaid_rows(&self.pool, rows, self.now()).await?;

        if inserted > 0 {
            info!(%period, inserted, "Generated contribution rows");
        }
        Ok(inserted)
    }

    /// Marks a contribution paid with `amount`.
    ///
    /// An unpaid row adds the whole amount to the member's balance. Recording again on a
    /// paid row is a correction: the balance moves by the difference only.
    pub async fn record_payment(
        &self,
        contribution_id: i64,
        amount: Decimal,
    ) -> Result<contribution::Model, Error> {
        check_amount(amount)?;
        let now = self.now();
        let txn = self.begin().await?;
        let current = claim_row(&txn, contribution_id, now).await?;
        let correction = current.status == PaymentStatus::Paid;
        let delta = amount - current.paid_value();

        let mut row: contribution::ActiveModel = current.into();
        row.amount = Set(amount);
        row.status = Set(PaymentStatus::Paid);
        row.paid_at = Set(Some(now));
        row.updated_at = Set(now);
        let updated = row.update(&txn).await?;

        let balance = adjust_balance(&txn, updated.member_id, delta, now).await?;
        txn.commit().await?;

        info!(
            contribution_id,
            member_id = updated.member_id,
            %amount,
            %delta,
            %balance,
            correction,
            "Payment recorded"
        );
        Ok(updated)
    }

    /// Admin correction of amount and status.
    ///
    /// The balance moves by what the row contributes after the change minus what it
    /// contributed before, so reverting a payment to unpaid takes its amount back out.
    pub async fn correct_amount(
        &self,
        contribution_id: i64,
        new_amount: Decimal,
        new_status: PaymentStatus,
    ) -> Result<contribution::Model, Error> {
        check_amount(new_amount)?;
        let now = self.now();
        let txn = self.begin().await?;
        let current = claim_row(&txn, contribution_id, now).await?;
        let old_status = current.status;
        let before = current.paid_value();
        let paid_at = match (old_status, new_status) {
            (_, PaymentStatus::Unpaid) => None,
            (PaymentStatus::Paid, PaymentStatus::Paid) => current.paid_at.or(Some(now)),
            (PaymentStatus::Unpaid, PaymentStatus::Paid) => Some(now),
        };

        let mut row: contribution::ActiveModel = current.into();
        row.amount = Set(new_amount);
        row.status = Set(new_status);
        row.paid_at = Set(paid_at);
        row.updated_at = Set(now);
        let updated = row.update(&txn).await?;

        let delta = updated.paid_value() - before;
        let balance = adjust_balance(&txn, updated.member_id, delta, now).await?;
        txn.commit().await?;

        info!(
            contribution_id,
            member_id = updated.member_id,
            from = ?old_status,
            to = ?new_status,
            %delta,
            %balance,
            "Contribution corrected"
        );
        Ok(updated)
    }

    /// Every row of `period` ordered by member, generating the period first if it is empty.
    pub async fn list_for(&self, period: Period) -> Result<Vec<LedgerEntry>, Error> {
        let rows = self.period_entries(period).await?;
        if !rows.is_empty() {
            return Ok(rows);
        }

        self.ensure_rows_for(period).await?;
        self.period_entries(period).await
    }

    async fn period_entries(&self, period: Period) -> Result<Vec<LedgerEntry>, Error> {
        let rows = contribution::Entity::find()
            .find_also_related(member::Entity)
            .filter(in_period(period))
            .order_by_asc(contribution::Column::MemberId)
            .all(&self.pool)
            .await?;
        Ok(into_entries(rows))
    }

    /// One member's rows, latest period first.
    pub async fn list_history_for(
        &self,
        member_id: i64,
        limit: u64,
    ) -> Result<Vec<contribution::Model>, Error> {
        self.member_history(member_id, Some(limit)).await
    }

    /// Every row a member owns, latest period first.
    pub async fn member_contributions(
        &self,
        member_id: i64,
    ) -> Result<Vec<contribution::Model>, Error> {
        self.member_history(member_id, None).await
    }

    async fn member_history(
        &self,
        member_id: i64,
        limit: Option<u64>,
    ) -> Result<Vec<contribution::Model>, Error> {
        self.get_member(member_id).await?;
        let mut query = contribution::Entity::find()
            .filter(contribution::Column::MemberId.eq(member_id))
            .order_by_desc(contribution::Column::Year)
            .order_by_desc(contribution::Column::Month);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        Ok(query.all(&self.pool).await?)
    }

    pub async fn get_contribution(&self, contribution_id: i64) -> Result<LedgerEntry, Error> {
        let row = contribution::Entity::find_by_id(contribution_id)
            .find_also_related(member::Entity)
            .one(&self.pool)
            .await?;
        row.and_then(|row| into_entries(vec![row]).pop())
            .ok_or_else(|| Error::not_found("contribution", contribution_id))
    }

    /// The member's row for `period`, if one was generated.
    pub async fn contribution_for(
        &self,
        member_id: i64,
        period: Period,
    ) -> Result<Option<contribution::Model>, Error> {
        Ok(contribution::Entity::find()
            .filter(contribution::Column::MemberId.eq(member_id))
            .filter(in_period(period))
            .one(&self.pool)
            .await?)
    }

    /// Latest payments across all members.
    pub async fn recent_payments(&self, limit: u64) -> Result<Vec<LedgerEntry>, Error> {
        let rows = contribution::Entity::find()
            .find_also_related(member::Entity)
            .filter(contribution::Column::Status.eq(PaymentStatus::Paid))
            .order_by_desc(contribution::Column::PaidAt)
            .limit(limit)
            .all(&self.pool)
            .await?;
        Ok(into_entries(rows))
    }
}
