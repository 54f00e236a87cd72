//! Member identity and the authoritative `cash_balance` counter.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    db::{Database, Error, FieldError},
    entity::{
        contribution,
        member::{self, MemberStatus},
    },
    ledger,
    period::Period,
    users::check_email,
};

/// Editable member fields, as submitted by an administrator.
#[derive(Clone, Debug, Deserialize)]
pub struct MemberAttrs {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default)]
    pub profile_photo: Option<String>,
}

impl MemberAttrs {
    fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "Name is required."));
        } else if self.name.chars().count() > 255 {
            errors.push(FieldError::new("name", "Name cannot exceed 255 characters."));
        }
        check_email(&self.email, &mut errors);
        if self.phone.trim().is_empty() {
            errors.push(FieldError::new("phone", "Phone number is required."));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

/// Moves a member's balance by `delta` and returns the new balance.
///
/// The only writer of `cash_balance`; the ledger calls it inside the same
/// transaction as the contribution write it accounts for.
pub(crate) async fn adjust_balance<C: ConnectionTrait>(
    conn: &C,
    member_id: i64,
    delta: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, Error> {
    let member = member::Entity::find_by_id(member_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found("member", member_id))?;

    let balance = member.cash_balance + delta;
    if balance < Decimal::ZERO {
        return Err(Error::InvalidState(format!(
            "balance of member {} would become negative ({})",
            member_id, balance
        )));
    }
    if delta.is_zero() {
        return Ok(balance);
    }

    // Incremented in SQL so concurrent adjustments cannot overwrite each other.
    member::Entity::update_many()
        .col_expr(
            member::Column::CashBalance,
            Expr::col(member::Column::CashBalance).add(delta),
        )
        .col_expr(member::Column::UpdatedAt, Expr::value(now))
        .filter(member::Column::Id.eq(member_id))
        .exec(conn)
        .await?;

    Ok(balance)
}

impl Database {
    /// Registers a member and generates their twelve contribution rows for the current year.
    pub async fn create_member(&self, attrs: MemberAttrs) -> Result<member::Model, Error> {
        attrs.validate()?;
        let now = self.now();

        let txn = self.begin().await?;
        let member = member::ActiveModel {
            id: NotSet,
            name: Set(attrs.name.trim().to_owned()),
            email: Set(attrs.email.trim().to_owned()),
            phone: Set(attrs.phone.trim().to_owned()),
            status: Set(attrs.status),
            cash_balance: Set(Decimal::ZERO),
            profile_photo: Set(attrs.profile_photo),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let year = Period::containing(&now).year;
        let rows = Period::months_of(year)
            .map(|period| (member.id, period))
            .collect();
        let generated = ledger::insert_unpaid_rows(&txn, rows, now).await?;
        txn.commit().await?;

        info!(member_id = member.id, year, generated, "Member created");
        Ok(member)
    }

    /// Updates identity and status. Never touches the balance.
    pub async fn update_member(
        &self,
        member_id: i64,
        attrs: MemberAttrs,
    ) -> Result<member::Model, Error> {
        attrs.validate()?;
        let existing = self.get_member(member_id).await?;

        let mut member: member::ActiveModel = existing.into();
        member.name = Set(attrs.name.trim().to_owned());
        member.email = Set(attrs.email.trim().to_owned());
        member.phone = Set(attrs.phone.trim().to_owned());
        member.status = Set(attrs.status);
        member.profile_photo = Set(attrs.profile_photo);
        member.updated_at = Set(self.now());

        Ok(member.update(&self.pool).await?)
    }

    /// Deletes a member together with every contribution row they own.
    pub async fn delete_member(&self, member_id: i64) -> Result<(), Error> {
        let txn = self.begin().await?;
        // Write first so the transaction never has to upgrade a read lock.
        let removed = contribution::Entity::delete_many()
            .filter(contribution::Column::MemberId.eq(member_id))
            .exec(&txn)
            .await?
            .rows_affected;
        let member = member::Entity::find_by_id(member_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::not_found("member", member_id))?;
        member::Entity::delete_by_id(member.id).exec(&txn).await?;
        txn.commit().await?;

        if !member.cash_balance.is_zero() {
            warn!(
                member_id,
                balance = %member.cash_balance,
                "Deleted member still held a balance"
            );
        }
        info!(member_id, removed, "Member deleted");
        Ok(())
    }

    pub async fn get_member(&self, member_id: i64) -> Result<member::Model, Error> {
        member::Entity::find_by_id(member_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("member", member_id))
    }

    /// All members, newest first.
    pub async fn list_members(&self) -> Result<Vec<member::Model>, Error> {
        Ok(member::Entity::find()
            .order_by_desc(member::Column::CreatedAt)
            .order_by_desc(member::Column::Id)
            .all(&self.pool)
            .await?)
    }

    pub async fn find_member_by_email(&self, email: &str) -> Result<Option<member::Model>, Error> {
        Ok(member::Entity::find()
            .filter(member::Column::Email.eq(email))
            .one(&self.pool)
            .await?)
    }

    pub async fn count_active_members(&self) -> Result<u64, Error> {
        Ok(member::Entity::find()
            .filter(member::Column::Status.eq(MemberStatus::Active))
            .count(&self.pool)
            .await?)
    }
}

pub(crate) async fn active_member_ids<C: ConnectionTrait>(conn: &C) -> Result<Vec<i64>, Error> {
    Ok(member::Entity::find()
        .select_only()
        .column(member::Column::Id)
        .filter(member::Column::Status.eq(MemberStatus::Active))
        .order_by_asc(member::Column::Id)
        .into_tuple::<i64>()
        .all(conn)
        .await?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        db::{testing::fresh_db, DEFAULT_DUES},
        entity::contribution::PaymentStatus,
    };

    pub fn attrs(name: &str) -> MemberAttrs {
        MemberAttrs {
            name: name.to_owned(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: "081234567890".to_owned(),
            status: MemberStatus::Active,
            profile_photo: None,
        }
    }

    async fn rows_of(db: &Database, member_id: i64) -> Vec<contribution::Model> {
        contribution::Entity::find()
            .filter(contribution::Column::MemberId.eq(member_id))
            .order_by_asc(contribution::Column::Month)
            .all(&db.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_generates_current_year() {
        let db = fresh_db().await;
        let member = db.create_member(attrs("Alice")).await.unwrap();

        assert_eq!(member.cash_balance, Decimal::ZERO);
        assert_eq!(member.status, MemberStatus::Active);

        let rows = rows_of(&db, member.id).await;
        assert_eq!(rows.len(), 12);
        for (idx, row) in rows.iter().enumerate() {
            assert_eq!(row.month, idx as i32 + 1);
            assert_eq!(row.year, 2024);
            assert_eq!(row.amount, DEFAULT_DUES);
            assert_eq!(row.status, PaymentStatus::Unpaid);
            assert!(row.paid_at.is_none());
        }
    }

    #[tokio::test]
    async fn create_rejects_bad_input_without_writing() {
        let db = fresh_db().await;
        let mut bad = attrs("Bob");
        bad.email = "not-an-email".to_owned();
        bad.phone = String::new();

        let err = db.create_member(bad).await.unwrap_err();
        match err {
            Error::Validation(fields) => {
                let names: Vec<_> = fields.iter().map(|f| f.field).collect();
                assert_eq!(names, ["email", "phone"]);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(db.list_members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_leaves_no_orphan_rows() {
        let db = fresh_db().await;
        db.create_member(attrs("Carol")).await.unwrap();

        let err = db.create_member(attrs("Carol")).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)), "got {err}");

        let total = contribution::Entity::find().count(&db.pool).await.unwrap();
        assert_eq!(total, 12);
    }

    #[tokio::test]
    async fn update_keeps_balance() {
        let db = fresh_db().await;
        let member = db.create_member(attrs("Dan")).await.unwrap();
        adjust_balance(&db.pool, member.id, Decimal::from(500), db.now())
            .await
            .unwrap();

        let mut changed = attrs("Dan");
        changed.status = MemberStatus::Inactive;
        changed.phone = "0800".to_owned();
        let updated = db.update_member(member.id, changed).await.unwrap();

        assert_eq!(updated.status, MemberStatus::Inactive);
        assert_eq!(updated.phone, "0800");
        assert_eq!(updated.cash_balance, Decimal::from(500));
    }

    #[tokio::test]
    async fn delete_cascades_to_own_rows_only() {
        let db = fresh_db().await;
        let gone = db.create_member(attrs("Erin")).await.unwrap();
        let kept = db.create_member(attrs("Frank")).await.unwrap();
        adjust_balance(&db.pool, kept.id, Decimal::from(30000), db.now())
            .await
            .unwrap();

        db.delete_member(gone.id).await.unwrap();

        assert!(rows_of(&db, gone.id).await.is_empty());
        assert_eq!(rows_of(&db, kept.id).await.len(), 12);
        assert_eq!(
            db.get_member(kept.id).await.unwrap().cash_balance,
            Decimal::from(30000)
        );
        assert!(matches!(
            db.delete_member(gone.id).await,
            Err(Error::NotFound { entity: "member", .. })
        ));
    }

    #[tokio::test]
    async fn balance_never_goes_negative() {
        let db = fresh_db().await;
        let member = db.create_member(attrs("Gina")).await.unwrap();

        let err = adjust_balance(&db.pool, member.id, Decimal::from(-1), db.now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(
            db.get_member(member.id).await.unwrap().cash_balance,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn counts_only_active_members() {
        let db = fresh_db().await;
        db.create_member(attrs("Hank")).await.unwrap();
        let mut inactive = attrs("Ivy");
        inactive.status = MemberStatus::Inactive;
        db.create_member(inactive).await.unwrap();

        assert_eq!(db.count_active_members().await.unwrap(), 1);
        assert_eq!(active_member_ids(&db.pool).await.unwrap().len(), 1);
    }
}
