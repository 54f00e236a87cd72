use anyhow::Context;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    dashboard::{assemble_dashboard, Actor, Dashboard},
    db::{self, Database},
    entity::{
        contribution::{self, PaymentStatus},
        expense, expense_category, member, notification,
        user::Role,
    },
    expenses::{ExpenseEntry, ExpenseInput},
    ledger::LedgerEntry,
    notifications::NotificationInput,
    period::Period,
    registry::MemberAttrs,
};

const MEMBER_HISTORY_LIMIT: u64 = 12;

/// The actor's role does not allow the requested action.
#[derive(Debug)]
pub struct AccessDenied {
    pub required: Role,
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "This action requires the {:?} role", self.required)
    }
}

impl std::error::Error for AccessDenied {}

#[derive(Clone, Debug, Serialize)]
pub struct MemberDetail {
    #[serde(flatten)]
    pub member: member::Model,
    pub contributions: Vec<contribution::Model>,
}

/// Listing of one dues period.
#[derive(Clone, Debug, Serialize)]
pub struct PeriodListing {
    pub period: Period,
    pub contributions: Vec<LedgerEntry>,
}

pub struct Controller<'a> {
    pub db: &'a db::Database,
    pub actor: &'a Actor,
}

impl<'a> Controller<'a> {
    pub fn new(db: &'a Database, actor: &'a Actor) -> Self {
        Self { db, actor }
    }

    fn require(&self, role: Role) -> anyhow::Result<()> {
        if self.actor.role == role {
            Ok(())
        } else {
            tracing::warn!(
                user_id = self.actor.user_id,
                role = ?self.actor.role,
                required = ?role,
                "Access denied"
            );
            Err(AccessDenied { required: role }.into())
        }
    }

    pub async fn dashboard(&self) -> anyhow::Result<Dashboard> {
        assemble_dashboard(self.db, self.actor)
            .await
            .context("Assembling dashboard failed")
    }

    /// The calling member's last twelve contribution rows.
    pub async fn payment_history(&self) -> anyhow::Result<Vec<contribution::Model>> {
        self.require(Role::Member)?;
        let member = self
            .db
            .find_member_by_email(&self.actor.email)
            .await
            .context("Looking up member profile failed")?
            .ok_or(db::Error::NotFound {
                entity: "member profile",
                id: self.actor.user_id,
            })?;
        self.db
            .list_history_for(member.id, MEMBER_HISTORY_LIMIT)
            .await
            .context("Retrieving payment history failed")
    }

    // ----- Members

    pub async fn list_members(&self) -> anyhow::Result<Vec<member::Model>> {
        self.require(Role::Admin)?;
        self.db
            .list_members()
            .await
            .context("Retrieving members failed")
    }

    pub async fn create_member(&self, attrs: MemberAttrs) -> anyhow::Result<member::Model> {
        self.require(Role::Admin)?;
        self.db
            .create_member(attrs)
            .await
            .context("Member creation failed")
    }

    pub async fn show_member(&self, member_id: i64) -> anyhow::Result<MemberDetail> {
        self.require(Role::Admin)?;
        let member = self
            .db
            .get_member(member_id)
            .await
            .context("Retrieving member failed")?;
        let contributions = self
            .db
            .member_contributions(member_id)
            .await
            .context("Retrieving member contributions failed")?;
        Ok(MemberDetail {
            member,
            contributions,
        })
    }

    pub async fn update_member(
        &self,
        member_id: i64,
        attrs: MemberAttrs,
    ) -> anyhow::Result<member::Model> {
        self.require(Role::Admin)?;
        self.db
            .update_member(member_id, attrs)
            .await
            .with_context(|| format!("Updating member {member_id} failed"))
    }

    pub async fn delete_member(&self, member_id: i64) -> anyhow::Result<()> {
        self.require(Role::Admin)?;
        self.db
            .delete_member(member_id)
            .await
            .with_context(|| format!("Deleting member {member_id} failed"))
    }

    // ----- Contributions

    /// Rows of the requested period, defaulting to the current one.
    pub async fn list_contributions(
        &self,
        month: Option<u32>,
        year: Option<i32>,
    ) -> anyhow::Result<PeriodListing> {
        self.require(Role::Admin)?;
        let current = self.db.current_period();
        let period = Period::new(month.unwrap_or(current.month), year.unwrap_or(current.year))?;
        let contributions = self
            .db
            .list_for(period)
            .await
            .with_context(|| format!("Listing contributions for {period} failed"))?;
        Ok(PeriodListing {
            period,
            contributions,
        })
    }

    pub async fn record_payment(
        &self,
        contribution_id: i64,
        amount: Decimal,
    ) -> anyhow::Result<contribution::Model> {
        self.require(Role::Admin)?;
        self.db
            .record_payment(contribution_id, amount)
            .await
            .context("Recording payment failed")
    }

    pub async fn show_contribution(&self, contribution_id: i64) -> anyhow::Result<LedgerEntry> {
        self.require(Role::Admin)?;
        self.db
            .get_contribution(contribution_id)
            .await
            .context("Retrieving contribution failed")
    }

    pub async fn correct_contribution(
        &self,
        contribution_id: i64,
        amount: Decimal,
        status: PaymentStatus,
    ) -> anyhow::Result<contribution::Model> {
        self.require(Role::Admin)?;
        self.db
            .correct_amount(contribution_id, amount, status)
            .await
            .context("Correcting contribution failed")
    }

    // ----- Expenses

    pub async fn list_expenses(&self) -> anyhow::Result<Vec<ExpenseEntry>> {
        self.require(Role::Admin)?;
        self.db
            .list_expenses()
            .await
            .context("Retrieving expenses failed")
    }

    pub async fn add_expense(&self, input: ExpenseInput) -> anyhow::Result<expense::Model> {
        self.require(Role::Admin)?;
        self.db
            .create_expense(input, self.actor.user_id)
            .await
            .context("Expense insertion failed")
    }

    pub async fn show_expense(&self, expense_id: i64) -> anyhow::Result<ExpenseEntry> {
        self.require(Role::Admin)?;
        self.db
            .get_expense(expense_id)
            .await
            .context("Retrieving expense failed")
    }

    pub async fn update_expense(
        &self,
        expense_id: i64,
        input: ExpenseInput,
    ) -> anyhow::Result<expense::Model> {
        self.require(Role::Admin)?;
        self.db
            .update_expense(expense_id, input)
            .await
            .with_context(|| format!("Updating expense {expense_id} failed"))
    }

    pub async fn delete_expense(&self, expense_id: i64) -> anyhow::Result<()> {
        self.require(Role::Admin)?;
        self.db
            .delete_expense(expense_id)
            .await
            .with_context(|| format!("Deleting expense {expense_id} failed"))
    }

    pub async fn list_categories(&self) -> anyhow::Result<Vec<expense_category::Model>> {
        self.require(Role::Admin)?;
        self.db
            .list_categories()
            .await
            .context("Retrieving expense categories failed")
    }

    pub async fn create_category(
        &self,
        name: &str,
        description: &str,
    ) -> anyhow::Result<expense_category::Model> {
        self.require(Role::Admin)?;
        self.db
            .create_category(name, description)
            .await
            .context("Expense category creation failed")
    }

    // ----- Notifications

    pub async fn list_notifications(&self) -> anyhow::Result<Vec<notification::Model>> {
        self.require(Role::Admin)?;
        self.db
            .list_notifications()
            .await
            .context("Retrieving notifications failed")
    }

    pub async fn create_notification(
        &self,
        input: NotificationInput,
    ) -> anyhow::Result<notification::Model> {
        self.require(Role::Admin)?;
        self.db
            .create_notification(input, self.actor.user_id)
            .await
            .context("Notification creation failed")
    }

    pub async fn mark_notification_sent(
        &self,
        notification_id: i64,
    ) -> anyhow::Result<notification::Model> {
        self.require(Role::Admin)?;
        self.db
            .mark_notification_sent(notification_id)
            .await
            .context("Marking notification sent failed")
    }
}
