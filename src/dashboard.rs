use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    db::{Database, Error},
    entity::{contribution, member, user::Role},
    expenses::ExpenseEntry,
    ledger::LedgerEntry,
    reporting::PeriodSummary,
};

const RECENT_LIMIT: u64 = 5;
const HISTORY_LIMIT: u64 = 12;
const TREND_MONTHS: usize = 6;

/// The authenticated caller, as vouched for by the auth layer in front of us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdminStats {
    pub total_cash: Decimal,
    pub active_members: u64,
    pub monthly_income: Decimal,
    pub monthly_expenses: Decimal,
    pub members_in_arrears: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdminDashboard {
    pub stats: AdminStats,
    pub recent_contributions: Vec<LedgerEntry>,
    pub recent_expenses: Vec<ExpenseEntry>,
    pub chart: Vec<PeriodSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberDashboard {
    pub member: member::Model,
    pub current_contribution: Option<contribution::Model>,
    pub total_cash: Decimal,
    pub recent_expenses: Vec<ExpenseEntry>,
    pub payment_history: Vec<contribution::Model>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Dashboard {
    Admin(AdminDashboard),
    Member(MemberDashboard),
    /// A member-role user whose email matches no member record.
    MissingProfile { error: String },
}

pub async fn assemble_dashboard(db: &Database, actor: &Actor) -> Result<Dashboard, Error> {
    match actor.role {
        Role::Admin => admin_dashboard(db).await.map(Dashboard::Admin),
        Role::Member => member_dashboard(db, &actor.email).await,
    }
}

async fn admin_dashboard(db: &Database) -> Result<AdminDashboard, Error> {
    let period = db.current_period();
    let stats = AdminStats {
        total_cash: db.total_cash().await?,
        active_members: db.count_active_members().await?,
        monthly_income: db.monthly_income(period).await?,
        monthly_expenses: db.monthly_expense(period).await?,
        members_in_arrears: db.members_in_arrears(period).await?,
    };

    Ok(AdminDashboard {
        stats,
        recent_contributions: db.recent_payments(RECENT_LIMIT).await?,
        recent_expenses: db.recent_expenses(RECENT_LIMIT).await?,
        chart: db.trend(TREND_MONTHS).await?,
    })
}

async fn member_dashboard(db: &Database, email: &str) -> Result<Dashboard, Error> {
    let Some(member) = db.find_member_by_email(email).await? else {
        return Ok(Dashboard::MissingProfile {
            error: "Member profile not found. Please contact administrator.".to_owned(),
        });
    };

    Ok(Dashboard::Member(MemberDashboard {
        current_contribution: db.contribution_for(member.id, db.current_period()).await?,
        total_cash: db.total_cash().await?,
        recent_expenses: db.recent_expenses(RECENT_LIMIT).await?,
        payment_history: db.list_history_for(member.id, HISTORY_LIMIT).await?,
        member,
    }))
}
