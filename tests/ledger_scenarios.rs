use std::sync::Arc;

use chrono::{TimeZone, Utc};
use dues_ledger::{
    clock::FixedClock,
    db::{Database, Error, DEFAULT_DUES},
    entity::{
        contribution::PaymentStatus,
        member::{self, MemberStatus},
    },
    period::Period,
    registry::MemberAttrs,
};
use rust_decimal::Decimal;
use tokio::task::JoinSet;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap(),
    ))
}

async fn ledger() -> Database {
    let db = Database::connect("sqlite::memory:", clock()).await.unwrap();
    db.apply_migrations().await.unwrap();
    db
}

async fn member(db: &Database, name: &str, status: MemberStatus) -> member::Model {
    db.create_member(MemberAttrs {
        name: name.to_owned(),
        email: format!("{}@example.org", name.to_lowercase()),
        phone: "+62 811 0000 000".to_owned(),
        status,
        profile_photo: None,
    })
    .await
    .unwrap()
}

fn period(month: u32, year: i32) -> Period {
    Period::new(month, year).unwrap()
}

#[tokio::test]
async fn payment_then_correction() {
    let db = ledger().await;
    let m = member(&db, "Budi", MemberStatus::Active).await;
    member(&db, "Sari", MemberStatus::Active).await;
    member(&db, "Tono", MemberStatus::Active).await;

    let row = db
        .contribution_for(m.id, period(3, 2024))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.amount, DEFAULT_DUES);
    assert_eq!(row.status, PaymentStatus::Unpaid);

    let paid = db.record_payment(row.id, Decimal::from(30000)).await.unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert!(paid.paid_at.is_some());
    assert_eq!(
        db.get_member(m.id).await.unwrap().cash_balance,
        Decimal::from(30000)
    );

    let corrected = db
        .correct_amount(row.id, Decimal::from(25000), PaymentStatus::Paid)
        .await
        .unwrap();
    assert_eq!(corrected.status, PaymentStatus::Paid);
    assert_eq!(
        db.get_member(m.id).await.unwrap().cash_balance,
        Decimal::from(25000)
    );

    assert_eq!(
        db.monthly_income(period(3, 2024)).await.unwrap(),
        Decimal::from(25000)
    );
    assert_eq!(db.members_in_arrears(period(3, 2024)).await.unwrap(), 2);
}

#[tokio::test]
async fn balance_tracks_paid_amounts() {
    let db = ledger().await;
    let m = member(&db, "Budi", MemberStatus::Active).await;
    let rows = db.member_contributions(m.id).await.unwrap();
    assert_eq!(rows.len(), 12);

    let jan = rows.iter().find(|r| r.month == 1).unwrap().id;
    let feb = rows.iter().find(|r| r.month == 2).unwrap().id;
    let mar = rows.iter().find(|r| r.month == 3).unwrap().id;

    db.record_payment(jan, Decimal::from(30000)).await.unwrap();
    db.record_payment(feb, Decimal::new(1500050, 2)).await.unwrap();
    db.record_payment(mar, Decimal::from(30000)).await.unwrap();
    db.correct_amount(mar, Decimal::from(30000), PaymentStatus::Unpaid)
        .await
        .unwrap();
    db.record_payment(jan, Decimal::from(20000)).await.unwrap();

    let paid_total: Decimal = db
        .member_contributions(m.id)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.status == PaymentStatus::Paid)
        .map(|r| r.amount)
        .sum();
    assert_eq!(paid_total, Decimal::new(3500050, 2));
    assert_eq!(db.get_member(m.id).await.unwrap().cash_balance, paid_total);
    assert_eq!(db.total_cash().await.unwrap(), paid_total);
}

#[tokio::test]
async fn generation_skips_inactive_members_and_is_idempotent() {
    let db = ledger().await;
    member(&db, "Budi", MemberStatus::Active).await;
    member(&db, "Sari", MemberStatus::Active).await;
    member(&db, "Tono", MemberStatus::Inactive).await;

    let next_year = period(1, 2025);
    assert_eq!(db.ensure_rows_for(next_year).await.unwrap(), 2);
    assert_eq!(db.ensure_rows_for(next_year).await.unwrap(), 0);

    let rows = db.list_for(next_year).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|entry| {
        entry.contribution.status == PaymentStatus::Unpaid
            && entry.contribution.amount == DEFAULT_DUES
    }));
}

#[tokio::test]
async fn failed_mutations_change_nothing() {
    let db = ledger().await;
    let m = member(&db, "Budi", MemberStatus::Active).await;
    let row = db
        .contribution_for(m.id, period(3, 2024))
        .await
        .unwrap()
        .unwrap();

    let err = db.record_payment(row.id, Decimal::from(-5)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = db.record_payment(9999, Decimal::from(100)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let untouched = db.get_contribution(row.id).await.unwrap().contribution;
    assert_eq!(untouched, row);
    assert_eq!(db.get_member(m.id).await.unwrap().cash_balance, Decimal::ZERO);
}

#[tokio::test]
async fn deleting_a_member_leaves_others_alone() {
    let db = ledger().await;
    let budi = member(&db, "Budi", MemberStatus::Active).await;
    let sari = member(&db, "Sari", MemberStatus::Active).await;
    for m in [&budi, &sari] {
        let row = db
            .contribution_for(m.id, period(3, 2024))
            .await
            .unwrap()
            .unwrap();
        db.record_payment(row.id, Decimal::from(30000)).await.unwrap();
    }

    db.delete_member(budi.id).await.unwrap();

    assert!(matches!(
        db.member_contributions(budi.id).await,
        Err(Error::NotFound { .. })
    ));
    assert_eq!(
        db.get_member(sari.id).await.unwrap().cash_balance,
        Decimal::from(30000)
    );
    assert_eq!(db.list_for(period(3, 2024)).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_a_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("dues.sqlite"), clock())
        .await
        .unwrap();
    db.apply_migrations().await.unwrap();
    let mut members = Vec::new();
    for idx in 0..5 {
        members.push(member(&db, &format!("Member{idx}"), MemberStatus::Active).await);
    }

    let mut listings = JoinSet::new();
    for _ in 0..8 {
        for month in 1..=12 {
            let db = db.clone();
            listings.spawn(async move { db.list_for(period(month, 2025)).await });
        }
    }
    while let Some(joined) = listings.join_next().await {
        assert_eq!(joined.unwrap().unwrap().len(), 5);
    }
    for month in 1..=12 {
        assert_eq!(db.list_for(period(month, 2025)).await.unwrap().len(), 5);
    }

    let payer = members[0].id;
    let mut payments = JoinSet::new();
    for row in db.member_contributions(payer).await.unwrap() {
        let db = db.clone();
        let amount = Decimal::from(100 * row.month);
        payments.spawn(async move { db.record_payment(row.id, amount).await });
    }
    while let Some(joined) = payments.join_next().await {
        assert_eq!(joined.unwrap().unwrap().status, PaymentStatus::Paid);
    }

    let paid_total: Decimal = db
        .member_contributions(payer)
        .await
        .unwrap()
        .iter()
        .filter(|r| r.status == PaymentStatus::Paid)
        .map(|r| r.amount)
        .sum();
    assert_eq!(paid_total, Decimal::from(7800));
    assert_eq!(db.get_member(payer).await.unwrap().cash_balance, paid_total);
    assert_eq!(db.total_cash().await.unwrap(), paid_total);
}
