//! Integration tests for the projector: ordered replay, idempotent
//! application, balance convergence.
//!
//! See tests/support/mod.rs for how to run these (they need DATABASE_URL).

mod support;

use rust_decimal::Decimal;
use sqlx::PgPool;

use tally_infra::projector::{Projector, ProjectorConfig};

use support::*;

fn projector(pool: &PgPool) -> Projector {
    Projector::new(pool.clone(), ProjectorConfig::default())
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn projection_materializes_balances_and_read_models(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("k1"))
        .await
        .unwrap();

    let applied = projector(&pool).run_once().await.unwrap();
    assert_eq!(applied, 1);

    // Credit adds, debit subtracts: cash was debited 100.00.
    assert_eq!(
        balance_of(&pool, ledger_id, "cash").await,
        Decimal::from_str_exact("-100.00").unwrap()
    );
    assert_eq!(
        balance_of(&pool, ledger_id, "revenue").await,
        Decimal::from_str_exact("100.00").unwrap()
    );
    assert_eq!(count_rows(&pool, "transactions").await, 1);
    assert_eq!(count_rows(&pool, "postings").await, 2);

    // The informational transaction amount is the debit total.
    let amount: Decimal = sqlx::query_scalar("SELECT amount FROM transactions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(amount, Decimal::from_str_exact("100.00").unwrap());
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn rerunning_a_drained_projector_applies_nothing(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("k1"))
        .await
        .unwrap();

    let p = projector(&pool);
    assert_eq!(p.run_once().await.unwrap(), 1);
    assert_eq!(p.run_once().await.unwrap(), 0);
    assert_eq!(
        balance_of(&pool, ledger_id, "cash").await,
        Decimal::from_str_exact("-100.00").unwrap()
    );
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn replay_after_offset_loss_does_not_double_count(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("k1"))
        .await
        .unwrap();

    let p = projector(&pool);
    assert_eq!(p.run_once().await.unwrap(), 1);

    // Simulate a crash after apply but before the offset write: wind the
    // offset back and replay. The transaction-row gate must skip the event.
    sqlx::query("UPDATE projector_offsets SET last_event_id = 0")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(p.run_once().await.unwrap(), 1);

    assert_eq!(
        balance_of(&pool, ledger_id, "cash").await,
        Decimal::from_str_exact("-100.00").unwrap()
    );
    assert_eq!(count_rows(&pool, "postings").await, 2);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn events_apply_in_commit_order_across_batches(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    let service = command_service(&pool);

    for i in 0..5 {
        let mut cmd = balanced_command(&format!("k{i}"));
        cmd.postings[0].amount = "10.00".to_string();
        cmd.postings[1].amount = "10.00".to_string();
        service.post_transaction(ledger_id, cmd).await.unwrap();
    }

    // Batch smaller than the backlog: three passes to converge.
    let p = Projector::new(
        pool.clone(),
        ProjectorConfig {
            batch_size: 2,
            ..ProjectorConfig::default()
        },
    );
    assert_eq!(p.run_once().await.unwrap(), 2);
    assert_eq!(p.run_once().await.unwrap(), 2);
    assert_eq!(p.run_once().await.unwrap(), 1);
    assert_eq!(p.lag().await.unwrap(), 0);

    assert_eq!(
        balance_of(&pool, ledger_id, "revenue").await,
        Decimal::from_str_exact("50.00").unwrap()
    );
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn lag_reports_unprojected_backlog(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    let service = command_service(&pool);
    let p = projector(&pool);

    assert_eq!(p.lag().await.unwrap(), 0);

    service
        .post_transaction(ledger_id, balanced_command("k1"))
        .await
        .unwrap();
    service
        .post_transaction(ledger_id, balanced_command("k2"))
        .await
        .unwrap();
    assert_eq!(p.lag().await.unwrap(), 2);

    p.run_once().await.unwrap();
    assert_eq!(p.lag().await.unwrap(), 0);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn shared_account_balances_accumulate_across_transactions(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    let service = command_service(&pool);

    let mut sale = balanced_command("sale");
    sale.postings = vec![
        posting("cash", "debit", "30.00"),
        posting("revenue", "credit", "30.00"),
    ];
    let mut refund = balanced_command("refund");
    refund.postings = vec![
        posting("revenue", "debit", "12.50"),
        posting("cash", "credit", "12.50"),
    ];
    service.post_transaction(ledger_id, sale).await.unwrap();
    service.post_transaction(ledger_id, refund).await.unwrap();

    projector(&pool).run_once().await.unwrap();

    assert_eq!(
        balance_of(&pool, ledger_id, "cash").await,
        Decimal::from_str_exact("-17.50").unwrap()
    );
    assert_eq!(
        balance_of(&pool, ledger_id, "revenue").await,
        Decimal::from_str_exact("17.50").unwrap()
    );
}
