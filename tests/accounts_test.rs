mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{record, test_service, transfer, StandardAccounts};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use tradetracker::application::{AccountUpdate, AppError, NewAccount};
use tradetracker::domain::{Account, Broker, Currency, TransactionType};
use tradetracker::storage::{is_unique_violation, AccountQuery, Repository, TransactionQuery};

#[tokio::test]
async fn test_create_account() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let mut input = NewAccount::new("Main", Broker::IcMarkets, Currency::Eur, dec!(2500));
    input.target_balance = dec!(5000);
    input.withdrawal_threshold = dec!(3000);
    let account = service.create_account(input).await?;

    let stored = service.get_account(account.id).await?;
    assert_eq!(stored.name, "Main");
    assert_eq!(stored.broker, Broker::IcMarkets);
    assert_eq!(stored.currency, Currency::Eur);
    assert_eq!(stored.current_balance, dec!(2500));
    assert_eq!(stored.initial_capital, dec!(2500));
    assert_eq!(stored.target_balance, dec!(5000));
    assert_eq!(stored.withdrawal_threshold, dec!(3000));
    assert_eq!(stored.total_deposits, Decimal::ZERO);
    assert!(stored.is_active);

    let by_name = service.get_account_by_name("Main").await?;
    assert_eq!(by_name.id, account.id);

    Ok(())
}

#[tokio::test]
async fn test_create_account_validation() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .create_account(NewAccount::new("Main", Broker::Other, Currency::Usd, dec!(100)))
        .await?;

    let err = service
        .create_account(NewAccount::new("Main", Broker::Roboforex, Currency::Eur, dec!(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccountAlreadyExists(_)));

    let err = service
        .create_account(NewAccount::new("Negative", Broker::Other, Currency::Usd, dec!(-1)))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = service
        .create_account(NewAccount::new("   ", Broker::Other, Currency::Usd, dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    Ok(())
}

#[tokio::test]
async fn test_seeded_balance_is_kept_until_recompute() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let mut input = NewAccount::new("Imported", Broker::Other, Currency::Usd, dec!(1000));
    input.current_balance = Some(dec!(1234.56));
    let account = service.create_account(input).await?;
    assert_eq!(service.get_account(account.id).await?.current_balance, dec!(1234.56));

    Ok(())
}

#[tokio::test]
async fn test_list_accounts_filters() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (usd, eur) = StandardAccounts::create_pair(&service).await?;
    service
        .update_account(
            eur.id,
            AccountUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;

    let all = service.list_accounts(&AccountQuery::default()).await?;
    assert_eq!(all.len(), 2);
    // Ordered by name
    assert_eq!(all[0].name, "IC EUR");

    let robo = service
        .list_accounts(&AccountQuery {
            broker: Some(Broker::Roboforex),
            ..Default::default()
        })
        .await?;
    assert_eq!(robo.len(), 1);
    assert_eq!(robo[0].id, usd.id);

    let euros = service
        .list_accounts(&AccountQuery {
            currency: Some(Currency::Eur),
            ..Default::default()
        })
        .await?;
    assert_eq!(euros.len(), 1);
    assert_eq!(euros[0].id, eur.id);

    let active = service
        .list_accounts(&AccountQuery {
            active: Some(true),
            ..Default::default()
        })
        .await?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, usd.id);

    Ok(())
}

#[tokio::test]
async fn test_update_account() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (usd, eur) = StandardAccounts::create_pair(&service).await?;

    let updated = service
        .update_account(
            usd.id,
            AccountUpdate {
                name: Some("Robo main".into()),
                broker: Some(Broker::Other),
                target_balance: Some(dec!(4000)),
                withdrawal_threshold: Some(dec!(2500)),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(updated.name, "Robo main");

    let stored = service.get_account(usd.id).await?;
    assert_eq!(stored.broker, Broker::Other);
    assert_eq!(stored.target_balance, dec!(4000));
    assert_eq!(stored.withdrawal_threshold, dec!(2500));
    assert!(stored.updated_at >= stored.created_at);

    let err = service
        .update_account(
            usd.id,
            AccountUpdate {
                name: Some(eur.name.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccountAlreadyExists(_)));

    let err = service
        .update_account(
            usd.id,
            AccountUpdate {
                target_balance: Some(dec!(-5)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    Ok(())
}

#[tokio::test]
async fn test_delete_account_recomputes_recipients() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (a, b) = StandardAccounts::create_pair(&service).await?;

    record(&service, a.id, TransactionType::Deposit, dec!(100)).await?;
    record(&service, b.id, TransactionType::Deposit, dec!(10)).await?;
    transfer(&service, a.id, b.id, dec!(40), Some(dec!(0.9))).await?;
    assert_eq!(service.get_account(b.id).await?.current_balance, dec!(46));

    let deletion = service.delete_account(a.id).await?;
    assert_eq!(deletion.removed_transactions, 2);
    assert_eq!(deletion.recomputed.len(), 1);
    assert_eq!(deletion.recomputed[0].id, b.id);
    assert_eq!(deletion.recomputed[0].current_balance, dec!(10));

    assert!(service.get_account(a.id).await.unwrap_err().is_not_found());
    assert_eq!(service.get_account(b.id).await?.current_balance, dec!(10));

    let remaining = service.list_transactions(&TransactionQuery::default()).await?;
    assert_eq!(remaining.len(), 1);
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_transfers_to_deleted_account_still_debit_source() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (a, b) = StandardAccounts::create_pair(&service).await?;

    record(&service, a.id, TransactionType::Deposit, dec!(100)).await?;
    transfer(&service, a.id, b.id, dec!(40), Some(dec!(0.9))).await?;

    let deletion = service.delete_account(b.id).await?;
    assert_eq!(deletion.removed_transactions, 0);
    assert!(deletion.recomputed.is_empty());

    assert_eq!(service.recompute_balance(a.id).await?, dec!(60));

    let report = service.check_integrity().await?;
    assert_eq!(report.dangling_transfers, 1);
    assert!(report.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_resolve_account_by_name_or_id() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (usd, _) = StandardAccounts::create_pair(&service).await?;

    assert_eq!(service.resolve_account("Robo USD").await?.id, usd.id);
    assert_eq!(service.resolve_account(&usd.id.to_string()).await?.id, usd.id);

    let err = service.resolve_account("Nope").await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound(_)));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_with_same_name() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .create_account(NewAccount::new("Shared", Broker::Other, Currency::Usd, dec!(100)))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(err, AppError::AccountAlreadyExists(_)), "{err}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(service.list_accounts(&AccountQuery::default()).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_insert_is_a_unique_violation() -> Result<()> {
    let temp = TempDir::new()?;
    let url = format!("sqlite:{}?mode=rwc", temp.path().join("repo.db").display());
    let repo = Repository::init(&url).await?;

    let mut uow = repo.begin().await?;
    let first = Account::new("Twin".into(), Broker::Other, Currency::Eur, dec!(1));
    repo.insert_account(&mut uow, &first).await?;

    let second = Account::new("Twin".into(), Broker::Roboforex, Currency::Usd, dec!(2));
    let err = repo.insert_account(&mut uow, &second).await.unwrap_err();
    assert!(is_unique_violation(&err));
    assert!(!is_unique_violation(&anyhow::anyhow!("unrelated")));

    Ok(())
}
