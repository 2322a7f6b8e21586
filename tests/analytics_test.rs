mod common;

use anyhow::Result;
use chrono::Utc;
use common::{parse_date, record, test_service, StandardAccounts};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tradetracker::application::{
    AccountUpdate, AppError, NewAccount, NewTransaction, MAX_HISTORY_MONTHS,
};
use tradetracker::domain::{Broker, Currency, TransactionType};

#[tokio::test]
async fn test_portfolio_report() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let usd =
        StandardAccounts::create_funded(&service, "Dollars", Currency::Usd, dec!(1000), dec!(2000))
            .await?;
    let eur =
        StandardAccounts::create_funded(&service, "Euros", Currency::Eur, dec!(500), dec!(1000))
            .await?;
    record(&service, usd.id, TransactionType::Profit, dec!(100)).await?;
    record(&service, eur.id, TransactionType::Loss, dec!(20)).await?;

    service
        .update_account(
            eur.id,
            AccountUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;

    let report = service.portfolio_report().await?;
    assert_eq!(report.summary.total_accounts, 2);
    assert_eq!(report.summary.active_accounts, 1);

    let usd_summary = &report.summary.by_currency[0];
    assert_eq!(usd_summary.currency, Currency::Usd);
    assert_eq!(usd_summary.total_balance, dec!(1100));
    assert_eq!(usd_summary.performance, dec!(55));

    // 1100 + 480 * 1.1
    assert_eq!(report.total_usd, dec!(1628));
    // 1100 * 0.91 + 480
    assert_eq!(report.total_eur, dec!(1481));

    let in_usd = report
        .breakdowns
        .iter()
        .find(|b| b.currency == Currency::Usd)
        .expect("USD breakdown");
    assert_eq!(in_usd.active.count, 1);
    assert_eq!(in_usd.active.net_result, dec!(100));
    assert_eq!(in_usd.inactive.count, 1);
    assert_eq!(in_usd.inactive.net_result, dec!(-22));
    assert_eq!(in_usd.total.net_result, dec!(78));

    assert_eq!(service.total_balance_in(Currency::Usd).await?, dec!(1628));

    Ok(())
}

#[tokio::test]
async fn test_account_metrics() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let mut input = NewAccount::new("Metrics", Broker::Roboforex, Currency::Usd, dec!(2000));
    input.target_balance = dec!(4000);
    input.withdrawal_threshold = dec!(2500);
    input.opening_deposit = true;
    let account = service.create_account(input).await?;

    record(&service, account.id, TransactionType::Profit, dec!(1000)).await?;
    record(&service, account.id, TransactionType::Loss, dec!(200)).await?;

    let metrics = service.account_metrics(account.id).await?;
    assert_eq!(metrics.performance, dec!(70));
    assert_eq!(metrics.profit_loss, dec!(800));
    assert_eq!(metrics.roi, dec!(40));
    assert_eq!(metrics.threshold_excess, dec!(300));

    Ok(())
}

#[tokio::test]
async fn test_net_result_history() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let (usd, eur) = StandardAccounts::create_pair(&service).await?;

    record(&service, usd.id, TransactionType::Profit, dec!(100)).await?;
    record(&service, usd.id, TransactionType::Loss, dec!(30)).await?;
    record(&service, eur.id, TransactionType::Profit, dec!(12.5)).await?;
    // Deposits are not trading results
    record(&service, eur.id, TransactionType::Deposit, dec!(1000)).await?;

    // Far outside the window
    let mut old = NewTransaction::new(usd.id, TransactionType::Profit, dec!(999));
    old.date = Some(parse_date("2001-01-01"));
    service.record_transaction(old).await?;

    let history = service.net_result_history(3).await?;
    assert_eq!(history.len(), 3);

    let current = history.last().expect("current month");
    assert_eq!(
        current.month.format("%Y-%m").to_string(),
        Utc::now().format("%Y-%m").to_string()
    );
    assert_eq!(current.usd, dec!(70));
    assert_eq!(current.eur, dec!(12.5));

    for month in &history[..2] {
        assert_eq!(month.usd, Decimal::ZERO);
        assert_eq!(month.eur, Decimal::ZERO);
    }

    Ok(())
}

#[tokio::test]
async fn test_net_result_history_window_is_bounded() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.net_result_history(10_000_000).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = service
        .net_result_history(MAX_HISTORY_MONTHS + 1)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let history = service.net_result_history(MAX_HISTORY_MONTHS).await?;
    assert_eq!(history.len(), MAX_HISTORY_MONTHS as usize);
    assert!(service.net_result_history(0).await?.is_empty());

    Ok(())
}
