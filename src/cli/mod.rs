use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{
    AccountUpdate, NewAccount, NewTransaction, TrackerService, TransactionUpdate,
};
use crate::domain::{
    format_amount, parse_amount, Account, AccountId, Amount, Broker, Currency, TransactionType,
};
use crate::storage::{AccountQuery, TransactionQuery};

/// Tradetracker - Multi-broker trading account tracker
#[derive(Parser)]
#[command(name = "tradetracker")]
#[command(about = "A local-first tracker for trading accounts, their ledger and withdrawal plans")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "TRADETRACKER_DB", default_value = "tradetracker.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Ledger entry commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Move funds between two accounts
    Transfer {
        /// Amount to transfer, in the source account's currency (e.g., "50.00" or "50,00")
        amount: String,

        /// Source account name or ID
        #[arg(long)]
        from: String,

        /// Destination account name or ID
        #[arg(long)]
        to: String,

        /// Exchange rate applied on the destination (defaults to the static table)
        #[arg(long)]
        rate: Option<String>,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,

        /// Date of the transfer (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,

        /// Record even if the source balance is insufficient
        #[arg(long)]
        force: bool,
    },

    /// Withdrawal plan and recommendations
    #[command(subcommand)]
    Withdrawal(WithdrawalCommands),

    /// Portfolio summary across all accounts
    Summary {
        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Monthly net result (profits minus losses)
    History {
        /// Number of months to show
        #[arg(short, long, default_value = "6")]
        months: u32,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Verify that cached balances match the ledger
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create {
        /// Account name (must be unique)
        name: String,

        /// Broker: Roboforex, "IC Markets", Other
        #[arg(short, long, default_value = "Other")]
        broker: String,

        /// Currency: USD, EUR
        #[arg(short, long, default_value = "USD")]
        currency: String,

        /// Initial capital, the baseline for profit
        #[arg(long, default_value = "0")]
        capital: String,

        /// Target balance
        #[arg(long, default_value = "0")]
        target: String,

        /// Balance above which a withdrawal is suggested
        #[arg(long, default_value = "0")]
        threshold: String,

        /// Starting balance (defaults to the initial capital)
        #[arg(long)]
        balance: Option<String>,

        /// Record the initial capital as a deposit
        #[arg(long)]
        opening_deposit: bool,
    },

    /// List accounts
    List {
        /// Filter by broker
        #[arg(long)]
        broker: Option<String>,

        /// Filter by currency
        #[arg(long)]
        currency: Option<String>,

        /// Only active accounts
        #[arg(long, conflicts_with = "inactive")]
        active: bool,

        /// Only inactive accounts
        #[arg(long)]
        inactive: bool,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show account details, metrics and withdrawal status
    Show {
        /// Account name or ID
        account: String,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Edit account settings
    Update {
        /// Account name or ID
        account: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        broker: Option<String>,

        #[arg(long)]
        capital: Option<String>,

        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        threshold: Option<String>,

        /// Mark the account active
        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,

        /// Mark the account inactive
        #[arg(long)]
        deactivate: bool,
    },

    /// Delete an account and the entries it recorded
    Delete {
        /// Account name or ID
        account: String,
    },

    /// Recompute an account's balance from its ledger
    Recompute {
        /// Account name or ID
        account: String,

        /// Show the ledger balance without storing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Recompute every account's balance
    RecomputeAll,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Record a deposit, withdrawal, profit or loss
    Add {
        /// Account name or ID
        account: String,

        /// Type: deposit, withdrawal, profit, loss
        #[arg(value_name = "TYPE")]
        kind: String,

        /// Amount (e.g., "50.00" or "50,00")
        amount: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Origin of the funds (bank, card, ...)
        #[arg(short, long)]
        source: Option<String>,

        /// Date (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,

        /// Record even if the balance is insufficient
        #[arg(long)]
        force: bool,
    },

    /// List ledger entries
    List {
        /// Filter by account name or ID
        #[arg(long)]
        account: Option<String>,

        /// Filter by type
        #[arg(short = 't', long = "type")]
        kind: Option<String>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show one ledger entry
    Show {
        /// Transaction ID
        id: String,
    },

    /// Edit a ledger entry
    Update {
        /// Transaction ID
        id: String,

        #[arg(short = 't', long = "type")]
        kind: Option<String>,

        #[arg(long)]
        amount: Option<String>,

        #[arg(long)]
        date: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        source: Option<String>,

        /// Transfers only: destination account name or ID
        #[arg(long)]
        to: Option<String>,

        /// Transfers only: exchange rate
        #[arg(long)]
        rate: Option<String>,

        #[arg(long)]
        force: bool,
    },

    /// Delete a ledger entry
    Delete {
        /// Transaction ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum WithdrawalCommands {
    /// Show the step plan, with thresholds for an account
    Plan {
        /// Account name or ID
        #[arg(long)]
        account: Option<String>,
    },

    /// Recommend a withdrawal for an account
    Recommend {
        /// Account name or ID
        account: String,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Active accounts with a withdrawal to act on
    Alerts {
        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Progress toward the next step of the plan
    Progress {
        /// Account name or ID
        account: String,
    },

    /// Recommendation from the capital-range rules
    Tiered {
        /// Account name or ID
        account: String,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                TrackerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Account(account_cmd) => {
                let service = TrackerService::connect(&self.database).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Tx(tx_cmd) => {
                let service = TrackerService::connect(&self.database).await?;
                run_tx_command(&service, tx_cmd).await?;
            }

            Commands::Transfer {
                amount,
                from,
                to,
                rate,
                description,
                date,
                force,
            } => {
                let service = TrackerService::connect(&self.database).await?;
                let source = service.resolve_account(&from).await?;
                let target = service.resolve_account(&to).await?;

                let mut input = NewTransaction::transfer(source.id, target.id, parse_money(&amount)?);
                input.exchange_rate = rate.as_deref().map(parse_money).transpose()?;
                input.description = description;
                input.date = date.as_deref().map(parse_date).transpose()?;
                input.force = force;

                let entry = service.record_transaction(input).await?;
                let credited = entry.destination_credit()?.unwrap_or(entry.amount);
                println!(
                    "Recorded transfer: {} {} {} -> {} {} {} ({})",
                    format_amount(entry.amount),
                    source.currency,
                    source.name,
                    format_amount(credited),
                    target.currency,
                    target.name,
                    entry.id
                );
            }

            Commands::Withdrawal(withdrawal_cmd) => {
                let service = TrackerService::connect(&self.database).await?;
                run_withdrawal_command(&service, withdrawal_cmd).await?;
            }

            Commands::Summary { format } => {
                let service = TrackerService::connect(&self.database).await?;
                run_summary_command(&service, &format).await?;
            }

            Commands::History { months, format } => {
                let service = TrackerService::connect(&self.database).await?;
                let history = service.net_result_history(months).await?;

                if format == "json" {
                    print_json(&history)?;
                } else {
                    println!("{:<10} {:>14} {:>14}", "MONTH", "USD", "EUR");
                    println!("{}", "-".repeat(40));
                    for month in history {
                        println!(
                            "{:<10} {:>14} {:>14}",
                            month.month.format("%Y-%m"),
                            format_amount(month.usd),
                            format_amount(month.eur)
                        );
                    }
                }
            }

            Commands::Check => {
                let service = TrackerService::connect(&self.database).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

async fn run_account_command(service: &TrackerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            name,
            broker,
            currency,
            capital,
            target,
            threshold,
            balance,
            opening_deposit,
        } => {
            let mut input = NewAccount::new(
                name,
                parse_broker(&broker)?,
                parse_currency(&currency)?,
                parse_money(&capital)?,
            );
            input.target_balance = parse_money(&target)?;
            input.withdrawal_threshold = parse_money(&threshold)?;
            input.current_balance = balance.as_deref().map(parse_money).transpose()?;
            input.opening_deposit = opening_deposit;

            let account = service.create_account(input).await?;
            println!(
                "Created account: {} ({}, {}) balance {} {}",
                account.name,
                account.broker,
                account.currency,
                format_amount(account.current_balance),
                account.currency
            );
        }

        AccountCommands::List {
            broker,
            currency,
            active,
            inactive,
            format,
        } => {
            let query = AccountQuery {
                broker: broker.as_deref().map(parse_broker).transpose()?,
                currency: currency.as_deref().map(parse_currency).transpose()?,
                active: match (active, inactive) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            let accounts = service.list_accounts(&query).await?;

            if format == "json" {
                print_json(&accounts)?;
            } else if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<20} {:<12} {:<4} {:>14} {:>14} {:>8}",
                    "NAME", "BROKER", "CUR", "BALANCE", "TARGET", "ACTIVE"
                );
                println!("{}", "-".repeat(77));
                for account in accounts {
                    println!(
                        "{:<20} {:<12} {:<4} {:>14} {:>14} {:>8}",
                        truncate(&account.name, 20),
                        account.broker,
                        account.currency,
                        format_amount(account.current_balance),
                        format_amount(account.target_balance),
                        if account.is_active { "yes" } else { "no" }
                    );
                }
            }
        }

        AccountCommands::Show { account, format } => {
            let account = service.resolve_account(&account).await?;
            let report = service.account_report(account.id).await?;

            if format == "json" {
                return print_json(&report);
            }

            let account = &report.account;
            let cur = account.currency;
            println!("Account: {}", account.name);
            println!("  ID:              {}", account.id);
            println!("  Broker:          {}", account.broker);
            println!("  Currency:        {}", cur);
            println!("  Active:          {}", if account.is_active { "yes" } else { "no" });
            println!(
                "  Created:         {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            println!("  Balance:         {} {}", format_amount(account.current_balance), cur);
            println!("  Initial capital: {} {}", format_amount(account.initial_capital), cur);
            println!("  Target:          {} {}", format_amount(account.target_balance), cur);
            println!("  Threshold:       {} {}", format_amount(account.withdrawal_threshold), cur);
            println!();
            println!("  Deposits:        {} {}", format_amount(account.total_deposits), cur);
            println!("  Withdrawals:     {} {}", format_amount(account.total_withdrawals), cur);
            println!("  Profits:         {} {}", format_amount(account.total_profits), cur);
            println!("  Losses:          {} {}", format_amount(account.total_losses), cur);
            println!("  Entries:         {}", report.transaction_count);
            println!();
            println!("  Performance:     {}%", report.metrics.performance);
            println!("  Profit/loss:     {} {}", format_amount(report.metrics.profit_loss), cur);
            println!("  ROI:             {}%", report.metrics.roi);
            if report.metrics.threshold_excess > Amount::ZERO {
                println!(
                    "  Above threshold: {} {}",
                    format_amount(report.metrics.threshold_excess),
                    cur
                );
            }
            println!(
                "  Plan progress:   level {}% -> {}% ({}%)",
                report.progress.current_level,
                report.progress.next_level,
                report.progress.progress_percent
            );
            match &report.recommendation {
                Some(rec) => println!(
                    "  Withdraw:        {} {} (step {}%)",
                    format_amount(rec.amount),
                    cur,
                    rec.percent_goal
                ),
                None => println!("  Withdraw:        nothing recommended"),
            }
        }

        AccountCommands::Update {
            account,
            name,
            broker,
            capital,
            target,
            threshold,
            activate,
            deactivate,
        } => {
            let account = service.resolve_account(&account).await?;
            let update = AccountUpdate {
                name,
                broker: broker.as_deref().map(parse_broker).transpose()?,
                initial_capital: capital.as_deref().map(parse_money).transpose()?,
                target_balance: target.as_deref().map(parse_money).transpose()?,
                withdrawal_threshold: threshold.as_deref().map(parse_money).transpose()?,
                is_active: match (activate, deactivate) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };

            let updated = service.update_account(account.id, update).await?;
            println!("Updated account: {}", updated.name);
        }

        AccountCommands::Delete { account } => {
            let account = service.resolve_account(&account).await?;
            let deletion = service.delete_account(account.id).await?;

            println!(
                "Deleted account: {} ({} entries removed)",
                deletion.account.name, deletion.removed_transactions
            );
            for recipient in deletion.recomputed {
                println!(
                    "  Recomputed {}: {} {}",
                    recipient.name,
                    format_amount(recipient.current_balance),
                    recipient.currency
                );
            }
        }

        AccountCommands::Recompute { account, dry_run } => {
            let account = service.resolve_account(&account).await?;
            if dry_run {
                let balance = service.compute_balance(account.id).await?;
                println!(
                    "{}: ledger {} {}, stored {} {}",
                    account.name,
                    format_amount(balance),
                    account.currency,
                    format_amount(account.current_balance),
                    account.currency
                );
            } else {
                let balance = service.recompute_balance(account.id).await?;
                println!(
                    "{}: {} {}",
                    account.name,
                    format_amount(balance),
                    account.currency
                );
            }
        }

        AccountCommands::RecomputeAll => {
            let drifts = service.recompute_all_balances().await?;
            if drifts.is_empty() {
                println!("All balances match the ledger.");
            } else {
                println!("{:<20} {:>14} {:>14}", "ACCOUNT", "WAS", "NOW");
                println!("{}", "-".repeat(50));
                for drift in &drifts {
                    println!(
                        "{:<20} {:>14} {:>14}",
                        truncate(&drift.account_name, 20),
                        format_amount(drift.cached),
                        format_amount(drift.computed)
                    );
                }
                println!("Corrected {} balance(s).", drifts.len());
            }
        }
    }
    Ok(())
}

async fn run_tx_command(service: &TrackerService, cmd: TxCommands) -> Result<()> {
    match cmd {
        TxCommands::Add {
            account,
            kind,
            amount,
            description,
            source,
            date,
            force,
        } => {
            let kind = parse_kind(&kind)?;
            if kind == TransactionType::Transfer {
                anyhow::bail!("Use the 'transfer' command to move funds between accounts");
            }
            let account = service.resolve_account(&account).await?;

            let mut input = NewTransaction::new(account.id, kind, parse_money(&amount)?);
            input.description = description;
            input.source = source;
            input.date = date.as_deref().map(parse_date).transpose()?;
            input.force = force;

            let entry = service.record_transaction(input).await?;
            let account = service.get_account(account.id).await?;
            println!(
                "Recorded {}: {} {} on {} ({})",
                entry.kind,
                format_amount(entry.amount),
                entry.currency,
                account.name,
                entry.id
            );
            println!(
                "Balance: {} {}",
                format_amount(account.current_balance),
                account.currency
            );
        }

        TxCommands::List {
            account,
            kind,
            from_date,
            to_date,
            limit,
            format,
        } => {
            let account_id = match account {
                Some(key) => Some(service.resolve_account(&key).await?.id),
                None => None,
            };
            let query = TransactionQuery {
                account_id,
                kind: kind.as_deref().map(parse_kind).transpose()?,
                from_date: from_date
                    .as_deref()
                    .map(parse_date)
                    .transpose()
                    .context("Invalid from-date")?,
                to_date: to_date
                    .as_deref()
                    .map(parse_date)
                    .transpose()
                    .context("Invalid to-date")?,
                limit,
            };
            let entries = service.list_transactions(&query).await?;

            if format == "json" {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("No transactions found.");
                return Ok(());
            }

            let names = account_names(service).await?;
            println!(
                "{:<12} {:<10} {:>12} {:<4} {:<15} {:<15} DESCRIPTION",
                "DATE", "TYPE", "AMOUNT", "CUR", "ACCOUNT", "TO"
            );
            println!("{}", "-".repeat(90));

            // Oldest first, like a statement
            for entry in entries.iter().rev() {
                let target = entry
                    .target_account_id
                    .map(|id| name_of(&names, id))
                    .unwrap_or("");
                println!(
                    "{:<12} {:<10} {:>12} {:<4} {:<15} {:<15} {}",
                    entry.date.format("%Y-%m-%d"),
                    entry.kind,
                    format_amount(entry.amount),
                    entry.currency,
                    truncate(name_of(&names, entry.account_id), 15),
                    truncate(target, 15),
                    truncate(entry.description.as_deref().unwrap_or(""), 30)
                );
            }
        }

        TxCommands::Show { id } => {
            let entry = service.get_transaction(parse_id(&id)?).await?;
            let names = account_names(service).await?;

            println!("Transaction: {}", entry.id);
            println!("  Date:        {}", entry.date.format("%Y-%m-%d %H:%M:%S"));
            println!("  Type:        {}", entry.kind);
            println!("  Amount:      {} {}", format_amount(entry.amount), entry.currency);
            println!("  Account:     {}", name_of(&names, entry.account_id));
            if let Some(target) = entry.target_account_id {
                println!("  To:          {}", name_of(&names, target));
                if let Some(rate) = entry.exchange_rate {
                    println!("  Rate:        {}", rate);
                }
                if let Some(credit) = entry.destination_credit()? {
                    println!("  Credited:    {}", format_amount(credit));
                }
            }
            if let Some(desc) = &entry.description {
                println!("  Description: {}", desc);
            }
            if let Some(source) = &entry.source {
                println!("  Source:      {}", source);
            }
            println!(
                "  Recorded at: {}",
                entry.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        TxCommands::Update {
            id,
            kind,
            amount,
            date,
            description,
            source,
            to,
            rate,
            force,
        } => {
            let target_account_id = match to {
                Some(key) => Some(service.resolve_account(&key).await?.id),
                None => None,
            };
            let update = TransactionUpdate {
                kind: kind.as_deref().map(parse_kind).transpose()?,
                amount: amount.as_deref().map(parse_money).transpose()?,
                date: date.as_deref().map(parse_date).transpose()?,
                description,
                source,
                target_account_id,
                exchange_rate: rate.as_deref().map(parse_money).transpose()?,
                force,
            };

            let entry = service.update_transaction(parse_id(&id)?, update).await?;
            println!(
                "Updated transaction {}: {} {} {}",
                entry.id,
                entry.kind,
                format_amount(entry.amount),
                entry.currency
            );
        }

        TxCommands::Delete { id } => {
            let entry = service.delete_transaction(parse_id(&id)?).await?;
            println!(
                "Deleted {}: {} {} ({})",
                entry.kind,
                format_amount(entry.amount),
                entry.currency,
                entry.id
            );
        }
    }
    Ok(())
}

async fn run_withdrawal_command(service: &TrackerService, cmd: WithdrawalCommands) -> Result<()> {
    match cmd {
        WithdrawalCommands::Plan { account } => {
            let account = match account {
                Some(key) => Some(service.resolve_account(&key).await?),
                None => None,
            };

            match &account {
                Some(account) => {
                    println!(
                        "Withdrawal plan for {} (capital {} {})",
                        account.name,
                        format_amount(account.initial_capital),
                        account.currency
                    );
                    println!("{:>6} {:>8} {:>14} {:>8}", "GOAL", "RATE", "THRESHOLD", "REACHED");
                }
                None => println!("{:>6} {:>8}", "GOAL", "RATE"),
            }
            println!("{}", "-".repeat(40));

            for step in service.plan() {
                let rate = step.withdrawal_rate * Amount::ONE_HUNDRED;
                match &account {
                    Some(account) => {
                        let threshold = step.threshold(account.initial_capital);
                        println!(
                            "{:>5}% {:>7}% {:>14} {:>8}",
                            step.percent_goal,
                            rate.normalize(),
                            format_amount(threshold),
                            if account.current_balance >= threshold { "yes" } else { "" }
                        );
                    }
                    None => println!("{:>5}% {:>7}%", step.percent_goal, rate.normalize()),
                }
            }
        }

        WithdrawalCommands::Recommend { account, format } => {
            let account = service.resolve_account(&account).await?;
            let recommendation = service.recommend_withdrawal(account.id).await?;

            if format == "json" {
                return print_json(&recommendation);
            }
            match recommendation {
                Some(rec) => {
                    println!("Account: {}", account.name);
                    println!("  Step reached: {}%", rec.percent_goal);
                    println!("  Profit:       {} {}", format_amount(rec.profit), rec.currency);
                    println!("  Withdraw:     {} {}", format_amount(rec.amount), rec.currency);
                }
                None => println!("No withdrawal recommended for {}.", account.name),
            }
        }

        WithdrawalCommands::Alerts { format } => {
            let alerts = service.withdrawal_alerts().await?;

            if format == "json" {
                return print_json(&alerts);
            }
            if alerts.is_empty() {
                println!("No withdrawals recommended.");
                return Ok(());
            }
            println!(
                "{:<20} {:>6} {:>14} {:>14} {:<4}",
                "ACCOUNT", "STEP", "PROFIT", "WITHDRAW", "CUR"
            );
            println!("{}", "-".repeat(62));
            for alert in alerts {
                let rec = &alert.recommendation;
                println!(
                    "{:<20} {:>5}% {:>14} {:>14} {:<4}",
                    truncate(&alert.account_name, 20),
                    rec.percent_goal,
                    format_amount(rec.profit),
                    format_amount(rec.amount),
                    rec.currency
                );
            }
        }

        WithdrawalCommands::Progress { account } => {
            let account = service.resolve_account(&account).await?;
            let progress = service.withdrawal_progress(account.id).await?;
            println!(
                "{}: level {}% -> {}% ({}% of the way)",
                account.name,
                progress.current_level,
                progress.next_level,
                progress.progress_percent
            );
        }

        WithdrawalCommands::Tiered { account, format } => {
            let account = service.resolve_account(&account).await?;
            let recommendation = service.recommend_tiered(account.id).await?;

            if format == "json" {
                return print_json(&recommendation);
            }
            match recommendation {
                Some(rec) => {
                    let cur = account.currency;
                    println!("Account: {}", account.name);
                    println!(
                        "  Range:      {} - {} {}",
                        format_amount(rec.applied_range_min),
                        format_amount(rec.applied_range_max),
                        cur
                    );
                    println!("  Progress:   {}%", rec.progress_percentage);
                    println!(
                        "  Rule:       at {}% withdraw {}% of profit",
                        rec.applied_rule.target_percentage, rec.applied_rule.profit_percentage
                    );
                    println!("  Withdraw:   {} {}", format_amount(rec.amount), cur);
                    println!("  Remaining:  {} {}", format_amount(rec.remaining_balance), cur);
                }
                None => println!("No tiered withdrawal for {}.", account.name),
            }
        }
    }
    Ok(())
}

async fn run_summary_command(service: &TrackerService, format: &str) -> Result<()> {
    let report = service.portfolio_report().await?;

    if format == "json" {
        return print_json(&report);
    }

    println!("Portfolio Summary");
    println!("As of: {}", report.as_of.format("%Y-%m-%d %H:%M"));
    println!(
        "Accounts: {} ({} active)",
        report.summary.total_accounts, report.summary.active_accounts
    );
    println!();
    println!(
        "{:<6} {:>14} {:>14} {:>12}",
        "CUR", "BALANCE", "TARGET", "PERFORMANCE"
    );
    println!("{}", "-".repeat(49));
    for summary in &report.summary.by_currency {
        println!(
            "{:<6} {:>14} {:>14} {:>11}%",
            summary.currency,
            format_amount(summary.total_balance),
            format_amount(summary.total_target),
            summary.performance
        );
    }
    println!();
    println!("Total in USD: {}", format_amount(report.total_usd));
    println!("Total in EUR: {}", format_amount(report.total_eur));

    for breakdown in &report.breakdowns {
        println!();
        println!("Net result ({})", breakdown.currency);
        println!("  {:<10} {:>6} {:>14} {:>14}", "STATUS", "COUNT", "BALANCE", "NET RESULT");
        for (label, figures) in [
            ("active", &breakdown.active),
            ("inactive", &breakdown.inactive),
            ("total", &breakdown.total),
        ] {
            println!(
                "  {:<10} {:>6} {:>14} {:>14}",
                label,
                figures.count,
                format_amount(figures.current_balance),
                format_amount(figures.net_result)
            );
        }
    }
    Ok(())
}

async fn run_check_command(service: &TrackerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:     {}", report.account_count);
    println!("Transactions: {}", report.transaction_count);
    if report.dangling_transfers > 0 {
        println!(
            "Transfers to deleted accounts: {}",
            report.dangling_transfers
        );
    }
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        if report.orphan_sources > 0 {
            println!(
                "  - {} entries reference a missing account",
                report.orphan_sources
            );
        }
        for drift in &report.drifts {
            println!(
                "  - {}: cached {} but ledger gives {}",
                drift.account_name,
                format_amount(drift.cached),
                format_amount(drift.computed)
            );
        }
        for drift in &report.totals_drifts {
            println!(
                "  - {}: running totals do not match its entries (deposits {} vs {}, withdrawals {} vs {}, profits {} vs {}, losses {} vs {})",
                drift.account_name,
                format_amount(drift.cached.deposits),
                format_amount(drift.computed.deposits),
                format_amount(drift.cached.withdrawals),
                format_amount(drift.computed.withdrawals),
                format_amount(drift.cached.profits),
                format_amount(drift.computed.profits),
                format_amount(drift.cached.losses),
                format_amount(drift.computed.losses)
            );
        }
        anyhow::bail!("Ledger integrity check failed (run 'account recompute-all' to fix balances)");
    }

    Ok(())
}

async fn account_names(service: &TrackerService) -> Result<HashMap<AccountId, String>> {
    Ok(service
        .list_accounts(&AccountQuery::default())
        .await?
        .into_iter()
        .map(|account: Account| (account.id, account.name))
        .collect())
}

fn name_of(names: &HashMap<AccountId, String>, id: AccountId) -> &str {
    names.get(&id).map(|s| s.as_str()).unwrap_or("(deleted)")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_money(input: &str) -> Result<Amount> {
    parse_amount(input).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50,00'", input))
}

fn parse_broker(input: &str) -> Result<Broker> {
    input
        .parse()
        .with_context(|| "Valid brokers: Roboforex, \"IC Markets\", Other")
}

fn parse_currency(input: &str) -> Result<Currency> {
    input.parse().with_context(|| "Valid currencies: USD, EUR")
}

fn parse_kind(input: &str) -> Result<TransactionType> {
    input
        .parse()
        .with_context(|| "Valid types: deposit, withdrawal, profit, loss, transfer")
}

fn parse_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input).context("Invalid transaction ID format (expected UUID)")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    use chrono::NaiveDate;

    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", date_str))?;

    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;

    Ok(DateTime::from_naive_utc_and_offset(naive_datetime, Utc))
}
