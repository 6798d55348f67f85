//! `cdsdl check-account` – verify credentials by acquiring and releasing a token.

use anyhow::{bail, Context, Result};
use cdsdl_core::config::CdsdlConfig;
use cdsdl_core::driver::{build_token_store, open_lease_store};

use crate::cli::Status;

pub async fn run_check_account(
    cfg: &CdsdlConfig,
    group: Option<&str>,
    login: Option<&str>,
) -> Result<Status> {
    cfg.validate()?;
    let mut accounts = cfg.accounts(group)?;
    if let Some(login) = login {
        accounts.retain(|a| a.login == login);
        if accounts.is_empty() {
            bail!("no account {:?} in the selected group", login);
        }
    }

    let store = open_lease_store(cfg)?;
    let tokens = build_token_store(cfg, store);
    let results = tokio::task::spawn_blocking(move || {
        accounts
            .iter()
            .map(|account| {
                let outcome = tokens
                    .acquire_token(account, true)
                    .and_then(|token| tokens.release_token(&token).map_err(Into::into));
                (account.login.clone(), outcome)
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("account check task")?;

    let mut failed = 0;
    for (login, outcome) in results {
        match outcome {
            Ok(()) => println!("{:<40} ok", login),
            Err(e) => {
                failed += 1;
                println!("{:<40} FAILED: {}", login, e);
            }
        }
    }
    Ok(if failed > 0 { Status::Failures } else { Status::Done })
}
