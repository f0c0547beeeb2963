use std::io::Write;
use std::process::ExitCode;

use npm_audit_parser::{AuditError, AuditRunner};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

/// Printed after the report when nothing unresolved was found.
pub const SUCCESS_NOTICE: &str = "All good!";

/// Process exit codes of the `audit` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Clean = 0,
    Vulnerable = 1,
    Error = 2,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Run one audit and report the outcome on the console.
pub async fn audit(config: Config, cancel: CancellationToken) -> Exit {
    let runner = AuditRunner::new(config.options);
    match runner.check(&config.ignore, cancel).await {
        Ok(report) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{report}\n{SUCCESS_NOTICE}") {
                error!("failed to write report: {}", e);
                return Exit::Error;
            }
            Exit::Clean
        }
        Err(e) => exit_for(&e),
    }
}

fn exit_for(e: &AuditError) -> Exit {
    eprintln!("{e}");
    match e {
        AuditError::VulnerabilitiesFound(unresolved) => {
            info!("failing build on {} advisories", unresolved.count());
            Exit::Vulnerable
        }
        AuditError::Cancelled | AuditError::TimedOut(_) => {
            info!("audit did not finish, no verdict");
            Exit::Error
        }
        _ => Exit::Error,
    }
}
