//! AuditRunner: run the audit command and turn its streamed report into a verdict.

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Stderr};
use tokio::process::{Child, Command};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AuditError;
use crate::ignore::IgnoreSet;
use crate::report::{ReportAccumulator, ReportState, Verdict};
use crate::structured::read_json_report;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long stderr and the exit status are still collected after stdout closes.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// How the audit command is asked to report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human readable table, scraped for advisory URLs.
    #[default]
    Text,
    /// `--json` output, read structurally.
    Json,
}

/// Program and base arguments of the audit invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AuditCommand {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            args: vec!["audit".to_string()],
        }
    }
}

impl AuditCommand {
    /// Build from an argv list. Returns `None` for an empty list.
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub command: AuditCommand,
    /// Registry URL passed as `--registry <url>`.
    pub registry: Option<String>,
    pub format: ReportFormat,
    /// Kill the audit and fail if it has not finished by then.
    pub timeout: Option<Duration>,
}

/// Result of a completed audit run.
#[derive(Debug)]
pub struct AuditOutcome {
    pub verdict: Verdict,
    pub report: ReportState,
    /// Exit status of the audit process, if it exited shortly after its
    /// report. Informational only.
    pub exit_status: Option<ExitStatus>,
}

impl AuditOutcome {
    /// The raw report text if clean, the failed verdict as an error otherwise.
    pub fn into_result(self) -> Result<String, AuditError> {
        self.verdict.into_result()?;
        Ok(self.report.into_raw())
    }
}

/// Runs the audit command once per call to [`AuditRunner::run`].
///
/// Every run owns its own report state, so one runner can serve concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct AuditRunner {
    options: AuditOptions,
}

impl AuditRunner {
    pub fn new(options: AuditOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    /// Program and full argument list of the invocation.
    pub fn invocation(&self) -> (&str, Vec<String>) {
        let command = &self.options.command;
        let mut args = command.args.clone();
        if let Some(registry) = &self.options.registry {
            args.push("--registry".to_string());
            args.push(registry.clone());
        }
        if self.options.format == ReportFormat::Json {
            args.push("--json".to_string());
        }
        (&command.program, args)
    }

    /// Run the audit and fail with [`AuditError::VulnerabilitiesFound`] on a
    /// failed verdict. Returns the raw report text when clean.
    pub async fn check(
        &self,
        ignore: &IgnoreSet,
        cancel: CancellationToken,
    ) -> Result<String, AuditError> {
        self.run(ignore, cancel).await?.into_result()
    }

    /// Run the audit, reading its stdout as it streams in.
    ///
    /// The verdict only depends on the report text and is decided as soon as
    /// stdout closes. Stderr and the exit status are then collected for at most
    /// a short grace period; a process that lingers past it is killed. Stderr is
    /// forwarded to this process's stderr.
    #[tracing::instrument(name = "audit", level = "trace", skip_all)]
    pub async fn run(
        &self,
        ignore: &IgnoreSet,
        cancel: CancellationToken,
    ) -> Result<AuditOutcome, AuditError> {
        if !ignore.is_empty() {
            info!("Exception vulnerabilities ID(s): {:?}", ignore.sorted());
        }

        let (program, args) = self.invocation();
        debug!("running `{} {}`", program, args.join(" "));
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AuditError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let mut stdout = child.stdout.take().ok_or(AuditError::MissingPipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or(AuditError::MissingPipe("stderr"))?;

        let mut deadline: Option<Pin<Box<Sleep>>> =
            self.options.timeout.map(|t| Box::pin(tokio::time::sleep(t)));
        let mut collector = Collector::new(self.options.format);
        let mut decoder = Utf8Decoder::default();
        let mut diagnostics = tokio::io::stderr();
        let mut out_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut err_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut waiting = true;
        let mut exit_status: Option<ExitStatus> = None;

        while stdout_open {
            tokio::select! {
                () = cancel.cancelled() => {
                    kill(&mut child).await;
                    return Err(AuditError::Cancelled);
                }
                () = async {
                    if let Some(ref mut t) = deadline {
                        t.await
                    } else {
                        futures::future::pending::<()>().await
                    }
                }, if deadline.is_some() => {
                    kill(&mut child).await;
                    return Err(AuditError::TimedOut(self.options.timeout.unwrap_or_default()));
                }
                read = stdout.read(&mut out_buf) => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => collector.push(&decoder.decode(&out_buf[..n])),
                    Err(e) => {
                        warn!("failed to read audit stdout: {}", e);
                        stdout_open = false;
                    }
                },
                read = stderr.read(&mut err_buf), if stderr_open => {
                    stderr_open = forward(read, &err_buf, &mut diagnostics).await;
                }
                status = child.wait(), if waiting => {
                    waiting = false;
                    exit_status = reaped(status);
                }
            }
        }

        // the report is complete once stdout closes
        let mut outcome = self.conclude(collector, decoder, ignore);

        let grace = tokio::time::sleep(EXIT_GRACE);
        tokio::pin!(grace);
        while stderr_open || waiting {
            tokio::select! {
                () = &mut grace => {
                    debug!("audit process still busy {:?} after its report, stopping it", EXIT_GRACE);
                    break;
                }
                () = cancel.cancelled() => break,
                read = stderr.read(&mut err_buf), if stderr_open => {
                    stderr_open = forward(read, &err_buf, &mut diagnostics).await;
                }
                status = child.wait(), if waiting => {
                    waiting = false;
                    exit_status = reaped(status);
                }
            }
        }
        if waiting {
            kill(&mut child).await;
        }

        outcome.exit_status = exit_status;
        Ok(outcome)
    }

    fn conclude(
        &self,
        mut collector: Collector,
        decoder: Utf8Decoder,
        ignore: &IgnoreSet,
    ) -> AuditOutcome {
        let rest = decoder.finish();
        if !rest.is_empty() {
            collector.push(&rest);
        }
        let report = collector.finish();
        let verdict = report.verdict(ignore);
        match &verdict {
            Verdict::Clean => info!(
                "audit found {} advisories, none unresolved",
                report.len()
            ),
            Verdict::Failed(unresolved) => info!(
                "audit found {} advisories, {} unresolved",
                report.len(),
                unresolved.count()
            ),
        }
        AuditOutcome {
            verdict,
            report,
            exit_status: None,
        }
    }
}

/// Copies one stderr read to our own stderr. Returns whether the pipe is still open.
async fn forward(read: std::io::Result<usize>, buf: &[u8], out: &mut Stderr) -> bool {
    match read {
        Ok(0) => false,
        Ok(n) => {
            if let Err(e) = out.write_all(&buf[..n]).await {
                debug!("failed to forward audit stderr: {}", e);
            }
            true
        }
        Err(e) => {
            warn!("failed to read audit stderr: {}", e);
            false
        }
    }
}

fn reaped(status: std::io::Result<ExitStatus>) -> Option<ExitStatus> {
    match status {
        Ok(status) => {
            debug!("audit process exited with {}", status);
            Some(status)
        }
        Err(e) => {
            warn!("failed to wait for audit process: {}", e);
            None
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("failed to kill audit process: {}", e);
    }
}

/// Routes stdout text to the reader for the selected format.
enum Collector {
    Text(ReportAccumulator),
    Json(String),
}

impl Collector {
    fn new(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Text => Collector::Text(ReportAccumulator::new()),
            ReportFormat::Json => Collector::Json(String::new()),
        }
    }

    fn push(&mut self, chunk: &str) {
        match self {
            Collector::Text(acc) => acc.update(chunk),
            Collector::Json(raw) => raw.push_str(chunk),
        }
    }

    fn finish(self) -> ReportState {
        match self {
            Collector::Text(acc) => acc.finish(),
            Collector::Json(raw) => ReportState::from_ids(read_json_report(&raw), raw),
        }
    }
}

/// Decodes a byte stream as UTF-8, holding back a character cut by a read.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // only an incomplete sequence at the very end
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_invocation() {
        let runner = AuditRunner::default();
        let (program, args) = runner.invocation();
        assert_eq!(program, "npm");
        assert_eq!(args, vec!["audit"]);
    }

    #[test]
    fn test_invocation_with_registry_and_json() {
        let runner = AuditRunner::new(AuditOptions {
            registry: Some("https://registry.example.com/".to_string()),
            format: ReportFormat::Json,
            ..Default::default()
        });
        let (_, args) = runner.invocation();
        assert_eq!(
            args,
            vec!["audit", "--registry", "https://registry.example.com/", "--json"]
        );
    }

    #[test]
    fn test_command_from_argv() {
        let command = AuditCommand::from_argv(["yarn", "npm", "audit"]).unwrap();
        assert_eq!(command.program, "yarn");
        assert_eq!(command.args, vec!["npm", "audit"]);
        assert!(AuditCommand::from_argv(Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "a│b".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "a");
        assert_eq!(decoder.decode(&bytes[2..]), "│b");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok\xffok"), "ok\u{fffd}ok");
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::advisory::AdvisoryId;

        fn sh(script: &str) -> AuditRunner {
            AuditRunner::new(AuditOptions {
                command: AuditCommand::from_argv(["sh", "-c", script, "sh"]).unwrap(),
                ..Default::default()
            })
        }

        fn ids(verdict: &Verdict) -> Vec<&str> {
            match verdict {
                Verdict::Clean => vec![],
                Verdict::Failed(u) => u.ids().iter().map(AdvisoryId::as_str).collect(),
            }
        }

        #[tokio::test]
        async fn test_run_reports_unignored() {
            let runner = sh(
                "printf '│ More info │ https://npmjs.com/advisories/534   │\\n'; \
                 printf '│ More info │ https://npmjs.com/advisories/118   │\\n'; \
                 printf '│ More info │ https://nodesecurity.io/advisories/975   │\\n'",
            );
            let ignore = IgnoreSet::parse(Some("534,118"));
            let outcome = runner.run(&ignore, CancellationToken::new()).await.unwrap();
            assert_eq!(ids(&outcome.verdict), vec!["975"]);
            assert_eq!(outcome.report.len(), 3);

            let err = outcome.into_result().unwrap_err();
            assert_eq!(
                err.to_string(),
                "1 vulnerabilities found. Node security advisories: 975"
            );
        }

        #[tokio::test]
        async fn test_clean_run_returns_report() {
            let runner = sh("printf 'found 0 vulnerabilities\\n'");
            let report = runner
                .check(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(report, "found 0 vulnerabilities\n");
        }

        #[tokio::test]
        async fn test_marker_split_between_writes() {
            let runner = sh(
                "printf '│ More info │ https://npmjs.co'; sleep 0.2; \
                 printf 'm/advisories/976   │\\n'",
            );
            let outcome = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(ids(&outcome.verdict), vec!["976"]);
        }

        #[tokio::test]
        async fn test_stderr_is_not_parsed() {
            let runner = sh(
                "printf 'https://npmjs.com/advisories/999   x\\n' >&2; printf 'found 0 vulnerabilities\\n'",
            );
            let outcome = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert!(outcome.verdict.is_clean());
        }

        #[tokio::test]
        async fn test_exit_status_does_not_decide() {
            let runner = sh("printf 'found 0 vulnerabilities\\n'; exit 3");
            let outcome = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert!(outcome.verdict.is_clean());
            assert_eq!(outcome.exit_status.and_then(|s| s.code()), Some(3));
        }

        #[tokio::test]
        async fn test_verdict_does_not_wait_for_exit() {
            let mut runner = sh(
                "printf '│ More info │ https://npmjs.com/advisories/975   │\\n'; exec 1>&-; sleep 3",
            );
            runner.options.timeout = Some(Duration::from_secs(1));
            let started = std::time::Instant::now();
            let outcome = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert!(started.elapsed() < Duration::from_secs(2));
            assert_eq!(ids(&outcome.verdict), vec!["975"]);
            assert!(outcome.exit_status.is_none());
        }

        #[tokio::test]
        async fn test_registry_is_passed() {
            let runner = AuditRunner::new(AuditOptions {
                command: AuditCommand::from_argv([
                    "sh",
                    "-c",
                    "[ \"$1\" = --registry ] && printf 'https://npmjs.com/advisories/42   via %s\\n' \"$2\"",
                    "sh",
                ])
                .unwrap(),
                registry: Some("https://registry.example.com/".to_string()),
                ..Default::default()
            });
            let outcome = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(ids(&outcome.verdict), vec!["42"]);
            assert!(outcome.report.raw().contains("registry.example.com"));
        }

        #[tokio::test]
        async fn test_json_format() {
            let runner = AuditRunner::new(AuditOptions {
                command: AuditCommand::from_argv([
                    "sh",
                    "-c",
                    "printf '{\"vulnerabilities\":{\"lodash\":{\"via\":[{\"source\":1523},\"x\"]}}}'",
                    "sh",
                ])
                .unwrap(),
                format: ReportFormat::Json,
                ..Default::default()
            });
            let outcome = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(ids(&outcome.verdict), vec!["1523"]);
        }

        #[tokio::test]
        async fn test_spawn_failure() {
            let runner = AuditRunner::new(AuditOptions {
                command: AuditCommand::from_argv(["/nonexistent/audit-tool"]).unwrap(),
                ..Default::default()
            });
            let err = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, AuditError::Spawn { .. }));
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let mut runner = sh("sleep 10");
            runner.options.timeout = Some(Duration::from_millis(100));
            let err = runner
                .run(&IgnoreSet::default(), CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, AuditError::TimedOut(_)));
        }

        #[tokio::test]
        async fn test_cancellation() {
            let runner = sh("sleep 10");
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });
            let err = runner
                .run(&IgnoreSet::default(), cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, AuditError::Cancelled));
        }
    }
}
