use std::error::Error as StdError;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::{
    config::{Config, ConfigError},
    database::{Connector, DatabaseError, DbSession, Process},
    table,
    transport::{Transport, TransportError, TransportFactory},
};

pub(crate) const CONFIRMATION: &str = "yes";

#[derive(Error, Debug)]
pub enum ReaperError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("fail to talk to the operator")]
    Terminal(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KillOutcome {
    pub process_id: u64,
    pub succeeded: bool,
    pub error_detail: Option<String>,
}

/// Outcomes of one termination pass, in the order they were attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KillReport {
    outcomes: Vec<KillOutcome>,
}

impl KillReport {
    fn record_success(&mut self, process_id: u64) {
        self.outcomes.push(KillOutcome {
            process_id,
            succeeded: true,
            error_detail: None,
        });
    }
    fn record_failure(&mut self, process_id: u64, error: &DatabaseError) {
        self.outcomes.push(KillOutcome {
            process_id,
            succeeded: false,
            error_detail: Some(error_chain(error)),
        });
    }
    pub fn outcomes(&self) -> &[KillOutcome] {
        &self.outcomes
    }
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// the operator did not confirm, nothing was killed
    Declined { candidates: usize },
    Completed(KillReport),
}

/// Drives one connect, list, filter, confirm, kill pass.
pub(crate) struct Reaper<F, C> {
    factory: F,
    connector: C,
    threshold_seconds: u64,
}

impl<F: TransportFactory, C: Connector> Reaper<F, C> {
    pub fn new(factory: F, connector: C, threshold_seconds: u64) -> Self {
        Reaper {
            factory,
            connector,
            threshold_seconds,
        }
    }

    /// Resources are released in reverse order on every path out of here.
    pub async fn run<R, W>(
        &self,
        config: &Config,
        input: R,
        output: W,
    ) -> Result<RunOutcome, ReaperError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let transport = self.factory.open(&config.database, &config.tunnel).await?;
        let outcome = self
            .run_with_transport(config, transport.as_ref(), input, output)
            .await;
        transport.close().await;
        outcome
    }

    async fn run_with_transport<R, W>(
        &self,
        config: &Config,
        transport: &dyn Transport,
        input: R,
        output: W,
    ) -> Result<RunOutcome, ReaperError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut session = self.connector.connect(&config.database, transport).await?;
        let outcome = self.run_with_session(session.as_mut(), input, output).await;
        session.close().await;
        outcome
    }

    async fn run_with_session<R, W>(
        &self,
        session: &mut dyn DbSession,
        mut input: R,
        mut output: W,
    ) -> Result<RunOutcome, ReaperError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let processes = session.list_processes().await?;
        info!("got {} processes", processes.len());
        output.write_all(table::render(&processes).as_bytes()).await?;

        let candidates = select_candidates(&processes, self.threshold_seconds);
        if candidates.is_empty() {
            info!(
                "no process has been running for {} seconds or more",
                self.threshold_seconds
            );
            output.flush().await?;
            return Ok(RunOutcome::Completed(KillReport::default()));
        }
        if !confirm(&mut input, &mut output, candidates.len()).await? {
            info!("not confirmed, leaving {} processes alone", candidates.len());
            return Ok(RunOutcome::Declined {
                candidates: candidates.len(),
            });
        }
        Ok(RunOutcome::Completed(terminate(session, &candidates).await))
    }
}

/// Processes running for at least `threshold_seconds`, in listing order.
pub(crate) fn select_candidates(processes: &[Process], threshold_seconds: u64) -> Vec<&Process> {
    processes
        .iter()
        .filter(|p| p.elapsed_seconds >= threshold_seconds)
        .collect()
}

pub(crate) fn is_confirmation(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case(CONFIRMATION)
}

/// Prompt failures are errors; an unreadable answer is a "no".
async fn confirm<R, W>(input: &mut R, output: &mut W, candidates: usize) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let prompt = format!("\nGoing to kill {candidates} processes? Yes/No → ");
    output.write_all(prompt.as_bytes()).await?;
    output.flush().await?;
    let mut answer = String::new();
    match input.read_line(&mut answer).await {
        Ok(_) => Ok(is_confirmation(&answer)),
        Err(e) => {
            debug!("could not read the answer: {}", e);
            Ok(false)
        }
    }
}

/// One kill at a time; a failure is recorded and the next process is tried.
async fn terminate(session: &mut dyn DbSession, candidates: &[&Process]) -> KillReport {
    let mut report = KillReport::default();
    for process in candidates {
        match session.kill_process(process.id).await {
            Ok(()) => report.record_success(process.id),
            Err(e) => {
                debug!("kill of process {} failed: {}", process.id, e);
                report.record_failure(process.id, &e);
            }
        }
    }
    report
}

/// `outer: inner: innermost`
pub(crate) fn error_chain(error: &dyn StdError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
