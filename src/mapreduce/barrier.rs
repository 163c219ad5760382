//! Countdown barrier that holds the master until every job of a phase has
//! reported completion.

use crate::mapreduce::JobType;
use crate::utils::ViewmasterError;

use tokio::sync::mpsc;

/// Completion reporting handle given to each dispatch loop of a phase.
#[derive(Debug, Clone)]
pub(crate) struct PhaseCompleter {
    tx_done: mpsc::UnboundedSender<usize>,
}

impl PhaseCompleter {
    /// Reports job `job_number` as done.
    pub(crate) fn complete(
        &self,
        job_number: usize,
    ) -> Result<(), ViewmasterError> {
        Ok(self.tx_done.send(job_number)?)
    }
}

/// Barrier over the `total` jobs of one phase. Completions may arrive in any
/// order; each job index counts once.
#[derive(Debug)]
pub(crate) struct PhaseBarrier {
    /// Phase this barrier guards.
    phase: JobType,

    /// Per-index completion flags.
    done: Vec<bool>,

    /// Number of indices not yet completed.
    remaining: usize,

    /// Sender side of the completion channel, dropped once waiting starts
    /// so that a starved barrier notices all completers are gone.
    tx_done: Option<mpsc::UnboundedSender<usize>>,

    /// Receiver side of the completion channel.
    rx_done: mpsc::UnboundedReceiver<usize>,
}

impl PhaseBarrier {
    /// Creates a barrier expecting `total` distinct completions.
    pub(crate) fn new(phase: JobType, total: usize) -> Self {
        let (tx_done, rx_done) = mpsc::unbounded_channel();
        PhaseBarrier {
            phase,
            done: vec![false; total],
            remaining: total,
            tx_done: Some(tx_done),
            rx_done,
        }
    }

    /// Creates a completion handle. Must be called before `wait()`.
    pub(crate) fn completer(&self) -> Result<PhaseCompleter, ViewmasterError> {
        match self.tx_done {
            Some(ref tx_done) => Ok(PhaseCompleter {
                tx_done: tx_done.clone(),
            }),
            None => logged_err!("{} barrier already waiting", self.phase),
        }
    }

    /// Blocks until every job index of the phase has reported completion.
    /// Fails if all completers are dropped while jobs are still missing.
    pub(crate) async fn wait(&mut self) -> Result<(), ViewmasterError> {
        self.tx_done = None;

        while self.remaining > 0 {
            let Some(job_number) = self.rx_done.recv().await else {
                return logged_err!(
                    "{} barrier starved with {} jobs unfinished",
                    self.phase,
                    self.remaining
                );
            };

            match self.done.get_mut(job_number) {
                None => {
                    pf_error!(
                        "{} {} out of range, ignored",
                        self.phase,
                        job_number
                    );
                }
                Some(true) => {
                    pf_warn!(
                        "{} {} reported done twice, ignored",
                        self.phase,
                        job_number
                    );
                }
                Some(flag) => {
                    *flag = true;
                    self.remaining -= 1;
                    pf_info!("{} {} has done", self.phase, job_number);
                }
            }
        }

        Ok(())
    }

    /// Number of jobs not yet completed.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }
}
