//! Command sequences with per-step response processors.
//!
//! A sequence is an ordered list of [`AtStep`]s run on one port. After each
//! step its processor decides whether to continue with the next step, finish
//! successfully with an optional value, or fail. Steps never overlap and the
//! sequence resolves exactly once.
//!
//! ```text
//! step 1 ──► processor ──► Continue ──► step 2 ──► processor ──► Success(v)
//!                     └──► Failure(e)                       └──► Continue ──► Ok(None)
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use modemlib_core::error::{Error, Result};

use crate::io::{AtCommand, AtPort};

/// What to do after a step's reply has been examined.
#[derive(Debug)]
pub enum StepOutcome<T> {
    /// Run the next step (or finish with `Ok(None)` after the last one).
    Continue,
    /// Finish the sequence successfully.
    Success(Option<T>),
    /// Abort the sequence with this error.
    Failure(Error),
}

/// Examines one step's result.
///
/// Arguments: the command text, the reply or error, and whether this is the
/// last step of the sequence.
pub type ResponseProcessor<T> = fn(&str, Result<String>, bool) -> StepOutcome<T>;

/// One command in a sequence.
#[derive(Debug, Clone)]
pub struct AtStep<T> {
    pub command: Cow<'static, str>,
    pub timeout: Duration,
    pub allow_cached: bool,
    /// `None` continues regardless of the outcome.
    pub processor: Option<ResponseProcessor<T>>,
    /// Delay before the following step starts.
    pub wait: Duration,
}

impl<T> AtStep<T> {
    /// A step with a timeout in whole seconds and no processor.
    pub fn new(command: impl Into<Cow<'static, str>>, timeout_secs: u64) -> Self {
        AtStep {
            command: command.into(),
            timeout: Duration::from_secs(timeout_secs),
            allow_cached: false,
            processor: None,
            wait: Duration::ZERO,
        }
    }

    pub fn cached(mut self, allow_cached: bool) -> Self {
        self.allow_cached = allow_cached;
        self
    }

    pub fn processor(mut self, processor: ResponseProcessor<T>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
}

/// Run `steps` in order on `port`.
///
/// Resolves with the first `Success`, the first `Failure`, or `Ok(None)` if
/// the last step continued. When `cancel` fires, resolves with
/// [`Error::Cancelled`] and runs no further steps.
pub async fn run_sequence<T>(
    port: &AtPort,
    steps: &[AtStep<T>],
    cancel: Option<&CancellationToken>,
) -> Result<Option<T>> {
    let is_cancelled = || cancel.is_some_and(|c| c.is_cancelled());

    for (i, step) in steps.iter().enumerate() {
        if is_cancelled() {
            debug!(port = port.name(), step = i, "sequence cancelled");
            return Err(Error::Cancelled);
        }

        let command = AtCommand::new(step.command.as_ref(), step.timeout).cached(step.allow_cached);
        let result = match cancel {
            Some(token) => port.command_cancellable(command, token).await,
            None => port.command_full(command).await,
        };
        if matches!(result, Err(Error::Cancelled)) || is_cancelled() {
            return Err(Error::Cancelled);
        }

        let is_last = i + 1 == steps.len();
        match step.processor {
            None => {
                if let Err(e) = &result {
                    debug!(command = %step.command, error = %e, "ignoring step error");
                }
            }
            Some(processor) => match processor(&step.command, result, is_last) {
                StepOutcome::Continue => {}
                StepOutcome::Success(value) => return Ok(value),
                StepOutcome::Failure(e) => return Err(e),
            },
        }

        if !step.wait.is_zero() && !is_last {
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(step.wait) => {}
                    }
                }
                None => tokio::time::sleep(step.wait).await,
            }
        }
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// Standard processors
// ---------------------------------------------------------------------------

/// Fail on error, otherwise continue.
pub fn no_result_continue<T>(
    _command: &str,
    result: Result<String>,
    _last: bool,
) -> StepOutcome<T> {
    match result {
        Ok(_) => StepOutcome::Continue,
        Err(e) => StepOutcome::Failure(e),
    }
}

/// Continue on error, otherwise finish with no value.
pub fn continue_on_error<T>(_command: &str, result: Result<String>, _last: bool) -> StepOutcome<T> {
    match result {
        Ok(_) => StepOutcome::Success(None),
        Err(_) => StepOutcome::Continue,
    }
}

/// Finish with the reply text; on an equipment error try the next step
/// unless this is the last one.
pub fn string_ignore_at_errors(
    command: &str,
    result: Result<String>,
    last: bool,
) -> StepOutcome<String> {
    match result {
        Ok(reply) => StepOutcome::Success(Some(reply)),
        Err(e) => ignore_at_errors(command, e, last),
    }
}

/// Error half of the `*_ignore_at_errors` processors: an equipment error
/// moves on to the next step unless this is the last one.
pub fn ignore_at_errors<T>(command: &str, error: Error, last: bool) -> StepOutcome<T> {
    if error.is_mobile_equipment() && !last {
        debug!(command, error = %error, "equipment error, trying next command");
        StepOutcome::Continue
    } else {
        StepOutcome::Failure(error)
    }
}

// ---------------------------------------------------------------------------
// Caller-orchestrated retry
// ---------------------------------------------------------------------------

/// Run `op` up to `attempts` times, sleeping `delay` between attempts while
/// `should_retry` accepts the error.
///
/// The last error is returned once the attempts are exhausted or
/// `should_retry` declines.
pub async fn retry_with_delay<T, F, Fut, R>(
    attempts: u32,
    delay: Duration,
    mut should_retry: R,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(&Error) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && should_retry(&e) => {
                warn!(attempt, attempts, error = %e, "operation failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
