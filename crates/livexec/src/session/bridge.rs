//! Stream bridge
//!
//! Couples a running interpreter to its client: output lines flow out as
//! they are produced, input lines flow into stdin, and the loop watches for
//! cancellation, the sentinel, transport loss and process exit. The status
//! poll starts at spawn, so the time budget holds before any client attaches.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{Instrument, debug, info_span, warn};

use crate::config::{ChannelConfig, Config};
use crate::process::{InterpreterProcess, classify};
use crate::session::cleanup::Teardown;
use crate::session::registry::AttachEnds;
use crate::types::{CancelReason, ExitOutcome, OutputStream, ServerMessage, SessionId};

/// Longest chunk relayed as one line; longer lines are split
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Timing and channel settings a driver runs with
#[derive(Debug, Clone)]
pub(crate) struct DriverSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) drain_timeout: Duration,
    pub(crate) attach_timeout: Duration,
    pub(crate) time_limit: Duration,
    pub(crate) backstop: Duration,
    pub(crate) timeout_exit_code: i32,
    pub(crate) channel: ChannelConfig,
}

impl DriverSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            drain_timeout: config.drain_timeout(),
            attach_timeout: config.attach_timeout(),
            time_limit: config.time_limit(),
            backstop: config.backstop_deadline(),
            timeout_exit_code: config.guard.timeout_exit_code,
            channel: config.channel.clone(),
        }
    }
}

/// What one status poll saw
#[derive(Debug)]
enum StatusCheck {
    Alive,
    /// The interpreter exited, possibly killed by the guard
    Exited(ExitOutcome),
    /// The supervisor gave up on a live interpreter
    Ended(ExitOutcome),
}

#[derive(Debug)]
enum OutputEvent {
    Line(ServerMessage),
    Closed(OutputStream),
}

/// Drives one interactive session from spawn to cleanup
#[derive(Debug)]
pub(crate) struct SessionDriver {
    pub(crate) id: SessionId,
    pub(crate) process: InterpreterProcess,
    pub(crate) teardown: Teardown,
    pub(crate) attach: oneshot::Receiver<AttachEnds>,
    pub(crate) cancel: Arc<Notify>,
    pub(crate) settings: DriverSettings,
}

impl SessionDriver {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("session", id = %self.id);
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(mut self) {
        let (events_tx, mut events) = mpsc::channel(self.settings.channel.buffer);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = self.process.take_stdout() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, events_tx.clone()));
        }
        if let Some(stderr) = self.process.take_stderr() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, events_tx.clone()));
        }
        drop(events_tx);
        let stdin = self.process.take_stdin().map(spawn_stdin_writer);

        let (outcome, mut client) = match self.await_client().await {
            Ok((mut ends, None)) => {
                let open = readers.len();
                let outcome = self.relay(&mut ends, &mut events, stdin, open).await;
                (outcome, Some(ends.output))
            }
            Ok((mut ends, Some(outcome))) => {
                let mut open = readers.len();
                self.drain(&mut ends, &mut events, &mut open).await;
                (outcome, Some(ends.output))
            }
            Err(outcome) => (outcome, None),
        };

        self.teardown.begin(&outcome);
        if client.is_none() {
            // A client that won the race against the timeout still gets
            // its terminal message.
            self.attach.close();
            client = self.attach.try_recv().ok().map(|ends| ends.output);
        }

        self.teardown
            .finish(&mut self.process, outcome, client)
            .await;
        for reader in readers {
            reader.abort();
        }
    }

    /// Wait for the client while still enforcing the time budget.
    ///
    /// An exit seen before the client arrives is kept and reported once it
    /// attaches, so buffered output is not lost. A timeout ends the session
    /// at once.
    async fn await_client(
        &mut self,
    ) -> Result<(AttachEnds, Option<ExitOutcome>), ExitOutcome> {
        let mut ticker = self.ticker();
        let expiry = tokio::time::sleep(self.settings.attach_timeout);
        tokio::pin!(expiry);
        let mut exited = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.notified() => {
                    return Err(ExitOutcome::Cancelled(CancelReason::Requested));
                }
                ends = &mut self.attach => {
                    return match ends {
                        Ok(ends) => Ok((ends, exited)),
                        Err(_) => Err(ExitOutcome::Cancelled(CancelReason::NeverAttached)),
                    };
                }
                _ = &mut expiry => {
                    debug!("no client attached in time");
                    return Err(
                        exited.unwrap_or(ExitOutcome::Cancelled(CancelReason::NeverAttached)),
                    );
                }
                _ = ticker.tick(), if exited.is_none() => match self.check_process() {
                    StatusCheck::Alive => {}
                    StatusCheck::Exited(ExitOutcome::TimedOut) => {
                        return Err(ExitOutcome::TimedOut);
                    }
                    StatusCheck::Exited(outcome) => {
                        debug!(?outcome, "interpreter exited before a client attached");
                        exited = Some(outcome);
                    }
                    StatusCheck::Ended(outcome) => return Err(outcome),
                },
            }
        }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Relay until something ends the session
    async fn relay(
        &mut self,
        ends: &mut AttachEnds,
        events: &mut mpsc::Receiver<OutputEvent>,
        mut stdin: Option<mpsc::UnboundedSender<String>>,
        mut open_streams: usize,
    ) -> ExitOutcome {
        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.notified() => {
                    return ExitOutcome::Cancelled(CancelReason::Requested);
                }
                line = ends.input.recv() => match line {
                    None => {
                        debug!("client channel closed");
                        return ExitOutcome::Cancelled(CancelReason::TransportLost);
                    }
                    Some(line) if self.settings.channel.is_sentinel(&line) => {
                        debug!("sentinel received");
                        return ExitOutcome::Cancelled(CancelReason::Sentinel);
                    }
                    Some(line) => forward_input(&mut stdin, line),
                },
                _ = ticker.tick() => match self.check_process() {
                    StatusCheck::Alive => {}
                    StatusCheck::Exited(outcome) => {
                        self.drain(ends, events, &mut open_streams).await;
                        return outcome;
                    }
                    StatusCheck::Ended(outcome) => return outcome,
                },
                event = events.recv(), if open_streams > 0 => match event {
                    Some(OutputEvent::Line(message)) => {
                        if ends.output.send(message).await.is_err() {
                            debug!("client stopped receiving");
                            return ExitOutcome::Cancelled(CancelReason::TransportLost);
                        }
                    }
                    Some(OutputEvent::Closed(stream)) => {
                        debug!(?stream, "output stream closed");
                        open_streams -= 1;
                    }
                    None => open_streams = 0,
                },
            }
        }
    }

    /// Non-blocking exit check, run on every tick
    fn check_process(&mut self) -> StatusCheck {
        match self.process.try_status() {
            Ok(Some(status)) => {
                let budget_exhausted = self.process.elapsed() >= self.settings.time_limit;
                let outcome = classify(status, self.settings.timeout_exit_code, budget_exhausted);
                debug!(?status, ?outcome, "interpreter exited");
                StatusCheck::Exited(outcome)
            }
            Ok(None) if self.process.elapsed() >= self.settings.backstop => {
                warn!(
                    elapsed_ms = self.process.elapsed().as_millis() as u64,
                    "interpreter outlived its deadline, killing"
                );
                StatusCheck::Ended(ExitOutcome::TimedOut)
            }
            Ok(None) => StatusCheck::Alive,
            Err(e) => {
                warn!(error = %e, "failed to poll interpreter status");
                StatusCheck::Ended(ExitOutcome::Errored {
                    code: None,
                    signal: None,
                })
            }
        }
    }

    /// Relay output still buffered after exit, bounded by the drain timeout
    async fn drain(
        &self,
        ends: &mut AttachEnds,
        events: &mut mpsc::Receiver<OutputEvent>,
        open_streams: &mut usize,
    ) {
        let deadline = Instant::now() + self.settings.drain_timeout;
        while *open_streams > 0 {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(OutputEvent::Line(message))) => {
                    if ends.output.send(message).await.is_err() {
                        return;
                    }
                }
                Ok(Some(OutputEvent::Closed(_))) => *open_streams -= 1,
                Ok(None) => return,
                Err(_) => {
                    debug!(open = *open_streams, "drain timed out");
                    return;
                }
            }
        }
    }
}

fn forward_input(stdin: &mut Option<mpsc::UnboundedSender<String>>, line: String) {
    let Some(writer) = stdin else {
        debug!("stdin closed, dropping input line");
        return;
    };
    if writer.send(line).is_err() {
        debug!("interpreter closed stdin");
        *stdin = None;
    }
}

/// Read one output stream line by line into the event channel
fn spawn_reader<R>(reader: R, stream: OutputStream, events: mpsc::Sender<OutputEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match (&mut reader).take(MAX_LINE_BYTES).read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(&buf);
                        let message = match stream {
                            OutputStream::Stdout => ServerMessage::Stdout(line),
                            OutputStream::Stderr => ServerMessage::Stderr(line),
                        };
                        if events.send(OutputEvent::Line(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(?stream, error = %e, "read failed");
                        break;
                    }
                }
            }
            let _ = events.send(OutputEvent::Closed(stream)).await;
        }
        .in_current_span(),
    )
}

/// Queue input lines into the interpreter's stdin, one write per line
fn spawn_stdin_writer(mut stdin: ChildStdin) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(
        async move {
            while let Some(line) = rx.recv().await {
                let mut data = line.into_bytes();
                data.push(b'\n');
                let written = async {
                    stdin.write_all(&data).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    debug!(error = %e, "stdin write failed");
                    break;
                }
            }
        }
        .in_current_span(),
    );
    tx
}

/// Decode one raw line, dropping the terminator
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
