//! One-way output relay from an elevated child to its parent.
//!
//! The parent creates a named shared region and launches the child with its
//! name. The child appends NUL-terminated text; the parent waits for the
//! first byte, then drains complete lines to its own console until the child
//! exits.

mod cursor;
mod region;

use std::io;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::config::RelaySection;
use crate::elevation::ChildProcess;
use crate::ui::Console;

pub use cursor::{RelayReader, RelayWriter};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Could not initialize memory data exchange. Timeframe exceeded.")]
    HandshakeTimeout,

    #[error("child process error: {0}")]
    Child(#[from] io::Error),
}

/// Handshake backoff and drain cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTiming {
    pub initial: Duration,
    pub step: Duration,
    pub limit: Duration,
    pub interval: Duration,
}

impl From<&RelaySection> for RelayTiming {
    fn from(section: &RelaySection) -> Self {
        Self {
            initial: Duration::from_millis(section.handshake_initial_ms),
            step: Duration::from_millis(section.handshake_step_ms),
            limit: Duration::from_millis(section.handshake_limit_ms),
            interval: section.drain_interval(),
        }
    }
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self::from(&RelaySection::default())
    }
}

/// A fresh region name, short enough for every platform's limit.
pub fn session_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("tiered-{}", &id[..20])
}

/// Waits for the child's first published byte.
///
/// Polls with a linearly growing delay. A child that exits before writing
/// anything ends the wait successfully. Once the next delay would exceed
/// `timing.limit` the child is killed and the handshake fails.
pub async fn handshake(
    reader: &RelayReader,
    child: &mut dyn ChildProcess,
    timing: &RelayTiming,
) -> Result<(), RelayError> {
    let mut delay = timing.initial;
    loop {
        if child.try_exit_code()?.is_some() {
            tracing::debug!("child exited before handshake");
            return Ok(());
        }
        if delay > timing.limit {
            tracing::warn!(region = reader.name(), "relay handshake timed out");
            if let Err(e) = child.kill().await {
                tracing::warn!("could not kill child: {e}");
            }
            return Err(RelayError::HandshakeTimeout);
        }

        tokio::time::sleep(delay).await;
        if reader.has_content() {
            return Ok(());
        }
        delay += timing.step;
    }
}

/// Forwards complete lines to `console` until the child has exited and
/// nothing new arrived, then flushes any unterminated tail.
pub async fn drain(
    reader: &mut RelayReader,
    child: &mut dyn ChildProcess,
    console: &Console,
    interval: Duration,
) -> Result<(), RelayError> {
    loop {
        let exited = child.try_exit_code()?.is_some();
        let lines = reader.read_lines();
        let idle = lines.is_empty();
        for line in lines {
            console.line(&line);
        }
        if exited && idle {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    if let Some(rest) = reader.take_remainder() {
        console.line(&rest);
    }
    Ok(())
}

/// Handshake, drain, and reap. Returns the child's exit code.
pub async fn forward(
    reader: &mut RelayReader,
    child: &mut dyn ChildProcess,
    console: &Console,
    timing: &RelayTiming,
) -> Result<i32, RelayError> {
    handshake(reader, child, timing).await?;
    drain(reader, child, console, timing.interval).await?;
    Ok(child.wait().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChild;
    use tokio::time::Instant;

    fn region() -> (RelayReader, RelayWriter) {
        let name = session_name();
        let reader = RelayReader::create(&name, 4096).unwrap();
        let writer = RelayWriter::open(&name, 4096).unwrap();
        (reader, writer)
    }

    #[test]
    fn session_names_are_short_and_unique() {
        let a = session_name();
        let b = session_name();
        assert_ne!(a, b);
        assert!(a.starts_with("tiered-"));
        assert!(a.len() < 31);
    }

    #[test]
    fn timing_from_defaults() {
        let t = RelayTiming::default();
        assert_eq!(t.initial, Duration::from_millis(20));
        assert_eq!(t.step, Duration::from_millis(200));
        assert_eq!(t.limit, Duration::from_millis(3500));
        assert_eq!(t.interval, Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_child_times_out_and_is_killed() {
        let (reader, _writer) = region();
        let mut child = FakeChild::running();
        let start = Instant::now();

        let err = handshake(&reader, &mut child, &RelayTiming::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::HandshakeTimeout));
        assert!(child.was_killed());
        // 18 polls: 20ms, 220ms, ... 3420ms.
        assert_eq!(start.elapsed(), Duration::from_millis(30_960));
    }

    #[tokio::test(start_paused = true)]
    async fn content_just_before_the_last_poll_is_accepted() {
        let (reader, mut writer) = region();
        let mut child = FakeChild::running();
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30_900)).await;
            writer.append(b"hello\n").unwrap();
            writer
        });

        handshake(&reader, &mut child, &RelayTiming::default())
            .await
            .unwrap();
        assert!(!child.was_killed());
        late.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn content_after_the_last_poll_is_too_late() {
        let (reader, mut writer) = region();
        let mut child = FakeChild::running();
        let _late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(31_000)).await;
            let _ = writer.append(b"hello\n");
        });

        let result = handshake(&reader, &mut child, &RelayTiming::default()).await;
        assert!(matches!(result, Err(RelayError::HandshakeTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn exited_child_ends_handshake() {
        let (reader, _writer) = region();
        let mut child = FakeChild::exited(0);
        handshake(&reader, &mut child, &RelayTiming::default())
            .await
            .unwrap();
        assert!(!child.was_killed());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_forwards_every_line_once_in_order() {
        let (mut reader, mut writer) = region();
        let mut child = FakeChild::running();
        let exit = child.exit_handle();
        let console = Console::capture();

        for i in 0..5 {
            writer.append(format!("line {i}\n").as_bytes()).unwrap();
        }
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(45)).await;
            writer.append(b"line 5\nline ").unwrap();
            tokio::time::sleep(Duration::from_millis(45)).await;
            writer.append(b"6\nline 7\n").unwrap();
            exit.exit(0);
        });

        drain(&mut reader, &mut child, &console, Duration::from_millis(20))
            .await
            .unwrap();
        producer.await.unwrap();

        let expected: Vec<String> = (0..8).map(|i| format!("line {i}")).collect();
        assert_eq!(console.captured(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_flushes_unterminated_tail_after_exit() {
        let (mut reader, mut writer) = region();
        writer.append(b"Task completed.\nPlaybook fini").unwrap();
        let mut child = FakeChild::exited(0);
        let console = Console::capture();

        drain(&mut reader, &mut child, &console, Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(console.captured(), vec!["Task completed.", "Playbook fini"]);
    }

    #[tokio::test(start_paused = true)]
    async fn forward_returns_exit_code() {
        let (mut reader, mut writer) = region();
        writer.append(b"Status: Completed\n").unwrap();
        let mut child = FakeChild::exited(3);
        let console = Console::capture();

        let code = forward(&mut reader, &mut child, &console, &RelayTiming::default())
            .await
            .unwrap();

        assert_eq!(code, 3);
        assert_eq!(console.captured(), vec!["Status: Completed"]);
    }
}
