//! Peer scanning.
//!
//! Polls the directory for nodes advertising the cluster service and
//! accumulates them by name until the operator presses enter, or after a
//! single poll in auto mode.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::{self, BufRead};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use stratus_common::ClusterError;

use crate::discovery::Directory;

/// How a scan ends
#[derive(Debug)]
pub enum ScanMode {
    /// Return after the first successful poll
    Auto,
    /// Keep polling until the signal fires
    UntilSignalled(oneshot::Receiver<io::Result<()>>),
}

/// Fire once the operator presses enter.
///
/// Closed stdin is an error, so a session without a terminal cannot end its
/// scan early by accident.
pub fn operator_stop_signal() -> oneshot::Receiver<io::Result<()>> {
    line_signal(io::BufReader::new(io::stdin()))
}

/// Read one line from `reader` on a plain thread and report it.
///
/// The runtime never waits on this thread, so an error elsewhere can end the
/// process while the read is still blocked.
fn line_signal<R: BufRead + Send + 'static>(mut reader: R) -> oneshot::Receiver<io::Result<()>> {
    let (tx, rx) = oneshot::channel();

    std::thread::spawn(move || {
        let mut line = String::new();
        let result = match reader.read_line(&mut line) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed before the scan was ended",
            )),
            Ok(_) => {
                println!("Ending scan");
                Ok(())
            }
            Err(e) => Err(e),
        };

        let _ = tx.send(result);
    });

    rx
}

fn stop_result(signal: Result<io::Result<()>, ()>) -> Result<(), ClusterError> {
    match signal {
        Ok(Ok(())) | Err(()) => Ok(()),
        Ok(Err(e)) => Err(ClusterError::Io(format!("Failed to read operator input: {e}"))),
    }
}

/// Accumulates peers from repeated discovery polls
pub struct PeerScanner<'a, D: Directory + ?Sized> {
    directory: &'a D,
    interval: Duration,
}

impl<'a, D: Directory + ?Sized> PeerScanner<'a, D> {
    pub fn new(directory: &'a D, interval: Duration) -> Self {
        Self {
            directory,
            interval,
        }
    }

    /// Scan `service` for peers other than `local_name`.
    ///
    /// Peers are keyed by name; the first address seen for a name is kept.
    pub async fn scan(
        &self,
        service: &str,
        local_name: &str,
        mode: ScanMode,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        let mut peers = BTreeMap::new();
        let mut stop = match mode {
            ScanMode::Auto => None,
            ScanMode::UntilSignalled(rx) => Some(rx),
        };

        tracing::info!(service = %service, auto = stop.is_none(), "Scanning for peers");

        loop {
            if let Some(rx) = stop.as_mut() {
                match rx.try_recv() {
                    Ok(result) => {
                        stop_result(Ok(result))?;
                        break;
                    }
                    // Reader went away without a result
                    Err(TryRecvError::Closed) => break,
                    Err(TryRecvError::Empty) => {}
                }
            }

            let found = self
                .directory
                .lookup(service, local_name)
                .await
                .map_err(|e| ClusterError::Discovery(format!("{e:#}")))?;

            for (name, address) in found {
                if let Entry::Vacant(entry) = peers.entry(name) {
                    tracing::info!(peer = %entry.key(), address = %address, "Found peer");
                    println!(" Found {:?} at {:?}", entry.key(), address);
                    entry.insert(address);
                }
            }

            let Some(rx) = stop.as_mut() else {
                break;
            };

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                signal = rx => {
                    stop_result(signal.map_err(|_| ()))?;
                    break;
                }
            }
        }

        tracing::info!(peers = peers.len(), "Scan finished");
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDirectory;
    use tokio::time::Instant;

    const SERVICE: &str = "_stratus";

    #[tokio::test(start_paused = true)]
    async fn test_auto_scan_with_no_peers_returns_immediately() {
        let directory = ScriptedDirectory::new();
        let scanner = PeerScanner::new(&directory, Duration::from_secs(5));

        let start = Instant::now();
        let peers = scanner.scan(SERVICE, "me", ScanMode::Auto).await.unwrap();

        assert!(peers.is_empty());
        assert_eq!(directory.lookup_count(SERVICE), 1);
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_dedupes_by_name_and_keeps_first_address() {
        let directory = ScriptedDirectory::new();
        directory.script(
            SERVICE,
            &[
                &[("a", "10.0.0.1"), ("b", "10.0.0.2")],
                &[("b", "10.0.0.99"), ("c", "10.0.0.3"), ("me", "10.0.0.4")],
                &[("a", "10.0.0.77")],
            ],
        );

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            // Polls happen at 0s, 5s and 10s
            tokio::time::sleep(Duration::from_secs(12)).await;
            let _ = tx.send(Ok(()));
        });

        let scanner = PeerScanner::new(&directory, Duration::from_secs(5));
        let peers = scanner
            .scan(SERVICE, "me", ScanMode::UntilSignalled(rx))
            .await
            .unwrap();

        assert_eq!(directory.lookup_count(SERVICE), 3);
        assert_eq!(
            peers,
            BTreeMap::from([
                ("a".to_string(), "10.0.0.1".to_string()),
                ("b".to_string(), "10.0.0.2".to_string()),
                ("c".to_string(), "10.0.0.3".to_string()),
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_before_first_poll_skips_lookup() {
        let directory = ScriptedDirectory::new();
        let (tx, rx) = oneshot::channel();
        tx.send(Ok(())).unwrap();

        let scanner = PeerScanner::new(&directory, Duration::from_secs(5));
        let peers = scanner
            .scan(SERVICE, "me", ScanMode::UntilSignalled(rx))
            .await
            .unwrap();

        assert!(peers.is_empty());
        assert_eq!(directory.lookup_count(SERVICE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_read_error_propagates() {
        let directory = ScriptedDirectory::new();
        let (tx, rx) = oneshot::channel();
        tx.send(Err(io::Error::other("stdin closed"))).unwrap();

        let scanner = PeerScanner::new(&directory, Duration::from_secs(5));
        let err = scanner
            .scan(SERVICE, "me", ScanMode::UntilSignalled(rx))
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::Io(_)));
    }

    #[tokio::test]
    async fn test_line_ends_scan() {
        let signal = line_signal(io::Cursor::new(b"\n".to_vec()));
        assert!(signal.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_closed_input_is_an_error() {
        let signal = line_signal(io::empty());
        let err = signal.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let directory = ScriptedDirectory::new();
        let scanner = PeerScanner::new(&directory, Duration::from_secs(5));
        let err = scanner
            .scan(SERVICE, "me", ScanMode::UntilSignalled(line_signal(io::empty())))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Io(_)));
    }

    /// Reader that blocks until its sender is dropped
    struct BlockedInput(std::sync::mpsc::Receiver<()>);

    impl io::Read for BlockedInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_pending_read_does_not_hold_runtime_open() {
        let (release, blocked) = std::sync::mpsc::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let directory = ScriptedDirectory::new();
            directory.fail(SERVICE);
            let scanner = PeerScanner::new(&directory, Duration::from_secs(5));
            let signal = line_signal(io::BufReader::new(BlockedInput(blocked)));

            let err = scanner
                .scan(SERVICE, "me", ScanMode::UntilSignalled(signal))
                .await
                .unwrap_err();
            assert!(matches!(err, ClusterError::Discovery(_)));
        });

        let start = std::time::Instant::now();
        drop(runtime);
        assert!(start.elapsed() < Duration::from_secs(1));

        drop(release);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_discovery_error() {
        let directory = ScriptedDirectory::new();
        directory.fail(SERVICE);

        let scanner = PeerScanner::new(&directory, Duration::from_secs(5));
        let err = scanner.scan(SERVICE, "me", ScanMode::Auto).await.unwrap_err();

        assert!(matches!(err, ClusterError::Discovery(_)));
    }
}
