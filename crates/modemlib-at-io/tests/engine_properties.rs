//! Property tests for the protocol engine: framing must not depend on how
//! the transport happens to chunk the byte stream.

use std::sync::Arc;
use std::time::Duration;

use modemlib_at_io::descriptor::{CommandSpec, DescriptorBuilder, DeviceDescriptor, transforms};
use modemlib_at_io::{Command, Engine, Response};
use modemlib_core::error::{Error, Result};
use modemlib_core::events::Notification;
use proptest::prelude::*;
use tokio::sync::oneshot;
use tokio::time::Instant;

fn descriptor() -> Arc<DeviceDescriptor> {
    Arc::new(
        DescriptorBuilder::new("props")
            .command(
                "CSQ",
                CommandSpec::new().extract(r"\+CSQ:\s*(?P<rssi>\d+),(?P<ber>\d+)"),
            )
            .async_pattern(r"\r\n\^(?P<name>[A-Z]+):\s*(?P<value>[^\r\n]*)\r\n")
            .signal("RSSI", "signal_quality", transforms::number)
            .build()
            .unwrap(),
    )
}

/// Split `data` at the given (unsorted, possibly duplicate) cut points.
fn chunk<'a>(data: &'a [u8], cuts: &[usize]) -> Vec<&'a [u8]> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();
    let mut out = Vec::new();
    let mut prev = 0;
    for cut in cuts.into_iter().chain(std::iter::once(data.len())) {
        if cut > prev {
            out.push(&data[prev..cut]);
            prev = cut;
        }
    }
    out
}

const NOTIFICATION_LINES: &[&[u8]] = &[
    b"\r\nRING\r\n",
    b"\r\n+CREG: 2\r\n",
    b"\r\n+CREG: 0,1\r\n",
    b"\r\n+CMTI: \"SM\",4\r\n",
    b"\r\n^RSSI:21\r\n",
    b"\r\nDEBUG: l1 sync\r\n",
];

proptest! {
    /// A response with interleaved notifications resolves identically no
    /// matter how it is chunked.
    #[test]
    fn response_is_chunking_invariant(cuts in proptest::collection::vec(0usize..512, 0..12)) {
        let stream: &[u8] =
            b"AT+CSQ\r\r\nRING\r\n\r\n+CSQ: 17,99\r\n\r\n^RSSI:17\r\n\r\nOK\r\n\r\n+CREG: 1\r\n";

        let mut engine = Engine::new(descriptor());
        let (tx, mut rx) = oneshot::channel();
        engine.dispatch(Command::new("CSQ", "AT+CSQ"), tx, Instant::now());

        let mut notifications = Vec::new();
        for piece in chunk(stream, &cuts) {
            notifications.extend(engine.feed(piece).notifications);
        }

        prop_assert!(engine.is_idle());
        prop_assert!(engine.idle_residue().is_empty());
        let resp = rx.try_recv().unwrap().unwrap();
        prop_assert_eq!(resp.first().unwrap().get("rssi"), Some("17"));
        prop_assert_eq!(notifications.len(), 3);
        prop_assert_eq!(&notifications[0], &Notification::IncomingCall);
        let is_vendor = matches!(notifications[1], Notification::VendorSignal { .. });
        let is_reg = matches!(notifications[2], Notification::NetworkRegStatus { .. });
        prop_assert!(is_vendor);
        prop_assert!(is_reg);
    }

    /// Every recognised idle line yields at most one notification and is
    /// consumed exactly once, leaving nothing behind.
    #[test]
    fn idle_spans_consumed_once(
        picks in proptest::collection::vec(0usize..NOTIFICATION_LINES.len(), 1..20),
        cuts in proptest::collection::vec(0usize..1024, 0..16),
    ) {
        let stream: Vec<u8> = picks.iter().flat_map(|&i| NOTIFICATION_LINES[i].to_vec()).collect();
        let expected = picks.iter().filter(|&&i| !NOTIFICATION_LINES[i].starts_with(b"\r\nDEBUG")).count();

        let mut engine = Engine::new(descriptor());
        let mut notifications = Vec::new();
        for piece in chunk(&stream, &cuts) {
            notifications.extend(engine.feed(piece).notifications);
        }

        prop_assert_eq!(notifications.len(), expected);
        prop_assert!(engine.idle_residue().is_empty());
    }

    /// Driven by a FIFO queue, the engine resolves every command exactly
    /// once, in order, and is only ever asked to dispatch while Idle.
    #[test]
    fn queue_resolves_each_command_once(outcomes in proptest::collection::vec(0u8..3, 1..10)) {
        let mut engine = Engine::new(descriptor());
        let start = Instant::now();
        let mut receivers: Vec<oneshot::Receiver<Result<Response>>> = Vec::new();

        for (i, outcome) in outcomes.iter().enumerate() {
            prop_assert!(engine.is_idle());
            let (tx, rx) = oneshot::channel();
            let cmd = Command::new("X", &format!("AT+X{i}")).with_timeout(Duration::from_secs(1));
            engine.dispatch(cmd, tx, start);
            receivers.push(rx);

            match outcome {
                0 => { engine.feed(b"\r\nOK\r\n"); }
                1 => { engine.feed(b"\r\n+CME ERROR: 3\r\n"); }
                _ => { prop_assert!(engine.expire(start + Duration::from_secs(2))); }
            }
            prop_assert!(engine.deadline().is_none());
        }

        for (rx, outcome) in receivers.iter_mut().zip(&outcomes) {
            let result = rx.try_recv().unwrap();
            match outcome {
                0 => prop_assert!(result.is_ok()),
                1 => prop_assert!(matches!(result, Err(Error::Device(_)))),
                _ => prop_assert!(matches!(result, Err(Error::Timeout { .. })), "expected Timeout, got {:?}", result),
            }
        }
    }
}
