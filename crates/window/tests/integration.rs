//! Integration tests for bulwark-window
//!
//! Every scenario runs against the in-process backend, and again against
//! SysV shared memory when the host allows it.

use std::time::Duration;

use bulwark_config::WindowOptions;
use bulwark_errors::{Error, SyncError};
use bulwark_platform::{Capabilities, PlatformContext};
use bulwark_window::SlidingWindow;

#[derive(Clone, Copy, Debug)]
enum Backend {
    Local,
    Shared,
}

fn backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Local];
    if Capabilities::detect().sync_enabled() {
        backends.push(Backend::Shared);
    }
    backends
}

fn open(backend: Backend, name: &str, size: usize) -> SlidingWindow {
    let options = WindowOptions::new(format!("it-{name}-{backend:?}-{}", std::process::id()))
        .size(size)
        .permissions(0o600)
        .timeout(Duration::from_millis(500));
    match backend {
        Backend::Local => SlidingWindow::open_local(&options).unwrap(),
        Backend::Shared => {
            let context = PlatformContext::with_capabilities(Capabilities::detect(), None);
            SlidingWindow::open(&context, &options).unwrap()
        }
    }
}

fn reopen(backend: Backend, window: &SlidingWindow, size: usize) -> SlidingWindow {
    let options = WindowOptions::new(window.name())
        .size(size)
        .permissions(0o600)
        .timeout(Duration::from_millis(500));
    match backend {
        Backend::Local => SlidingWindow::open_local(&options).unwrap(),
        Backend::Shared => {
            let context = PlatformContext::with_capabilities(Capabilities::detect(), None);
            SlidingWindow::open(&context, &options).unwrap()
        }
    }
}

#[test]
fn test_two_handles_share_entries() {
    let large_number = 1_700_000_000_123;
    for backend in backends() {
        let first = open(backend, "share", 6);
        first.push(large_number).unwrap();
        assert_eq!(first.first().unwrap(), Some(large_number));
        assert_eq!(first.last().unwrap(), Some(large_number));
        assert_eq!(first.size().unwrap(), 1);

        let second = reopen(backend, &first, 6);
        assert_eq!(second.size().unwrap(), 1);
        for v in [6, 4, 3, 2] {
            second.push(v).unwrap();
        }
        assert_eq!(second.size().unwrap(), 5);
        assert_eq!(second.first().unwrap(), Some(large_number));
        assert_eq!(second.last().unwrap(), Some(2));

        assert_eq!(first.size().unwrap(), 5);
        assert_eq!(first.first().unwrap(), Some(large_number));
        assert_eq!(first.last().unwrap(), Some(2));
        first.destroy().unwrap();
    }
}

#[test]
fn test_push_then_pop_leaves_window_empty() {
    for backend in backends() {
        let window = open(backend, "roundtrip", 3);
        window.push(17).unwrap();
        assert_eq!(window.pop().unwrap(), Some(17));
        assert_eq!(window.size().unwrap(), 0);
        assert_eq!(window.pop().unwrap(), None);
        assert_eq!(window.first().unwrap(), None);
        assert_eq!(window.last().unwrap(), None);
        window.destroy().unwrap();
    }
}

#[test]
fn test_push_evicts_oldest_at_capacity() {
    for backend in backends() {
        let window = open(backend, "evict", 3);
        for v in 1..=5 {
            window.push(v).unwrap();
        }
        assert_eq!(window.entries().unwrap(), vec![3, 4, 5]);
        assert_eq!(window.max_size().unwrap(), 3);
        window.clear().unwrap();
        assert_eq!(window.size().unwrap(), 0);
        assert_eq!(window.max_size().unwrap(), 3);
        window.destroy().unwrap();
    }
}

#[test]
fn test_shrink_keeps_most_recent() {
    for backend in backends() {
        let window = open(backend, "shrink", 6);
        for v in [80, 90, 100, 110, 120] {
            window.push(v).unwrap();
        }
        window.resize_to(3).unwrap();
        assert_eq!(window.max_size().unwrap(), 3);
        assert_eq!(window.entries().unwrap(), vec![100, 110, 120]);
        window.destroy().unwrap();
    }
}

#[test]
fn test_grow_then_shrink_back_preserves_entries() {
    for backend in backends() {
        let window = open(backend, "grow", 4);
        for v in [1, 2, 3, 4] {
            window.push(v).unwrap();
        }
        window.resize_to(8).unwrap();
        assert_eq!(window.entries().unwrap(), vec![1, 2, 3, 4]);
        window.resize_to(4).unwrap();
        assert_eq!(window.entries().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(window.max_size().unwrap(), 4);
        window.destroy().unwrap();
    }
}

#[test]
fn test_other_handles_follow_resize() {
    for backend in backends() {
        let worker = open(backend, "follow", 4);
        let other = reopen(backend, &worker, 4);
        for v in [10, 20, 30, 40] {
            worker.push(v).unwrap();
        }

        // A restarted worker configured with a smaller window resizes it
        let restarted = reopen(backend, &worker, 2);
        assert_eq!(restarted.entries().unwrap(), vec![30, 40]);

        assert_eq!(other.max_size().unwrap(), 2);
        other.push(50).unwrap();
        assert_eq!(worker.entries().unwrap(), vec![40, 50]);

        worker.resize_to(5).unwrap();
        other.push(60).unwrap();
        assert_eq!(restarted.entries().unwrap(), vec![40, 50, 60]);
        assert_eq!(restarted.max_size().unwrap(), 5);
        worker.destroy().unwrap();
    }
}

#[test]
fn test_destroy_invalidates_other_handles() {
    for backend in backends() {
        let window = open(backend, "destroyed", 2);
        let other = reopen(backend, &window, 2);
        window.push(1).unwrap();
        window.destroy().unwrap();

        let err = other.push(2).unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::Internal { .. })));

        let fresh = reopen(backend, &window, 2);
        assert_eq!(fresh.size().unwrap(), 0);
        fresh.destroy().unwrap();
    }
}

#[test]
fn test_destroy_after_missed_resize_starts_over() {
    for backend in backends() {
        let resizer = open(backend, "destroy-resized", 4);
        let stale = reopen(backend, &resizer, 4);
        for v in [1, 2, 3, 4] {
            resizer.push(v).unwrap();
        }
        resizer.resize_to(2).unwrap();

        stale.destroy().unwrap();

        let fresh = reopen(backend, &resizer, 4);
        assert_eq!(fresh.size().unwrap(), 0);
        assert_eq!(fresh.max_size().unwrap(), 4);
        fresh.destroy().unwrap();
    }
}

#[test]
fn test_held_section_times_out_other_handle() {
    for backend in backends() {
        let window = open(backend, "held", 2);
        let other = reopen(backend, &window, 2);
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        std::thread::scope(|scope| {
            let window = &window;
            scope.spawn(move || {
                window
                    .execute_atomically(Duration::ZERO, |ring| {
                        ring.push(1);
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                    })
                    .unwrap();
            });
            entered_rx.recv().unwrap();

            let err = other
                .execute_atomically(Duration::from_millis(20), |_| ())
                .unwrap_err();
            assert!(err.is_timeout());
            release_tx.send(()).unwrap();
        });

        assert_eq!(other.entries().unwrap(), vec![1]);
        window.destroy().unwrap();
    }
}
