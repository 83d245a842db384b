mod support;

use pxs_boot::teardown::{
    ExitRefused, MMAP_GROWTH, MMAP_INITIAL_SIZE, MemoryMapError, TeardownError,
    exit_boot_services, snapshot,
};
use support::{Event, MockEnv};

#[test]
fn snapshot_terminates_after_k_plus_one_attempts() {
    for k in 0..5usize {
        let mut env = MockEnv::default();
        // each retry reports a larger map than the buffer just grown for it
        let mut sizes: Vec<usize> = (0..k).map(|i| MMAP_INITIAL_SIZE * 2 * (i + 2)).collect();
        let last = sizes.last().copied().unwrap_or(480);
        sizes.push(last);
        env.map_sizes = sizes.into();

        let mut buffer = vec![0u8; MMAP_INITIAL_SIZE];
        let (meta, attempts) = snapshot(&mut env, &mut buffer).unwrap();

        assert_eq!(attempts, k + 1, "k = {k}");
        assert!(buffer.len() >= meta.map_size);
        if k > 0 {
            assert_eq!(buffer.len(), last + MMAP_GROWTH);
        }
    }
}

#[test]
fn clean_exit_uses_a_single_snapshot() {
    let mut env = MockEnv::default();
    let snapshot = exit_boot_services(&mut env).unwrap();

    assert_eq!(snapshot.attempts(), 1);
    assert_eq!(
        env.events,
        vec![
            Event::EnterTeardown,
            Event::MemoryMap {
                buffer: MMAP_INITIAL_SIZE,
                ok: true
            },
            Event::Exit { key: 1, ok: true },
        ]
    );
}

#[test]
fn one_refusal_is_retried_with_a_fresh_key() {
    let mut env = MockEnv::default();
    env.exit_refusals = 1;

    let snapshot = exit_boot_services(&mut env).unwrap();

    assert_eq!(env.exit_calls(), 2);
    assert_eq!(env.map_calls(), 2);
    assert_eq!(snapshot.meta().key.0, 2);
    assert_eq!(env.events.last(), Some(&Event::Exit { key: 2, ok: true }));
}

#[test]
fn second_refusal_is_fatal_and_not_retried() {
    let mut env = MockEnv::default();
    env.exit_refusals = 2;

    let err = exit_boot_services(&mut env).unwrap_err();

    assert_eq!(
        err,
        TeardownError::ExitRefused(ExitRefused(0x8000_0000_0000_0002))
    );
    assert_eq!(env.exit_calls(), 2);
    assert_eq!(env.map_calls(), 2);
}

#[test]
fn retry_reuses_the_first_buffer() {
    let mut env = MockEnv::default();
    env.exit_refusals = 1;
    env.map_sizes = vec![9000, 9000, 9500].into();

    let snapshot = exit_boot_services(&mut env).unwrap();

    assert_eq!(snapshot.attempts(), 3);
    assert_eq!(snapshot.buffer_len(), 9000 + MMAP_GROWTH);
    assert_eq!(snapshot.meta().map_size, 9500);
    assert_eq!(
        env.events[3..],
        [
            Event::Exit { key: 1, ok: false },
            Event::MemoryMap {
                buffer: 9000 + MMAP_GROWTH,
                ok: true
            },
            Event::Exit { key: 2, ok: true },
        ]
    );
}

#[test]
fn retry_never_grows_the_buffer() {
    let mut env = MockEnv::default();
    env.exit_refusals = 1;
    // fits on the first try, then the map outgrows the buffer before the retry
    env.map_sizes = vec![480, 6000].into();

    let err = exit_boot_services(&mut env).unwrap_err();

    assert_eq!(
        err,
        TeardownError::MemoryMap(MemoryMapError::BufferTooSmall { required: 6000 })
    );
    assert_eq!(env.exit_calls(), 1);
    assert_eq!(env.map_calls(), 2);
}

#[test]
fn nothing_happens_between_final_snapshot_and_exit() {
    let mut env = MockEnv::default();
    env.map_sizes = vec![9000, 9000].into();
    exit_boot_services(&mut env).unwrap();

    let n = env.events.len();
    assert!(matches!(env.events[n - 2], Event::MemoryMap { ok: true, .. }));
    assert!(matches!(env.events[n - 1], Event::Exit { ok: true, .. }));
    assert_eq!(env.events[0], Event::EnterTeardown);
}
