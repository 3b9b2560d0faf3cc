// ==============================================
// SINGLE-FLIGHT LOADER TESTS (integration)
// ==============================================
//
// Concurrent get_or_load callers for one key must share a single loader
// invocation. These tests need real threads and belong here rather than
// in any single source file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use lrukit::{Cache, CacheBuilder, CacheError, CancelToken, LoaderFn};

// ==============================================
// Deduplication
// ==============================================

#[test]
fn hundred_callers_share_one_loader_invocation() {
    let cache: Arc<Cache<String, u64>> = Arc::new(Cache::new(100));
    let invocations = Arc::new(AtomicUsize::new(0));

    let loader: LoaderFn<String, u64> = {
        let invocations = Arc::clone(&invocations);
        Arc::new(move |_token, _key| {
            invocations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            Ok((42, None))
        })
    };

    let barrier = Arc::new(Barrier::new(100));
    let handles: Vec<_> = (0..100)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let loader = loader.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_load(&CancelToken::new(), &"z".to_string(), Some(&loader))
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 42);
    }
    assert_eq!(
        invocations.load(Ordering::SeqCst),
        1,
        "loader must run exactly once for concurrent callers"
    );
    assert_eq!(cache.get(&"z".to_string()), Some(42));
}

#[test]
fn distinct_keys_do_not_block_each_other() {
    let cache: Arc<Cache<u64, u64>> = Arc::new(Cache::new(100));
    let invocations = Arc::new(AtomicUsize::new(0));

    let loader: LoaderFn<u64, u64> = {
        let invocations = Arc::clone(&invocations);
        Arc::new(move |_token, key| {
            invocations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok((*key * 2, None))
        })
    };

    let handles: Vec<_> = (0..8u64)
        .map(|key| {
            let cache = Arc::clone(&cache);
            let loader = loader.clone();
            thread::spawn(move || cache.get_or_load(&CancelToken::new(), &key, Some(&loader)))
        })
        .collect();

    for (key, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap().unwrap(), key as u64 * 2);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 8);
}

// ==============================================
// Failure broadcast and re-entry
// ==============================================

#[test]
fn loader_failure_reaches_every_sharing_caller() {
    let cache: Arc<Cache<String, u64>> = Arc::new(Cache::new(16));
    let invocations = Arc::new(AtomicUsize::new(0));

    let loader: LoaderFn<String, u64> = {
        let invocations = Arc::clone(&invocations);
        Arc::new(move |_token, _key| {
            invocations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            Err("backend down".into())
        })
    };

    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let loader = loader.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_load(&CancelToken::new(), &"bad".to_string(), Some(&loader))
            })
        })
        .collect();

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, CacheError::LoaderFailed(_)));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get(&"bad".to_string()), None, "failure must not insert");
}

#[test]
fn completed_flight_is_forgotten() {
    let cache: Cache<String, u64> = Cache::new(16);
    let invocations = Arc::new(AtomicUsize::new(0));

    let loader: LoaderFn<String, u64> = {
        let invocations = Arc::clone(&invocations);
        Arc::new(move |_token, _key| {
            invocations.fetch_add(1, Ordering::SeqCst);
            Err("always failing".into())
        })
    };

    let token = CancelToken::new();
    for _ in 0..3 {
        let err = cache
            .get_or_load(&token, &"k".to_string(), Some(&loader))
            .unwrap_err();
        assert!(matches!(err, CacheError::LoaderFailed(_)));
    }
    // No in-flight entry survives a completed call, so each sequential
    // miss re-enters the loader.
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

// ==============================================
// Cancellation
// ==============================================

#[test]
fn cancellation_applies_only_to_the_loader() {
    let cache: Cache<String, u64> = Cache::new(16);
    let loader: LoaderFn<String, u64> = Arc::new(|_token, _key| Ok((5, None)));

    cache.set("cached".to_string(), 1, None);

    let token = CancelToken::new();
    token.cancel();

    // Cache hits ignore cancellation entirely.
    assert_eq!(
        cache
            .get_or_load(&token, &"cached".to_string(), Some(&loader))
            .unwrap(),
        1
    );

    // A miss with a cancelled token never reaches the loader.
    let err = cache
        .get_or_load(&token, &"missing".to_string(), Some(&loader))
        .unwrap_err();
    assert!(matches!(err, CacheError::Cancelled));
    assert_eq!(cache.get(&"missing".to_string()), None);
}

#[test]
fn default_loader_applies_when_no_override_given() {
    let cache: Cache<u64, u64> = CacheBuilder::new(16)
        .loader(Arc::new(|_token: &CancelToken, key: &u64| Ok((key + 1, None))))
        .build();

    assert_eq!(cache.get_or_load(&CancelToken::new(), &9, None).unwrap(), 10);

    let bare: Cache<u64, u64> = Cache::new(16);
    let err = bare.get_or_load(&CancelToken::new(), &9, None).unwrap_err();
    assert!(matches!(err, CacheError::LoaderMissing));
}
