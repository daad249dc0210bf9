//! Tests for [`SemanticCache`] — SoA similarity lookup, eviction, and
//! invalidation through the public API.

use mimir::cache::{CacheConfig, SemanticCache};

fn small_cache(max_entries: usize) -> SemanticCache {
    SemanticCache::new(CacheConfig::new().dimension(64).max_entries(max_entries))
}

#[tokio::test]
async fn miss_on_empty_cache_reports_zero_similarity() {
    let cache = small_cache(8);
    let (response, similarity) = cache.lookup("anything").await;
    assert!(response.is_none());
    assert_eq!(similarity, 0.0);
}

#[tokio::test]
async fn insert_makes_identical_prompt_hit_at_full_similarity() {
    let cache = small_cache(8);
    cache.insert("What is ML?", "ML is learning from data.").await.unwrap();

    let (response, similarity) = cache.lookup("What is ML?").await;
    assert_eq!(response.as_deref(), Some("ML is learning from data."));
    assert!((similarity - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn unrelated_prompt_misses_but_reports_similarity() {
    let cache = small_cache(8);
    cache.insert("What is ML?", "an answer").await.unwrap();

    let (response, similarity) = cache.lookup("How does blockchain work?").await;
    assert!(response.is_none());
    assert!(similarity < 0.95);
    assert!((0.0..=1.0).contains(&similarity));
}

#[tokio::test]
async fn capacity_is_respected_across_overflow() {
    let cache = small_cache(3);
    for i in 0..10 {
        cache.insert(&format!("prompt number {i}"), &format!("response {i}")).await.unwrap();
    }
    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn eviction_spares_frequently_hit_entries() {
    let cache = small_cache(3);
    cache.insert("A", "response A").await.unwrap();
    cache.insert("B", "response B").await.unwrap();
    cache.insert("C", "response C").await.unwrap();

    // B earns two hits: 2 x 3600s of protection under the
    // hit-weighted recency policy.
    cache.lookup("B").await;
    cache.lookup("B").await;

    cache.insert("D", "response D").await.unwrap();

    let (evicted, _) = cache.lookup("A").await;
    assert!(evicted.is_none(), "unhit oldest entry should be the victim");
    let (survivor, _) = cache.lookup("B").await;
    assert_eq!(survivor.as_deref(), Some("response B"));
    let (newcomer, _) = cache.lookup("D").await;
    assert_eq!(newcomer.as_deref(), Some("response D"));
}

#[tokio::test]
async fn invalidate_then_lookup_misses() {
    let cache = small_cache(8);
    cache.insert("to be removed", "gone").await.unwrap();
    assert_eq!(cache.invalidate("to be removed"), 1);

    let (response, _) = cache.lookup("to be removed").await;
    assert!(response.is_none());
}

#[tokio::test]
async fn invalidate_unknown_prompt_removes_nothing() {
    let cache = small_cache(8);
    cache.insert("kept", "still here").await.unwrap();
    assert_eq!(cache.invalidate("never inserted"), 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn invalidate_all_resets_and_counts() {
    let cache = small_cache(8);
    cache.insert("one", "r1").await.unwrap();
    cache.insert("two", "r2").await.unwrap();
    cache.insert("three", "r3").await.unwrap();

    assert_eq!(cache.invalidate_all(), 3);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn stats_track_hits_and_misses() {
    let cache = small_cache(8);
    cache.insert("known", "resp").await.unwrap();

    cache.lookup("known").await;
    cache.lookup("unknown query").await;

    let stats = cache.stats();
    assert_eq!(stats.total_hits, 1);
    assert_eq!(stats.total_misses, 1);
    assert_eq!(stats.current_entries, 1);
    assert!((stats.hit_rate_pct - 50.0).abs() < 1e-6);
}

#[tokio::test]
async fn hits_survive_many_interleaved_inserts() {
    let cache = small_cache(16);
    cache.insert("anchor prompt", "anchor response").await.unwrap();
    for i in 0..10 {
        cache.insert(&format!("filler {i}"), "noise").await.unwrap();
        let (response, similarity) = cache.lookup("anchor prompt").await;
        assert_eq!(response.as_deref(), Some("anchor response"));
        assert!((similarity - 1.0).abs() < 1e-5);
    }
}
