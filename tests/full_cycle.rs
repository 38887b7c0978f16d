//! Whole-cycle properties: compaction round trips, dense-prefix and
//! empty-region handling, preserved header words, repeated cycles and a
//! randomized parallel stress run.

use parcompact::policy::region::RegionState;
use parcompact::policy::space::SpaceKind;
use parcompact::util::test_util::{TestHeap, HEADER_WORDS};
use parcompact::ObjectReference;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const REGION: usize = 512; // bytes
const REGION_WORDS: usize = 64;

/// Walk the object graph from the given references, returning the sorted
/// payloads of every reachable payload-bearing object.
fn reachable_payloads(heap: &TestHeap, roots: &[ObjectReference]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut stack: Vec<ObjectReference> = roots.iter().copied().filter(|r| !r.is_null()).collect();
    let mut payloads = vec![];
    while let Some(object) = stack.pop() {
        if !seen.insert(object.to_address().as_usize()) {
            continue;
        }
        let refs = heap.ref_count(object);
        if heap.size_words(object) > HEADER_WORDS + refs {
            payloads.push(heap.get_payload(object));
        }
        for i in 0..refs {
            let target = heap.get_ref(object, i);
            if !target.is_null() {
                stack.push(target);
            }
        }
    }
    payloads.sort_unstable();
    payloads
}

#[test]
fn compaction_round_trip_preserves_the_reachable_subgraph() {
    init_logger();
    let heap = TestHeap::new(
        &[
            ("eden", SpaceKind::Bump, 4 * REGION_WORDS),
            ("old", SpaceKind::FreeList { min_free_block_words: 4 }, 4 * REGION_WORDS),
        ],
        REGION,
        4,
    );

    // A live chain interleaved with garbage, across both spaces; the
    // chain's head is rooted, so everything stays reachable through it.
    let mut roots = vec![];
    let mut prev = ObjectReference::NULL;
    for i in 0..24 {
        let space = i % 2;
        let live = heap.alloc(space, 5, 1);
        heap.set_payload(live, 1000 + i);
        let _garbage = heap.alloc(space, 7, 0);
        heap.set_ref(live, 0, prev);
        if i == 23 {
            roots.push(heap.vm().add_root(live));
        }
        prev = live;
    }

    let pre_roots: Vec<_> = roots.iter().map(|&h| heap.vm().root(h)).collect();
    let pre = reachable_payloads(&heap, &pre_roots);

    let stats = heap.collector.collect().unwrap();
    assert!(stats.moved_words > 0, "garbage between objects forces movement");

    let post_roots: Vec<_> = roots.iter().map(|&h| heap.vm().root(h)).collect();
    let post = reachable_payloads(&heap, &post_roots);
    assert_eq!(pre, post, "the relocated graph must be isomorphic");

    // Compaction slid everything to the low ends: eden's used extent now
    // equals eden's live data (all of it fits there).
    let eden = &heap.collector.heap().spaces()[0];
    assert!(eden.top() > eden.bottom());
    // A second cycle over the compacted heap is a no-move cycle.
    let stats2 = heap.collector.collect().unwrap();
    assert_eq!(stats2.live_objects, stats.live_objects);
    let post2_roots: Vec<_> = roots.iter().map(|&h| heap.vm().root(h)).collect();
    assert_eq!(reachable_payloads(&heap, &post2_roots), post);
}

#[test]
fn displaced_header_words_survive_relocation() {
    init_logger();
    let heap = TestHeap::new(&[("eden", SpaceKind::Bump, 2 * REGION_WORDS)], REGION, 2);

    // Garbage first so the hashed objects move.
    let _garbage = heap.alloc(0, 8, 0);
    let moved = heap.alloc(0, 4, 0);
    heap.set_hash(moved, 0x1234);
    let handle = heap.vm().add_root(moved);

    // An unhashed neighbour keeps a zero header.
    let plain = heap.alloc(0, 4, 0);
    let plain_handle = heap.vm().add_root(plain);

    heap.collector.collect().unwrap();

    let moved_now = heap.vm().root(handle);
    assert_ne!(moved_now, moved, "object must have been relocated");
    assert_eq!(heap.get_hash(moved_now), 0x1234);
    assert_eq!(heap.get_hash(heap.vm().root(plain_handle)), 0);
}

#[test]
fn dense_prefix_skips_the_copy_path() {
    init_logger();
    let heap = TestHeap::new(&[("eden", SpaceKind::Bump, 4 * REGION_WORDS)], REGION, 2);

    // No garbage at all: every object keeps its address, nothing copies.
    let mut handles = vec![];
    for i in 0..20 {
        let obj = heap.alloc(0, 6, 0);
        heap.set_payload(obj, i);
        heap.set_hash(obj, 40 + i);
        handles.push((heap.vm().add_root(obj), obj));
    }

    let stats = heap.collector.collect().unwrap();
    assert_eq!(stats.moved_words, 0);
    assert_eq!(stats.evacuated_regions, 0, "no region may enter the copy path");
    assert_eq!(
        stats.reclassified_regions,
        heap.collector.heap().regions().len()
    );
    for (handle, original) in &handles {
        let now = heap.vm().root(*handle);
        assert_eq!(now, *original, "dense prefix objects must not move");
    }
    // Headers were cleaned outside the copy path and hashes restored.
    for (i, (handle, _)) in handles.iter().enumerate() {
        assert_eq!(heap.get_hash(heap.vm().root(*handle)), 40 + i);
    }
    // The state machine still ran to completion for every region.
    for region in heap.collector.heap().regions() {
        assert_eq!(region.state(), RegionState::HasBeenEvac);
    }
}

#[test]
fn empty_region_is_evacuated_without_copying() {
    init_logger();
    let heap = TestHeap::new(&[("eden", SpaceKind::Bump, 4 * REGION_WORDS)], REGION, 2);

    // Region 0 fully garbage, region 1 live.
    for _ in 0..4 {
        heap.alloc(0, 16, 0);
    }
    let live = heap.alloc(0, 8, 0);
    heap.vm().add_root(live);

    heap.collector.collect().unwrap();

    let empty = heap.collector.heap().region(0);
    assert_eq!(empty.state(), RegionState::HasBeenEvac);
    assert_eq!(empty.evacuation_sequence(), 0, "no copy-path sequence number");
}

#[test]
fn randomized_parallel_cycles_preserve_reachability() {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0xc0ffee);
    let heap = TestHeap::new(
        &[
            ("eden", SpaceKind::Bump, 16 * REGION_WORDS),
            ("survivor", SpaceKind::Bump, 8 * REGION_WORDS),
            ("old", SpaceKind::FreeList { min_free_block_words: 4 }, 16 * REGION_WORDS),
        ],
        REGION,
        8,
    );

    let mut objects = vec![];
    let mut handles = vec![];
    for id in 0.. {
        let space = rng.gen_range(0..3);
        let refs = rng.gen_range(0..4usize);
        let size = HEADER_WORDS + refs + 1 + rng.gen_range(0..6);
        let obj = match heap.try_alloc(space, size, refs) {
            Some(obj) => obj,
            None => break,
        };
        heap.set_payload(obj, id);
        // Link to random earlier objects; some stay null.
        for slot in 0..refs {
            if !objects.is_empty() && rng.gen_bool(0.8) {
                let target = objects[rng.gen_range(0..objects.len())];
                heap.set_ref(obj, slot, target);
            }
        }
        if rng.gen_bool(0.1) {
            handles.push(heap.vm().add_root(obj));
        }
        objects.push(obj);
    }
    assert!(!handles.is_empty());

    let pre_roots: Vec<_> = handles.iter().map(|&h| heap.vm().root(h)).collect();
    let expected = reachable_payloads(&heap, &pre_roots);

    // Two back-to-back cycles: the first compacts, the second mostly
    // reclassifies the now-dense prefix.
    for cycle in 0..2 {
        heap.collector.collect().unwrap();
        let roots: Vec<_> = handles.iter().map(|&h| heap.vm().root(h)).collect();
        let got = reachable_payloads(&heap, &roots);
        assert_eq!(expected, got, "cycle {} corrupted the graph", cycle);
    }
}
