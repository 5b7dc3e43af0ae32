#![forbid(unsafe_code)]

//! Action planning: translate a requested byte range into an ordered mix of
//! local reads and remote fetches.

use std::ops::Range;

use mediacache_storage::FragmentStore;

/// How one planned range is satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    /// Bytes are already in the cache file.
    Local,
    /// Bytes must be fetched with a ranged HTTP request.
    Remote,
}

/// One planned unit of work covering part of a requested range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheAction {
    pub kind: ActionKind,
    pub range: Range<u64>,
}

impl CacheAction {
    fn local(range: Range<u64>) -> Self {
        Self {
            kind: ActionKind::Local,
            range,
        }
    }

    fn remote(range: Range<u64>) -> Self {
        Self {
            kind: ActionKind::Remote,
            range,
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Partition `request` into an ordered action list.
///
/// The output ranges cover `request` exactly, ascending, with no gaps or
/// overlaps: every cached byte becomes part of a `Local` action, every
/// uncovered byte part of a `Remote` one. Local runs longer than
/// `package_size` are split into `package_size` chunks (bounding per-read
/// memory and interleaving progress); remote gaps are never split — one
/// request per contiguous uncovered sub-range.
///
/// Pure function of `(request, fragments)`; performs no I/O.
#[must_use]
pub fn plan_actions(
    request: Range<u64>,
    fragments: &FragmentStore,
    package_size: u64,
) -> Vec<CacheAction> {
    if request.is_empty() {
        return Vec::new();
    }
    let package_size = package_size.max(1);

    let mut actions = Vec::new();
    let mut pos = request.start;

    for covered in fragments.covered_within(&request) {
        if pos < covered.start {
            actions.push(CacheAction::remote(pos..covered.start));
        }
        let mut chunk_start = covered.start;
        while chunk_start < covered.end {
            let chunk_end = covered.end.min(chunk_start + package_size);
            actions.push(CacheAction::local(chunk_start..chunk_end));
            chunk_start = chunk_end;
        }
        pos = covered.end;
    }

    if pos < request.end {
        actions.push(CacheAction::remote(pos..request.end));
    }

    actions
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const PKG: u64 = 512 * 1024;

    fn store_with(ranges: &[Range<u64>]) -> FragmentStore {
        let mut s = FragmentStore::new();
        for r in ranges {
            s.add(r.clone());
        }
        s
    }

    /// Plans must partition the request exactly: ascending, contiguous,
    /// first action starts at `request.start`, last ends at `request.end`.
    fn assert_partitions(request: &Range<u64>, actions: &[CacheAction]) {
        assert!(!actions.is_empty(), "non-empty request got an empty plan");
        assert_eq!(actions.first().unwrap().range.start, request.start);
        assert_eq!(actions.last().unwrap().range.end, request.end);
        for pair in actions.windows(2) {
            assert_eq!(
                pair[0].range.end, pair[1].range.start,
                "gap or overlap between {:?} and {:?}",
                pair[0], pair[1]
            );
        }
        for action in actions {
            assert!(!action.is_empty(), "empty action in plan: {action:?}");
        }
    }

    #[test]
    fn empty_request_yields_empty_plan() {
        let store = store_with(&[0..100]);
        assert!(plan_actions(50..50, &store, PKG).is_empty());
    }

    #[test]
    fn cold_fetch_is_one_remote_action() {
        let store = FragmentStore::new();
        let plan = plan_actions(0..1000, &store, PKG);
        assert_eq!(plan, vec![CacheAction::remote(0..1000)]);
    }

    #[test]
    fn cached_prefix_splits_local_then_remote() {
        let store = store_with(&[0..500]);
        let plan = plan_actions(0..1000, &store, PKG);
        assert_eq!(
            plan,
            vec![CacheAction::local(0..500), CacheAction::remote(500..1000)]
        );
    }

    #[test]
    fn fully_cached_request_is_all_local() {
        let store = store_with(&[0..2000]);
        let plan = plan_actions(100..900, &store, PKG);
        assert_eq!(plan, vec![CacheAction::local(100..900)]);
    }

    #[test]
    fn large_local_run_is_package_split() {
        let store = store_with(&[0..1_500_000]);
        let request = 0..1_500_000;
        let plan = plan_actions(request.clone(), &store, PKG);

        assert_eq!(plan.len(), 3); // ceil(1_500_000 / 524_288)
        assert!(plan.iter().all(|a| a.kind == ActionKind::Local));
        assert!(plan.iter().all(|a| a.len() <= PKG));
        assert_partitions(&request, &plan);
    }

    #[test]
    fn remote_gaps_are_never_package_split() {
        let store = store_with(&[0..10]);
        let request = 0..10_000_000;
        let plan = plan_actions(request.clone(), &store, PKG);
        assert_eq!(
            plan,
            vec![
                CacheAction::local(0..10),
                CacheAction::remote(10..10_000_000)
            ]
        );
        assert_partitions(&request, &plan);
    }

    #[test]
    fn alternates_across_scattered_fragments() {
        let store = store_with(&[100..200, 400..500]);
        let request = 0..600;
        let plan = plan_actions(request.clone(), &store, PKG);
        assert_eq!(
            plan,
            vec![
                CacheAction::remote(0..100),
                CacheAction::local(100..200),
                CacheAction::remote(200..400),
                CacheAction::local(400..500),
                CacheAction::remote(500..600),
            ]
        );
        assert_partitions(&request, &plan);
    }

    #[test]
    fn fragment_overhang_is_clamped_to_request() {
        let store = store_with(&[0..1000]);
        let plan = plan_actions(200..800, &store, PKG);
        assert_eq!(plan, vec![CacheAction::local(200..800)]);
    }

    #[rstest]
    #[case::no_fragments(vec![], 0..1234)]
    #[case::one_fragment_inside(vec![100..300], 0..1000)]
    #[case::fragment_at_start(vec![0..100], 0..1000)]
    #[case::fragment_at_end(vec![900..1000], 0..1000)]
    #[case::many_small(vec![0..3, 10..12, 50..51, 700..703], 0..1000)]
    #[case::tiny_package(vec![0..100, 200..220], 0..300)]
    fn local_remote_labels_match_coverage(
        #[case] fragments: Vec<Range<u64>>,
        #[case] request: Range<u64>,
    ) {
        let store = store_with(&fragments);
        let plan = plan_actions(request.clone(), &store, 64);
        assert_partitions(&request, &plan);

        for action in &plan {
            match action.kind {
                ActionKind::Local => assert!(
                    store.contains(&action.range),
                    "local action {action:?} not fully cached"
                ),
                ActionKind::Remote => assert!(
                    store.covered_within(&action.range).is_empty(),
                    "remote action {action:?} overlaps cached bytes"
                ),
            }
        }
    }
}
