//! Glob overlap for file reservations.
//!
//! Two patterns overlap when some path matches both. `**` matches any run
//! of path segments (including none); `*` matches any run of characters
//! within one segment. The check is exact for these two wildcards and has
//! no filesystem knowledge, so it can over-approximate against richer glob
//! syntax but never misses a real overlap.

/// Whether any path could match both patterns.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    let a_segs: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let b_segs: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
    segments_overlap(&a_segs, &b_segs)
}

fn segments_overlap(a: &[&str], b: &[&str]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            // `**` matches zero segments, or consumes one of the other side.
            segments_overlap(&a[1..], b) || (!b.is_empty() && segments_overlap(a, &b[1..]))
        }
        (_, Some(&"**")) => {
            segments_overlap(a, &b[1..]) || (!a.is_empty() && segments_overlap(&a[1..], b))
        }
        (Some(x), Some(y)) => segment_overlap(x, y) && segments_overlap(&a[1..], &b[1..]),
        _ => false,
    }
}

/// Within-segment compatibility: is there a string both patterns match?
fn segment_overlap(a: &str, b: &str) -> bool {
    fn rec(a: &[u8], b: &[u8]) -> bool {
        match (a.first(), b.first()) {
            (None, None) => true,
            (Some(b'*'), _) => rec(&a[1..], b) || (!b.is_empty() && rec(a, &b[1..])),
            (_, Some(b'*')) => rec(a, &b[1..]) || (!a.is_empty() && rec(&a[1..], b)),
            (Some(x), Some(y)) => x == y && rec(&a[1..], &b[1..]),
            _ => false,
        }
    }
    rec(a.as_bytes(), b.as_bytes())
}
