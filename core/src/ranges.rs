//! Index arithmetic for the two-region buffer layout.
//!
//! Everything here operates on plain `usize` snapshots of the cursor state;
//! the atomic loads/stores and the pointer work live in `bipbuffer`. Keeping
//! the overlap-critical math free of atomics makes it possible to enumerate
//! every reachable cursor state in the tests below and check that a producer
//! span can never touch a consumer span.
//!
//! State vocabulary, shared with `bipbuffer`:
//!
//! * `read`       - first unread element, owned by the consumer
//! * `committed`  - one-past the last published element, owned by the producer
//! * `watermark`  - where valid data logically ends when the producer has
//!                  wrapped; equals `capacity` when no wrap is pending
//!
//! The buffer is *linear* while `committed >= read` and *inverted* (the
//! producer has wrapped back to offset 0, the consumer is still draining the
//! tail) while `committed < read`. The producer never lets its cursor reach
//! `read` while inverted; one slot is sacrificed so that the two states stay
//! distinguishable.

use core::cmp::min;

/// A contiguous span of slots the producer may fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteSpan {
    pub start: usize,
    pub len: usize,
}

/// A contiguous span of committed elements the consumer may drain.
///
/// `crossed` is set when the consumer's cursor sat exactly on the watermark:
/// the span starts over at offset 0 and the caller must reset its cursor and
/// clear the watermark before handing the span out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadSpan {
    pub start: usize,
    pub len: usize,
    pub crossed: bool,
}

/// Largest contiguous run the producer may reserve, capped at `want`.
///
/// In the linear state the run at the current cursor (up to the physical end
/// of the array) is preferred; the producer only wraps to offset 0 when that
/// tail run is shorter than requested *and* the freed front run is strictly
/// larger. In the inverted state the only run is the front one, and it must
/// stop one slot short of `read`.
pub(crate) fn write_span(committed: usize, read: usize, capacity: usize, want: usize) -> WriteSpan {
    if committed < read {
        // Inverted. `read > 0` holds here, so the subtraction is safe.
        WriteSpan {
            start: committed,
            len: min(want, read - 1 - committed),
        }
    } else {
        let tail = capacity - committed;
        let front = if read > 0 { read - 1 } else { 0 };

        if tail >= want || tail >= front {
            WriteSpan {
                start: committed,
                len: min(want, tail),
            }
        } else {
            WriteSpan {
                start: 0,
                len: min(want, front),
            }
        }
    }
}

/// Largest contiguous run of committed elements, capped at `want`.
pub(crate) fn read_span(read: usize, committed: usize, watermark: usize, want: usize) -> ReadSpan {
    if committed >= read {
        ReadSpan {
            start: read,
            len: min(want, committed - read),
            crossed: false,
        }
    } else if read == watermark {
        // The tail region is fully drained; valid data continues at offset 0.
        ReadSpan {
            start: 0,
            len: min(want, committed),
            crossed: true,
        }
    } else {
        ReadSpan {
            start: read,
            len: min(want, watermark - read),
            crossed: false,
        }
    }
}

/// Total number of committed elements (both regions when inverted).
pub(crate) fn occupied(read: usize, committed: usize, watermark: usize) -> usize {
    if committed >= read {
        committed - read
    } else {
        watermark - read + committed
    }
}

/// Size of the largest reservation `write_span` could currently return.
pub(crate) fn vacant(read: usize, committed: usize, capacity: usize) -> usize {
    if committed < read {
        read - committed - 1
    } else {
        let tail = capacity - committed;
        let front = if read > 0 { read - 1 } else { 0 };
        if tail >= front {
            tail
        } else {
            front
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_CAP: usize = 6;

    fn overlaps(a_start: usize, a_len: usize, b_start: usize, b_len: usize) -> bool {
        a_len != 0 && b_len != 0 && a_start < b_start + b_len && b_start < a_start + a_len
    }

    // Walk every reachable cursor state for small capacities. Linear states
    // have `read <= committed <= capacity` with the watermark parked at
    // `capacity`; inverted states have `committed < read <= watermark <=
    // capacity`.
    fn for_each_state(mut check: impl FnMut(usize, usize, usize, usize)) {
        for cap in 1..=MAX_CAP {
            for read in 0..=cap {
                for committed in read..=cap {
                    check(cap, read, committed, cap);
                }
                for committed in 0..read {
                    for watermark in read..=cap {
                        check(cap, read, committed, watermark);
                    }
                }
            }
        }
    }

    #[test]
    fn write_span_is_bounded_and_maximal() {
        for_each_state(|cap, read, committed, _watermark| {
            for want in 0..=cap + 2 {
                let span = write_span(committed, read, cap, want);
                assert!(span.start + span.len <= cap);
                assert!(span.len <= want);
                // The reservation is exactly as large as the advertised
                // vacancy allows.
                assert_eq!(span.len, min(want, vacant(read, committed, cap)));
            }
        });
    }

    #[test]
    fn write_span_never_touches_committed_data() {
        for_each_state(|cap, read, committed, watermark| {
            for want in 0..=cap + 2 {
                let span = write_span(committed, read, cap, want);

                if committed >= read {
                    assert!(!overlaps(span.start, span.len, read, committed - read));
                } else {
                    assert!(!overlaps(span.start, span.len, read, watermark - read));
                    assert!(!overlaps(span.start, span.len, 0, committed));
                }

                // Filling the whole span must leave the cursor strictly short
                // of `read` whenever it ends up behind it, so the inverted
                // state stays recognizable.
                let ends_behind_read = span.start < read || committed < read;
                if ends_behind_read && span.len > 0 {
                    assert!(span.start + span.len < read);
                }
            }
        });
    }

    #[test]
    fn read_span_is_bounded_and_contiguous() {
        for_each_state(|cap, read, committed, watermark| {
            for want in 0..=cap + 2 {
                let span = read_span(read, committed, watermark, want);
                assert!(span.start + span.len <= cap);
                assert!(span.len <= want);
                assert!(span.len <= occupied(read, committed, watermark));

                if span.crossed {
                    assert!(committed < read && read == watermark);
                    assert_eq!(span.start, 0);
                    assert_eq!(span.len, min(want, committed));
                } else if committed >= read {
                    assert_eq!(span.start, read);
                    assert_eq!(span.len, min(want, committed - read));
                } else {
                    assert_eq!(span.start, read);
                    assert_eq!(span.len, min(want, watermark - read));
                }
            }
        });
    }

    #[test]
    fn occupancy_and_vacancy_bounds() {
        for_each_state(|cap, read, committed, watermark| {
            let used = occupied(read, committed, watermark);
            let free = vacant(read, committed, cap);
            assert!(used <= cap);
            assert!(free <= cap);
            assert!(used + free <= cap);

            // An empty buffer always has at least half its capacity
            // reservable in one contiguous run, wherever the cursors parked.
            if used == 0 && committed >= read {
                assert!(free >= cap / 2);
            }

            // A buffer that cannot accept a single element holds at least
            // `cap - 1` elements; at most one slot is lost to bookkeeping.
            if free == 0 {
                assert!(used >= cap - 1);
            }
        });
    }

    #[test]
    fn wrap_prefers_the_strictly_larger_front_run() {
        // capacity 5, tail of 1 free slot, front of 3 freed slots
        let span = write_span(4, 4, 5, 3);
        assert_eq!(span, WriteSpan { start: 0, len: 3 });

        // same state, but the tail alone satisfies the request
        let span = write_span(4, 4, 5, 1);
        assert_eq!(span, WriteSpan { start: 4, len: 1 });

        // equal runs never wrap
        let span = write_span(3, 3, 5, 4);
        assert_eq!(span, WriteSpan { start: 3, len: 2 });
    }

    #[test]
    fn drained_tail_steps_to_the_front() {
        // inverted, cursor exactly on the watermark, one element at offset 0
        let span = read_span(4, 1, 4, usize::MAX);
        assert_eq!(
            span,
            ReadSpan {
                start: 0,
                len: 1,
                crossed: true
            }
        );

        // inverted, tail not yet drained: serve only up to the watermark
        let span = read_span(2, 1, 4, usize::MAX);
        assert_eq!(
            span,
            ReadSpan {
                start: 2,
                len: 2,
                crossed: false
            }
        );
    }
}
