//! Per-tick log-id ranges.
//!
//! For every tick a peer reports one `(fromLogId, length)` pair per
//! transaction position plus an aggregate pair for the tick as a whole.
//! An absent range is encoded as `(-1, 0)`.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{TickwatchError, TickwatchResult, TRANSACTIONS_PER_TICK};

/// Encoded length: tick + 1024 transaction pairs + the aggregate pair +
/// the declared total byte size of the aggregate's log events.
pub const TICK_LOG_RANGES_SIZE: usize = 4 + (TRANSACTIONS_PER_TICK + 1) * 16 + 8;

/// One contiguous run of log ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogIdRange {
    pub from_log_id: i64,
    pub length: i64,
}

impl LogIdRange {
    pub const EMPTY: Self = Self {
        from_log_id: -1,
        length: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.from_log_id < 0 || self.length <= 0
    }

    /// Last id in the run, inclusive.
    pub fn to_log_id(&self) -> i64 {
        self.from_log_id + self.length - 1
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> {
        let (from, to) = if self.is_empty() {
            (1, 0)
        } else {
            (self.from_log_id as u64, self.to_log_id() as u64)
        };
        from..=to
    }
}

impl Default for LogIdRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// All per-transaction ranges of one tick plus the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickLogRanges {
    pub tick: u32,
    pub ranges: Vec<LogIdRange>,
    pub aggregate: LogIdRange,
    /// Peer-declared total byte size (header included) of every log in
    /// the aggregate; checked against the received bodies.
    pub aggregate_byte_size: u64,
}

impl TickLogRanges {
    pub fn empty(tick: u32) -> Self {
        Self {
            tick,
            ranges: vec![LogIdRange::EMPTY; TRANSACTIONS_PER_TICK],
            aggregate: LogIdRange::EMPTY,
            aggregate_byte_size: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TICK_LOG_RANGES_SIZE);
        buf.put_u32_le(self.tick);
        for i in 0..TRANSACTIONS_PER_TICK {
            let r = self.ranges.get(i).copied().unwrap_or(LogIdRange::EMPTY);
            buf.put_i64_le(r.from_log_id);
            buf.put_i64_le(r.length);
        }
        buf.put_i64_le(self.aggregate.from_log_id);
        buf.put_i64_le(self.aggregate.length);
        buf.put_u64_le(self.aggregate_byte_size);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < TICK_LOG_RANGES_SIZE {
            return Err(TickwatchError::Decode(format!(
                "log ranges are {} bytes, expected {}",
                bytes.len(),
                TICK_LOG_RANGES_SIZE
            )));
        }
        let mut buf = bytes;
        let tick = buf.get_u32_le();
        let mut ranges = Vec::with_capacity(TRANSACTIONS_PER_TICK);
        for _ in 0..TRANSACTIONS_PER_TICK {
            ranges.push(LogIdRange {
                from_log_id: buf.get_i64_le(),
                length: buf.get_i64_le(),
            });
        }
        let aggregate = LogIdRange {
            from_log_id: buf.get_i64_le(),
            length: buf.get_i64_le(),
        };
        let aggregate_byte_size = buf.get_u64_le();
        Ok(Self {
            tick,
            ranges,
            aggregate,
            aggregate_byte_size,
        })
    }

    /// Check that the per-transaction runs are contiguous and that their
    /// union equals the aggregate.
    pub fn reconcile(&self) -> TickwatchResult<()> {
        let mut expected_next: Option<i64> = None;
        let mut first: Option<i64> = None;
        let mut total: i64 = 0;

        for (i, r) in self.ranges.iter().enumerate() {
            if r.is_empty() {
                continue;
            }
            if first.is_none() {
                first = Some(r.from_log_id);
            }
            if let Some(next) = expected_next {
                if r.from_log_id != next {
                    return Err(TickwatchError::Decode(format!(
                        "range at tx {} starts at {} but previous run ended at {}",
                        i,
                        r.from_log_id,
                        next - 1
                    )));
                }
            }
            expected_next = Some(r.from_log_id + r.length);
            total += r.length;
        }

        if self.aggregate.is_empty() {
            if total != 0 {
                return Err(TickwatchError::Decode(
                    "per-tx ranges present but aggregate is empty".to_string(),
                ));
            }
            return Ok(());
        }

        // Runs before the first transaction (tick-level events) are
        // allowed: the aggregate may start earlier than the first tx run,
        // but it must cover every tx run and agree on the end.
        if let (Some(first), Some(next)) = (first, expected_next) {
            if first < self.aggregate.from_log_id
                || next - 1 > self.aggregate.to_log_id()
            {
                return Err(TickwatchError::Decode(format!(
                    "tx runs [{}, {}] escape aggregate [{}, {}]",
                    first,
                    next - 1,
                    self.aggregate.from_log_id,
                    self.aggregate.to_log_id()
                )));
            }
        }
        if total > self.aggregate.length {
            return Err(TickwatchError::Decode(format!(
                "tx runs cover {} ids but aggregate declares {}",
                total, self.aggregate.length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges_with(pairs: &[(usize, i64, i64)], aggregate: LogIdRange) -> TickLogRanges {
        let mut r = TickLogRanges::empty(1000);
        for (i, from, len) in pairs {
            r.ranges[*i] = LogIdRange {
                from_log_id: *from,
                length: *len,
            };
        }
        r.aggregate = aggregate;
        r
    }

    #[test]
    fn codec_round_trip() {
        let r = ranges_with(
            &[(0, 100, 3), (1, 103, 2)],
            LogIdRange {
                from_log_id: 100,
                length: 5,
            },
        );
        let decoded = TickLogRanges::decode(&r.encode()).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn contiguous_ranges_reconcile() {
        let r = ranges_with(
            &[(0, 100, 3), (1, 103, 2)],
            LogIdRange {
                from_log_id: 100,
                length: 5,
            },
        );
        assert!(r.reconcile().is_ok());
    }

    #[test]
    fn gap_between_runs_rejected() {
        let r = ranges_with(
            &[(0, 100, 3), (1, 105, 2)],
            LogIdRange {
                from_log_id: 100,
                length: 7,
            },
        );
        assert!(r.reconcile().is_err());
    }

    #[test]
    fn runs_escaping_aggregate_rejected() {
        let r = ranges_with(
            &[(0, 100, 10)],
            LogIdRange {
                from_log_id: 100,
                length: 5,
            },
        );
        assert!(r.reconcile().is_err());
    }

    #[test]
    fn all_empty_reconciles() {
        assert!(TickLogRanges::empty(1).reconcile().is_ok());
    }

    #[test]
    fn empty_slots_between_runs_allowed() {
        let r = ranges_with(
            &[(0, 100, 3), (5, 103, 1)],
            LogIdRange {
                from_log_id: 100,
                length: 4,
            },
        );
        assert!(r.reconcile().is_ok());
    }

    #[test]
    fn range_ids_iteration() {
        let r = LogIdRange {
            from_log_id: 10,
            length: 3,
        };
        assert_eq!(r.ids().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(LogIdRange::EMPTY.ids().count(), 0);
    }
}
