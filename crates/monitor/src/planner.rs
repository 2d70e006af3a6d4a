//! Start-block resolution and window sizing. Pure functions; the scanner
//! owns all I/O.

use chain_watch_domain::model::ScanWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StartSource {
    Checkpoint,
    Configured,
    ChainHead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPoint {
    pub next_block: u64,
    pub source: StartSource,
}

/// First block after `last_processed`. Saturates instead of wrapping.
pub fn next_after(last_processed: u64) -> u64 {
    last_processed.saturating_add(1)
}

/// Picks where scanning resumes: the block after a persisted checkpoint,
/// else the configured start block, else the current chain head.
///
/// Returns `None` when only the chain head would do and it is not known
/// yet; the caller retries once a head is available.
pub fn resolve_start(
    checkpoint: Option<u64>,
    configured_start_block: Option<u64>,
    chain_head: Option<u64>,
) -> Option<StartPoint> {
    if let Some(last) = checkpoint {
        return Some(StartPoint {
            next_block: next_after(last),
            source: StartSource::Checkpoint,
        });
    }
    if let Some(block) = configured_start_block.filter(|block| *block > 0) {
        return Some(StartPoint {
            next_block: block,
            source: StartSource::Configured,
        });
    }
    chain_head.map(|head| StartPoint {
        next_block: head,
        source: StartSource::ChainHead,
    })
}

/// Next inclusive window `[next_block, min(next_block + batch - 1, head)]`,
/// or `None` when the head has not reached `next_block`.
pub fn plan_window(
    network_name: &str,
    next_block: u64,
    chain_head: u64,
    batch_size: u64,
) -> Option<ScanWindow> {
    if batch_size == 0 || chain_head < next_block {
        return None;
    }
    let to_block = next_block
        .saturating_add(batch_size - 1)
        .min(chain_head);
    Some(ScanWindow {
        network_name: network_name.to_string(),
        from_block: next_block,
        to_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(from: u64, to: u64) -> Option<ScanWindow> {
        Some(ScanWindow {
            network_name: "eth".into(),
            from_block: from,
            to_block: to,
        })
    }

    #[test]
    fn window_is_capped_by_batch_size() {
        assert_eq!(plan_window("eth", next_after(100), 250, 50), window(101, 150));
    }

    #[test]
    fn window_is_capped_by_head() {
        assert_eq!(plan_window("eth", next_after(100), 120, 50), window(101, 120));
    }

    #[test]
    fn caught_up_scanner_has_no_work() {
        assert_eq!(plan_window("eth", next_after(100), 100, 50), None);
    }

    #[test]
    fn single_block_window_when_head_equals_cursor() {
        assert_eq!(plan_window("eth", 900, 900, 100), window(900, 900));
    }

    #[test]
    fn window_never_wraps_at_u64_max() {
        let planned = plan_window("eth", u64::MAX - 1, u64::MAX, 100).unwrap();
        assert_eq!(planned.to_block, u64::MAX);
        assert_eq!(planned.block_count(), 2);
    }

    #[test]
    fn checkpoint_wins_over_configured_start() {
        let start = resolve_start(Some(100), Some(500), Some(900)).unwrap();
        assert_eq!(start.next_block, 101);
        assert_eq!(start.source, StartSource::Checkpoint);
    }

    #[test]
    fn configured_start_used_without_checkpoint() {
        let start = resolve_start(None, Some(500), Some(900)).unwrap();
        assert_eq!(
            start,
            StartPoint {
                next_block: 500,
                source: StartSource::Configured
            }
        );
        assert_eq!(
            plan_window("eth", start.next_block, 900, 100),
            window(500, 599)
        );
    }

    #[test]
    fn chain_head_used_when_nothing_is_configured() {
        let start = resolve_start(None, Some(0), Some(900)).unwrap();
        assert_eq!(start.source, StartSource::ChainHead);
        assert_eq!(
            plan_window("eth", start.next_block, 900, 100),
            window(900, 900)
        );
    }

    #[test]
    fn head_start_waits_for_a_known_head() {
        assert_eq!(resolve_start(None, None, None), None);
    }

    #[test]
    fn zero_checkpoint_resumes_at_block_one() {
        let start = resolve_start(Some(0), None, None).unwrap();
        assert_eq!(start.next_block, 1);
    }
}
