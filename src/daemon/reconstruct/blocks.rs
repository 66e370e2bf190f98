use chrono::{DateTime, Duration, Utc};

use crate::{
    store::entities::SampleRecord,
    utils::time::{ceil_to_block, BLOCK_MINUTES},
};

/// One canonical 30-minute window on the grid. A sample only says "nonzero
/// play happened sometime in the ~30 minutes before this poll", so the block
/// ending at the rounded-up poll instant is the finest statement we can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Two consecutive missed polls still count as the same sitting; a block
/// whose end is more than this past the running period's end opens a new one.
const MAX_PERIOD_GAP: Duration = Duration::minutes(90);

pub fn snap_to_block(instant: DateTime<Utc>) -> Block {
    let end = ceil_to_block(instant);
    Block {
        start: end - Duration::minutes(BLOCK_MINUTES),
        end,
    }
}

/// Snaps samples onto the canonical grid in ascending order. Multiple samples
/// landing in the same window collapse into one block.
pub fn snap_samples(samples: &[SampleRecord]) -> Vec<Block> {
    let mut instants = samples.iter().map(|s| s.instant).collect::<Vec<_>>();
    instants.sort_unstable();

    let mut blocks = Vec::<Block>::new();
    for instant in instants {
        let block = snap_to_block(instant);
        if blocks.last() != Some(&block) {
            blocks.push(block);
        }
    }
    blocks
}

/// Folds sorted blocks into play periods with one transition rule: extend the
/// running period while the next block is close enough, otherwise close it
/// and open a new one. Operates purely on absolute instants, so periods cross
/// local midnight without any special casing.
pub fn merge_blocks(blocks: &[Block]) -> Vec<Block> {
    let mut periods = Vec::<Block>::new();
    for block in blocks {
        match periods.last_mut() {
            Some(period) if block.end - period.end <= MAX_PERIOD_GAP => {
                period.end = block.end;
            }
            Some(_) | None => {
                periods.push(*block);
            }
        }
    }
    periods
}
