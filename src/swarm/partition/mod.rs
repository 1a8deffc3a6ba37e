use std::ops::Range;
use crate::SercaError;

/// Contiguous ownership ranges: worker `k` of `workers` owns `[k*P/W, (k+1)*P/W)`.
/// Empty ranges are dropped, so there are never more ranges than items.
pub fn ranges(items: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    (0..workers)
        .map(|worker| worker * items / workers..(worker + 1) * items / workers)
        .filter(|range| !range.is_empty())
        .collect()
}

/// Hands each range its own owned slice of `items`, in range order.
pub fn scatter<T>(items: Vec<T>, ranges: &[Range<usize>]) -> Vec<Vec<T>> {
    let mut remaining = items.into_iter();
    ranges.iter()
        .map(|range| remaining.by_ref().take(range.len()).collect())
        .collect()
}

/// What one worker sends back: the range it owned and exactly that many items.
#[derive(Debug)]
pub struct PartitionReport<T> {
    pub worker: usize,
    pub range: Range<usize>,
    pub items: Vec<T>,
}

/// Reassembles worker reports into one vector of `total` items.
///
/// Each report may only contribute its own range. Two reports claiming the same
/// index, or an index nobody reported, is an error rather than a silent zero.
pub fn assemble<T>(mut reports: Vec<PartitionReport<T>>, total: usize) -> Result<Vec<T>, SercaError> {
    reports.sort_by_key(|report| report.range.start);

    let mut assembled = Vec::with_capacity(total);
    let mut cursor = 0;
    for report in reports {
        if report.items.len() != report.range.len() {
            return Err(SercaError::PartitionGap {
                worker: report.worker,
                start: report.range.start + report.items.len().min(report.range.len()),
                end: report.range.end,
            });
        }
        if report.range.start < cursor {
            return Err(SercaError::PartitionOverlap {
                worker: report.worker,
                start: report.range.start,
                end: cursor.min(report.range.end),
            });
        }
        if report.range.start > cursor {
            return Err(SercaError::PartitionGap {
                worker: report.worker,
                start: cursor,
                end: report.range.start,
            });
        }
        cursor = report.range.end;
        assembled.extend(report.items);
    }

    if cursor != total {
        return Err(SercaError::PartitionGap { worker: usize::MAX, start: cursor, end: total });
    }
    return Ok(assembled);
}
