//! Merging of process coverage.
//!
//! Scripts are matched by url and functions by their root range. Within a
//! function, each contribution is flattened to a piecewise-constant count over
//! the root range (innermost range wins), the pieces are summed offset by
//! offset, and the sum is re-encoded as the root range followed by the maximal
//! runs whose count differs from the root count. The encoding is canonical,
//! which makes the merge commutative and associative: merging A, B and C in any
//! order or grouping yields identical output.
//!
//! Merging is a sum, not a union. Merging a snapshot with itself doubles its
//! counts.

use std::collections::BTreeMap;

use crate::snapshot::{CoverageRange, FunctionCoverage, RuntimeSnapshot, ScriptCoverage};

/// A run of offsets `[start, end)` that share the same count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: u64,
    end: u64,
    count: u64,
}

/// Merge process coverages into one, summing counts per script url.
///
/// Source-map caches are not carried over; the loader absorbs them before
/// merging.
pub fn merge_process_covs<I>(snapshots: I) -> RuntimeSnapshot
where
    I: IntoIterator<Item = RuntimeSnapshot>,
{
    let mut by_url: BTreeMap<String, Vec<ScriptCoverage>> = BTreeMap::new();
    for snapshot in snapshots {
        for script in snapshot.result {
            by_url.entry(script.url.clone()).or_default().push(script);
        }
    }

    let result = by_url
        .into_values()
        .filter_map(merge_script_covs)
        .enumerate()
        .map(|(idx, mut script)| {
            script.script_id = idx.to_string();
            script
        })
        .collect();

    RuntimeSnapshot::new(result)
}

/// Merge coverages of the same script. Returns `None` for an empty input.
pub fn merge_script_covs(scripts: Vec<ScriptCoverage>) -> Option<ScriptCoverage> {
    let first = scripts.first()?;
    let url = first.url.clone();
    let script_id = first.script_id.clone();

    let functions: Vec<FunctionCoverage> = scripts.into_iter().flat_map(|s| s.functions).collect();

    // Placeholders only stand in for files nothing executed.
    let has_real = functions.iter().any(|f| !f.is_placeholder());

    let mut by_root: BTreeMap<(u64, u64), Vec<FunctionCoverage>> = BTreeMap::new();
    for func in functions {
        if has_real && func.is_placeholder() {
            continue;
        }
        let Some(root) = func.root_range() else {
            continue;
        };
        by_root
            .entry((root.start_offset, root.end_offset))
            .or_default()
            .push(func);
    }

    let functions = by_root.into_values().filter_map(merge_function_covs).collect();

    Some(ScriptCoverage {
        script_id,
        url,
        functions,
    })
}

/// Merge coverages of the same function (same root range). Returns `None` for
/// an empty input or when no contribution has a non-empty range.
pub fn merge_function_covs(funcs: Vec<FunctionCoverage>) -> Option<FunctionCoverage> {
    funcs.first()?;
    // Contributions may disagree on the name; the smallest non-empty one is
    // picked so the result does not depend on input order.
    let function_name = funcs
        .iter()
        .map(|f| f.function_name.as_str())
        .filter(|name| !name.is_empty())
        .min()
        .unwrap_or_default()
        .to_string();
    let single_block_flag = match funcs.as_slice() {
        [only] => Some(only.is_block_coverage),
        _ => None,
    };

    let mut root: Option<(u64, u64)> = None;
    let mut root_count: u64 = 0;
    let mut flattened = Vec::with_capacity(funcs.len());
    for func in &funcs {
        let Some((func_root, segments)) = flatten(&func.ranges) else {
            continue;
        };
        root = Some(match root {
            None => (func_root.start_offset, func_root.end_offset),
            Some((start, end)) => (
                start.min(func_root.start_offset),
                end.max(func_root.end_offset),
            ),
        });
        root_count = root_count.saturating_add(func_root.count);
        flattened.push(segments);
    }
    let (start, end) = root?;

    let summed = sum_segments(&flattened);

    let mut ranges = vec![CoverageRange::new(start, end, root_count)];
    ranges.extend(
        summed
            .iter()
            .filter(|seg| seg.count != root_count)
            .map(|seg| CoverageRange::new(seg.start, seg.end, seg.count)),
    );

    let is_block_coverage = single_block_flag
        .unwrap_or_else(|| !(ranges.len() == 1 && ranges[0].count == 0));

    Some(FunctionCoverage {
        function_name,
        ranges,
        is_block_coverage,
    })
}

/// Count of the innermost range covering `offset`, if any range does.
#[must_use]
pub fn count_at(func: &FunctionCoverage, offset: u64) -> Option<u64> {
    let (_, segments) = flatten(&func.ranges)?;
    segments
        .iter()
        .find(|seg| seg.start <= offset && offset < seg.end)
        .map(|seg| seg.count)
}

/// Flatten nested ranges into contiguous segments over the root range, where
/// each offset carries the count of the innermost range covering it.
fn flatten(ranges: &[CoverageRange]) -> Option<(CoverageRange, Vec<Segment>)> {
    let mut sorted: Vec<&CoverageRange> = ranges
        .iter()
        .filter(|r| r.start_offset < r.end_offset)
        .collect();
    sorted.sort_by(|a, b| {
        a.start_offset
            .cmp(&b.start_offset)
            .then(b.end_offset.cmp(&a.end_offset))
    });
    let root = (*sorted.first()?).clone();

    let mut segments = Vec::new();
    let mut stack: Vec<&CoverageRange> = Vec::new();
    let mut cursor = root.start_offset;

    for range in sorted {
        let start = range.start_offset;
        if start >= root.end_offset {
            continue;
        }
        while let Some(top) = stack.last() {
            if top.end_offset > start {
                break;
            }
            push_segment(&mut segments, cursor, top.end_offset, top.count);
            cursor = cursor.max(top.end_offset);
            stack.pop();
        }
        if let Some(top) = stack.last() {
            push_segment(&mut segments, cursor, start, top.count);
        }
        cursor = cursor.max(start);
        stack.push(range);
    }
    while let Some(top) = stack.pop() {
        let end = top.end_offset.min(root.end_offset);
        push_segment(&mut segments, cursor, end, top.count);
        cursor = cursor.max(end);
    }

    Some((root, segments))
}

/// Sum several segment lists offset by offset.
fn sum_segments(lists: &[Vec<Segment>]) -> Vec<Segment> {
    let mut bounds: Vec<u64> = lists
        .iter()
        .flatten()
        .flat_map(|seg| [seg.start, seg.end])
        .collect();
    bounds.sort_unstable();
    bounds.dedup();

    let mut cursors = vec![0usize; lists.len()];
    let mut out = Vec::new();
    for window in bounds.windows(2) {
        let (start, end) = (window[0], window[1]);
        let mut total: u64 = 0;
        for (list, idx) in lists.iter().zip(cursors.iter_mut()) {
            while *idx < list.len() && list[*idx].end <= start {
                *idx += 1;
            }
            if let Some(seg) = list.get(*idx) {
                if seg.start <= start {
                    total = total.saturating_add(seg.count);
                }
            }
        }
        push_segment(&mut out, start, end, total);
    }
    out
}

/// Append a segment, coalescing with the previous one when contiguous and of
/// equal count. Empty segments are ignored.
fn push_segment(segments: &mut Vec<Segment>, start: u64, end: u64, count: u64) {
    if start >= end {
        return;
    }
    if let Some(last) = segments.last_mut() {
        if last.end == start && last.count == count {
            last.end = end;
            return;
        }
    }
    segments.push(Segment { start, end, count });
}
