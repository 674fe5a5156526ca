//! Splitting fused text into column values.

use super::profile::ColumnProfile;

/// How a run of adjacent free-text columns may be divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Only anchor patterns decide boundaries; a run of two or more
    /// unanchored columns cannot be split.
    AnchorsOnly,
    /// Unanchored runs are divided by expected column length.
    Proportional,
}

/// Splits `text` into exactly `columns.len()` values, or `None` when the
/// text cannot be reconciled with the column profiles.
///
/// Trailing anchors are peeled off first, then the remaining columns are
/// filled left to right: anchored columns consume their pattern, runs of
/// free columns take the text up to the next located anchor. Every value
/// must fit its column, so an anchor column that fell into a free run
/// still has to match its pattern.
pub fn segment(text: &str, columns: &[ColumnProfile], mode: SplitMode) -> Option<Vec<String>> {
    match columns.len() {
        0 => return text.is_empty().then(Vec::new),
        1 => return columns[0].fits(text).then(|| vec![text.to_string()]),
        _ => {}
    }

    let (body_len, end, tail) = peel_trailing(text, columns);
    let body = &columns[..body_len];
    let mut values = Vec::with_capacity(columns.len());
    let mut cursor = 0;
    let mut idx = 0;

    while idx < body.len() {
        let column = &body[idx];
        let rest = &text[cursor..end];
        if column.kind.is_anchor() {
            if let Some(len) = column.kind.match_prefix(rest) {
                values.push(rest[..len].to_string());
                cursor += len;
                idx += 1;
                continue;
            }
            if column.nullable {
                values.push(String::new());
                idx += 1;
                continue;
            }
        }

        // Free run: extend until an anchor column whose pattern occurs later.
        let mut stop = body.len();
        let mut run_end = end;
        for next in idx + 1..body.len() {
            if !body[next].kind.is_anchor() {
                continue;
            }
            if let Some(offset) = body[next].kind.find(rest) {
                stop = next;
                run_end = cursor + offset;
                break;
            }
        }
        let run = &body[idx..stop];
        values.extend(split_run(&text[cursor..run_end], run, mode)?);
        cursor = run_end;
        idx = stop;
    }

    if cursor != end {
        return None;
    }
    values.extend(tail);
    let consistent = values
        .iter()
        .zip(columns)
        .all(|(value, column)| column.fits(value));
    consistent.then_some(values)
}

/// Consumes mandatory fixed-width columns from the right. Returns the
/// number of columns left for the forward pass, the byte end of their text
/// and the peeled values in header order.
fn peel_trailing(text: &str, columns: &[ColumnProfile]) -> (usize, usize, Vec<String>) {
    let mut end = text.len();
    let mut remaining = columns.len();
    let mut tail = Vec::new();
    // Keep at least one column for the forward pass.
    while remaining > 1 {
        let column = &columns[remaining - 1];
        // An optional trailing column could steal its neighbour's value.
        if !column.kind.is_fixed_width() || column.nullable {
            break;
        }
        match column.kind.match_suffix(&text[..end]) {
            Some(len) if len < end => {
                tail.push(text[end - len..end].to_string());
                end -= len;
                remaining -= 1;
            }
            _ => break,
        }
    }
    tail.reverse();
    (remaining, end, tail)
}

fn split_run(text: &str, run: &[ColumnProfile], mode: SplitMode) -> Option<Vec<String>> {
    match run.len() {
        0 => text.is_empty().then(Vec::new),
        1 => run[0].fits(text).then(|| vec![text.to_string()]),
        _ if mode == SplitMode::AnchorsOnly => None,
        _ => proportional_split(text, run),
    }
}

/// Divides `text` into `run.len()` non-empty pieces sized by expected
/// length. Text shorter than the number of pieces cannot be divided.
pub fn proportional_split(text: &str, run: &[ColumnProfile]) -> Option<Vec<String>> {
    let parts = run.len();
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let chars = offsets.len() - 1;
    if parts == 0 || chars < parts {
        return None;
    }

    let weights: Vec<f64> = run.iter().map(|column| column.expected_len.max(1.0)).collect();
    let total: f64 = weights.iter().sum();
    let mut boundaries = Vec::with_capacity(parts + 1);
    boundaries.push(0usize);
    let mut cumulative = 0.0;
    for (piece, weight) in weights.iter().enumerate().take(parts - 1) {
        cumulative += weight;
        let ideal = (chars as f64 * cumulative / total).round() as usize;
        let lower = boundaries[piece] + 1;
        let upper = chars - (parts - piece - 1);
        boundaries.push(ideal.clamp(lower, upper));
    }
    boundaries.push(chars);

    Some(
        boundaries
            .windows(2)
            .map(|pair| text[offsets[pair[0]]..offsets[pair[1]]].to_string())
            .collect(),
    )
}
