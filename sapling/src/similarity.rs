//! Similarity measures shared by the matchers and the edit script generator.

use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;

use crate::matching::Matching;
use crate::tree::{Kind, Tree};

/// Dice coefficient `2·common / (a + b)`. Two empty sets are identical.
#[inline]
pub fn dice(common: usize, a_len: usize, b_len: usize) -> f64 {
    if a_len == 0 && b_len == 0 {
        1.0
    } else {
        2.0 * common as f64 / (a_len + b_len) as f64
    }
}

/// Dice coefficient over the current mapping: the share of `a`'s descendants
/// whose partner lies below `b`.
pub fn mapping_dice(src: &Tree, a: NodeId, dst: &Tree, b: NodeId, matching: &Matching) -> f64 {
    let desc_a = src.descendants(a);
    let common = desc_a
        .iter()
        .filter(|&&x| {
            matching
                .get_b(x)
                .is_some_and(|partner| dst.is_descendant(b, partner))
        })
        .count();
    dice(common, desc_a.len(), dst.size(b) - 1)
}

/// Dice coefficient of the descendant kind multisets of `a` and `b`.
///
/// Independent of the mapping, so it still scores containers whose
/// descendants are all unmatched.
pub fn kind_dice(src: &Tree, a: NodeId, dst: &Tree, b: NodeId) -> f64 {
    let mut counts: HashMap<&Kind, usize> = HashMap::default();
    for &x in src.descendants(a) {
        *counts.entry(src.kind(x)).or_default() += 1;
    }

    let mut common = 0;
    for &y in dst.descendants(b) {
        if let Some(count) = counts.get_mut(dst.kind(y))
            && *count > 0
        {
            *count -= 1;
            common += 1;
        }
    }

    dice(common, src.size(a) - 1, dst.size(b) - 1)
}

/// Levenshtein distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        core::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// `1 - levenshtein / max_len`, in [0, 1]. Two empty strings are identical.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Similarity of two optional node values: both absent is a perfect match,
/// one absent is no match.
pub fn value_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    match (a, b) {
        (None, None) => 1.0,
        (Some(a), Some(b)) => string_similarity(a, b),
        _ => 0.0,
    }
}

/// Above this many table cells `lcs` falls back to a greedy scan.
pub const LCS_CELL_BUDGET: usize = 1 << 22;

/// How far ahead the greedy scan looks for a partner.
const GREEDY_WINDOW: usize = 64;

/// Longest common subsequence of `left` and `right` under `eq`, as index pairs
/// in increasing order.
///
/// The common prefix and suffix are taken as is. When both directions give
/// the same length the backtrack drops the element of `left` first, so among
/// equally long alignments the later elements of `right` are the ones kept.
///
/// If what remains needs more than [`LCS_CELL_BUDGET`] cells, a windowed
/// greedy scan is used instead: the pairs still form a common subsequence,
/// just not necessarily a longest one.
pub fn lcs<L, R>(left: &[L], right: &[R], eq: impl Fn(&L, &R) -> bool) -> Vec<(usize, usize)> {
    let prefix = left
        .iter()
        .zip(right)
        .take_while(|&(l, r)| eq(l, r))
        .count();
    let suffix = left[prefix..]
        .iter()
        .rev()
        .zip(right[prefix..].iter().rev())
        .take_while(|&(l, r)| eq(l, r))
        .count();
    let middle_left = &left[prefix..left.len() - suffix];
    let middle_right = &right[prefix..right.len() - suffix];

    let middle = if middle_left.len().saturating_mul(middle_right.len()) > LCS_CELL_BUDGET {
        greedy_subsequence(middle_left, middle_right, &eq)
    } else {
        table_lcs(middle_left, middle_right, &eq)
    };

    let mut pairs = Vec::with_capacity(prefix + middle.len() + suffix);
    pairs.extend((0..prefix).map(|i| (i, i)));
    pairs.extend(middle.into_iter().map(|(i, j)| (prefix + i, prefix + j)));
    pairs.extend((0..suffix).map(|k| (left.len() - suffix + k, right.len() - suffix + k)));
    pairs
}

fn table_lcs<L, R>(left: &[L], right: &[R], eq: &impl Fn(&L, &R) -> bool) -> Vec<(usize, usize)> {
    let n = left.len();
    let m = right.len();
    if n == 0 || m == 0 {
        return Vec::new();
    }

    // table[i][j] = LCS length of left[..i] and right[..j]
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in 1..=n {
        for j in 1..=m {
            table[i * width + j] = if eq(&left[i - 1], &right[j - 1]) {
                table[(i - 1) * width + j - 1] + 1
            } else {
                table[(i - 1) * width + j].max(table[i * width + j - 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[n * width + m] as usize);
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        if eq(&left[i - 1], &right[j - 1])
            && table[i * width + j] == table[(i - 1) * width + j - 1] + 1
        {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if table[(i - 1) * width + j] >= table[i * width + j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

/// Pair each element of `left` with the first equal element of `right` within
/// [`GREEDY_WINDOW`] of the previous pair. Linear in the input lengths.
fn greedy_subsequence<L, R>(
    left: &[L],
    right: &[R],
    eq: &impl Fn(&L, &R) -> bool,
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut next = 0;
    for (i, l) in left.iter().enumerate() {
        if next == right.len() {
            break;
        }
        let end = (next + GREEDY_WINDOW).min(right.len());
        if let Some(offset) = right[next..end].iter().position(|r| eq(l, r)) {
            pairs.push((i, next + offset));
            next += offset + 1;
        }
    }
    pairs
}
