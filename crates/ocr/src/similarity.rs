/// Sequence similarity in `[0.0, 1.0]`: twice the number of matched characters
/// divided by the combined length.
///
/// Matched characters come from Ratcliff/Obershelp block matching: take the
/// longest common run, then recurse into the pieces left and right of it.
/// Among equally long runs the one starting earliest in `a` (then in `b`) is
/// taken, which keeps scores stable for repeated text.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(&a, &b) as f64 / total as f64
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    // Scratch rows for the run-length table, indexed by position in `b`.
    let mut prev = vec![0usize; b.len()];
    let mut curr = vec![0usize; b.len()];

    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, size) = longest_match(a, b, (alo, ahi), (blo, bhi), &mut prev, &mut curr);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            queue.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common run of `a[alo..ahi]` and `b[blo..bhi]` as `(start_a, start_b, len)`.
fn longest_match(
    a: &[char],
    b: &[char],
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
    prev: &mut [usize],
    curr: &mut [usize],
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    prev[blo..bhi].fill(0);

    for i in alo..ahi {
        for j in blo..bhi {
            curr[j] = if a[i] == b[j] {
                let run = if j > blo { prev[j - 1] } else { 0 } + 1;
                if run > best_size {
                    best_i = i + 1 - run;
                    best_j = j + 1 - run;
                    best_size = run;
                }
                run
            } else {
                0
            };
        }
        prev[blo..bhi].copy_from_slice(&curr[blo..bhi]);
    }

    (best_i, best_j, best_size)
}
