use super::orb::Descriptor;

/// A descriptor correspondence; `query` indexes the frame, `train` the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn nearest(d: &Descriptor, candidates: &[Descriptor]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, hamming(d, c)))
        .min_by_key(|&(i, dist)| (dist, i))
}

/// Brute-force nearest neighbours kept only when each side is the other's
/// best match. Sorted by ascending distance, best first.
pub fn cross_checked(query: &[Descriptor], train: &[Descriptor]) -> Vec<Match> {
    let backward: Vec<Option<usize>> = train
        .iter()
        .map(|t| nearest(t, query).map(|(i, _)| i))
        .collect();

    let mut matches: Vec<Match> = query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (ti, distance) = nearest(q, train)?;
            (backward[ti] == Some(qi)).then_some(Match {
                query: qi,
                train: ti,
                distance,
            })
        })
        .collect();

    matches.sort_by_key(|m| (m.distance, m.query));
    matches
}

/// Keep only the best `limit` matches; `None` keeps all of them.
pub fn limit_matches(mut matches: Vec<Match>, limit: Option<usize>) -> Vec<Match> {
    if let Some(limit) = limit {
        matches.truncate(limit);
    }
    matches
}
