use crate::Candidate;

/// Derived figures for the dashboard: totals, per-candidate shares, and the
/// current leader. Computed from a confirmed candidate snapshot, never from
/// optimistic state.
#[derive(Clone, Debug, PartialEq)]
pub struct VoteAnalytics {
    pub total_votes: u64,
    pub shares: Vec<CandidateShare>,
    /// Candidate id with the most votes; `None` until any vote lands.
    pub leader: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CandidateShare {
    pub id: u32,
    pub name: String,
    pub vote_count: u64,
    pub percent: f64,
}

impl VoteAnalytics {
    pub fn compute(candidates: &[Candidate]) -> VoteAnalytics {
        let total_votes: u64 = candidates.iter().map(|c| c.vote_count).sum();
        let shares = candidates
            .iter()
            .map(|c| CandidateShare {
                id: c.id,
                name: c.name.clone(),
                vote_count: c.vote_count,
                percent: if total_votes > 0 {
                    c.vote_count as f64 * 100.0 / total_votes as f64
                } else {
                    0.0
                },
            })
            .collect();
        let leader = candidates
            .iter()
            .max_by_key(|c| c.vote_count)
            .filter(|c| c.vote_count > 0)
            .map(|c| c.id);
        VoteAnalytics {
            total_votes,
            shares,
            leader,
        }
    }
}
