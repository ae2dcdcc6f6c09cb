//! Leaderboard ranker.
//!
//! Boards live behind `RwLock<Arc<Boards>>`. Incremental updates re-slot one
//! account copy-on-write; a full recompute builds a fresh `Boards` and swaps it
//! in, recording every account's rank as the baseline for `change`.

use crate::domain::{
    AccountId, Category, InfluenceMetrics, LeaderboardEntry, PersonaType, RankKey, Timeframe,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// What the ranker needs to know about one account.
#[derive(Debug, Clone, PartialEq)]
pub struct RankInput {
    pub account_id: AccountId,
    pub persona_type: PersonaType,
    pub follower_count: u64,
    pub scores: BTreeMap<Timeframe, f64>,
}

impl From<&InfluenceMetrics> for RankInput {
    fn from(m: &InfluenceMetrics) -> Self {
        Self {
            account_id: m.account_id.clone(),
            persona_type: m.persona_type,
            follower_count: m.follower_count,
            scores: m.timeframe_scores.clone(),
        }
    }
}

type BoardId = (Timeframe, Category);

#[derive(Debug, Clone, Default)]
struct Boards {
    members: HashMap<AccountId, RankInput>,
    ordered: HashMap<BoardId, BTreeSet<RankKey>>,
    /// Ranks recorded at the last full recompute.
    previous: HashMap<BoardId, HashMap<AccountId, u32>>,
    /// Bumped by every incremental update.
    generation: u64,
    /// Generation of each account's latest incremental update.
    touched: HashMap<AccountId, u64>,
}

impl Boards {
    fn keys_for(input: &RankInput) -> Vec<(BoardId, RankKey)> {
        let mut keys = Vec::with_capacity(Timeframe::ALL.len() * 2);
        for tf in Timeframe::ALL {
            let score = input.scores.get(&tf).copied().unwrap_or(0.0);
            let key = RankKey::new(score, input.follower_count, input.account_id.clone());
            keys.push(((tf, Category::All), key.clone()));
            keys.push(((tf, Category::Persona(input.persona_type)), key));
        }
        keys
    }

    fn insert(&mut self, input: RankInput) {
        for (board, key) in Self::keys_for(&input) {
            self.ordered.entry(board).or_default().insert(key);
        }
        self.members.insert(input.account_id.clone(), input);
    }

    fn remove(&mut self, account_id: &AccountId) -> Option<RankInput> {
        let old = self.members.remove(account_id)?;
        for (board, key) in Self::keys_for(&old) {
            if let Some(set) = self.ordered.get_mut(&board) {
                set.remove(&key);
            }
        }
        Some(old)
    }

    fn rank_of(&self, board: &BoardId, account_id: &AccountId) -> Option<u32> {
        let input = self.members.get(account_id)?;
        let score = input.scores.get(&board.0).copied().unwrap_or(0.0);
        let key = RankKey::new(score, input.follower_count, account_id.clone());
        let set = self.ordered.get(board)?;
        if !set.contains(&key) {
            return None;
        }
        Some(set.range(..&key).count() as u32 + 1)
    }

    fn rank_table(&self) -> HashMap<BoardId, HashMap<AccountId, u32>> {
        self.ordered
            .iter()
            .map(|(board, set)| {
                let ranks = set
                    .iter()
                    .enumerate()
                    .map(|(i, k)| (k.account_id.clone(), i as u32 + 1))
                    .collect();
                (*board, ranks)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct LeaderboardRanker {
    boards: RwLock<Arc<Boards>>,
}

impl LeaderboardRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-slot one account after its metrics changed.
    pub fn upsert(&self, input: RankInput) {
        let mut guard = self.boards.write();
        let boards = Arc::make_mut(&mut guard);
        if boards.members.get(&input.account_id) == Some(&input) {
            return;
        }
        boards.generation += 1;
        boards
            .touched
            .insert(input.account_id.clone(), boards.generation);
        boards.remove(&input.account_id);
        boards.insert(input);
    }

    /// Generation to pass to [`rebuild`](Self::rebuild), read before
    /// collecting its inputs.
    pub fn generation(&self) -> u64 {
        self.boards.read().generation
    }

    /// Rebuild every board from scratch and swap it in atomically.
    ///
    /// Accounts upserted after generation `since` keep their upserted entry,
    /// since `inputs` may predate it.
    pub fn rebuild<I>(&self, inputs: I, since: u64)
    where
        I: IntoIterator<Item = RankInput>,
    {
        let mut fresh = Boards::default();
        for input in inputs {
            fresh.insert(input);
        }
        let mut guard = self.boards.write();
        let current = Arc::clone(&guard);
        for (account_id, stamp) in &current.touched {
            if *stamp <= since {
                continue;
            }
            if let Some(member) = current.members.get(account_id) {
                fresh.remove(account_id);
                fresh.insert(member.clone());
            }
        }
        // Ranks as of the previous structure become the baseline for `change`.
        fresh.previous = current.rank_table();
        fresh.generation = current.generation;
        *guard = Arc::new(fresh);
    }

    /// One page of a board. Ranks are `offset + i + 1`.
    pub fn page(
        &self,
        timeframe: Timeframe,
        category: Category,
        limit: usize,
        offset: usize,
    ) -> Vec<LeaderboardEntry> {
        let boards = self.snapshot();
        let board = (timeframe, category);
        let Some(set) = boards.ordered.get(&board) else {
            return Vec::new();
        };
        let previous = boards.previous.get(&board);
        set.iter()
            .skip(offset)
            .take(limit)
            .enumerate()
            .filter_map(|(i, key)| {
                let member = boards.members.get(&key.account_id)?;
                let rank = (offset + i + 1) as u32;
                let change = previous
                    .and_then(|p| p.get(&key.account_id))
                    .map_or(0, |prev| i64::from(*prev) - i64::from(rank));
                Some(LeaderboardEntry {
                    rank,
                    account_id: key.account_id.clone(),
                    persona_type: member.persona_type,
                    score: key.score,
                    follower_count: key.follower_count,
                    timeframe,
                    category,
                    change,
                })
            })
            .collect()
    }

    /// Current rank of one account on a board.
    pub fn rank_of(
        &self,
        account_id: &AccountId,
        timeframe: Timeframe,
        category: Category,
    ) -> Option<u32> {
        self.snapshot().rank_of(&(timeframe, category), account_id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Boards> {
        Arc::clone(&self.boards.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: &str, persona: PersonaType, score: f64, followers: u64) -> RankInput {
        RankInput {
            account_id: AccountId::new(id),
            persona_type: persona,
            follower_count: followers,
            scores: Timeframe::ALL.into_iter().map(|t| (t, score)).collect(),
        }
    }

    fn ids(entries: &[LeaderboardEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.account_id.as_str()).collect()
    }

    #[test]
    fn test_ties_broken_by_followers_then_id() {
        let ranker = LeaderboardRanker::new();
        ranker.upsert(input("c", PersonaType::Journalist, 50.0, 10));
        ranker.upsert(input("b", PersonaType::Journalist, 50.0, 10));
        ranker.upsert(input("a", PersonaType::Journalist, 50.0, 5));
        ranker.upsert(input("z", PersonaType::Activist, 70.0, 0));
        let page = ranker.page(Timeframe::Day, Category::All, 10, 0);
        assert_eq!(ids(&page), vec!["z", "b", "c", "a"]);
        assert_eq!(page.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_category_board_and_offset() {
        let ranker = LeaderboardRanker::new();
        ranker.upsert(input("a", PersonaType::Journalist, 10.0, 0));
        ranker.upsert(input("b", PersonaType::Journalist, 20.0, 0));
        ranker.upsert(input("x", PersonaType::Activist, 99.0, 0));
        let page = ranker.page(Timeframe::Week, Category::Persona(PersonaType::Journalist), 10, 1);
        assert_eq!(ids(&page), vec!["a"]);
        assert_eq!(page[0].rank, 2);
        assert_eq!(
            ranker.rank_of(&AccountId::new("x"), Timeframe::Week, Category::All),
            Some(1)
        );
    }

    #[test]
    fn test_incremental_update_reslots() {
        let ranker = LeaderboardRanker::new();
        ranker.upsert(input("a", PersonaType::Influencer, 10.0, 0));
        ranker.upsert(input("b", PersonaType::Influencer, 20.0, 0));
        ranker.upsert(input("a", PersonaType::Influencer, 30.0, 0));
        let page = ranker.page(Timeframe::Hour, Category::All, 10, 0);
        assert_eq!(ids(&page), vec!["a", "b"]);
        assert_eq!(ranker.len(), 2);
    }

    #[test]
    fn test_change_relative_to_last_full_recompute() {
        let ranker = LeaderboardRanker::new();
        ranker.rebuild(
            vec![
                input("a", PersonaType::Influencer, 30.0, 0),
                input("b", PersonaType::Influencer, 20.0, 0),
            ],
            ranker.generation(),
        );
        let first = ranker.page(Timeframe::Day, Category::All, 10, 0);
        assert!(first.iter().all(|e| e.change == 0));

        ranker.rebuild(
            vec![
                input("a", PersonaType::Influencer, 10.0, 0),
                input("b", PersonaType::Influencer, 20.0, 0),
            ],
            ranker.generation(),
        );
        let second = ranker.page(Timeframe::Day, Category::All, 10, 0);
        assert_eq!(ids(&second), vec!["b", "a"]);
        assert_eq!(second[0].change, 1);
        assert_eq!(second[1].change, -1);
    }

    #[test]
    fn test_rebuild_keeps_upserts_newer_than_its_inputs() {
        let ranker = LeaderboardRanker::new();
        ranker.upsert(input("a", PersonaType::Influencer, 10.0, 0));
        ranker.upsert(input("b", PersonaType::Influencer, 20.0, 0));

        let since = ranker.generation();
        let stale = vec![
            input("a", PersonaType::Influencer, 10.0, 0),
            input("b", PersonaType::Influencer, 20.0, 0),
        ];
        ranker.upsert(input("a", PersonaType::Influencer, 90.0, 0));
        ranker.rebuild(stale, since);

        let page = ranker.page(Timeframe::Day, Category::All, 10, 0);
        assert_eq!(ids(&page), vec!["a", "b"]);
        assert_eq!(page[0].score, 90.0);

        // A later rebuild from fresh inputs is not overridden by old upserts.
        let since = ranker.generation();
        ranker.rebuild(
            vec![
                input("a", PersonaType::Influencer, 5.0, 0),
                input("b", PersonaType::Influencer, 20.0, 0),
            ],
            since,
        );
        let page = ranker.page(Timeframe::Day, Category::All, 10, 0);
        assert_eq!(ids(&page), vec!["b", "a"]);
    }

    #[test]
    fn test_queries_are_deterministic() {
        let ranker = LeaderboardRanker::new();
        for i in 0..20 {
            ranker.upsert(input(&format!("acct{:02}", i), PersonaType::Business, (i % 3) as f64, i % 2));
        }
        let a = ranker.page(Timeframe::Month, Category::All, 20, 0);
        let b = ranker.page(Timeframe::Month, Category::All, 20, 0);
        assert_eq!(a, b);
    }
}
