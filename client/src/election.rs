//! Election listing, time-window partitioning and result handling.
use crate::{
    address::Address,
    config::Config,
    error::{
        Error,
        Result,
    },
    gateway::{
        Bindings,
        ContractKind,
        Gateway,
        Receipt,
    },
    task::ScopedTask,
};
use core::{
    convert::TryFrom,
    ops::ControlFlow,
};
use serde::Serialize;
use std::{
    sync::Arc,
    time::{
        SystemTime,
        UNIX_EPOCH,
    },
};

/// 1-based and contiguous, assigned by the contract.
pub type ElectionId = u64;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Election as returned by `getElection`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ElectionRecord {
    pub id: ElectionId,
    pub title: String,
    pub description: String,
    pub candidates: Vec<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub active: bool,
}

/// Input of `createElection`.
#[derive(new, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ElectionDraft {
    pub title: String,
    pub description: String,
    pub candidates: Vec<String>,
    pub start_time: u64,
    pub end_time: u64,
}

impl ElectionDraft {
    /// Splits a comma separated candidate list, dropping blank entries.
    pub fn parse_candidates(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidElection("title is required".into()))
        }
        if self.description.trim().is_empty() {
            return Err(Error::InvalidElection(
                "description is required".into(),
            ))
        }
        if !self.candidates.iter().any(|c| !c.trim().is_empty()) {
            return Err(Error::InvalidElection(
                "at least one candidate is required".into(),
            ))
        }
        if self.start_time >= self.end_time {
            return Err(Error::InvalidElection(
                "end time must be later than start time".into(),
            ))
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Phase {
    Upcoming,
    Live,
    Expired,
}

/// Election with the caller's vote flag and the running tally.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Election {
    pub id: ElectionId,
    pub title: String,
    pub description: String,
    pub candidates: Vec<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub active: bool,
    pub has_voted: bool,
    pub vote_counts: Vec<u64>,
    pub results_published: bool,
}

impl Election {
    pub fn from_record(
        record: ElectionRecord,
        has_voted: bool,
        vote_counts: Vec<u64>,
    ) -> Self {
        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            candidates: record.candidates,
            start_time: record.start_time,
            end_time: record.end_time,
            active: record.active,
            has_voted,
            vote_counts,
            results_published: false,
        }
    }

    pub fn phase(&self, now: u64) -> Phase {
        if now < self.start_time {
            Phase::Upcoming
        } else if now <= self.end_time {
            Phase::Live
        } else {
            Phase::Expired
        }
    }

    /// Seconds until the election closes, zero once it has.
    pub fn seconds_left(&self, now: u64) -> u64 {
        self.end_time.saturating_sub(now)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Partition {
    pub upcoming: Vec<Election>,
    pub live: Vec<Election>,
    pub expired: Vec<Election>,
}

/// Splits elections by time window, keeping their order.
pub fn partition(elections: &[Election], now: u64) -> Partition {
    let mut partition = Partition::default();
    for election in elections {
        let bucket = match election.phase(now) {
            Phase::Upcoming => &mut partition.upcoming,
            Phase::Live => &mut partition.live,
            Phase::Expired => &mut partition.expired,
        };
        bucket.push(election.clone());
    }
    partition
}

/// Marks `id` as voted until the next reload says otherwise.
pub fn mark_voted(elections: &mut [Election], id: ElectionId) -> bool {
    match elections.iter_mut().find(|e| e.id == id) {
        Some(election) => {
            election.has_voted = true;
            true
        }
        None => false,
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ElectionResult {
    pub candidates: Vec<String>,
    pub counts: Vec<u64>,
    pub is_draw: bool,
    /// Empty on a draw.
    pub winner: String,
}

impl ElectionResult {
    /// A draw is two or more candidates sharing the highest count.
    pub fn tally(candidates: Vec<String>, counts: Vec<u64>) -> Self {
        let max = counts.iter().copied().max();
        let leaders: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, c)| Some(**c) == max)
            .map(|(i, _)| i)
            .collect();
        let is_draw = leaders.len() > 1;
        let winner = match leaders.as_slice() {
            [i] => candidates.get(*i).cloned().unwrap_or_default(),
            _ => String::new(),
        };
        Self {
            candidates,
            counts,
            is_draw,
            winner,
        }
    }

    pub fn tied_candidates(&self) -> Vec<&str> {
        let max = match self.counts.iter().max() {
            Some(max) => *max,
            None => return Vec::new(),
        };
        self.counts
            .iter()
            .zip(&self.candidates)
            .filter(|(c, _)| **c == max)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub fn summary(&self, id: ElectionId) -> String {
        if self.is_draw {
            format!(
                "Election {} is a draw between: {}",
                id,
                self.tied_candidates().join(", ")
            )
        } else {
            format!("Winner for election {}: {}", id, self.winner)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PublishedElection {
    pub election: Election,
    pub result: ElectionResult,
}

impl PublishedElection {
    /// Lays the published snapshot over the election, falling back to the
    /// live candidates and counts where the snapshot has none.
    pub fn overlay(mut election: Election, published: ElectionResult) -> Self {
        election.results_published = true;
        let candidates = if published.candidates.is_empty() {
            election.candidates.clone()
        } else {
            published.candidates
        };
        let counts = if published.counts.is_empty() {
            election.vote_counts.clone()
        } else {
            published.counts
        };
        Self {
            result: ElectionResult {
                candidates,
                counts,
                is_draw: published.is_draw,
                winner: published.winner,
            },
            election,
        }
    }
}

pub struct Aggregator<B> {
    config: Config,
    gateway: Arc<Gateway<B>>,
}

impl<B> Clone for Aggregator<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

impl<B: Bindings> Aggregator<B> {
    pub fn new(config: Config, gateway: Arc<Gateway<B>>) -> Self {
        Self { config, gateway }
    }

    /// Binds the election-management contract for the current signer.
    pub async fn bind(&self) -> Result<()> {
        let at = self.config.election_manager_address()?;
        self.gateway
            .init_contract(ContractKind::ElectionManagement, &at)
            .await
    }

    pub async fn vote_counts(
        &self,
        id: ElectionId,
        candidates: usize,
    ) -> Result<Vec<u64>> {
        let candidates = u32::try_from(candidates).map_err(|_| {
            Error::InvalidElection(format!("{} candidates", candidates))
        })?;
        let mut counts = Vec::new();
        for index in 0..candidates {
            counts.push(self.gateway.votes(id, index).await?);
        }
        Ok(counts)
    }

    pub async fn load_election(
        &self,
        id: ElectionId,
        account: Option<&Address>,
    ) -> Result<Election> {
        let record = self.gateway.get_election(id).await?;
        let has_voted = match account {
            Some(who) => self.gateway.has_voted(id, who).await?,
            None => false,
        };
        let counts = self.vote_counts(id, record.candidates.len()).await?;
        Ok(Election::from_record(record, has_voted, counts))
    }

    /// Every election in ascending id order.
    pub async fn load_elections(
        &self,
        account: Option<&Address>,
    ) -> Result<Vec<Election>> {
        let count = self.gateway.election_count().await?;
        let mut elections = Vec::new();
        for id in 1..=count {
            elections.push(self.load_election(id, account).await?);
        }
        Ok(elections)
    }

    pub async fn merge_published_flags(
        &self,
        elections: &mut [Election],
    ) -> Result<()> {
        for election in elections.iter_mut() {
            election.results_published =
                self.gateway.results_published(election.id).await?;
        }
        Ok(())
    }

    /// Published results of the given elections, unpublished ones skipped.
    pub async fn load_published(
        &self,
        elections: &[Election],
    ) -> Result<Vec<PublishedElection>> {
        let mut published = Vec::new();
        for election in elections {
            if !self.gateway.results_published(election.id).await? {
                continue
            }
            let result = self.gateway.published_results(election.id).await?;
            published.push(PublishedElection::overlay(election.clone(), result));
        }
        Ok(published)
    }

    pub async fn create_election(&self, draft: &ElectionDraft) -> Result<Receipt> {
        draft.validate()?;
        let receipt = self.gateway.create_election(draft).await?;
        log::info!("created election `{}` in {}", draft.title, receipt.tx);
        Ok(receipt)
    }

    /// Casts a vote. Callers follow up with [`mark_voted`] and a reload.
    pub async fn submit_vote(
        &self,
        id: ElectionId,
        candidate: u32,
    ) -> Result<Receipt> {
        let receipt = self.gateway.vote(id, candidate).await?;
        log::info!("vote for candidate {} in election {} confirmed", candidate, id);
        Ok(receipt)
    }

    pub async fn compute_winner(&self, id: ElectionId) -> Result<String> {
        self.gateway.compute_winner(id).await
    }

    pub async fn election_results(&self, id: ElectionId) -> Result<ElectionResult> {
        self.gateway.get_election_results(id).await
    }

    pub async fn publish_results(&self, id: ElectionId) -> Result<Receipt> {
        self.gateway.publish_results(id).await
    }

    /// Fetches the results of an expired election and, if asked, commits
    /// them on-chain.
    pub async fn compute_results_and_maybe_publish(
        &self,
        election: &Election,
        now: u64,
        publish: bool,
    ) -> Result<ElectionResult> {
        if election.phase(now) != Phase::Expired {
            return Err(Error::ElectionNotEnded(election.id))
        }
        let result = self.election_results(election.id).await?;
        if publish {
            let receipt = self.publish_results(election.id).await?;
            log::info!(
                "results of election {} published in {}",
                election.id,
                receipt.tx
            );
        }
        Ok(result)
    }

    /// Refreshes the tally of one election every poll interval.
    pub fn poll_vote_counts<F>(
        &self,
        id: ElectionId,
        candidates: usize,
        on_update: F,
    ) -> ScopedTask
    where
        F: Fn(Result<Vec<u64>>) + Send + Sync + 'static,
    {
        let aggregator = self.clone();
        let on_update = Arc::new(on_update);
        ScopedTask::every("vote-count-poll", self.config.poll_interval, move || {
            let aggregator = aggregator.clone();
            let on_update = on_update.clone();
            async move {
                on_update(aggregator.vote_counts(id, candidates).await);
                ControlFlow::Continue(())
            }
        })
    }

    /// Reloads the full election list every poll interval.
    pub fn poll_elections<F>(
        &self,
        account: Option<Address>,
        on_update: F,
    ) -> ScopedTask
    where
        F: Fn(Result<Vec<Election>>) + Send + Sync + 'static,
    {
        let aggregator = self.clone();
        let on_update = Arc::new(on_update);
        ScopedTask::every("election-poll", self.config.poll_interval, move || {
            let aggregator = aggregator.clone();
            let on_update = on_update.clone();
            let account = account.clone();
            async move {
                on_update(aggregator.load_elections(account.as_ref()).await);
                ControlFlow::Continue(())
            }
        })
    }
}
