//! In-memory Star Wars data with call tracking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// A human character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Human {
    pub id: String,
    pub name: Option<String>,
    pub friends: Vec<String>,
    pub appears_in: Vec<i32>,
    pub home_planet: Option<String>,
}

/// A droid character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Droid {
    pub id: String,
    pub owner_id: Option<String>,
    pub name: Option<String>,
    pub friends: Vec<String>,
    pub appears_in: Vec<i32>,
    pub primary_function: Option<String>,
}

/// Any character, serialized with its `__typename`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__typename")]
pub enum Character {
    Human(Human),
    Droid(Droid),
}

impl Character {
    pub fn id(&self) -> &str {
        match self {
            Self::Human(h) => &h.id,
            Self::Droid(d) => &d.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Human(h) => h.name.as_deref(),
            Self::Droid(d) => d.name.as_deref(),
        }
    }

    pub fn friends(&self) -> &[String] {
        match self {
            Self::Human(h) => &h.friends,
            Self::Droid(d) => &d.friends,
        }
    }
}

/// Number of calls per data access method.
#[derive(Debug, Default)]
struct CallCounters {
    friends: AtomicUsize,
    friends_for_ids: AtomicUsize,
    human_by_id: AtomicUsize,
    droid_by_id: AtomicUsize,
    droids_by_ids: AtomicUsize,
    droid_owners_by_ids: AtomicUsize,
    add_human: AtomicUsize,
}

/// A snapshot of the call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCounts {
    pub friends: usize,
    pub friends_for_ids: usize,
    pub human_by_id: usize,
    pub droid_by_id: usize,
    pub droids_by_ids: usize,
    pub droid_owners_by_ids: usize,
    pub add_human: usize,
}

impl CallCounts {
    /// Total number of calls.
    pub fn total(&self) -> usize {
        self.friends
            + self.friends_for_ids
            + self.human_by_id
            + self.droid_by_id
            + self.droids_by_ids
            + self.droid_owners_by_ids
            + self.add_human
    }
}

/// The Star Wars data source.
///
/// Every asynchronous method suspends at least once, or sleeps for the
/// configured latency, so callers see real pending work.
#[derive(Debug)]
pub struct StarWarsData {
    humans: RwLock<Vec<Human>>,
    droids: Vec<Droid>,
    latency: Option<Duration>,
    next_id: AtomicUsize,
    calls: CallCounters,
}

impl Default for StarWarsData {
    fn default() -> Self {
        Self::new()
    }
}

impl StarWarsData {
    /// Creates the data set.
    pub fn new() -> Self {
        let humans = vec![
            Human {
                id: "1".to_string(),
                name: Some("Luke".to_string()),
                friends: vec!["3".to_string(), "4".to_string()],
                appears_in: vec![4, 5, 6],
                home_planet: Some("Tatooine".to_string()),
            },
            Human {
                id: "2".to_string(),
                name: Some("Vader".to_string()),
                friends: Vec::new(),
                appears_in: vec![4, 5, 6],
                home_planet: Some("Tatooine".to_string()),
            },
        ];
        let droids = vec![
            Droid {
                id: "3".to_string(),
                owner_id: Some("1".to_string()),
                name: Some("R2-D2".to_string()),
                friends: vec!["1".to_string(), "4".to_string()],
                appears_in: vec![4, 5, 6],
                primary_function: Some("Astromech".to_string()),
            },
            Droid {
                id: "4".to_string(),
                owner_id: Some("1".to_string()),
                name: Some("C-3PO".to_string()),
                friends: Vec::new(),
                appears_in: vec![4, 5, 6],
                primary_function: Some("Protocol".to_string()),
            },
        ];
        Self {
            humans: RwLock::new(humans),
            droids,
            latency: None,
            next_id: AtomicUsize::new(1000),
            calls: CallCounters::default(),
        }
    }

    /// Makes every asynchronous method sleep for `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the call counts so far.
    pub fn calls(&self) -> CallCounts {
        let c = &self.calls;
        CallCounts {
            friends: c.friends.load(Ordering::SeqCst),
            friends_for_ids: c.friends_for_ids.load(Ordering::SeqCst),
            human_by_id: c.human_by_id.load(Ordering::SeqCst),
            droid_by_id: c.droid_by_id.load(Ordering::SeqCst),
            droids_by_ids: c.droids_by_ids.load(Ordering::SeqCst),
            droid_owners_by_ids: c.droid_owners_by_ids.load(Ordering::SeqCst),
            add_human: c.add_human.load(Ordering::SeqCst),
        }
    }

    /// Resets the call counts.
    pub fn reset_calls(&self) {
        let c = &self.calls;
        for counter in [
            &c.friends,
            &c.friends_for_ids,
            &c.human_by_id,
            &c.droid_by_id,
            &c.droids_by_ids,
            &c.droid_owners_by_ids,
            &c.add_human,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// All characters, humans first.
    fn characters(&self) -> Vec<Character> {
        let humans = self.humans.read().unwrap_or_else(PoisonError::into_inner);
        humans
            .iter()
            .cloned()
            .map(Character::Human)
            .chain(self.droids.iter().cloned().map(Character::Droid))
            .collect()
    }

    async fn io(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    /// Friends of a character, humans first.
    pub fn get_friends(&self, character: &Character) -> Vec<Character> {
        self.calls.friends.fetch_add(1, Ordering::SeqCst);
        let lookup = character.friends();
        self.characters()
            .into_iter()
            .filter(|c| lookup.iter().any(|id| id == c.id()))
            .collect()
    }

    /// Friends of every character in `ids`, keyed by character id.
    pub async fn get_friends_for_ids(&self, ids: &[String]) -> HashMap<String, Vec<Character>> {
        self.calls.friends_for_ids.fetch_add(1, Ordering::SeqCst);
        self.io().await;
        let all = self.characters();
        all.iter()
            .filter(|c| ids.iter().any(|id| id == c.id()))
            .map(|c| {
                let friends = all
                    .iter()
                    .filter(|f| c.friends().iter().any(|id| id == f.id()))
                    .cloned()
                    .collect();
                (c.id().to_string(), friends)
            })
            .collect()
    }

    pub async fn get_human_by_id(&self, id: &str) -> Option<Human> {
        self.calls.human_by_id.fetch_add(1, Ordering::SeqCst);
        self.io().await;
        let humans = self.humans.read().unwrap_or_else(PoisonError::into_inner);
        humans.iter().find(|h| h.id == id).cloned()
    }

    pub async fn get_droid_by_id(&self, id: &str) -> Option<Droid> {
        self.calls.droid_by_id.fetch_add(1, Ordering::SeqCst);
        self.io().await;
        self.droids.iter().find(|d| d.id == id).cloned()
    }

    pub async fn get_droids_by_ids(&self, ids: &[String]) -> Vec<Droid> {
        self.calls.droids_by_ids.fetch_add(1, Ordering::SeqCst);
        self.io().await;
        self.droids
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect()
    }

    /// Owners of the droids in `ids`, keyed by droid id. Unknown droids and
    /// droids without an owner are left out.
    pub async fn get_droid_owners_by_ids(&self, ids: &[String]) -> HashMap<String, Vec<Character>> {
        self.calls.droid_owners_by_ids.fetch_add(1, Ordering::SeqCst);
        self.io().await;
        let all = self.characters();
        ids.iter()
            .filter_map(|id| self.droids.iter().find(|d| &d.id == id))
            .filter_map(|droid| {
                let owner_id = droid.owner_id.as_deref()?;
                let owner = all.iter().find(|c| c.id() == owner_id)?;
                Some((droid.id.clone(), vec![owner.clone()]))
            })
            .collect()
    }

    /// Stores a new human under a generated id.
    pub async fn add_human(&self, mut human: Human) -> Human {
        self.calls.add_human.fetch_add(1, Ordering::SeqCst);
        self.io().await;
        human.id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut humans = self.humans.write().unwrap_or_else(PoisonError::into_inner);
        humans.push(human.clone());
        human
    }
}
