//! Session registry.
//!
//! Bidirectional endpoint ↔ player-id mapping under one lock, plus the
//! join/disconnect request types that flow from the network tasks to the
//! simulation task. The two maps are only ever mutated together, so any
//! observer sees a bijection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

/// A join request queued by the dispatcher, drained on the simulation task.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub endpoint: SocketAddr,
    pub character_id: Option<String>,
}

#[derive(Debug, Default)]
struct Maps {
    by_endpoint: HashMap<SocketAddr, u64>,
    by_player: HashMap<u64, SocketAddr>,
}

/// Endpoint ↔ player-id bijection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    maps: Mutex<Maps>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player_for_endpoint(&self, endpoint: SocketAddr) -> Option<u64> {
        self.lock().by_endpoint.get(&endpoint).copied()
    }

    pub fn endpoint_for_player(&self, player_id: u64) -> Option<SocketAddr> {
        self.lock().by_player.get(&player_id).copied()
    }

    /// Inserts both directions. Refuses if either key is already mapped;
    /// the bijection never goes one-sided.
    pub fn insert(&self, endpoint: SocketAddr, player_id: u64) -> bool {
        let mut maps = self.lock();
        if maps.by_endpoint.contains_key(&endpoint) || maps.by_player.contains_key(&player_id) {
            return false;
        }
        maps.by_endpoint.insert(endpoint, player_id);
        maps.by_player.insert(player_id, endpoint);
        true
    }

    /// Removes by endpoint, returning the player id that was mapped.
    pub fn remove_endpoint(&self, endpoint: SocketAddr) -> Option<u64> {
        let mut maps = self.lock();
        let player_id = maps.by_endpoint.remove(&endpoint)?;
        maps.by_player.remove(&player_id);
        Some(player_id)
    }

    /// Removes by player id, returning the endpoint that was mapped.
    pub fn remove_player(&self, player_id: u64) -> Option<SocketAddr> {
        let mut maps = self.lock();
        let endpoint = maps.by_player.remove(&player_id)?;
        maps.by_endpoint.remove(&endpoint);
        Some(endpoint)
    }

    pub fn all_endpoints(&self) -> Vec<SocketAddr> {
        self.lock().by_endpoint.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_endpoint.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(|e| e.into_inner())
    }
}
