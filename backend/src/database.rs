//! Read-only directory of buyers, sellers, datacenters and relays.
//!
//! The directory is loaded whole from a JSON file and swapped in as a new
//! snapshot when it changes. It is never mutated after construction.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::pricing::Nibblins;
use crate::types::{Buyer, Datacenter, Relay, Seller};

/// On-disk layout: flat lists, indexed on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DatabaseFile {
    buyers: Vec<Buyer>,
    sellers: Vec<Seller>,
    datacenters: Vec<Datacenter>,
    relays: Vec<Relay>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "DatabaseFile", into = "DatabaseFile")]
pub struct Database {
    buyers: HashMap<u64, Buyer>,
    sellers: HashMap<u64, Seller>,
    datacenters: HashMap<u64, Datacenter>,
    relays: HashMap<u64, Relay>,
    relays_by_address: HashMap<SocketAddr, u64>,
    datacenter_relays: HashMap<u64, Vec<u64>>,
}

impl From<DatabaseFile> for Database {
    fn from(file: DatabaseFile) -> Self {
        Self::new(file.buyers, file.sellers, file.datacenters, file.relays)
    }
}

impl From<Database> for DatabaseFile {
    fn from(database: Database) -> Self {
        fn sorted<T>(map: HashMap<u64, T>) -> Vec<T> {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by_key(|(id, _)| *id);
            entries.into_iter().map(|(_, value)| value).collect()
        }
        Self {
            buyers: sorted(database.buyers),
            sellers: sorted(database.sellers),
            datacenters: sorted(database.datacenters),
            relays: sorted(database.relays),
        }
    }
}

impl Database {
    /// Indexes the given records. Later duplicates replace earlier ones.
    #[must_use]
    pub fn new(
        buyers: Vec<Buyer>,
        sellers: Vec<Seller>,
        datacenters: Vec<Datacenter>,
        relays: Vec<Relay>,
    ) -> Self {
        let mut datacenter_relays: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut relays_by_address = HashMap::with_capacity(relays.len());
        let relays: HashMap<u64, Relay> = relays.into_iter().map(|r| (r.id, r)).collect();
        let mut relay_ids: Vec<_> = relays.keys().copied().collect();
        relay_ids.sort_unstable();
        for id in relay_ids {
            let relay = &relays[&id];
            datacenter_relays
                .entry(relay.datacenter_id)
                .or_default()
                .push(id);
            relays_by_address.insert(relay.address, id);
        }

        Self {
            buyers: buyers.into_iter().map(|b| (b.id, b)).collect(),
            sellers: sellers.into_iter().map(|s| (s.id, s)).collect(),
            datacenters: datacenters.into_iter().map(|d| (d.id, d)).collect(),
            relays,
            relays_by_address,
            datacenter_relays,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn buyer(&self, id: u64) -> Option<&Buyer> {
        self.buyers.get(&id)
    }

    #[must_use]
    pub fn seller(&self, id: u64) -> Option<&Seller> {
        self.sellers.get(&id)
    }

    #[must_use]
    pub fn datacenter(&self, id: u64) -> Option<&Datacenter> {
        self.datacenters.get(&id)
    }

    #[must_use]
    pub fn relay(&self, id: u64) -> Option<&Relay> {
        self.relays.get(&id)
    }

    #[must_use]
    pub fn relay_by_address(&self, address: &SocketAddr) -> Option<&Relay> {
        self.relays_by_address
            .get(address)
            .and_then(|id| self.relays.get(id))
    }

    /// Ids of relays hosted in `datacenter_id`, ascending.
    #[must_use]
    pub fn relays_in_datacenter(&self, datacenter_id: u64) -> &[u64] {
        self.datacenter_relays
            .get(&datacenter_id)
            .map_or(&[], Vec::as_slice)
    }

    pub fn relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.values()
    }

    /// Egress rate charged by a relay: its override, else its seller's rate.
    ///
    /// Unknown relays and sellers charge nothing.
    #[must_use]
    pub fn relay_egress_price(&self, relay_id: u64) -> Nibblins {
        let Some(relay) = self.relay(relay_id) else {
            return Nibblins::ZERO;
        };
        relay.egress_price_override.unwrap_or_else(|| {
            self.seller(relay.seller_id)
                .map_or(Nibblins::ZERO, |seller| seller.egress_price_per_gb)
        })
    }

    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.buyers.len(),
            self.sellers.len(),
            self.datacenters.len(),
            self.relays.len(),
        )
    }
}
