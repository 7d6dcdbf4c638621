//! Shard routing over an immutable topology snapshot
//!
//! A [`ShardRouter`] is built once from a host-to-shard assignment table and
//! never mutated; topology changes produce a fresh snapshot handed to
//! in-flight readers behind an `Arc`.

use crate::{ChronoError, Result};

/// A replica host owning one or more shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Stable host identifier
    pub id: String,
    /// Network address, opaque to the storage engine
    pub address: String,
}

impl Host {
    /// Create a new host
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// The shards assigned to one host in the topology
#[derive(Debug, Clone)]
pub struct HostShardAssignment {
    /// The owning host
    pub host: Host,
    /// Shard indices owned by this host
    pub shards: Vec<u32>,
}

impl HostShardAssignment {
    /// Create a new assignment
    pub fn new(host: Host, shards: Vec<u32>) -> Self {
        Self { host, shards }
    }
}

/// Deterministic identifier-to-shard routing with ordered replica lists
#[derive(Debug)]
pub struct ShardRouter {
    num_shards: u32,
    ordered_hosts: Vec<Host>,
    hosts_by_shard: Vec<Vec<Host>>,
    ordered_hosts_by_shard: Vec<Vec<(usize, Host)>>,
    replicas: usize,
    majority: usize,
}

impl ShardRouter {
    /// Build a routing snapshot from a host assignment table
    ///
    /// `assignments` are taken in replica-assignment order: the position of
    /// each host in the slice is its stable replica index for every shard it
    /// owns.
    pub fn new(num_shards: u32, assignments: &[HostShardAssignment], replicas: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(ChronoError::InvalidParams(
                "topology must have at least one shard".into(),
            ));
        }
        if replicas == 0 {
            return Err(ChronoError::InvalidParams(
                "topology must have at least one replica".into(),
            ));
        }

        let mut hosts_by_shard = vec![Vec::new(); num_shards as usize];
        let mut ordered_hosts_by_shard = vec![Vec::new(); num_shards as usize];
        let mut ordered_hosts = Vec::with_capacity(assignments.len());

        for (idx, assignment) in assignments.iter().enumerate() {
            ordered_hosts.push(assignment.host.clone());
            for &shard in &assignment.shards {
                if shard >= num_shards {
                    return Err(ChronoError::InvalidParams(format!(
                        "host {} assigned shard {} outside topology of {} shards",
                        assignment.host.id, shard, num_shards
                    )));
                }
                hosts_by_shard[shard as usize].push(assignment.host.clone());
                ordered_hosts_by_shard[shard as usize].push((idx, assignment.host.clone()));
            }
        }

        Ok(Self {
            num_shards,
            ordered_hosts,
            hosts_by_shard,
            ordered_hosts_by_shard,
            replicas,
            majority: majority(replicas),
        })
    }

    /// Number of shards in this snapshot
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Compute the shard owning an identifier; stable for the snapshot's lifetime
    pub fn shard(&self, id: &str) -> u32 {
        crc32fast::hash(id.as_bytes()) % self.num_shards
    }

    /// Route an identifier to its shard and replica hosts
    pub fn route(&self, id: &str) -> Result<(u32, &[Host])> {
        let shard = self.shard(id);
        let hosts = self.route_shard(shard)?;
        Ok((shard, hosts))
    }

    /// Replica hosts owning a shard
    pub fn route_shard(&self, shard: u32) -> Result<&[Host]> {
        match self.hosts_by_shard.get(shard as usize) {
            Some(hosts) if !hosts.is_empty() => Ok(hosts),
            _ => Err(ChronoError::UnownedShard(shard)),
        }
    }

    /// Invoke `f(replica_index, host)` for every host owning a shard,
    /// in replica-assignment order
    pub fn route_shard_for_each<F>(&self, shard: u32, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &Host),
    {
        match self.ordered_hosts_by_shard.get(shard as usize) {
            Some(hosts) if !hosts.is_empty() => {
                for (idx, host) in hosts {
                    f(*idx, host);
                }
                Ok(())
            }
            _ => Err(ChronoError::UnownedShard(shard)),
        }
    }

    /// All hosts in assignment order
    pub fn hosts(&self) -> &[Host] {
        &self.ordered_hosts
    }

    /// Number of hosts in the snapshot
    pub fn hosts_len(&self) -> usize {
        self.ordered_hosts.len()
    }

    /// Configured replication factor
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Quorum size, computed once at construction
    pub fn majority_replicas(&self) -> usize {
        self.majority
    }
}

fn majority(replicas: usize) -> usize {
    replicas / 2 + 1
}
