use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use strum::Display;

use crate::tributary::config::{InitialRole, NodeSettings};
use crate::tributary::{Error, Result};


pub type NodeId = u8;

/// The id of the node that holds the master role in the default configuration.
/// Elections after its failure prefer node 1 over a random pick.
pub const PRIMARY_SEAT: NodeId = 2;
pub const PRIMARY_SEAT_SUCCESSOR: NodeId = 1;

/// A birth year partition of the user table. Each partition has exactly one fragment node.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Partition {
    #[strum(serialize = "2006")]
    Y2006,
    #[strum(serialize = "2007")]
    Y2007,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Y2006, Partition::Y2007];

    pub fn year(&self) -> i32 {
        match self {
            Partition::Y2006 => 2006,
            Partition::Y2007 => 2007,
        }
    }

    pub fn from_year(year: i32) -> Result<Self> {
        match year {
            2006 => Ok(Partition::Y2006),
            2007 => Ok(Partition::Y2007),
            _ => Err(Error::validation(format!("only birth years 2006 or 2007 are allowed, got {}", year))),
        }
    }

    pub fn of_birth_date(date: Option<NaiveDate>) -> Result<Self> {
        match date {
            Some(d) => Self::from_year(d.year()),
            None => Err(Error::validation("dateOfBirth is required (must be 2006 or 2007)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Role {
    Master,
    Replica(Partition),
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    pub fn partition(&self) -> Option<Partition> {
        match self {
            Role::Master => None,
            Role::Replica(p) => Some(*p),
        }
    }
}

impl From<InitialRole> for Role {
    fn from(role: InitialRole) -> Self {
        match role {
            InitialRole::Replica2006 => Role::Replica(Partition::Y2006),
            InitialRole::Replica2007 => Role::Replica(Partition::Y2007),
            // Settings::load rejects Invalid
            InitialRole::Master | InitialRole::Invalid => Role::Master,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("MASTER"),
            Role::Replica(p) => write!(f, "SLAVE {:02}", p.year() % 100),
        }
    }
}

#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
pub enum Status {
    #[strum(serialize = "UP")]
    Up,
    #[strum(serialize = "DOWN")]
    Down,
}

/// An immutable snapshot of one cluster member.
/// Transitions produce a new Node, the pool is shared by every snapshot of the same node.
pub struct Node<P> {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub role: Role,
    pub status: Status,
    pub pool: Arc<P>,
}

impl<P> Node<P> {
    pub fn new(settings: &NodeSettings, pool: Arc<P>) -> Self {
        Self{
            id: settings.id,
            host: settings.host.clone(),
            port: settings.port,
            role: settings.role.into(),
            status: Status::Up,
            pool,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == Status::Up
    }

    pub fn is_master(&self) -> bool {
        self.role.is_master()
    }

    pub fn is_replica(&self) -> bool {
        !self.role.is_master()
    }
}

impl<P> Clone for Node<P> {
    fn clone(&self) -> Self {
        Self{
            id: self.id,
            host: self.host.clone(),
            port: self.port,
            role: self.role,
            status: self.status,
            pool: self.pool.clone(),
        }
    }
}

impl<P> Debug for Node<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Node(id={}, host={}:{}, role={}, status={})", self.id, self.host, self.port, self.role, self.status))
    }
}

/// The 3 cluster nodes in registry order. Never mutated in place, see Registry::update.
pub struct Topology<P> {
    nodes: Vec<Node<P>>,
    generation: u64,
}

impl<P> Topology<P> {
    pub fn new(nodes: Vec<Node<P>>) -> Self {
        Self{ nodes, generation: 0 }
    }

    /// The topology replacing this one.
    pub(crate) fn succeed(&self, nodes: Vec<Node<P>>) -> Self {
        Self{ nodes, generation: self.generation + 1 }
    }

    /// Number of updates published since the registry was initialized.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nodes(&self) -> &[Node<P>] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item=&Node<P>> {
        self.nodes.iter()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<P>> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find<F: Fn(&Node<P>) -> bool>(&self, predicate: F) -> Option<&Node<P>> {
        self.nodes.iter().find(|n| predicate(n))
    }

    /// The node holding the master role, regardless of status.
    pub fn master(&self) -> Option<&Node<P>> {
        self.find(|n| n.is_master())
    }

    /// The node labelled as the replica of partition, regardless of status.
    pub fn replica_for(&self, partition: Partition) -> Option<&Node<P>> {
        self.find(|n| n.role == Role::Replica(partition))
    }

    pub fn down_nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().filter(|n| !n.is_up()).map(|n| n.id).collect()
    }

    pub(crate) fn to_vec(&self) -> Vec<Node<P>> {
        self.nodes.clone()
    }
}

impl<P> Debug for Topology<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}
