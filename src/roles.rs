//! Per-market role membership: validators, sequencers, admins

use crate::error::MarketError;
use crate::events::Event;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Validator,
    Sequencer,
    Admin,
}

impl Role {
    pub fn tag(&self) -> u8 {
        match self {
            Role::Validator => 0,
            Role::Sequencer => 1,
            Role::Admin => 2,
        }
    }

    /// Notification for a membership change
    pub fn event(&self, principal: Address, allowed: bool) -> Event {
        match self {
            Role::Validator => Event::ValidatorsUpdated { validator: principal, allowed },
            Role::Sequencer => Event::SequencersUpdated { sequencer: principal, allowed },
            Role::Admin => Event::AdminsUpdated { admin: principal, allowed },
        }
    }

    /// Rejection for a caller missing this role
    pub fn denied(&self, caller: Address) -> MarketError {
        match self {
            Role::Validator => MarketError::OnlyValidator(caller),
            Role::Sequencer => MarketError::OnlySequencer(caller),
            Role::Admin => MarketError::OnlyAdmin(caller),
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = MarketError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Role::Validator),
            1 => Ok(Role::Sequencer),
            2 => Ok(Role::Admin),
            other => Err(MarketError::UnknownRole(other)),
        }
    }
}

impl FromStr for Role {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "validator" => Ok(Role::Validator),
            "sequencer" => Ok(Role::Sequencer),
            "admin" => Ok(Role::Admin),
            other => match other.parse::<u8>() {
                Ok(tag) => Role::try_from(tag),
                Err(_) => Err(MarketError::UnknownRole(u8::MAX)),
            },
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Validator => write!(f, "validator"),
            Role::Sequencer => write!(f, "sequencer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Set of principals that remembers insertion order for enumeration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleSet {
    /// Fast membership lookup
    set: HashSet<Address>,
    /// Insertion order (front = oldest)
    order: Vec<Address>,
}

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if newly added
    pub fn insert(&mut self, principal: Address) -> bool {
        if self.set.insert(principal) {
            self.order.push(principal);
            true
        } else {
            false
        }
    }

    /// Returns true if it was a member
    pub fn remove(&mut self, principal: &Address) -> bool {
        if self.set.remove(principal) {
            self.order.retain(|p| p != principal);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, principal: &Address) -> bool {
        self.set.contains(principal)
    }

    pub fn members(&self) -> &[Address] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The three role sets of one market
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleStore {
    validators: RoleSet,
    sequencers: RoleSet,
    admins: RoleSet,
}

impl RoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, role: Role) -> &RoleSet {
        match role {
            Role::Validator => &self.validators,
            Role::Sequencer => &self.sequencers,
            Role::Admin => &self.admins,
        }
    }

    fn set_mut(&mut self, role: Role) -> &mut RoleSet {
        match role {
            Role::Validator => &mut self.validators,
            Role::Sequencer => &mut self.sequencers,
            Role::Admin => &mut self.admins,
        }
    }

    /// Add or remove one principal. Returns true if membership changed.
    pub fn update(&mut self, role: Role, principal: Address, allowed: bool) -> bool {
        let set = self.set_mut(role);
        if allowed { set.insert(principal) } else { set.remove(&principal) }
    }

    pub fn has(&self, role: Role, principal: &Address) -> bool {
        self.set(role).contains(principal)
    }

    /// Capability check used at every role-gated entry point
    pub fn require(&self, role: Role, caller: &Address) -> Result<(), MarketError> {
        if self.has(role, caller) { Ok(()) } else { Err(role.denied(*caller)) }
    }

    pub fn members(&self, role: Role) -> &[Address] {
        self.set(role).members()
    }

    pub fn count(&self, role: Role) -> usize {
        self.set(role).len()
    }
}
