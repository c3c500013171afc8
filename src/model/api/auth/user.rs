use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// A kind of user of our application, having defined rights. Users are
/// identified by the external identity layer; only their rights matter here.
pub trait User {
    /// The rights of this user type.
    const RIGHTS: Rights;
}

/// Different privilege levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

/// Someone entitled to cast votes.
#[derive(Debug, Clone, Copy)]
pub struct Voter;

/// Someone entitled to administer elections.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;
}
