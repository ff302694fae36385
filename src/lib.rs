//! tgdh-tree - tree-based group Diffie-Hellman key agreement
//!
//! Members join and leave a binary key tree. Each membership change elects a
//! sponsor who refreshes the keys on its path to the root, so every current
//! member converges on the root group secret while former and future members
//! cannot compute it.

pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod messages;
pub mod node;
mod rekey;
pub mod tree;

// Re-export main types for convenience
pub use config::TreeConfig;
pub use crypto::{KeyPair, KeyPrimitive, Secret, X25519};
pub use directory::{InternalNodeDirectory, MemberDirectory};
pub use error::{TreeError, TreeResult};
pub use ledger::BroadcastLedger;
pub use messages::{KeyUpdate, MembershipEvent, RekeyBroadcast};
pub use node::{InternalId, MemberId, NodeRef};
pub use tree::KeyTree;
